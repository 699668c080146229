/// Floowsynk server entry point
///
/// Serves:
/// - Workflow management and runs at /api/workflows/* and /api/run
/// - Webhook triggers at /api/webhook/{workflow_id}
/// - Run history at /api/history and the live feed at /api/runs/live
/// - Health check at /healthz

use floowsynk::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration comes from FLOOWSYNK_* environment variables
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
