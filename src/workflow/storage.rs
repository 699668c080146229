/// SQLite persistence layer
///
/// Stores workflow definitions as JSON, the per-run replay history and the
/// interval markers that keep concurrent schedulers from firing the same
/// workflow twice in one window.

use crate::runtime::audit::{NodeStatus, ReplayRecord};
use crate::workflow::types::Workflow;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::{collections::HashMap, str::FromStr, time::Duration};

/// SQLite-based storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `database_url`
    ///
    /// In-memory databases are limited to a single connection, since every
    /// SQLite connection would otherwise get its own empty database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if !in_memory {
            if let Some(path) = database_url.strip_prefix("sqlite://") {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    /// Create tables and indexes; safe to call multiple times
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_workflows_name
            ON workflows(name)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replay_data (
                process_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                workflow_id TEXT NOT NULL,
                subprocess_id TEXT,
                node_id TEXT NOT NULL,
                node_type TEXT NOT NULL,
                status TEXT NOT NULL,
                message TEXT NOT NULL,
                data JSON NOT NULL,
                variables JSON NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (process_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_replay_workflow
            ON replay_data(workflow_id, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interval_markers (
                workflow_id TEXT PRIMARY KEY,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Store a new workflow or update an existing one
    pub async fn save_workflow(&self, workflow: &Workflow) -> Result<()> {
        let definition_json = serde_json::to_string(workflow)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, definition, updated_at)
            VALUES (?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_workflow(&self, id: &str) -> Result<Option<Workflow>> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                let workflow: Workflow = serde_json::from_str(&definition_json)?;
                Ok(Some(workflow))
            }
            None => Ok(None),
        }
    }

    pub async fn list_workflows(&self) -> Result<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM workflows ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| WorkflowMetadata {
                id: row.get("id"),
                name: row.get("name"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Load all workflows for registry initialization
    ///
    /// Rows whose definition no longer decodes are logged and skipped.
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, Workflow>> {
        let rows = sqlx::query("SELECT id, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            match serde_json::from_str::<Workflow>(&definition_json) {
                Ok(workflow) => {
                    workflows.insert(id, workflow);
                }
                Err(e) => tracing::error!("❌ Stored workflow {} does not decode: {}", id, e),
            }
        }

        Ok(workflows)
    }

    pub async fn delete_workflow(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_replay_record(&self, record: &ReplayRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO replay_data
                (process_id, sequence, workflow_id, subprocess_id, node_id, node_type,
                 status, message, data, variables, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.process_id)
        .bind(record.sequence as i64)
        .bind(&record.workflow_id)
        .bind(&record.subprocess_id)
        .bind(&record.node_id)
        .bind(&record.node_type)
        .bind(record.status.as_str())
        .bind(&record.message)
        .bind(serde_json::to_string(&record.data)?)
        .bind(serde_json::to_string(&record.variables)?)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// One entry per recorded run, newest first
    pub async fn list_history(&self, workflow_id: Option<&str>) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT r.process_id,
                   r.workflow_id,
                   COALESCE(w.name, r.workflow_id) AS workflow_name,
                   MIN(r.created_at) AS started_at,
                   MAX(r.created_at) AS finished_at,
                   COUNT(*) AS records,
                   SUM(CASE WHEN r.status = 'failed' THEN 1 ELSE 0 END) AS failures
            FROM replay_data r
            LEFT JOIN workflows w ON w.id = r.workflow_id
            WHERE (?1 IS NULL OR r.workflow_id = ?1)
            GROUP BY r.process_id, r.workflow_id
            ORDER BY started_at DESC
            "#,
        )
        .bind(workflow_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let failures: i64 = row.get("failures");
                Ok(RunSummary {
                    process_id: row.get("process_id"),
                    workflow_id: row.get("workflow_id"),
                    workflow_name: row.get("workflow_name"),
                    started_at: parse_timestamp(row.get("started_at"))?,
                    finished_at: parse_timestamp(row.get("finished_at"))?,
                    records: row.get::<i64, _>("records") as u64,
                    failed: failures > 0,
                })
            })
            .collect()
    }

    /// All records of one run in emission order
    pub async fn get_replay(&self, process_id: &str) -> Result<Vec<ReplayRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT process_id, sequence, workflow_id, subprocess_id, node_id, node_type,
                   status, message, data, variables, created_at
            FROM replay_data
            WHERE process_id = ?
            ORDER BY sequence ASC
            "#,
        )
        .bind(process_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status: String = row.get("status");
                let data: String = row.get("data");
                let variables: String = row.get("variables");
                Ok(ReplayRecord {
                    process_id: row.get("process_id"),
                    workflow_id: row.get("workflow_id"),
                    subprocess_id: row.get("subprocess_id"),
                    sequence: row.get::<i64, _>("sequence") as u64,
                    node_id: row.get("node_id"),
                    node_type: row.get("node_type"),
                    status: NodeStatus::from_str(&status)?,
                    message: row.get("message"),
                    data: serde_json::from_str(&data)?,
                    variables: serde_json::from_str(&variables)?,
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect()
    }

    /// Claim the current trigger window for a workflow
    ///
    /// Returns true when no unexpired marker exists; the marker then lives for
    /// `ttl`. Only one caller wins per window, across processes sharing the
    /// database.
    pub async fn try_acquire_interval_marker(&self, workflow_id: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now.saturating_add(ttl.as_millis().min(i64::MAX as u128) as i64);

        let result = sqlx::query(
            r#"
            INSERT INTO interval_markers (workflow_id, expires_at)
            VALUES (?, ?)
            ON CONFLICT(workflow_id) DO UPDATE SET expires_at = excluded.expires_at
            WHERE interval_markers.expires_at <= ?
            "#,
        )
        .bind(workflow_id)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn clear_interval_marker(&self, workflow_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM interval_markers WHERE workflow_id = ?")
            .bind(workflow_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc))
}

/// Basic workflow metadata for listing operations
#[derive(Debug, Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

/// History list entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub process_id: String,
    pub workflow_id: String,
    pub workflow_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: u64,
    pub failed: bool,
}
