/// Execution audit trail
///
/// Every node transition of a run produces a `ReplayRecord`: the node status,
/// a message, the node's (rendered) data and a display-form snapshot of the
/// whole scope. Records are handed to an `AuditSink`; sinks must not block the
/// engine, so persistence goes through a channel drained by a background task.

use crate::workflow::storage::WorkflowStorage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, str::FromStr, sync::Arc, sync::Mutex};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
    Info,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Info => "info",
        }
    }
}

impl FromStr for NodeStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(NodeStatus::Running),
            "completed" => Ok(NodeStatus::Completed),
            "failed" => Ok(NodeStatus::Failed),
            "info" => Ok(NodeStatus::Info),
            other => Err(anyhow::anyhow!("Unknown node status: {}", other)),
        }
    }
}

/// One step of a run's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRecord {
    pub process_id: String,
    /// Workflow the run was started for
    pub workflow_id: String,
    /// Set when the node belongs to a sub-workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subprocess_id: Option<String>,
    /// Position of the record within the run
    pub sequence: u64,
    pub node_id: String,
    pub node_type: String,
    pub status: NodeStatus,
    pub message: String,
    pub data: Value,
    pub variables: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

/// Receiver of audit records; called inline by the engine
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &ReplayRecord);
}

/// Keeps records in memory, mostly for tests and quick runs
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<ReplayRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ReplayRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemorySink {
    fn emit(&self, record: &ReplayRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
    }
}

/// Publishes records to live subscribers (websocket clients)
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ReplayRecord>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplayRecord> {
        self.sender.subscribe()
    }
}

impl AuditSink for BroadcastSink {
    fn emit(&self, record: &ReplayRecord) {
        // No subscribers is the normal case
        let _ = self.sender.send(record.clone());
    }
}

/// Forwards every record to several sinks
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

impl AuditSink for FanoutSink {
    fn emit(&self, record: &ReplayRecord) {
        for sink in &self.sinks {
            sink.emit(record);
        }
    }
}

/// Persists records to the `replay_data` table off the execution path
#[derive(Debug, Clone)]
pub struct HistoryWriter {
    sender: mpsc::UnboundedSender<ReplayRecord>,
}

impl HistoryWriter {
    /// Start the background writer task
    ///
    /// The task ends once every `HistoryWriter` clone has been dropped and the
    /// queue is drained.
    pub fn spawn(storage: WorkflowStorage) -> (Self, JoinHandle<()>) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ReplayRecord>();

        let handle = tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(e) = storage.insert_replay_record(&record).await {
                    error!(
                        "❌ Failed to persist replay record {}#{}: {}",
                        record.process_id, record.sequence, e
                    );
                }
            }
            debug!("History writer stopped");
        });

        (Self { sender }, handle)
    }
}

impl AuditSink for HistoryWriter {
    fn emit(&self, record: &ReplayRecord) {
        if self.sender.send(record.clone()).is_err() {
            error!("❌ History writer is gone; dropping record for {}", record.process_id);
        }
    }
}
