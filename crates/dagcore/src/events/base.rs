use crate::{LogLevel, NodeId, PortValues};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: ExecutionId,
        total_nodes: usize,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: ExecutionId,
        succeeded: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        component: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        outputs: PortValues,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execution_id: ExecutionId,
        node_id: NodeId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    NodeLog {
        execution_id: ExecutionId,
        node_id: NodeId,
        level: LogLevel,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Event emitter scoped to one node of one execution
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            sender,
        }
    }

    /// Forward a log line produced by the node's logic
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.sender.send(ExecutionEvent::NodeLog {
            execution_id: self.execution_id,
            node_id: self.node_id.clone(),
            level,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(execution_id, node_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_tags_logs_with_node() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let execution_id = ExecutionId::new_v4();

        bus.create_emitter(execution_id, "n1".into())
            .log(LogLevel::Warn, "careful");

        match rx.recv().await.unwrap() {
            ExecutionEvent::NodeLog {
                execution_id: id,
                node_id,
                level,
                message,
                ..
            } => {
                assert_eq!(id, execution_id);
                assert_eq!(node_id, "n1");
                assert_eq!(level, LogLevel::Warn);
                assert_eq!(message, "careful");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
