//! Worker lifecycle notifications
//!
//! The supervisor emits these asynchronously. Consumers should treat
//! unknown variants as ignorable.

use serde::{Deserialize, Serialize};

use crate::schema::Namespace;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Notification {
    /// Worker is serving its namespace
    WorkerStarted {
        namespace: Namespace,
        /// Number of registered handlers
        methods: usize,
    },

    /// Worker thread exited
    WorkerStopped {
        namespace: Namespace,
        /// Calls served over the worker's lifetime
        calls: u64,
        reason: String,
    },
}

impl Notification {
    /// Notification type as a string (for filtering)
    pub fn notification_type(&self) -> &'static str {
        match self {
            Notification::WorkerStarted { .. } => "WorkerStarted",
            Notification::WorkerStopped { .. } => "WorkerStopped",
        }
    }

    pub fn namespace(&self) -> Namespace {
        match self {
            Notification::WorkerStarted { namespace, .. }
            | Notification::WorkerStopped { namespace, .. } => *namespace,
        }
    }

    pub fn worker_started(namespace: Namespace, methods: usize) -> Self {
        Notification::WorkerStarted { namespace, methods }
    }

    pub fn worker_stopped(namespace: Namespace, calls: u64, reason: impl Into<String>) -> Self {
        Notification::WorkerStopped {
            namespace,
            calls,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_type() {
        let n = Notification::worker_started(Namespace::Ledger, 3);
        assert_eq!(n.notification_type(), "WorkerStarted");
        assert_eq!(n.namespace(), Namespace::Ledger);

        let n = Notification::worker_stopped(Namespace::Feed, 10, "shutdown");
        assert_eq!(n.notification_type(), "WorkerStopped");
    }

    #[test]
    fn test_json_shape() {
        let n = Notification::worker_stopped(Namespace::Distribution, 2, "shutdown");
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], "workerStopped");
        assert_eq!(json["namespace"], "distribution");
        assert_eq!(serde_json::from_value::<Notification>(json).unwrap(), n);
    }
}
