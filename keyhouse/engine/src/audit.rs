use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

/// Type of lifecycle event being tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    InitCodeIssued,
    SharesGenerated,
    ShareActivated,
    VaultUnlocked,
    ActivationRejected,
}

impl AuditEventType {
    pub fn label(&self) -> &'static str {
        match self {
            AuditEventType::InitCodeIssued => "INIT_CODE",
            AuditEventType::SharesGenerated => "KEYGEN",
            AuditEventType::ShareActivated => "ACTIVATE",
            AuditEventType::VaultUnlocked => "UNLOCK",
            AuditEventType::ActivationRejected => "REJECT",
        }
    }
}

/// Record of a vault lifecycle event. Share ids only ever appear as
/// fingerprints.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub fingerprint: Option<String>,
    pub message: String,
    pub timestamp: String,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, message: impl Into<String>) -> Self {
        Self {
            event_type,
            fingerprint: None,
            message: message.into(),
            timestamp: now_rfc3339(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }
}

/// Bounded in-memory audit trail
pub struct AuditTracker {
    records: Mutex<VecDeque<AuditRecord>>,
    max_entries: usize,
}

impl AuditTracker {
    pub fn new(max_entries: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(max_entries)),
            max_entries,
        }
    }

    /// Record a new event, evicting the oldest when full
    pub fn log(&self, record: AuditRecord) {
        info!(
            component = "audit",
            event = record.event_type.label(),
            fingerprint = record.fingerprint.as_deref().unwrap_or("-"),
            "{}",
            record.message
        );
        if self.max_entries == 0 {
            return;
        }
        // A panic while holding the lock cannot leave the deque half-updated.
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if records.len() == self.max_entries {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Most recent `count` records, newest first
    pub fn recent(&self, count: usize) -> Vec<AuditRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.iter().rev().take(count).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Helper to get current timestamp as RFC3339 string
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
