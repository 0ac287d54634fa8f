//! Audit trail sinks.
//!
//! Entries are handed over after the owning transaction commits; a sink
//! never fails the operation that produced the entry.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use payflow_core::{OrganizationId, UserId};

/// One state change, with before/after snapshots where they exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub organization_id: OrganizationId,
    /// e.g. `document.created`, `approval.approved`, `offset.performed`.
    pub action: String,
    /// e.g. `payment_document`, `payment_approval`.
    pub entity: &'static str,
    pub entity_id: String,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub description: String,
    pub actor: UserId,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        organization_id: OrganizationId,
        action: impl Into<String>,
        entity: &'static str,
        entity_id: impl ToString,
        actor: UserId,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            organization_id,
            action: action.into(),
            entity,
            entity_id: entity_id.to_string(),
            old_values: None,
            new_values: None,
            description: String::new(),
            actor,
            at,
        }
    }

    /// Snapshot values; serialization failures leave the field empty.
    pub fn with_change<T: Serialize>(mut self, old: Option<&T>, new: Option<&T>) -> Self {
        self.old_values = old.and_then(|v| serde_json::to_value(v).ok());
        self.new_values = new.and_then(|v| serde_json::to_value(v).ok());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

impl<S: AuditSink + ?Sized> AuditSink for Arc<S> {
    fn record(&self, entry: AuditEntry) {
        (**self).record(entry)
    }
}

/// Emits entries as structured `tracing` events on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, entry: AuditEntry) {
        tracing::info!(
            target: "audit",
            organization_id = %entry.organization_id,
            action = %entry.action,
            entity = entry.entity,
            entity_id = %entry.entity_id,
            actor = %entry.actor,
            old = ?entry.old_values,
            new = ?entry.new_values,
            "{}",
            entry.description
        );
    }
}

/// Keeps entries in memory (tests, dev).
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.action).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
