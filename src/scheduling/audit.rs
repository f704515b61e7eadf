// Audit Logger
//
// Records booking and assignment decisions to the audit trail.
// Failures are logged and never block the scheduling operation.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An audit event to record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub tenant_id: Option<Uuid>,
    /// "booking" or "service_request"
    pub entity: &'static str,
    pub entity_id: Uuid,
    pub action: &'static str,
    pub data: JsonValue,
    pub effect: String,
}

/// Audit trail collaborator
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an entry; implementations swallow their own failures
    async fn record(&self, entry: AuditEntry);
}

/// Audit sink writing to `scheduling_audit_log`
pub struct PgAuditLogger {
    pool: PgPool,
}

impl PgAuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_audit_record(&self, entry: &AuditEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO scheduling_audit_log (tenant_id, entity, entity_id, action, data, effect)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.tenant_id)
        .bind(entry.entity)
        .bind(entry.entity_id)
        .bind(entry.action)
        .bind(&entry.data)
        .bind(&entry.effect)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuditSink for PgAuditLogger {
    async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.insert_audit_record(&entry).await {
            tracing::warn!(
                "Failed to record audit entry {} {} for {}: {}",
                entry.entity,
                entry.action,
                entry.entity_id,
                e
            );
        }
    }
}

/// Audit sink that only writes to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditLogger;

#[async_trait]
impl AuditSink for LogAuditLogger {
    async fn record(&self, entry: AuditEntry) {
        tracing::info!(
            entity = entry.entity,
            entity_id = %entry.entity_id,
            action = entry.action,
            data = %entry.data,
            "{}",
            entry.effect
        );
    }
}

/// Audit sink keeping entries in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    async fn record(&self, entry: AuditEntry) {
        self.entries.write().await.push(entry);
    }
}
