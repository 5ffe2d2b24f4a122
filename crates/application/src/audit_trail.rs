use async_trait::async_trait;

use glacis_core::AppResult;
use glacis_domain::AuditEvent;

/// Append-only sink for security audit events.
///
/// Implementations must never silently drop an event: a failed write is
/// reported as [`glacis_core::AppError::AuditWriteFailure`] so callers can
/// decide whether the enclosing operation survives. Nothing in this crate
/// updates or deletes an event once appended.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Appends one event to the trail.
    async fn append_event(&self, event: AuditEvent) -> AppResult<()>;
}
