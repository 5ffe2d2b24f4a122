use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use glacis_application::AuditRepository;
use glacis_core::{AppError, AppResult};
use glacis_domain::AuditEvent;

/// Append-only PostgreSQL store for the security audit trail.
///
/// Rows are only ever inserted; no update or delete path exists here. Events
/// tied to a state change are written through [`insert_audit_event`] inside
/// the owning repository's transaction; this standalone adapter serves the
/// paths with no accompanying state change, such as permission denials.
#[derive(Clone)]
pub struct PostgresAuditRepository {
    pool: PgPool,
}

impl PostgresAuditRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PostgresAuditRepository {
    async fn append_event(&self, event: AuditEvent) -> AppResult<()> {
        let mut connection = self.pool.acquire().await.map_err(|error| {
            AppError::AuditWriteFailure(format!(
                "failed to acquire a connection for the audit trail: {error}"
            ))
        })?;

        insert_audit_event(&mut connection, &event).await
    }
}

/// Inserts one audit row on an existing connection, so callers holding a
/// transaction can commit the event together with their state change.
pub(crate) async fn insert_audit_event(
    connection: &mut PgConnection,
    event: &AuditEvent,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO audit_event (
            occurred_at,
            event_type,
            actor_identity_id,
            actor_provider_id,
            actor_external_subject,
            target_entity_type,
            target_entity_id,
            outcome,
            details,
            metadata
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.occurred_at)
    .bind(event.event_type.as_str())
    .bind(event.actor_identity_id.map(|id| id.as_uuid()))
    .bind(&event.actor_provider_id)
    .bind(&event.actor_external_subject)
    .bind(event.target_entity_type.as_deref())
    .bind(event.target_entity_id)
    .bind(event.outcome.as_str())
    .bind(event.details.as_deref())
    .bind(serde_json::Value::Object(event.metadata.clone()))
    .execute(connection)
    .await
    .map_err(|error| {
        AppError::AuditWriteFailure(format!("failed to append audit event: {error}"))
    })?;

    Ok(())
}
