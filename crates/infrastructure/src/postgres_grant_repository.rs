use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use glacis_application::GrantRepository;
use glacis_core::{AppError, AppResult};
use glacis_domain::{AuditEvent, GrantId, GrantKind, GrantScope, IdentityId, OverrideGrant};

use crate::postgres_audit_repository::insert_audit_event;


/// PostgreSQL-backed store for time-bounded override grants.
///
/// Lifecycle writes commit the grant row and its audit event in a single
/// transaction. Revocation is guarded at the row level: the update only
/// matches rows whose `revoked_at` is still NULL, so a racing second
/// revocation can never overwrite the first one's attribution.
#[derive(Clone)]
pub struct PostgresGrantRepository {
    pool: PgPool,
}

impl PostgresGrantRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct GrantRow {
    grant_id: Uuid,
    kind: String,
    identity_id: Uuid,
    scope_entity_type: String,
    scope_entity_id: Option<Uuid>,
    scope_filter: Option<serde_json::Value>,
    reason_code: String,
    justification: Option<String>,
    protocol_id: Option<String>,
    phi_access_level: Option<String>,
    metadata: serde_json::Value,
    approved_by_identity_id: Option<Uuid>,
    granted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    revoked_by_identity_id: Option<Uuid>,
    revocation_reason: Option<String>,
}

impl GrantRow {
    fn into_grant(self) -> AppResult<OverrideGrant> {
        let kind = match self.kind.as_str() {
            "BREAK_GLASS" => GrantKind::BreakGlass,
            "RESEARCH" => GrantKind::Research,
            other => {
                return Err(AppError::Internal(format!(
                    "stored grant '{}' has unknown kind '{other}'",
                    self.grant_id
                )));
            }
        };

        let filter = self.scope_filter.and_then(|value| match value {
            serde_json::Value::Object(entries) => Some(entries),
            _ => None,
        });

        let metadata = match self.metadata {
            serde_json::Value::Object(entries) => entries,
            _ => serde_json::Map::new(),
        };

        let mut scope = GrantScope::new(self.scope_entity_type, self.scope_entity_id);
        if let Some(filter) = filter {
            scope = scope.with_filter(filter);
        }

        Ok(OverrideGrant {
            id: GrantId::from_uuid(self.grant_id),
            kind,
            identity_id: IdentityId::from_uuid(self.identity_id),
            scope,
            reason_code: self.reason_code,
            justification: self.justification,
            protocol_id: self.protocol_id,
            phi_access_level: self.phi_access_level,
            metadata,
            approved_by_identity_id: self.approved_by_identity_id.map(IdentityId::from_uuid),
            granted_at: self.granted_at,
            expires_at: self.expires_at,
            revoked_at: self.revoked_at,
            revoked_by_identity_id: self.revoked_by_identity_id.map(IdentityId::from_uuid),
            revocation_reason: self.revocation_reason,
        })
    }
}

const GRANT_COLUMNS: &str = r#"
    grant_id,
    kind,
    identity_id,
    scope_entity_type,
    scope_entity_id,
    scope_filter,
    reason_code,
    justification,
    protocol_id,
    phi_access_level,
    metadata,
    approved_by_identity_id,
    granted_at,
    expires_at,
    revoked_at,
    revoked_by_identity_id,
    revocation_reason
"#;

#[async_trait]
impl GrantRepository for PostgresGrantRepository {
    async fn insert(&self, grant: &OverrideGrant, event: &AuditEvent) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to open grant transaction: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO override_grant (
                grant_id,
                kind,
                identity_id,
                scope_entity_type,
                scope_entity_id,
                scope_filter,
                reason_code,
                justification,
                protocol_id,
                phi_access_level,
                metadata,
                approved_by_identity_id,
                granted_at,
                expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(grant.id.as_uuid())
        .bind(grant.kind.as_str())
        .bind(grant.identity_id.as_uuid())
        .bind(&grant.scope.entity_type)
        .bind(grant.scope.entity_id)
        .bind(
            grant
                .scope
                .filter
                .clone()
                .map(serde_json::Value::Object),
        )
        .bind(&grant.reason_code)
        .bind(grant.justification.as_deref())
        .bind(grant.protocol_id.as_deref())
        .bind(grant.phi_access_level.as_deref())
        .bind(serde_json::Value::Object(grant.metadata.clone()))
        .bind(grant.approved_by_identity_id.map(|id| id.as_uuid()))
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .execute(&mut *transaction)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert grant: {error}")))?;

        insert_audit_event(&mut *transaction, event).await?;

        transaction
            .commit()
            .await
            .map_err(|error| AppError::Internal(format!("failed to commit grant insert: {error}")))
    }

    async fn find_by_id(
        &self,
        kind: GrantKind,
        grant_id: GrantId,
    ) -> AppResult<Option<OverrideGrant>> {
        let row = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM override_grant WHERE kind = $1 AND grant_id = $2"
        ))
        .bind(kind.as_str())
        .bind(grant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load grant '{grant_id}': {error}"))
        })?;

        row.map(GrantRow::into_grant).transpose()
    }

    async fn update_revocation(&self, grant: &OverrideGrant, event: &AuditEvent) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to open grant transaction: {error}"))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE override_grant
            SET revoked_at = $2,
                revoked_by_identity_id = $3,
                revocation_reason = $4
            WHERE grant_id = $1 AND revoked_at IS NULL
            "#,
        )
        .bind(grant.id.as_uuid())
        .bind(grant.revoked_at)
        .bind(grant.revoked_by_identity_id.map(|id| id.as_uuid()))
        .bind(grant.revocation_reason.as_deref())
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to revoke grant '{}': {error}", grant.id))
        })?;

        if updated.rows_affected() == 0 {
            let existing = self.find_by_id(grant.kind, grant.id).await?;
            return match existing {
                Some(_) => Err(AppError::AlreadyRevoked(format!(
                    "grant '{}' is already revoked",
                    grant.id
                ))),
                None => Err(AppError::NotFound(format!(
                    "grant '{}' does not exist",
                    grant.id
                ))),
            };
        }

        insert_audit_event(&mut *transaction, event).await?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit grant revocation: {error}"))
        })
    }

    async fn list_for_identity(
        &self,
        kind: GrantKind,
        identity_id: IdentityId,
    ) -> AppResult<Vec<OverrideGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM override_grant \
             WHERE kind = $1 AND identity_id = $2 \
             ORDER BY granted_at DESC"
        ))
        .bind(kind.as_str())
        .bind(identity_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to list grants for identity '{identity_id}': {error}"
            ))
        })?;

        rows.into_iter().map(GrantRow::into_grant).collect()
    }

    async fn list_all(&self, kind: GrantKind) -> AppResult<Vec<OverrideGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM override_grant \
             WHERE kind = $1 \
             ORDER BY granted_at DESC"
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list grants: {error}"))
        })?;

        rows.into_iter().map(GrantRow::into_grant).collect()
    }

    async fn list_active(
        &self,
        kind: GrantKind,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<OverrideGrant>> {
        let rows = sqlx::query_as::<_, GrantRow>(&format!(
            "SELECT {GRANT_COLUMNS} FROM override_grant \
             WHERE kind = $1 AND revoked_at IS NULL AND expires_at > $2 \
             ORDER BY granted_at DESC"
        ))
        .bind(kind.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to list active grants: {error}"))
        })?;

        rows.into_iter().map(GrantRow::into_grant).collect()
    }
}
