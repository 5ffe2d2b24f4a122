use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use glacis_application::IdentityRepository;
use glacis_core::{AppError, AppResult};
use glacis_domain::{AuditEvent, Identity, IdentityId, RoleName};

use crate::postgres_audit_repository::insert_audit_event;

#[cfg(test)]
mod tests;

/// PostgreSQL-backed store for canonical identity records.
///
/// The `(provider_id, external_subject)` uniqueness constraint in the schema
/// is the authority on identity uniqueness; a violated insert surfaces as
/// `Conflict` for the reconciler to recover from.
#[derive(Clone)]
pub struct PostgresIdentityRepository {
    pool: PgPool,
}

impl PostgresIdentityRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load_roles(&self, identity_id: Uuid) -> AppResult<BTreeSet<RoleName>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT role_name
            FROM identity_role
            WHERE identity_id = $1
            "#,
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to load roles for identity '{identity_id}': {error}"
            ))
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|row| RoleName::new(row.role_name).ok())
            .collect())
    }

    async fn hydrate(&self, row: Option<IdentityRow>) -> AppResult<Option<Identity>> {
        let Some(row) = row else {
            return Ok(None);
        };

        let roles = self.load_roles(row.identity_id).await?;
        Ok(Some(row.into_identity(roles)))
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    role_name: String,
}

#[derive(Debug, FromRow)]
struct IdentityRow {
    identity_id: Uuid,
    provider_id: Option<String>,
    external_subject: Option<String>,
    username: Option<String>,
    display_name: Option<String>,
    display_short: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    middle_name: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
    email: Option<String>,
    is_active: bool,
    attributes: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
}

impl IdentityRow {
    fn into_identity(self, roles: BTreeSet<RoleName>) -> Identity {
        let attributes = match self.attributes {
            serde_json::Value::Object(entries) => entries,
            _ => serde_json::Map::new(),
        };

        Identity {
            id: IdentityId::from_uuid(self.identity_id),
            provider_id: self.provider_id,
            external_subject: self.external_subject,
            username: self.username,
            display_name: self.display_name,
            display_short: self.display_short,
            given_name: self.given_name,
            family_name: self.family_name,
            middle_name: self.middle_name,
            prefix: self.prefix,
            suffix: self.suffix,
            email: self.email,
            active: self.is_active,
            attributes,
            roles,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

const IDENTITY_COLUMNS: &str = r#"
    identity_id,
    provider_id,
    external_subject,
    username,
    display_name,
    display_short,
    given_name,
    family_name,
    middle_name,
    prefix,
    suffix,
    email,
    is_active,
    attributes,
    created_at,
    updated_at,
    last_seen_at
"#;

#[async_trait]
impl IdentityRepository for PostgresIdentityRepository {
    async fn find_by_natural_key(
        &self,
        provider_id: &str,
        external_subject: &str,
    ) -> AppResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identity WHERE provider_id = $1 AND external_subject = $2"
        ))
        .bind(provider_id)
        .bind(external_subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to look up identity for subject '{external_subject}': {error}"
            ))
        })?;

        self.hydrate(row).await
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identity WHERE email = $1 ORDER BY created_at LIMIT 1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to look up identity by email: {error}"))
        })?;

        self.hydrate(row).await
    }

    async fn find_by_id(&self, identity_id: IdentityId) -> AppResult<Option<Identity>> {
        let row = sqlx::query_as::<_, IdentityRow>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM identity WHERE identity_id = $1"
        ))
        .bind(identity_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load identity '{identity_id}': {error}"))
        })?;

        self.hydrate(row).await
    }

    async fn insert(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to open identity transaction: {error}"))
        })?;

        sqlx::query(
            r#"
            INSERT INTO identity (
                identity_id,
                provider_id,
                external_subject,
                username,
                display_name,
                display_short,
                given_name,
                family_name,
                middle_name,
                prefix,
                suffix,
                email,
                is_active,
                attributes,
                created_at,
                updated_at,
                last_seen_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(identity.provider_id.as_deref())
        .bind(identity.external_subject.as_deref())
        .bind(identity.username.as_deref())
        .bind(identity.display_name.as_deref())
        .bind(identity.display_short.as_deref())
        .bind(identity.given_name.as_deref())
        .bind(identity.family_name.as_deref())
        .bind(identity.middle_name.as_deref())
        .bind(identity.prefix.as_deref())
        .bind(identity.suffix.as_deref())
        .bind(identity.email.as_deref())
        .bind(identity.active)
        .bind(serde_json::Value::Object(identity.attributes.clone()))
        .bind(identity.created_at)
        .bind(identity.updated_at)
        .bind(identity.last_seen_at)
        .execute(&mut *transaction)
        .await
        .map_err(map_identity_write_error)?;

        replace_roles(&mut transaction, identity).await?;

        for event in events {
            insert_audit_event(&mut *transaction, event).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit identity insert: {error}"))
        })
    }

    async fn update(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to open identity transaction: {error}"))
        })?;

        let updated = sqlx::query(
            r#"
            UPDATE identity
            SET provider_id = $2,
                external_subject = $3,
                username = $4,
                display_name = $5,
                display_short = $6,
                given_name = $7,
                family_name = $8,
                middle_name = $9,
                prefix = $10,
                suffix = $11,
                email = $12,
                is_active = $13,
                attributes = $14,
                updated_at = $15,
                last_seen_at = $16
            WHERE identity_id = $1
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(identity.provider_id.as_deref())
        .bind(identity.external_subject.as_deref())
        .bind(identity.username.as_deref())
        .bind(identity.display_name.as_deref())
        .bind(identity.display_short.as_deref())
        .bind(identity.given_name.as_deref())
        .bind(identity.family_name.as_deref())
        .bind(identity.middle_name.as_deref())
        .bind(identity.prefix.as_deref())
        .bind(identity.suffix.as_deref())
        .bind(identity.email.as_deref())
        .bind(identity.active)
        .bind(serde_json::Value::Object(identity.attributes.clone()))
        .bind(identity.updated_at)
        .bind(identity.last_seen_at)
        .execute(&mut *transaction)
        .await
        .map_err(map_identity_write_error)?;

        if updated.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "identity '{}' does not exist",
                identity.id
            )));
        }

        sqlx::query("DELETE FROM identity_role WHERE identity_id = $1")
            .bind(identity.id.as_uuid())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to clear identity roles: {error}"))
            })?;

        replace_roles(&mut transaction, identity).await?;

        for event in events {
            insert_audit_event(&mut *transaction, event).await?;
        }

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit identity update: {error}"))
        })
    }
}

async fn replace_roles(
    transaction: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    identity: &Identity,
) -> AppResult<()> {
    for role in &identity.roles {
        sqlx::query(
            r#"
            INSERT INTO identity_role (identity_id, role_name)
            VALUES ($1, $2)
            ON CONFLICT (identity_id, role_name) DO NOTHING
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(role.as_str())
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to store identity role: {error}"))
        })?;
    }

    Ok(())
}

fn map_identity_write_error(error: sqlx::Error) -> AppError {
    match &error {
        sqlx::Error::Database(database_error) if database_error.is_unique_violation() => {
            AppError::Conflict("identity natural key already exists".to_owned())
        }
        _ => AppError::Internal(format!("failed to persist identity: {error}")),
    }
}
