use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use glacis_application::GroupMappingRepository;
use glacis_core::{AppError, AppResult};


/// PostgreSQL-backed store for provider group-to-role mappings.
///
/// Mapping rows are joined against the `rbac_role` vocabulary, so a row
/// naming a role that does not exist contributes nothing, the same way an
/// unmapped group does.
#[derive(Clone)]
pub struct PostgresGroupMappingRepository {
    pool: PgPool,
}

impl PostgresGroupMappingRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct MappingRow {
    role_name: String,
}

#[async_trait]
impl GroupMappingRepository for PostgresGroupMappingRepository {
    async fn list_role_names(
        &self,
        provider_id: &str,
        group_names: &[String],
    ) -> AppResult<Vec<String>> {
        let rows = sqlx::query_as::<_, MappingRow>(
            r#"
            SELECT DISTINCT mapping.role_name
            FROM idp_group_mapping AS mapping
            JOIN rbac_role AS vocabulary ON vocabulary.role_name = mapping.role_name
            WHERE mapping.provider_id = $1 AND mapping.group_name = ANY($2)
            "#,
        )
        .bind(provider_id)
        .bind(group_names)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to resolve group mappings for provider '{provider_id}': {error}"
            ))
        })?;

        Ok(rows.into_iter().map(|row| row.role_name).collect())
    }
}
