use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use glacis_application::PermissionRepository;
use glacis_core::{AppError, AppResult};
use glacis_domain::RoleName;

/// PostgreSQL-backed store for the role-to-permission mapping.
#[derive(Clone)]
pub struct PostgresPermissionRepository {
    pool: PgPool,
}

impl PostgresPermissionRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    permission: String,
}

#[async_trait]
impl PermissionRepository for PostgresPermissionRepository {
    async fn list_permission_names_for_roles(
        &self,
        role_names: &[RoleName],
    ) -> AppResult<Vec<String>> {
        let names: Vec<&str> = role_names.iter().map(RoleName::as_str).collect();

        let rows = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT DISTINCT permission
            FROM role_permission
            WHERE role_name = ANY($1)
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to resolve role permissions: {error}"))
        })?;

        Ok(rows.into_iter().map(|row| row.permission).collect())
    }
}
