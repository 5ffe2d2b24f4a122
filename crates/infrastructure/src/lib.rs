//! PostgreSQL adapters for the Glacis application ports.

#![forbid(unsafe_code)]

mod postgres_audit_repository;
mod postgres_grant_repository;
mod postgres_group_mapping_repository;
mod postgres_identity_repository;
mod postgres_permission_repository;

pub use postgres_audit_repository::PostgresAuditRepository;
pub use postgres_grant_repository::PostgresGrantRepository;
pub use postgres_group_mapping_repository::PostgresGroupMappingRepository;
pub use postgres_identity_repository::PostgresIdentityRepository;
pub use postgres_permission_repository::PostgresPermissionRepository;
