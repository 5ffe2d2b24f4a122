//! Application services and ports for identity reconciliation, RBAC
//! resolution, and time-bounded override grants.

#![forbid(unsafe_code)]

mod audit_trail;
mod clock;
mod config;
mod grant_ledger;
mod identity_reconciler;
mod permission_resolver;
mod role_group_mapper;

pub use audit_trail::AuditRepository;
pub use clock::{Clock, SystemClock};
pub use config::{GrantTtlConfig, ReconcilerConfig};
pub use grant_ledger::{CreateGrantInput, GrantLedger, GrantRepository};
pub use identity_reconciler::{IdentityReconciler, IdentityRepository, ReconciledLogin};
pub use permission_resolver::{PermissionRepository, PermissionResolver};
pub use role_group_mapper::{GroupMappingRepository, RoleGroupMapper};
