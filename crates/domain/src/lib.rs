//! Domain records and pure rules for the Glacis identity backend.

#![forbid(unsafe_code)]

mod audit;
mod claims;
mod grant;
mod identity;
mod security;

pub use audit::{AuditEvent, AuditEventType, AuditOutcome};
pub use claims::sanitize_claims;
pub use grant::{GrantId, GrantKind, GrantScope, OverrideGrant};
pub use identity::{Identity, IdentityId};
pub use security::{Permission, RoleName};
