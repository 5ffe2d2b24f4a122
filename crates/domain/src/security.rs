use std::str::FromStr;

use glacis_core::{AppError, AppResult, NonEmptyString};
use serde::{Deserialize, Serialize};

/// Name of a role assigned to an identity.
///
/// Role names come from the provider-group mapping table and are matched
/// case-sensitively: provider ids and group names are IdP-controlled
/// identifiers, so no normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoleName(NonEmptyString);

impl RoleName {
    /// Creates a validated role name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = NonEmptyString::new(value).map_err(|_| {
            AppError::Validation("role name must not be empty or whitespace".to_owned())
        })?;

        Ok(Self(value))
    }

    /// Returns the underlying role name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<RoleName> for String {
    fn from(value: RoleName) -> Self {
        value.0.into()
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0.as_str())
    }
}

/// Permissions enforced by application policy checks.
///
/// Stored role-to-permission rows hold the stable string value; an unknown
/// stored value is a seed-data defect surfaced as an internal error, never
/// silently granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// Allows administering identity records and role assignments.
    AdminUsers,
    /// Allows reading the audit trail.
    AdminAuditView,
    /// Allows managing provider-group-to-role mappings.
    AdminIdpMappings,
    /// Allows reading the clinical worklist.
    WorklistRead,
    /// Allows mutating the clinical worklist.
    WorklistWrite,
    /// Allows invoking emergency break-glass access.
    BreakGlassInvoke,
    /// Allows approving and revoking research access grants.
    ResearchApprove,
    /// Allows reading research datasets under an active grant.
    ResearchDataRead,
}

impl Permission {
    /// Returns a stable storage value for this permission.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdminUsers => "ADMIN_USERS",
            Self::AdminAuditView => "ADMIN_AUDIT_VIEW",
            Self::AdminIdpMappings => "ADMIN_IDP_MAPPINGS",
            Self::WorklistRead => "WORKLIST_READ",
            Self::WorklistWrite => "WORKLIST_WRITE",
            Self::BreakGlassInvoke => "BREAK_GLASS_INVOKE",
            Self::ResearchApprove => "RESEARCH_APPROVE",
            Self::ResearchDataRead => "RESEARCH_DATA_READ",
        }
    }

    /// Returns all known permissions.
    #[must_use]
    pub fn all() -> &'static [Self] {
        const ALL: &[Permission] = &[
            Permission::AdminUsers,
            Permission::AdminAuditView,
            Permission::AdminIdpMappings,
            Permission::WorklistRead,
            Permission::WorklistWrite,
            Permission::BreakGlassInvoke,
            Permission::ResearchApprove,
            Permission::ResearchDataRead,
        ];

        ALL
    }
}

impl FromStr for Permission {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ADMIN_USERS" => Ok(Self::AdminUsers),
            "ADMIN_AUDIT_VIEW" => Ok(Self::AdminAuditView),
            "ADMIN_IDP_MAPPINGS" => Ok(Self::AdminIdpMappings),
            "WORKLIST_READ" => Ok(Self::WorklistRead),
            "WORKLIST_WRITE" => Ok(Self::WorklistWrite),
            "BREAK_GLASS_INVOKE" => Ok(Self::BreakGlassInvoke),
            "RESEARCH_APPROVE" => Ok(Self::ResearchApprove),
            "RESEARCH_DATA_READ" => Ok(Self::ResearchDataRead),
            _ => Err(AppError::Validation(format!(
                "unknown permission value '{value}'"
            ))),
        }
    }
}
