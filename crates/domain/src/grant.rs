use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identity::IdentityId;

/// Unique identifier for an override grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GrantId(Uuid);

impl GrantId {
    /// Creates a new random grant identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a grant identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for GrantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GrantId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Kind of a time-bounded override grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GrantKind {
    /// Emergency, self-revocable access override.
    BreakGlass,
    /// Approver-issued access override scoped to a research protocol.
    Research,
}

impl GrantKind {
    /// Returns the stable storage value for this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BreakGlass => "BREAK_GLASS",
            Self::Research => "RESEARCH",
        }
    }
}

/// Entity scope an override grant applies to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrantScope {
    /// Entity type the grant widens access to.
    pub entity_type: String,
    /// Specific entity, when the grant is not type-wide.
    pub entity_id: Option<Uuid>,
    /// Dataset filter for research grants.
    pub filter: Option<Map<String, Value>>,
}

impl GrantScope {
    /// Creates a scope covering one entity type, optionally narrowed to one
    /// entity.
    #[must_use]
    pub fn new(entity_type: impl Into<String>, entity_id: Option<Uuid>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            filter: None,
        }
    }

    /// Attaches a dataset filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Map<String, Value>) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Time-bounded access override.
///
/// A grant is active iff it has not been revoked and its expiry lies in the
/// future; expiry is always evaluated against the caller-supplied clock,
/// never pre-materialized as a stored status. Once inactive, a grant never
/// transitions back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideGrant {
    /// Stable grant identifier.
    pub id: GrantId,
    /// Grant kind.
    pub kind: GrantKind,
    /// Grantee identity.
    pub identity_id: IdentityId,
    /// Scope the grant applies to.
    pub scope: GrantScope,
    /// Short machine-readable reason code.
    pub reason_code: String,
    /// Free-form justification captured at creation.
    pub justification: Option<String>,
    /// Research protocol reference.
    pub protocol_id: Option<String>,
    /// PHI access level approved for research grants.
    pub phi_access_level: Option<String>,
    /// Free-form metadata captured at creation.
    pub metadata: Map<String, Value>,
    /// Identity that approved the grant, when different from the grantee.
    pub approved_by_identity_id: Option<IdentityId>,
    /// Creation timestamp.
    pub granted_at: DateTime<Utc>,
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
    /// Revocation timestamp, set at most once.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Identity that revoked the grant.
    pub revoked_by_identity_id: Option<IdentityId>,
    /// Reason supplied at revocation.
    pub revocation_reason: Option<String>,
}

impl OverrideGrant {
    /// Returns whether the grant is active at the given instant.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use crate::identity::IdentityId;

    use super::{GrantId, GrantKind, GrantScope, OverrideGrant};

    fn grant(kind: GrantKind) -> OverrideGrant {
        let now = Utc::now();
        OverrideGrant {
            id: GrantId::new(),
            kind,
            identity_id: IdentityId::new(),
            scope: GrantScope::new("CASE", None),
            reason_code: "EMERGENT_CARE".to_owned(),
            justification: None,
            protocol_id: None,
            phi_access_level: None,
            metadata: Map::new(),
            approved_by_identity_id: None,
            granted_at: now,
            expires_at: now + Duration::hours(24),
            revoked_at: None,
            revoked_by_identity_id: None,
            revocation_reason: None,
        }
    }

    #[test]
    fn grant_is_active_until_expiry() {
        let grant = grant(GrantKind::BreakGlass);
        assert!(grant.is_active(grant.granted_at + Duration::hours(1)));
        assert!(!grant.is_active(grant.expires_at));
        assert!(!grant.is_active(grant.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn revocation_deactivates_before_expiry() {
        let mut grant = grant(GrantKind::Research);
        grant.revoked_at = Some(grant.granted_at + Duration::minutes(5));
        assert!(!grant.is_active(grant.granted_at + Duration::minutes(10)));
    }
}
