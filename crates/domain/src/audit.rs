use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identity::IdentityId;

/// Stable audit event vocabulary.
///
/// Downstream audit-viewing tooling depends on these string values; adding
/// variants is backward compatible, renaming existing ones is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Emitted after every successfully reconciled external login.
    AuthnLoginSuccess,
    /// Emitted when the role diff adds a role to an identity.
    AuthzRoleAssigned,
    /// Emitted when the role diff removes a role from an identity.
    AuthzRoleRevoked,
    /// Emitted when a permission check fails, before the denial is raised.
    AuthzPermissionDenied,
    /// Emitted when an emergency break-glass grant is created.
    AuthzBreakGlassInvoked,
    /// Emitted when a break-glass grant is revoked.
    AuthzBreakGlassRevoked,
    /// Emitted when a research access grant is approved.
    AuthzResearchGrantCreated,
    /// Emitted when a research access grant is revoked.
    AuthzResearchGrantRevoked,
}

impl AuditEventType {
    /// Returns the stable storage value for this event type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthnLoginSuccess => "AUTHN_LOGIN_SUCCESS",
            Self::AuthzRoleAssigned => "AUTHZ_ROLE_ASSIGNED",
            Self::AuthzRoleRevoked => "AUTHZ_ROLE_REVOKED",
            Self::AuthzPermissionDenied => "AUTHZ_PERMISSION_DENIED",
            Self::AuthzBreakGlassInvoked => "AUTHZ_BREAK_GLASS_INVOKED",
            Self::AuthzBreakGlassRevoked => "AUTHZ_BREAK_GLASS_REVOKED",
            Self::AuthzResearchGrantCreated => "AUTHZ_RESEARCH_GRANT_CREATED",
            Self::AuthzResearchGrantRevoked => "AUTHZ_RESEARCH_GRANT_REVOKED",
        }
    }
}

/// Outcome recorded with every audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOutcome {
    /// Operation completed.
    Success,
    /// Operation was denied by policy.
    Deny,
    /// Operation completed but a follow-up step failed.
    PartialFailure,
}

impl AuditOutcome {
    /// Returns the stable storage value for this outcome.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Deny => "DENY",
            Self::PartialFailure => "PARTIAL_FAILURE",
        }
    }
}

/// One append-only entry of the security audit trail.
///
/// Events are never updated or deleted after insertion; the trail's
/// evidentiary value depends on immutability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event vocabulary entry.
    pub event_type: AuditEventType,
    /// Event timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Identity-provider id of the acting principal.
    pub actor_provider_id: String,
    /// External subject of the acting principal.
    pub actor_external_subject: String,
    /// Local identity id of the actor, when a backing record exists.
    pub actor_identity_id: Option<IdentityId>,
    /// Target entity type, when the event concerns a specific entity.
    pub target_entity_type: Option<String>,
    /// Target entity id, when the event concerns a specific entity.
    pub target_entity_id: Option<Uuid>,
    /// Recorded outcome.
    pub outcome: AuditOutcome,
    /// Human-readable details.
    pub details: Option<String>,
    /// Free-form structured metadata.
    pub metadata: Map<String, Value>,
}

impl AuditEvent {
    /// Creates an event with no target and empty metadata.
    #[must_use]
    pub fn new(
        event_type: AuditEventType,
        outcome: AuditOutcome,
        occurred_at: DateTime<Utc>,
        actor_provider_id: impl Into<String>,
        actor_external_subject: impl Into<String>,
        actor_identity_id: Option<IdentityId>,
    ) -> Self {
        Self {
            event_type,
            occurred_at,
            actor_provider_id: actor_provider_id.into(),
            actor_external_subject: actor_external_subject.into(),
            actor_identity_id,
            target_entity_type: None,
            target_entity_id: None,
            outcome,
            details: None,
            metadata: Map::new(),
        }
    }

    /// Attaches the target entity reference.
    #[must_use]
    pub fn with_target(mut self, entity_type: impl Into<String>, entity_id: Option<Uuid>) -> Self {
        self.target_entity_type = Some(entity_type.into());
        self.target_entity_id = entity_id;
        self
    }

    /// Attaches human-readable details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Adds one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
