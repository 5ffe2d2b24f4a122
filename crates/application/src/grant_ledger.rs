use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};

use glacis_core::{ActorIdentity, AppError, AppResult};
use glacis_domain::{
    AuditEvent, AuditEventType, AuditOutcome, GrantId, GrantKind, GrantScope, IdentityId,
    OverrideGrant, Permission,
};

use crate::clock::Clock;
use crate::config::GrantTtlConfig;
use crate::permission_resolver::PermissionResolver;

/// Persistence port for override grants.
///
/// Lifecycle writes carry their audit event so the store can commit both in
/// one transaction; a grant must never exist without its creation event, nor
/// a revocation without its revocation event.
#[async_trait]
pub trait GrantRepository: Send + Sync {
    /// Inserts a new grant and its creation event atomically.
    async fn insert(&self, grant: &OverrideGrant, event: &AuditEvent) -> AppResult<()>;

    /// Loads a grant of the given kind.
    async fn find_by_id(&self, kind: GrantKind, grant_id: GrantId)
    -> AppResult<Option<OverrideGrant>>;

    /// Persists the revocation fields of a grant together with the
    /// revocation event. Implementations must guard against a concurrent
    /// revocation and report `AlreadyRevoked` instead of clobbering the
    /// first revocation's attribution.
    async fn update_revocation(&self, grant: &OverrideGrant, event: &AuditEvent)
    -> AppResult<()>;

    /// Lists all grants of a kind held by one identity.
    async fn list_for_identity(
        &self,
        kind: GrantKind,
        identity_id: IdentityId,
    ) -> AppResult<Vec<OverrideGrant>>;

    /// Lists every grant of a kind, regardless of grantee or state.
    async fn list_all(&self, kind: GrantKind) -> AppResult<Vec<OverrideGrant>>;

    /// Lists grants of a kind that are active at the given instant. Expiry
    /// is evaluated at query time, never pre-materialized.
    async fn list_active(&self, kind: GrantKind, now: DateTime<Utc>)
    -> AppResult<Vec<OverrideGrant>>;
}

/// Input for creating an override grant.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateGrantInput {
    /// Grantee, required for research grants; break-glass grants always go
    /// to the invoking identity.
    pub grantee_identity_id: Option<IdentityId>,
    /// Scope the grant applies to.
    pub scope: GrantScope,
    /// Short machine-readable reason code.
    pub reason_code: String,
    /// Free-form justification.
    pub justification: Option<String>,
    /// Research protocol reference.
    pub protocol_id: Option<String>,
    /// PHI access level approved for research grants.
    pub phi_access_level: Option<String>,
    /// Free-form metadata.
    pub metadata: Map<String, Value>,
    /// Explicit expiry; defaults to the configured TTL when absent.
    pub expires_at: Option<DateTime<Utc>>,
}

impl CreateGrantInput {
    /// Creates an input with the required fields and empty extras.
    #[must_use]
    pub fn new(scope: GrantScope, reason_code: impl Into<String>) -> Self {
        Self {
            grantee_identity_id: None,
            scope,
            reason_code: reason_code.into(),
            justification: None,
            protocol_id: None,
            phi_access_level: None,
            metadata: Map::new(),
            expires_at: None,
        }
    }
}

/// Create/list/revoke engine for time-bounded override grants.
///
/// One shared state machine instantiated per kind. Break-glass grants are an
/// emergency self-service mechanism: the grantee may always shut their own
/// grant off, while administrators may revoke any. Research grants are
/// approver-controlled end to end; the grantee is not assumed to control
/// their own research-data access window.
#[derive(Clone)]
pub struct GrantLedger {
    kind: GrantKind,
    default_ttl: Duration,
    resolver: PermissionResolver,
    grants: Arc<dyn GrantRepository>,
    clock: Arc<dyn Clock>,
}

impl GrantLedger {
    /// Creates the break-glass instantiation.
    #[must_use]
    pub fn break_glass(
        resolver: PermissionResolver,
        grants: Arc<dyn GrantRepository>,
        clock: Arc<dyn Clock>,
        config: &GrantTtlConfig,
    ) -> Self {
        Self {
            kind: GrantKind::BreakGlass,
            default_ttl: config.break_glass_ttl,
            resolver,
            grants,
            clock,
        }
    }

    /// Creates the research instantiation.
    #[must_use]
    pub fn research(
        resolver: PermissionResolver,
        grants: Arc<dyn GrantRepository>,
        clock: Arc<dyn Clock>,
        config: &GrantTtlConfig,
    ) -> Self {
        Self {
            kind: GrantKind::Research,
            default_ttl: config.research_ttl,
            resolver,
            grants,
            clock,
        }
    }

    /// Returns the kind this ledger manages.
    #[must_use]
    pub fn kind(&self) -> GrantKind {
        self.kind
    }

    /// Creates a grant after the kind's elevation permission check.
    ///
    /// A failed check has already produced the denial audit event by the
    /// time creation aborts. `expires_at` defaults to now plus the
    /// configured TTL for this kind.
    pub async fn create(
        &self,
        actor: &ActorIdentity,
        input: CreateGrantInput,
    ) -> AppResult<OverrideGrant> {
        let now = self.clock.now();
        self.validate_create(&input, now)?;

        match self.kind {
            GrantKind::BreakGlass => {
                self.resolver
                    .require_permission(
                        actor,
                        Permission::BreakGlassInvoke,
                        input.scope.entity_type.as_str(),
                        input.scope.entity_id,
                        "Break-glass invoke denied",
                    )
                    .await?;
            }
            GrantKind::Research => {
                self.resolver
                    .require_permission(
                        actor,
                        Permission::ResearchApprove,
                        "RESEARCH_ACCESS_GRANT",
                        input.scope.entity_id,
                        "Research grant approval denied",
                    )
                    .await?;
            }
        }

        let actor_identity_id = self.resolver.resolve_identity_id(actor).await?;
        let (grantee, approved_by) = match self.kind {
            GrantKind::BreakGlass => (actor_identity_id, None),
            GrantKind::Research => {
                let grantee = input.grantee_identity_id.ok_or_else(|| {
                    AppError::Validation(
                        "research grants require a grantee identity id".to_owned(),
                    )
                })?;
                (grantee, Some(actor_identity_id))
            }
        };

        let grant = OverrideGrant {
            id: GrantId::new(),
            kind: self.kind,
            identity_id: grantee,
            scope: input.scope,
            reason_code: input.reason_code,
            justification: input.justification,
            protocol_id: input.protocol_id,
            phi_access_level: input.phi_access_level,
            metadata: input.metadata,
            approved_by_identity_id: approved_by,
            granted_at: now,
            expires_at: input.expires_at.unwrap_or(now + self.default_ttl),
            revoked_at: None,
            revoked_by_identity_id: None,
            revocation_reason: None,
        };

        let event = self.created_event(actor, actor_identity_id, &grant, now);
        self.grants.insert(&grant, &event).await?;

        tracing::info!(
            grant_id = %grant.id,
            kind = self.kind.as_str(),
            expires_at = %grant.expires_at,
            "created override grant"
        );

        Ok(grant)
    }

    /// Revokes a grant, recording actor attribution exactly once.
    ///
    /// Revoking a grant that is already revoked fails with `AlreadyRevoked`
    /// and leaves the first revocation's fields untouched.
    pub async fn revoke(
        &self,
        actor: &ActorIdentity,
        grant_id: GrantId,
        reason: Option<&str>,
    ) -> AppResult<OverrideGrant> {
        let mut grant = self
            .grants
            .find_by_id(self.kind, grant_id)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "{} grant '{grant_id}' does not exist",
                    self.kind.as_str()
                ))
            })?;

        let actor_identity_id = self.authorize_revocation(actor, &grant).await?;

        if grant.revoked_at.is_some() {
            return Err(AppError::AlreadyRevoked(format!(
                "{} grant '{grant_id}' is already revoked",
                self.kind.as_str()
            )));
        }

        let now = self.clock.now();
        grant.revoked_at = Some(now);
        grant.revoked_by_identity_id = Some(actor_identity_id);
        grant.revocation_reason = reason.map(str::to_owned);

        let event = self.revoked_event(actor, actor_identity_id, &grant, now);
        self.grants.update_revocation(&grant, &event).await?;

        tracing::info!(
            grant_id = %grant.id,
            kind = self.kind.as_str(),
            "revoked override grant"
        );

        Ok(grant)
    }

    /// Lists grants held by one identity.
    ///
    /// Break-glass callers may always list their own grants; listing another
    /// identity's requires administrative permission. Research listings
    /// always require the approver permission, and omitting the grantee
    /// lists every research grant.
    pub async fn list_for_identity(
        &self,
        actor: &ActorIdentity,
        identity_id: Option<IdentityId>,
    ) -> AppResult<Vec<OverrideGrant>> {
        let actor_identity_id = self.resolver.resolve_identity_id(actor).await?;

        let target = match self.kind {
            GrantKind::BreakGlass => {
                let target = identity_id.unwrap_or(actor_identity_id);
                if target != actor_identity_id {
                    self.resolver
                        .require_permission(
                            actor,
                            Permission::AdminUsers,
                            "BREAK_GLASS_GRANT",
                            None,
                            "Break-glass listing denied",
                        )
                        .await?;
                }
                target
            }
            GrantKind::Research => {
                self.resolver
                    .require_permission(
                        actor,
                        Permission::ResearchApprove,
                        "RESEARCH_ACCESS_GRANT",
                        None,
                        "Research grant listing denied",
                    )
                    .await?;
                let Some(target) = identity_id else {
                    return self.grants.list_all(self.kind).await;
                };
                target
            }
        };

        self.grants.list_for_identity(self.kind, target).await
    }

    /// Lists the grants of this kind that are active right now.
    pub async fn list_active(&self, actor: &ActorIdentity) -> AppResult<Vec<OverrideGrant>> {
        let permission = match self.kind {
            GrantKind::BreakGlass => Permission::AdminUsers,
            GrantKind::Research => Permission::ResearchApprove,
        };
        self.resolver
            .require_permission(
                actor,
                permission,
                self.grant_target_type(),
                None,
                "Active grant listing denied",
            )
            .await?;

        self.grants.list_active(self.kind, self.clock.now()).await
    }

    fn validate_create(&self, input: &CreateGrantInput, now: DateTime<Utc>) -> AppResult<()> {
        if input.scope.entity_type.trim().is_empty() {
            return Err(AppError::Validation(
                "grant scope entity type must not be blank".to_owned(),
            ));
        }
        if input.reason_code.trim().is_empty() {
            return Err(AppError::Validation(
                "grant reason code must not be blank".to_owned(),
            ));
        }
        if let Some(expires_at) = input.expires_at
            && expires_at <= now
        {
            return Err(AppError::Validation(
                "grant expiry must lie in the future".to_owned(),
            ));
        }

        Ok(())
    }

    /// Break-glass grants may be revoked by an administrator or by their own
    /// subject; research grants require the approver permission for every
    /// revocation.
    async fn authorize_revocation(
        &self,
        actor: &ActorIdentity,
        grant: &OverrideGrant,
    ) -> AppResult<IdentityId> {
        match self.kind {
            GrantKind::BreakGlass => {
                let actor_identity_id = self.resolver.resolve_identity_id(actor).await?;
                let is_admin = self
                    .resolver
                    .has_permission(actor, Permission::AdminUsers)
                    .await?;
                if !is_admin && actor_identity_id != grant.identity_id {
                    self.resolver
                        .audit_denial(
                            actor,
                            Permission::AdminUsers,
                            "BREAK_GLASS_GRANT",
                            Some(grant.id.as_uuid()),
                            "Break-glass revoke denied",
                        )
                        .await;
                    return Err(AppError::AccessDenied(
                        "not permitted to revoke this grant".to_owned(),
                    ));
                }
                Ok(actor_identity_id)
            }
            GrantKind::Research => {
                self.resolver
                    .require_permission(
                        actor,
                        Permission::ResearchApprove,
                        "RESEARCH_ACCESS_GRANT",
                        Some(grant.id.as_uuid()),
                        "Research grant revocation denied",
                    )
                    .await?;
                self.resolver.resolve_identity_id(actor).await
            }
        }
    }

    fn grant_target_type(&self) -> &'static str {
        match self.kind {
            GrantKind::BreakGlass => "BREAK_GLASS_GRANT",
            GrantKind::Research => "RESEARCH_ACCESS_GRANT",
        }
    }

    fn created_event(
        &self,
        actor: &ActorIdentity,
        actor_identity_id: IdentityId,
        grant: &OverrideGrant,
        now: DateTime<Utc>,
    ) -> AuditEvent {
        match self.kind {
            GrantKind::BreakGlass => AuditEvent::new(
                AuditEventType::AuthzBreakGlassInvoked,
                AuditOutcome::Success,
                now,
                actor.provider_id(),
                actor.external_subject(),
                Some(actor_identity_id),
            )
            .with_target(grant.scope.entity_type.clone(), grant.scope.entity_id)
            .with_details("Break-glass invoked")
            .with_metadata("grant_id", grant.id.to_string())
            .with_metadata("reason", grant.reason_code.clone()),
            GrantKind::Research => {
                let mut event = AuditEvent::new(
                    AuditEventType::AuthzResearchGrantCreated,
                    AuditOutcome::Success,
                    now,
                    actor.provider_id(),
                    actor.external_subject(),
                    Some(actor_identity_id),
                )
                .with_target("RESEARCH_ACCESS_GRANT", Some(grant.id.as_uuid()))
                .with_metadata("grant_id", grant.id.to_string());
                if let Some(protocol_id) = grant.protocol_id.as_deref() {
                    event = event.with_metadata("protocol_id", protocol_id);
                }
                if let Some(phi_access_level) = grant.phi_access_level.as_deref() {
                    event = event.with_metadata("phi_access_level", phi_access_level);
                }
                event
            }
        }
    }

    fn revoked_event(
        &self,
        actor: &ActorIdentity,
        actor_identity_id: IdentityId,
        grant: &OverrideGrant,
        now: DateTime<Utc>,
    ) -> AuditEvent {
        let event_type = match self.kind {
            GrantKind::BreakGlass => AuditEventType::AuthzBreakGlassRevoked,
            GrantKind::Research => AuditEventType::AuthzResearchGrantRevoked,
        };

        let mut event = AuditEvent::new(
            event_type,
            AuditOutcome::Success,
            now,
            actor.provider_id(),
            actor.external_subject(),
            Some(actor_identity_id),
        )
        .with_target(self.grant_target_type(), Some(grant.id.as_uuid()))
        .with_metadata("grant_id", grant.id.to_string());

        if let Some(reason) = grant.revocation_reason.as_deref() {
            event = event.with_details(reason);
        }

        event
    }
}
