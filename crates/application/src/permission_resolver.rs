use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use glacis_core::{ActorIdentity, AppError, AppResult};
use glacis_domain::{
    AuditEvent, AuditEventType, AuditOutcome, IdentityId, Permission, RoleName,
};

use crate::audit_trail::AuditRepository;
use crate::clock::Clock;
use crate::identity_reconciler::IdentityRepository;

/// Repository port for the role-to-permission mapping.
#[async_trait]
pub trait PermissionRepository: Send + Sync {
    /// Returns the permission names granted to any of the given roles, in
    /// bulk. The mapping is administrative seed data; this port only reads
    /// it.
    async fn list_permission_names_for_roles(
        &self,
        role_names: &[RoleName],
    ) -> AppResult<Vec<String>>;
}

/// Resolves roles to permissions and gates privileged operations.
#[derive(Clone)]
pub struct PermissionResolver {
    identities: Arc<dyn IdentityRepository>,
    permissions: Arc<dyn PermissionRepository>,
    audit_repository: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl PermissionResolver {
    /// Creates a resolver from its collaborators.
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        permissions: Arc<dyn PermissionRepository>,
        audit_repository: Arc<dyn AuditRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            identities,
            permissions,
            audit_repository,
            clock,
        }
    }

    /// Returns the identity's role names, sorted and deduplicated.
    ///
    /// The ordering is load-bearing: token claims and caching consumers diff
    /// these lists and must see a stable value for identical stored state.
    pub async fn resolve_role_names(&self, identity_id: IdentityId) -> AppResult<Vec<RoleName>> {
        let identity = self
            .identities
            .find_by_id(identity_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("identity '{identity_id}' does not exist")))?;

        Ok(identity.roles.into_iter().collect())
    }

    /// Returns the permission names granted to the given roles, sorted and
    /// deduplicated. An empty role list resolves to an empty permission list
    /// without touching storage. A stored value outside the permission
    /// vocabulary is a seed-data defect surfaced as `Internal`, never a
    /// silently granted capability.
    pub async fn resolve_permissions_for_roles(
        &self,
        role_names: &[RoleName],
    ) -> AppResult<Vec<String>> {
        if role_names.is_empty() {
            return Ok(Vec::new());
        }

        let names = self
            .permissions
            .list_permission_names_for_roles(role_names)
            .await?;

        let mut deduplicated = BTreeSet::new();
        for name in names {
            let permission = name.parse::<Permission>().map_err(|_| {
                AppError::Internal(format!(
                    "stored permission '{name}' is not in the known vocabulary"
                ))
            })?;
            deduplicated.insert(permission.as_str().to_owned());
        }

        Ok(deduplicated.into_iter().collect())
    }

    /// Returns whether the principal currently holds the permission.
    ///
    /// Fails with `NotFound` when the principal has no backing local record,
    /// which can legitimately happen for a just-reconciled identity
    /// mid-transaction; callers must handle it.
    pub async fn has_permission(
        &self,
        principal: &ActorIdentity,
        permission: Permission,
    ) -> AppResult<bool> {
        let identity_id = self.resolve_identity_id(principal).await?;
        let roles = self.resolve_role_names(identity_id).await?;
        let permissions = self.resolve_permissions_for_roles(roles.as_slice()).await?;
        Ok(permissions.iter().any(|name| name == permission.as_str()))
    }

    /// Ensures the principal holds the permission.
    ///
    /// Succeeds silently. On a missing permission the denial audit event is
    /// appended first and `AccessDenied` raised after, so the trail is
    /// complete whether or not the caller surfaces the failure. If the audit
    /// write itself fails, deny-by-default wins: the denial is still raised
    /// and the audit gap is reported on the operational error channel.
    pub async fn require_permission(
        &self,
        principal: &ActorIdentity,
        permission: Permission,
        target_entity_type: &str,
        target_entity_id: Option<Uuid>,
        detail: &str,
    ) -> AppResult<()> {
        if self.has_permission(principal, permission).await? {
            return Ok(());
        }

        self.audit_denial(principal, permission, target_entity_type, target_entity_id, detail)
            .await;

        Err(AppError::AccessDenied(format!(
            "missing permission: {}",
            permission.as_str()
        )))
    }

    /// Appends a permission-denied event, logging instead of failing when
    /// the sink is unavailable.
    pub(crate) async fn audit_denial(
        &self,
        principal: &ActorIdentity,
        permission: Permission,
        target_entity_type: &str,
        target_entity_id: Option<Uuid>,
        detail: &str,
    ) {
        let actor_identity_id = self.resolve_identity_id(principal).await.ok();
        let event = AuditEvent::new(
            AuditEventType::AuthzPermissionDenied,
            AuditOutcome::Deny,
            self.clock.now(),
            principal.provider_id(),
            principal.external_subject(),
            actor_identity_id,
        )
        .with_target(target_entity_type, target_entity_id)
        .with_details(detail)
        .with_metadata("permission", permission.as_str());

        if let Err(error) = self.audit_repository.append_event(event).await {
            tracing::error!(
                subject = principal.external_subject(),
                permission = permission.as_str(),
                %error,
                "failed to record permission denial in the audit trail"
            );
        }
    }

    /// Resolves the principal's local identity id from its natural key.
    pub(crate) async fn resolve_identity_id(
        &self,
        principal: &ActorIdentity,
    ) -> AppResult<IdentityId> {
        self.identities
            .find_by_natural_key(principal.provider_id(), principal.external_subject())
            .await?
            .map(|identity| identity.id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no identity for subject '{}' at provider '{}'",
                    principal.external_subject(),
                    principal.provider_id()
                ))
            })
    }
}
