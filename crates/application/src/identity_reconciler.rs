use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use glacis_core::{ActorIdentity, AppError, AppResult};
use glacis_domain::{
    AuditEvent, AuditEventType, AuditOutcome, Identity, IdentityId, RoleName, sanitize_claims,
};

use crate::clock::Clock;
use crate::config::ReconcilerConfig;
use crate::role_group_mapper::RoleGroupMapper;

/// Persistence port for canonical identity records.
///
/// The store owns no business rules; it enforces exactly one invariant, the
/// uniqueness of the `(provider_id, external_subject)` natural key, and
/// reports a violated insert as [`AppError::Conflict`]. Login writes carry
/// their audit events so the store can commit both in one transaction: a
/// crash must never leave the role set and the audit trail desynchronized.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Finds an identity by its natural key.
    async fn find_by_natural_key(
        &self,
        provider_id: &str,
        external_subject: &str,
    ) -> AppResult<Option<Identity>>;

    /// Finds an identity by email, for pre-migration records not yet keyed
    /// by subject.
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>>;

    /// Finds an identity by its local id.
    async fn find_by_id(&self, identity_id: IdentityId) -> AppResult<Option<Identity>>;

    /// Inserts a new identity and its audit events atomically; a natural-key
    /// collision yields `Conflict`.
    async fn insert(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()>;

    /// Updates an existing identity, including its role set, committing the
    /// audit events in the same transaction.
    async fn update(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()>;
}

/// Result of reconciling one external login.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledLogin {
    /// The canonical identity after the merge.
    pub identity: Identity,
    /// Roles gained compared to the previously stored set.
    pub roles_added: BTreeSet<RoleName>,
    /// Roles lost compared to the previously stored set.
    pub roles_removed: BTreeSet<RoleName>,
}

/// Merges each successful external login into the canonical identity store.
#[derive(Clone)]
pub struct IdentityReconciler {
    identities: Arc<dyn IdentityRepository>,
    role_mapper: RoleGroupMapper,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl IdentityReconciler {
    /// Creates a reconciler from its collaborators.
    #[must_use]
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        role_mapper: RoleGroupMapper,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            identities,
            role_mapper,
            clock,
            config,
        }
    }

    /// Reconciles a verified external login into the identity store.
    ///
    /// Looks the identity up by natural key, falling back to the claimed
    /// email for pre-migration records, and provisions a blank record when
    /// both miss. Profile fields follow the non-blank overwrite rule, the
    /// attribute map is merged additively from sanitized claims, and the
    /// role set is recomputed from group claims with an audit event per
    /// added and removed role, followed by the login event itself. The
    /// identity write and every audit event commit as one unit of work.
    ///
    /// A natural-key insert that races a concurrent login for the same
    /// account is retried once through a fresh lookup before the conflict
    /// escalates to the caller.
    pub async fn reconcile(
        &self,
        principal: &ActorIdentity,
        claims: &Map<String, Value>,
    ) -> AppResult<ReconciledLogin> {
        match self.reconcile_once(principal, claims).await {
            Err(AppError::Conflict(reason)) => {
                tracing::warn!(
                    subject = principal.external_subject(),
                    %reason,
                    "identity insert raced a concurrent login, retrying as update"
                );
                self.reconcile_once(principal, claims).await
            }
            other => other,
        }
    }

    async fn reconcile_once(
        &self,
        principal: &ActorIdentity,
        claims: &Map<String, Value>,
    ) -> AppResult<ReconciledLogin> {
        let now = self.clock.now();
        let provider_id = self.effective_provider_id(principal);
        let external_subject = principal.external_subject();

        let new_roles = self.role_mapper.map_roles(provider_id, claims).await?;

        let (mut identity, exists) = self
            .lookup_identity(provider_id, external_subject, principal.email(), now)
            .await?;

        // The stored set must be captured before it is replaced; the diff
        // drives the role audit events.
        let old_roles = identity.roles.clone();

        identity.bind_natural_key(provider_id, external_subject);
        identity.apply_profile_claims(principal.display_name(), principal.email(), claims);
        identity.merge_attributes(sanitize_claims(claims));
        identity.roles = new_roles.clone();
        identity.last_seen_at = Some(now);
        identity.updated_at = now;

        let roles_added: BTreeSet<RoleName> = new_roles.difference(&old_roles).cloned().collect();
        let roles_removed: BTreeSet<RoleName> = old_roles.difference(&new_roles).cloned().collect();

        let mut events = Vec::with_capacity(roles_added.len() + roles_removed.len() + 1);
        for role in &roles_added {
            events.push(role_event(
                AuditEventType::AuthzRoleAssigned,
                "Role assigned",
                &identity,
                role,
                now,
            ));
        }
        for role in &roles_removed {
            events.push(role_event(
                AuditEventType::AuthzRoleRevoked,
                "Role revoked",
                &identity,
                role,
                now,
            ));
        }
        events.push(AuditEvent::new(
            AuditEventType::AuthnLoginSuccess,
            AuditOutcome::Success,
            now,
            provider_id,
            external_subject,
            Some(identity.id),
        ));

        if exists {
            self.identities.update(&identity, &events).await?;
        } else {
            self.identities.insert(&identity, &events).await?;
        }

        tracing::info!(
            identity_id = %identity.id,
            roles_added = roles_added.len(),
            roles_removed = roles_removed.len(),
            "reconciled external login"
        );

        Ok(ReconciledLogin {
            identity,
            roles_added,
            roles_removed,
        })
    }

    fn effective_provider_id<'a>(&'a self, principal: &'a ActorIdentity) -> &'a str {
        let provider_id = principal.provider_id();
        if provider_id.trim().is_empty() {
            self.config.provider_id_fallback.as_str()
        } else {
            provider_id
        }
    }

    async fn lookup_identity(
        &self,
        provider_id: &str,
        external_subject: &str,
        email: Option<&str>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<(Identity, bool)> {
        if let Some(identity) = self
            .identities
            .find_by_natural_key(provider_id, external_subject)
            .await?
        {
            return Ok((identity, true));
        }

        if let Some(email) = email.filter(|value| !value.trim().is_empty())
            && let Some(identity) = self.identities.find_by_email(email).await?
        {
            return Ok((identity, true));
        }

        Ok((Identity::provisioned(now), false))
    }
}

fn role_event(
    event_type: AuditEventType,
    details: &str,
    identity: &Identity,
    role: &RoleName,
    now: chrono::DateTime<chrono::Utc>,
) -> AuditEvent {
    AuditEvent::new(
        event_type,
        AuditOutcome::Success,
        now,
        identity.provider_id.clone().unwrap_or_default(),
        identity.external_subject.clone().unwrap_or_default(),
        Some(identity.id),
    )
    .with_target("ROLE", None)
    .with_details(details)
    .with_metadata("role_name", role.as_str())
    .with_metadata("assignment_source", "IDP_GROUP")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{Map, Value, json};
    use tokio::sync::Mutex;

    use glacis_core::{ActorIdentity, AppError, AppResult};
    use glacis_domain::{AuditEvent, AuditEventType, Identity, IdentityId, RoleName};

    use crate::clock::SystemClock;
    use crate::config::ReconcilerConfig;
    use crate::role_group_mapper::{GroupMappingRepository, RoleGroupMapper};

    use super::{IdentityReconciler, IdentityRepository};

    #[derive(Default)]
    struct FakeIdentityRepository {
        identities: Mutex<Vec<Identity>>,
        events: Mutex<Vec<AuditEvent>>,
        conflicts_to_inject: Mutex<u32>,
    }

    impl FakeIdentityRepository {
        async fn seed(&self, identity: Identity) {
            self.identities.lock().await.push(identity);
        }

        async fn count(&self, event_type: AuditEventType) -> usize {
            self.events
                .lock()
                .await
                .iter()
                .filter(|event| event.event_type == event_type)
                .count()
        }
    }

    #[async_trait]
    impl IdentityRepository for FakeIdentityRepository {
        async fn find_by_natural_key(
            &self,
            provider_id: &str,
            external_subject: &str,
        ) -> AppResult<Option<Identity>> {
            Ok(self.identities.lock().await.iter().find(|identity| {
                identity.provider_id.as_deref() == Some(provider_id)
                    && identity.external_subject.as_deref() == Some(external_subject)
            }).cloned())
        }

        async fn find_by_email(&self, email: &str) -> AppResult<Option<Identity>> {
            Ok(self
                .identities
                .lock()
                .await
                .iter()
                .find(|identity| identity.email.as_deref() == Some(email))
                .cloned())
        }

        async fn find_by_id(&self, identity_id: IdentityId) -> AppResult<Option<Identity>> {
            Ok(self
                .identities
                .lock()
                .await
                .iter()
                .find(|identity| identity.id == identity_id)
                .cloned())
        }

        async fn insert(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()> {
            let mut pending = self.conflicts_to_inject.lock().await;
            if *pending > 0 {
                *pending -= 1;
                // Simulate a concurrent login winning the insert race.
                let mut winner = identity.clone();
                winner.id = IdentityId::new();
                self.identities.lock().await.push(winner);
                return Err(AppError::Conflict(
                    "identity natural key already exists".to_owned(),
                ));
            }

            let mut identities = self.identities.lock().await;
            let duplicate = identities.iter().any(|stored| {
                stored.provider_id == identity.provider_id
                    && stored.external_subject == identity.external_subject
            });
            if duplicate {
                return Err(AppError::Conflict(
                    "identity natural key already exists".to_owned(),
                ));
            }
            identities.push(identity.clone());
            self.events.lock().await.extend(events.iter().cloned());
            Ok(())
        }

        async fn update(&self, identity: &Identity, events: &[AuditEvent]) -> AppResult<()> {
            let mut identities = self.identities.lock().await;
            match identities.iter_mut().find(|stored| stored.id == identity.id) {
                Some(stored) => {
                    *stored = identity.clone();
                    self.events.lock().await.extend(events.iter().cloned());
                    Ok(())
                }
                None => Err(AppError::NotFound(format!(
                    "identity '{}' does not exist",
                    identity.id
                ))),
            }
        }
    }

    struct FakeGroupMappingRepository {
        rows: Vec<(&'static str, &'static str)>,
    }

    #[async_trait]
    impl GroupMappingRepository for FakeGroupMappingRepository {
        async fn list_role_names(
            &self,
            _provider_id: &str,
            group_names: &[String],
        ) -> AppResult<Vec<String>> {
            Ok(self
                .rows
                .iter()
                .filter(|(group, _)| group_names.iter().any(|name| name == group))
                .map(|(_, role)| (*role).to_owned())
                .collect())
        }
    }

    const PROVIDER: &str = "https://idp.example.org/realms/clinical";

    fn principal(subject: &str, email: Option<&str>) -> ActorIdentity {
        ActorIdentity::new(
            PROVIDER,
            subject,
            Some("Dr. A. Vermeer".to_owned()),
            email.map(str::to_owned),
        )
    }

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(entries) => entries,
            _ => Map::new(),
        }
    }

    struct Harness {
        reconciler: IdentityReconciler,
        identities: Arc<FakeIdentityRepository>,
    }

    fn harness(mapping_rows: Vec<(&'static str, &'static str)>) -> Harness {
        let identities = Arc::new(FakeIdentityRepository::default());
        let mapper = RoleGroupMapper::new(Arc::new(FakeGroupMappingRepository {
            rows: mapping_rows,
        }));
        let reconciler = IdentityReconciler::new(
            identities.clone(),
            mapper,
            Arc::new(SystemClock),
            ReconcilerConfig::default(),
        );
        Harness {
            reconciler,
            identities,
        }
    }

    fn role(name: &str) -> RoleName {
        RoleName::new(name).unwrap_or_else(|_| unreachable!("test role names are non-blank"))
    }

    #[tokio::test]
    async fn repeated_logins_reuse_one_record() {
        let harness = harness(vec![("pathology-staff", "PATHOLOGIST")]);
        let principal = principal("subject-1", Some("vermeer@clinic.example"));
        let claims = claims(json!({ "groups": ["pathology-staff"] }));

        let first = harness.reconciler.reconcile(&principal, &claims).await;
        let second = harness.reconciler.reconcile(&principal, &claims).await;

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert_eq!(harness.identities.identities.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn identical_logins_emit_no_role_events_on_the_second_pass() {
        let harness = harness(vec![("pathology-staff", "PATHOLOGIST")]);
        let principal = principal("subject-1", None);
        let claims = claims(json!({ "groups": ["pathology-staff"] }));

        let first = harness.reconciler.reconcile(&principal, &claims).await;
        assert!(first.is_ok());
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleAssigned).await, 1);

        let second = harness.reconciler.reconcile(&principal, &claims).await;
        assert!(second.is_ok_and(|login| login.roles_added.is_empty() && login.roles_removed.is_empty()));
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleAssigned).await, 1);
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleRevoked).await, 0);
        assert_eq!(harness.identities.count(AuditEventType::AuthnLoginSuccess).await, 2);
    }

    #[tokio::test]
    async fn blank_claims_do_not_erase_profile_fields() {
        let harness = harness(Vec::new());
        let first_principal = principal("subject-1", Some("vermeer@clinic.example"));
        let outcome = harness
            .reconciler
            .reconcile(&first_principal, &claims(json!({ "given_name": "Anna" })))
            .await;
        assert!(outcome.is_ok());

        let second_principal =
            ActorIdentity::new(PROVIDER, "subject-1", None, None);
        let outcome = harness
            .reconciler
            .reconcile(&second_principal, &claims(json!({ "given_name": " " })))
            .await;

        let identity = outcome.map(|login| login.identity);
        assert!(identity.as_ref().is_ok_and(|identity| {
            identity.display_name.as_deref() == Some("Dr. A. Vermeer")
                && identity.given_name.as_deref() == Some("Anna")
                && identity.email.as_deref() == Some("vermeer@clinic.example")
        }));
    }

    #[tokio::test]
    async fn role_diff_emits_exactly_the_changed_roles() {
        let harness = harness(vec![
            ("lab-admins", "ADMIN"),
            ("pathology-staff", "PATHOLOGIST"),
        ]);
        let mut seeded = Identity::provisioned(Utc::now());
        seeded.bind_natural_key(PROVIDER, "subject-1");
        seeded.roles = BTreeSet::from([role("ADMIN")]);
        harness.identities.seed(seeded).await;

        let outcome = harness
            .reconciler
            .reconcile(
                &principal("subject-1", None),
                &claims(json!({ "groups": ["lab-admins", "pathology-staff"] })),
            )
            .await;

        assert!(outcome.as_ref().is_ok_and(|login| {
            login.roles_added == BTreeSet::from([role("PATHOLOGIST")])
                && login.roles_removed.is_empty()
        }));
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleAssigned).await, 1);
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleRevoked).await, 0);
    }

    #[tokio::test]
    async fn losing_every_group_revokes_stored_roles() {
        let harness = harness(vec![("lab-admins", "ADMIN")]);
        let mut seeded = Identity::provisioned(Utc::now());
        seeded.bind_natural_key(PROVIDER, "subject-1");
        seeded.roles = BTreeSet::from([role("ADMIN")]);
        harness.identities.seed(seeded).await;

        let outcome = harness
            .reconciler
            .reconcile(&principal("subject-1", None), &claims(json!({ "groups": [] })))
            .await;

        assert!(outcome.is_ok_and(|login| {
            login.roles_removed == BTreeSet::from([role("ADMIN")]) && login.roles_added.is_empty()
        }));
        assert_eq!(harness.identities.count(AuditEventType::AuthzRoleRevoked).await, 1);
    }

    #[tokio::test]
    async fn email_fallback_reuses_a_pre_migration_record() {
        let harness = harness(Vec::new());
        let mut legacy = Identity::provisioned(Utc::now());
        legacy.email = Some("vermeer@clinic.example".to_owned());
        let legacy_id = legacy.id;
        harness.identities.seed(legacy).await;

        let outcome = harness
            .reconciler
            .reconcile(
                &principal("subject-1", Some("vermeer@clinic.example")),
                &Map::new(),
            )
            .await;

        assert!(outcome.is_ok_and(|login| login.identity.id == legacy_id));
        let identities = harness.identities.identities.lock().await;
        assert_eq!(identities.len(), 1);
        assert_eq!(identities[0].external_subject.as_deref(), Some("subject-1"));
    }

    #[tokio::test]
    async fn insert_race_is_recovered_by_retrying_the_lookup() {
        let harness = harness(Vec::new());
        *harness.identities.conflicts_to_inject.lock().await = 1;

        let outcome = harness
            .reconciler
            .reconcile(&principal("subject-1", None), &Map::new())
            .await;

        assert!(outcome.is_ok());
        assert_eq!(harness.identities.identities.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_groups_never_block_the_login() {
        let harness = harness(Vec::new());

        let outcome = harness
            .reconciler
            .reconcile(
                &principal("subject-1", None),
                &claims(json!({ "groups": ["unheard-of-group"] })),
            )
            .await;

        assert!(outcome.is_ok_and(|login| login.identity.roles.is_empty()));
        assert_eq!(harness.identities.count(AuditEventType::AuthnLoginSuccess).await, 1);
    }
}
