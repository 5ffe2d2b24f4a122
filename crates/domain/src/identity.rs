use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::security::RoleName;

/// Unique identifier for a canonical identity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityId(Uuid);

impl IdentityId {
    /// Creates a new random identity identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an identity identifier from an existing UUID value.
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

impl Default for IdentityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for IdentityId {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Canonical local identity record.
///
/// The natural key `(provider_id, external_subject)` identifies one external
/// account; both fields are populated at most once and never overwritten, so
/// the key stays stable across later identical logins. Pre-migration records
/// recovered through the email fallback may hold `None` until their first
/// subject-keyed login binds the key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable local identifier, assigned on first persistence.
    pub id: IdentityId,
    /// Identity-provider id half of the natural key.
    pub provider_id: Option<String>,
    /// External subject half of the natural key.
    pub external_subject: Option<String>,
    /// Login name; falls back to the email claim when the provider sends none.
    pub username: Option<String>,
    /// Full display name.
    pub display_name: Option<String>,
    /// Abbreviated display name.
    pub display_short: Option<String>,
    /// Given name.
    pub given_name: Option<String>,
    /// Family name.
    pub family_name: Option<String>,
    /// Middle name.
    pub middle_name: Option<String>,
    /// Name prefix such as an honorific.
    pub prefix: Option<String>,
    /// Name suffix such as credentials.
    pub suffix: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Whether the identity may authenticate.
    pub active: bool,
    /// Additive map of sanitized provider claims.
    pub attributes: Map<String, Value>,
    /// Names of the roles currently assigned to this identity.
    pub roles: BTreeSet<RoleName>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Timestamp of the most recent successful login.
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// Creates a blank active identity ready for its first reconciliation.
    #[must_use]
    pub fn provisioned(now: DateTime<Utc>) -> Self {
        Self {
            id: IdentityId::new(),
            provider_id: None,
            external_subject: None,
            username: None,
            display_name: None,
            display_short: None,
            given_name: None,
            family_name: None,
            middle_name: None,
            prefix: None,
            suffix: None,
            email: None,
            active: true,
            attributes: Map::new(),
            roles: BTreeSet::new(),
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        }
    }

    /// Binds the natural key, filling only halves that are still unset.
    pub fn bind_natural_key(&mut self, provider_id: &str, external_subject: &str) {
        if self.provider_id.is_none() {
            self.provider_id = Some(provider_id.to_owned());
        }
        if self.external_subject.is_none() {
            self.external_subject = Some(external_subject.to_owned());
        }
    }

    /// Applies incoming profile values under the uniform merge rule:
    /// overwrite a field iff the incoming value is non-blank. A blank claim
    /// never erases a previously known value.
    pub fn apply_profile_claims(
        &mut self,
        display_name: Option<&str>,
        email: Option<&str>,
        claims: &Map<String, Value>,
    ) {
        let claim = |key: &str| claims.get(key).and_then(Value::as_str);

        let merges: [(Option<&str>, &mut Option<String>); 8] = [
            (display_name, &mut self.display_name),
            (email, &mut self.email),
            (claim("given_name"), &mut self.given_name),
            (claim("family_name"), &mut self.family_name),
            (claim("middle_name"), &mut self.middle_name),
            (claim("prefix"), &mut self.prefix),
            (claim("suffix"), &mut self.suffix),
            (claim("display_short"), &mut self.display_short),
        ];

        for (incoming, field) in merges {
            if let Some(value) = incoming
                && !value.trim().is_empty()
            {
                *field = Some(value.to_owned());
            }
        }

        match claim("preferred_username").filter(|value| !value.trim().is_empty()) {
            Some(username) => self.username = Some(username.to_owned()),
            None => {
                if let Some(email) = email.filter(|value| !value.trim().is_empty()) {
                    self.username = Some(email.to_owned());
                }
            }
        }
    }

    /// Overlays sanitized claims onto the stored attribute map. Existing
    /// keys survive unless the incoming map carries a replacement.
    pub fn merge_attributes(&mut self, sanitized_claims: Map<String, Value>) {
        for (key, value) in sanitized_claims {
            self.attributes.insert(key, value);
        }
    }
}
