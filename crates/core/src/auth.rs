use serde::{Deserialize, Serialize};

/// Session principal handed over by the OIDC collaborator after token
/// verification.
///
/// Carries the natural key of the external account plus the profile values
/// the provider resolved for the login. The local identity record, when one
/// exists, is looked up through the identity store; this type never holds a
/// live reference to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorIdentity {
    provider_id: String,
    external_subject: String,
    display_name: Option<String>,
    email: Option<String>,
}

impl ActorIdentity {
    /// Creates a principal from verified provider claims.
    #[must_use]
    pub fn new(
        provider_id: impl Into<String>,
        external_subject: impl Into<String>,
        display_name: Option<String>,
        email: Option<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            external_subject: external_subject.into(),
            display_name,
            email,
        }
    }

    /// Returns the identity-provider identifier, usually the issuer URI.
    #[must_use]
    pub fn provider_id(&self) -> &str {
        self.provider_id.as_str()
    }

    /// Returns the stable subject claim from the identity provider.
    #[must_use]
    pub fn external_subject(&self) -> &str {
        self.external_subject.as_str()
    }

    /// Returns the display name, if the provider returned one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Returns the email, if the provider returned one.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}
