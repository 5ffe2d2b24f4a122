use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use glacis_core::AppResult;
use glacis_domain::RoleName;

/// Repository port for the provider-group-to-role mapping table.
///
/// The mapping itself is administrative seed data; this port only reads it.
#[async_trait]
pub trait GroupMappingRepository: Send + Sync {
    /// Returns the role names mapped to any of the given groups for one
    /// provider, in bulk. Groups without a mapping contribute nothing, and
    /// implementations must filter out mapping rows whose role name is
    /// absent from the role vocabulary.
    async fn list_role_names(
        &self,
        provider_id: &str,
        group_names: &[String],
    ) -> AppResult<Vec<String>>;
}

/// Maps IdP group claims to internal role names.
#[derive(Clone)]
pub struct RoleGroupMapper {
    repository: Arc<dyn GroupMappingRepository>,
}

impl RoleGroupMapper {
    /// Creates a mapper from a mapping repository.
    #[must_use]
    pub fn new(repository: Arc<dyn GroupMappingRepository>) -> Self {
        Self { repository }
    }

    /// Resolves the role set for a login's group claims.
    ///
    /// An absent or non-list `groups` claim yields an empty set rather than
    /// an error, and a group with no mapping contributes nothing, as does a
    /// mapping row naming a role outside the stored vocabulary: an unknown
    /// group must never lock a legitimate user out. Provider ids and group
    /// names are matched case-sensitively as the provider issued them.
    pub async fn map_roles(
        &self,
        provider_id: &str,
        claims: &Map<String, Value>,
    ) -> AppResult<BTreeSet<RoleName>> {
        let group_names: Vec<String> = match claims.get("groups") {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|value| !value.is_null())
                .map(|value| match value {
                    Value::String(name) => name.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        if provider_id.trim().is_empty() || group_names.is_empty() {
            return Ok(BTreeSet::new());
        }

        let role_names = self
            .repository
            .list_role_names(provider_id, group_names.as_slice())
            .await?;

        // A mapping row carrying a blank role name is tolerated the same way
        // an unmapped group is: it contributes no role.
        Ok(role_names
            .into_iter()
            .filter_map(|name| RoleName::new(name).ok())
            .collect())
    }
}
