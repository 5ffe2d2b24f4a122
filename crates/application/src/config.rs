use std::env;

use chrono::Duration;

/// Default break-glass grant lifetime in hours.
pub const DEFAULT_BREAK_GLASS_TTL_HOURS: i64 = 24;

/// Default research grant lifetime in days.
pub const DEFAULT_RESEARCH_GRANT_TTL_DAYS: i64 = 90;

/// Default TTLs applied when a grant is created without an explicit expiry.
#[derive(Debug, Clone)]
pub struct GrantTtlConfig {
    /// Lifetime of break-glass grants created without an expiry.
    pub break_glass_ttl: Duration,
    /// Lifetime of research grants created without an expiry.
    pub research_ttl: Duration,
}

impl Default for GrantTtlConfig {
    fn default() -> Self {
        Self {
            break_glass_ttl: Duration::hours(DEFAULT_BREAK_GLASS_TTL_HOURS),
            research_ttl: Duration::days(DEFAULT_RESEARCH_GRANT_TTL_DAYS),
        }
    }
}

impl GrantTtlConfig {
    /// Loads TTL overrides from the environment, falling back to defaults.
    #[must_use]
    pub fn load() -> Self {
        let break_glass_hours = env::var("GLACIS_BREAK_GLASS_TTL_HOURS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|hours| *hours > 0)
            .unwrap_or(DEFAULT_BREAK_GLASS_TTL_HOURS);
        let research_days = env::var("GLACIS_RESEARCH_GRANT_TTL_DAYS")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .filter(|days| *days > 0)
            .unwrap_or(DEFAULT_RESEARCH_GRANT_TTL_DAYS);

        Self {
            break_glass_ttl: Duration::hours(break_glass_hours),
            research_ttl: Duration::days(research_days),
        }
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Provider id applied when a login arrives with a blank issuer.
    pub provider_id_fallback: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            provider_id_fallback: "local-oidc".to_owned(),
        }
    }
}

impl ReconcilerConfig {
    /// Loads overrides from the environment, falling back to defaults.
    #[must_use]
    pub fn load() -> Self {
        let provider_id_fallback = env::var("GLACIS_PROVIDER_ID_FALLBACK")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "local-oidc".to_owned());

        Self {
            provider_id_fallback,
        }
    }
}
