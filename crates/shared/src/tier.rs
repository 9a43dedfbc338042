//! Provider service tiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription level of a provider listing.
///
/// Ordered from lowest to highest privilege. `Starter` is the fallback for any
/// provider without an active paid subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderTier {
    #[default]
    Starter,
    Professional,
    Premium,
}

impl ProviderTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderTier::Starter => "starter",
            ProviderTier::Professional => "professional",
            ProviderTier::Premium => "premium",
        }
    }

    /// Premium providers carry the verified badge; no other tier does.
    pub fn grants_verified(&self) -> bool {
        matches!(self, ProviderTier::Premium)
    }
}

impl fmt::Display for ProviderTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown provider tier: {0}")]
pub struct TierParseError(pub String);

impl FromStr for ProviderTier {
    type Err = TierParseError;

    /// Strict parse of a stored tier value. Free-text plan labels go through
    /// the billing crate's tier mapper instead.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(ProviderTier::Starter),
            "professional" => Ok(ProviderTier::Professional),
            "premium" => Ok(ProviderTier::Premium),
            other => Err(TierParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_values_parse_back() {
        for tier in [
            ProviderTier::Starter,
            ProviderTier::Professional,
            ProviderTier::Premium,
        ] {
            assert_eq!(tier.as_str().parse::<ProviderTier>(), Ok(tier));
        }
    }

    #[test]
    fn test_parse_is_strict() {
        assert!("Premium".parse::<ProviderTier>().is_err());
        assert!("pro".parse::<ProviderTier>().is_err());
        assert!("".parse::<ProviderTier>().is_err());
    }

    #[test]
    fn test_only_premium_is_verified() {
        assert!(ProviderTier::Premium.grants_verified());
        assert!(!ProviderTier::Professional.grants_verified());
        assert!(!ProviderTier::Starter.grants_verified());
    }

    #[test]
    fn test_serde_uses_lowercase() {
        let json = serde_json::to_string(&ProviderTier::Professional).unwrap();
        assert_eq!(json, "\"professional\"");
        let tier: ProviderTier = serde_json::from_str("\"premium\"").unwrap();
        assert_eq!(tier, ProviderTier::Premium);
    }
}
