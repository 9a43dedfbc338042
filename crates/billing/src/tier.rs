//! Plan label to tier mapping

use ndislink_shared::ProviderTier;

/// Map a free-text plan label from checkout or subscription metadata to a tier.
///
/// Case-insensitive substring match. Anything ambiguous or missing degrades to
/// `Starter`, the lowest-privilege tier.
pub fn tier_from_plan_label(label: Option<&str>) -> ProviderTier {
    let Some(label) = label else {
        return ProviderTier::Starter;
    };
    let label = label.to_lowercase();

    if label.contains("premium") {
        ProviderTier::Premium
    } else if label.contains("professional") || label.contains("pro") {
        ProviderTier::Professional
    } else {
        ProviderTier::Starter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_label_is_starter() {
        assert_eq!(tier_from_plan_label(None), ProviderTier::Starter);
    }

    #[test]
    fn test_premium_labels() {
        assert_eq!(tier_from_plan_label(Some("Premium Annual")), ProviderTier::Premium);
        assert_eq!(tier_from_plan_label(Some("PREMIUM")), ProviderTier::Premium);
        // premium wins over the "pro" substring
        assert_eq!(tier_from_plan_label(Some("premium pro bundle")), ProviderTier::Premium);
    }

    #[test]
    fn test_professional_labels() {
        assert_eq!(tier_from_plan_label(Some("Pro Monthly")), ProviderTier::Professional);
        assert_eq!(tier_from_plan_label(Some("professional")), ProviderTier::Professional);
        assert_eq!(tier_from_plan_label(Some("NDIS Pro")), ProviderTier::Professional);
    }

    #[test]
    fn test_unrecognized_labels_are_starter() {
        assert_eq!(tier_from_plan_label(Some("anything-else")), ProviderTier::Starter);
        assert_eq!(tier_from_plan_label(Some("")), ProviderTier::Starter);
        assert_eq!(tier_from_plan_label(Some("Starter")), ProviderTier::Starter);
    }
}
