//! Decides how the classifier is built from the overlap between the reference
//! features and the gene sets that could be scored for the input.

use ahash::AHashSet;
use thiserror::Error;

/// Smallest number of matched reference features for which a reduced classifier is
/// still retrained. Fixed; not a ratio of the reference feature count.
pub const MIN_PARTIAL_FEATURES: usize = 8;

/// Outcome of matching scored gene sets against the reference features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureMatch {
    /// Every reference feature was scored. Holds them in reference order.
    Full(Vec<String>),
    /// Some, but at least [`MIN_PARTIAL_FEATURES`], were scored.
    Partial {
        matched: Vec<String>,
        missing: Vec<String>,
    },
}

impl FeatureMatch {
    /// The features the classifier will use, in reference order.
    pub fn matched(&self) -> &[String] {
        match self {
            Self::Full(matched) | Self::Partial { matched, .. } => matched,
        }
    }

    pub fn missing(&self) -> &[String] {
        match self {
            Self::Full(_) => &[],
            Self::Partial { missing, .. } => missing,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Only {matched} of {required} reference features could be scored for the input; at least {minimum} are needed. Missing features: {}",
    .missing.join(", ")
)]
pub struct InsufficientFeaturesError {
    pub matched: usize,
    pub required: usize,
    pub minimum: usize,
    pub missing: Vec<String>,
}

/// Matches `available` (scored gene-set names) against `reference` (the classifier's
/// features, in reference order).
pub fn match_features(
    reference: &[String],
    available: &[String],
) -> Result<FeatureMatch, InsufficientFeaturesError> {
    let available: AHashSet<&str> = available.iter().map(String::as_str).collect();
    let (matched, missing): (Vec<String>, Vec<String>) = reference
        .iter()
        .cloned()
        .partition(|feature| available.contains(feature.as_str()));

    if missing.is_empty() {
        log::info!("All {} reference features were scored", matched.len());
        return Ok(FeatureMatch::Full(matched));
    }
    if matched.len() >= MIN_PARTIAL_FEATURES {
        log::info!(
            "{} of {} reference features were scored; the classifier will be retrained on them",
            matched.len(),
            reference.len()
        );
        return Ok(FeatureMatch::Partial { matched, missing });
    }
    Err(InsufficientFeaturesError {
        matched: matched.len(),
        required: reference.len(),
        minimum: MIN_PARTIAL_FEATURES,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("GOBP_{i:02}")).collect()
    }

    fn first(reference: &[String], n: usize) -> Vec<String> {
        reference[..n].to_vec()
    }

    #[test]
    fn every_feature_present_is_a_full_match() {
        let reference = reference(12);
        let mut available = reference.clone();
        available.reverse();
        available.push("GOBP_UNRELATED".to_string());
        let outcome = match_features(&reference, &available).unwrap();
        assert!(outcome.is_full());
        assert_eq!(outcome.matched(), reference.as_slice());
        assert!(outcome.missing().is_empty());
    }

    #[test]
    fn exactly_eight_is_a_partial_match() {
        let reference = reference(12);
        let outcome = match_features(&reference, &first(&reference, 8)).unwrap();
        match outcome {
            FeatureMatch::Partial { matched, missing } => {
                assert_eq!(matched.len(), 8);
                assert_eq!(missing, ["GOBP_08", "GOBP_09", "GOBP_10", "GOBP_11"]);
            }
            other => panic!("expected partial match, got {other:?}"),
        }
    }

    #[test]
    fn seven_is_insufficient_and_names_missing() {
        let reference = reference(12);
        let err = match_features(&reference, &first(&reference, 7)).unwrap_err();
        assert_eq!(err.matched, 7);
        assert_eq!(err.required, 12);
        assert_eq!(err.missing.len(), 5);
        assert!(err.to_string().contains("GOBP_07"));
    }

    #[test]
    fn one_short_of_total_is_partial() {
        let reference = reference(12);
        let outcome = match_features(&reference, &first(&reference, 11)).unwrap();
        assert!(!outcome.is_full());
        assert_eq!(outcome.missing(), ["GOBP_11"]);
    }

    #[test]
    fn small_reference_fully_present_is_still_full() {
        let reference = reference(5);
        let outcome = match_features(&reference, &reference).unwrap();
        assert!(outcome.is_full());
    }

    #[test]
    fn matched_features_keep_reference_order() {
        let reference = reference(10);
        let available: Vec<String> = reference.iter().rev().take(9).cloned().collect();
        let outcome = match_features(&reference, &available).unwrap();
        assert_eq!(outcome.matched(), &reference[1..]);
    }
}
