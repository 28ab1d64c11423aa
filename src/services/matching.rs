//! Dietary matching: ingredient text x restriction set -> [`MatchVerdict`].

use crate::models::{MatchVerdict, RestrictionSet};

/// Evaluate a comma-separated ingredient list against a restriction set.
///
/// Each comma segment is trimmed and compared case-insensitively; a segment is flagged
/// when it contains any restriction as a substring, so "milk powder" is flagged by
/// "milk". Flagged segments keep their original casing and order.
///
/// Restriction names are trimmed and lower-cased by [`RestrictionSet`] before matching,
/// so `"egg "` behaves like `"egg"`.
///
/// Empty text or an empty restriction set is always safe.
///
/// # Examples
///
/// ```
/// use foodfilter::models::RestrictionSet;
/// use foodfilter::services::match_ingredients;
///
/// let verdict = match_ingredients("Milk, Wheat flour, Sugar", &RestrictionSet::from_names(["milk"]));
/// assert!(!verdict.is_safe);
/// assert_eq!(verdict.flagged_ingredients, vec!["Milk".to_string()]);
/// ```
pub fn match_ingredients(ingredients_text: &str, restrictions: &RestrictionSet) -> MatchVerdict {
    if ingredients_text.is_empty() || restrictions.is_empty() {
        return MatchVerdict::safe();
    }

    let flagged = ingredients_text
        .split(',')
        .map(str::trim)
        .filter(|segment| {
            let lowered = segment.to_lowercase();
            restrictions.iter().any(|restriction| lowered.contains(restriction))
        })
        .map(str::to_string)
        .collect();

    MatchVerdict::from_flagged(flagged)
}
