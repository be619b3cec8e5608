use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Sentinel meaning "no color override"; callers render their default.
pub const INHERIT: &str = "inherit";

/// A conditional color band over row totals. The score range is inclusive
/// on both ends. A rule without an evaluation title is global and applies
/// under any title. `min_score <= max_score` is enforced where rules are
/// authored; the resolver assumes it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormattingRule {
    pub id: String,
    pub min_score: f64,
    pub max_score: f64,
    pub color: String,
    pub evaluation_title_id: Option<String>,
}

impl FormattingRule {
    fn matches_total(&self, total: f64) -> bool {
        self.min_score <= total && total <= self.max_score
    }

    fn range_width(&self) -> f64 {
        self.max_score - self.min_score
    }

    /// Lower tier ranks first: title-scoped rules outrank global ones.
    fn specificity_tier(&self) -> u8 {
        if self.evaluation_title_id.is_some() {
            0
        } else {
            1
        }
    }
}

/// Priority policy for overlapping rules, most specific first:
/// title-scoped before global, then narrower band before wider. This lets
/// a broad global pass/fail band coexist with a narrow title-scoped
/// override without the global band masking it.
pub fn compare_rule_priority(a: &FormattingRule, b: &FormattingRule) -> Ordering {
    a.specificity_tier()
        .cmp(&b.specificity_tier())
        .then_with(|| {
            a.range_width()
                .partial_cmp(&b.range_width())
                .unwrap_or(Ordering::Equal)
        })
}

/// Pick the color for one row total, or `INHERIT` when no rule applies.
///
/// A rule applies when its range contains the total and it is either
/// global or scoped to a title the row actually accumulated. Rows with no
/// contributing titles never get a color: formatting is only meaningful
/// in the context of at least one evaluation title.
pub fn resolve_color(
    total: f64,
    applicable_titles: &BTreeSet<String>,
    rules: &[FormattingRule],
    title_lookup: &HashMap<String, String>,
) -> String {
    if applicable_titles.is_empty() {
        return INHERIT.to_string();
    }

    let mut applicable: Vec<&FormattingRule> = rules
        .iter()
        .filter(|rule| {
            debug_assert!(
                rule.min_score <= rule.max_score,
                "rule {} has inverted range",
                rule.id
            );
            if !rule.matches_total(total) {
                return false;
            }
            match &rule.evaluation_title_id {
                None => true,
                Some(title_id) => title_lookup
                    .get(title_id)
                    .map(|title| applicable_titles.contains(title))
                    .unwrap_or(false),
            }
        })
        .collect();

    if applicable.is_empty() {
        return INHERIT.to_string();
    }

    // Stable sort: rules tied on tier and width keep authoring order.
    applicable.sort_by(|a, b| compare_rule_priority(a, b));
    applicable[0].color.clone()
}
