//! Reference data values: validation, duplicate keys and search ranking

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::validation::ValidationError;

pub const MAX_VALUE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Number of rows returned by an empty search.
pub const POPULAR_LIMIT: usize = 20;
/// Number of rows returned by a term search.
pub const SEARCH_LIMIT: usize = 10;

static VALUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9\s\-\._\(\)\[\]&/]+$").expect("invalid reference value regex")
});

/// Validated reference value (trimmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceValue(String);

impl ReferenceValue {
    pub fn new(s: &str) -> Result<Self, ValidationError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty { field: "value" });
        }
        if trimmed.chars().count() > MAX_VALUE_LEN {
            return Err(ValidationError::TooLong {
                field: "value",
                max: MAX_VALUE_LEN,
            });
        }
        if !VALUE_RE.is_match(trimmed) {
            return Err(ValidationError::InvalidFormat {
                field: "value",
                reason: "may only contain letters, digits, spaces and - . _ ( ) [ ] & /",
            });
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for duplicate detection within a category.
    pub fn dedup_key(&self) -> String {
        normalize(&self.0)
    }
}

/// Case-insensitive, whitespace-trimmed comparison key.
pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Outcome of validating a batch of candidate values.
#[derive(Debug, Default, PartialEq)]
pub struct BulkPlan {
    pub accepted: Vec<ReferenceValue>,
    pub skipped_invalid: Vec<String>,
    pub skipped_duplicate: Vec<String>,
}

/// Split a batch into values to insert and values to skip, given the keys
/// already present in the category.
pub fn plan_bulk<'a>(
    candidates: impl IntoIterator<Item = &'a str>,
    existing_keys: &HashSet<String>,
) -> BulkPlan {
    let mut plan = BulkPlan::default();
    let mut seen = existing_keys.clone();
    for raw in candidates {
        match ReferenceValue::new(raw) {
            Ok(v) => {
                if seen.insert(v.dedup_key()) {
                    plan.accepted.push(v);
                } else {
                    plan.skipped_duplicate.push(raw.trim().to_owned());
                }
            }
            Err(_) => plan.skipped_invalid.push(raw.to_owned()),
        }
    }
    plan
}

/// A candidate row for ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<'a> {
    pub value: &'a str,
    pub usage_count: i32,
}

/// Order search hits: prefix matches first, then by usage, then alphabetically.
pub fn rank<'a>(mut hits: Vec<Ranked<'a>>, term: &str) -> Vec<Ranked<'a>> {
    let needle = normalize(term);
    hits.retain(|h| needle.is_empty() || normalize(h.value).contains(&needle));
    hits.sort_by(|a, b| {
        let a_prefix = normalize(a.value).starts_with(&needle);
        let b_prefix = normalize(b.value).starts_with(&needle);
        b_prefix
            .cmp(&a_prefix)
            .then_with(|| b.usage_count.cmp(&a.usage_count))
            .then_with(|| a.value.cmp(b.value))
    });
    hits.truncate(if needle.is_empty() {
        POPULAR_LIMIT
    } else {
        SEARCH_LIMIT
    });
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_rules() {
        assert_eq!(ReferenceValue::new("  Core Router (DC-1) ").unwrap().as_str(), "Core Router (DC-1)");
        assert!(ReferenceValue::new("R&D / Lab [2]").is_ok());
        assert!(ReferenceValue::new("").is_err());
        assert!(ReferenceValue::new("drop;table").is_err());
        assert!(ReferenceValue::new(&"a".repeat(201)).is_err());
    }

    #[test]
    fn dedup_is_case_insensitive() {
        let a = ReferenceValue::new("Finance").unwrap();
        let b = ReferenceValue::new(" FINANCE ").unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn bulk_skips_invalid_and_duplicates() {
        let existing: HashSet<String> = ["hr".to_string()].into_iter().collect();
        let plan = plan_bulk(["Finance", "finance ", "HR", "bad;", "Legal"], &existing);
        let accepted: Vec<_> = plan.accepted.iter().map(|v| v.as_str()).collect();
        assert_eq!(accepted, vec!["Finance", "Legal"]);
        assert_eq!(plan.skipped_duplicate, vec!["finance", "HR"]);
        assert_eq!(plan.skipped_invalid, vec!["bad;"]);
    }

    #[test]
    fn ranking_prefers_prefix_then_usage() {
        let hits = vec![
            Ranked { value: "Payroll Server", usage_count: 1 },
            Ranked { value: "Server Room", usage_count: 2 },
            Ranked { value: "Server Farm", usage_count: 5 },
            Ranked { value: "Laptop", usage_count: 50 },
        ];
        let ranked = rank(hits, "serv");
        let values: Vec<_> = ranked.iter().map(|r| r.value).collect();
        assert_eq!(values, vec!["Server Farm", "Server Room", "Payroll Server"]);
    }

    #[test]
    fn empty_term_returns_popular() {
        let hits: Vec<Ranked> = (0..30)
            .map(|i| Ranked { value: "x", usage_count: i })
            .collect();
        let ranked = rank(hits, "");
        assert_eq!(ranked.len(), POPULAR_LIMIT);
        assert_eq!(ranked[0].usage_count, 29);
    }
}
