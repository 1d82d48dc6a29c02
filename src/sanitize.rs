//! Identifier sanitization.
//!
//! External names (sheet names, file stems, JSON keys, remote column names)
//! become SQL identifiers here. Sanitization never fails: the output is
//! always non-empty and made only of ASCII letters, digits, `_`, and
//! non-ASCII characters (so CJK headers survive unchanged).

use std::collections::HashSet;

/// Fallback identifier for names with no usable characters.
pub const UNKNOWN: &str = "unknown";

/// Map an arbitrary string to a safe identifier.
///
/// Surrounding whitespace is trimmed, then every ASCII character other than
/// a letter, digit, or `_` becomes `_`. A result with no character besides
/// `_` (empty input, all punctuation) yields [`UNKNOWN`].
pub fn sanitize_name(name: &str) -> String {
    let out: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || !ch.is_ascii() {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if out.chars().all(|c| c == '_') {
        UNKNOWN.to_string()
    } else {
        out
    }
}

/// Hands out names that are unique within one scope, ignoring case.
///
/// On collision the name gets `_1`, `_2`, ... appended until it is free.
#[derive(Debug, Default, Clone)]
pub struct UniqueNames {
    used: HashSet<String>,
}

impl UniqueNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the scope with names that already exist.
    pub fn with_existing<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut this = Self::new();
        for n in names {
            this.used.insert(n.as_ref().to_lowercase());
        }
        this
    }

    /// Reserve `base`, or the first free `base_N`.
    pub fn claim(&mut self, base: &str) -> String {
        let mut candidate = base.to_string();
        let mut counter = 1;
        while self.used.contains(&candidate.to_lowercase()) {
            candidate = format!("{}_{}", base, counter);
            counter += 1;
        }
        self.used.insert(candidate.to_lowercase());
        candidate
    }

    pub fn contains(&self, name: &str) -> bool {
        self.used.contains(&name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_spaces_hyphens_and_punctuation() {
        assert_eq!(sanitize_name("Order Date"), "Order_Date");
        assert_eq!(sanitize_name("unit-price"), "unit_price");
        assert_eq!(sanitize_name("amount ($)"), "amount____");
        assert_eq!(sanitize_name("  padded  "), "padded");
    }

    #[test]
    fn keeps_non_ascii_letters() {
        assert_eq!(sanitize_name("销售额"), "销售额");
        assert_eq!(sanitize_name("客户 名称"), "客户_名称");
    }

    #[test]
    fn empty_or_punctuation_only_is_unknown() {
        assert_eq!(sanitize_name(""), "unknown");
        assert_eq!(sanitize_name("   "), "unknown");
        assert_eq!(sanitize_name("?!.-"), "unknown");
    }

    #[test]
    fn output_is_total_and_idempotent() {
        let inputs = [
            "", "a", "A b-c", "`drop`;", "x'y\"z", "名前", "__", "1st col", "tab\tsep", "émoji 🎉",
        ];
        for input in inputs {
            let once = sanitize_name(input);
            assert!(!once.is_empty());
            assert!(once
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || !c.is_ascii()));
            assert_eq!(sanitize_name(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn unique_names_append_counter_case_insensitively() {
        let mut names = UniqueNames::new();
        assert_eq!(names.claim("data"), "data");
        assert_eq!(names.claim("Data"), "Data_1");
        assert_eq!(names.claim("data"), "data_2");
        assert_eq!(names.claim("other"), "other");
    }

    #[test]
    fn unique_names_respect_existing() {
        let mut names = UniqueNames::with_existing(["orders", "orders_1"]);
        assert!(names.contains("ORDERS"));
        assert_eq!(names.claim("orders"), "orders_2");
    }
}
