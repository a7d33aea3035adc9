//! Redirect rules and their validation.
//!
//! A [`Rule`] describes where requests for one domain are sent. Rules are
//! validated and normalized once at write time ([`Rule::validate`],
//! [`Rule::normalize`]) so that the resolver can assume well-formed input.

mod resolve;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use resolve::{resolve, Redirect, Scheme};

/// Redirect status codes a rule may emit.
pub const ALLOWED_CODES: [u16; 6] = [301, 302, 304, 305, 307, 308];

/// Redirect configuration for one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Domain the rule applies to (primary key)
    #[serde(rename = "redirect_from")]
    pub from: String,
    #[serde(default)]
    pub description: String,
    /// Target host or absolute URL
    #[serde(rename = "redirect_to")]
    pub to: String,
    /// Preserve the request path and query on the target
    #[serde(default)]
    pub promotable: bool,
    pub code: u16,
    /// Prefix rules, longest `from` first
    #[serde(rename = "path_map", default, skip_serializing_if = "Vec::is_empty")]
    pub path_entries: Vec<PathEntry>,
    #[serde(rename = "created", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "modified", default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
}

/// A prefix-based path rewrite inside one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    pub from: String,
    pub to: PathTarget,
}

impl PathEntry {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: PathTarget::from(to.into()),
        }
    }
}

/// Where a matching path entry sends the request.
///
/// Classified once when the entry is built; the wire form stays a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PathTarget {
    /// `http://` or `https://` URL that replaces the rule's target host
    Absolute(String),
    /// Path on the rule's target host
    Relative(String),
    /// Empty target; the entry is kept but never matches
    Inert,
}

impl From<String> for PathTarget {
    fn from(to: String) -> Self {
        if to.is_empty() {
            PathTarget::Inert
        } else if has_scheme(&to) {
            PathTarget::Absolute(to)
        } else {
            PathTarget::Relative(to)
        }
    }
}

impl From<PathTarget> for String {
    fn from(target: PathTarget) -> Self {
        match target {
            PathTarget::Absolute(s) | PathTarget::Relative(s) => s,
            PathTarget::Inert => String::new(),
        }
    }
}

/// Whether `target` starts with an `http://` or `https://` scheme.
pub fn has_scheme(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://")
}

impl Rule {
    pub fn new(from: impl Into<String>, to: impl Into<String>, code: u16) -> Self {
        Self {
            from: from.into(),
            description: String::new(),
            to: to.into(),
            promotable: false,
            code,
            path_entries: Vec::new(),
            created_at: None,
            modified_at: None,
        }
    }

    /// Check that the rule can be stored and resolved.
    pub fn validate(&self) -> Result<(), AppError> {
        if !ALLOWED_CODES.contains(&self.code) {
            return Err(AppError::Validation(format!(
                "invalid HTTP redirect code {}",
                self.code
            )));
        }

        let domain = self.from.trim();
        if domain.is_empty() {
            return Err(AppError::Validation("domain must not be empty".to_string()));
        }
        if domain.contains("://")
            || domain
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '?' || c == '#')
        {
            return Err(AppError::Validation(format!(
                "invalid domain name '{}'",
                self.from
            )));
        }

        let to = self.to.trim();
        if to.is_empty() {
            return Err(AppError::Validation(format!(
                "redirect target for '{}' must not be empty",
                self.from
            )));
        }
        if to.contains("://") && !has_scheme(to) {
            return Err(AppError::Validation(format!(
                "redirect target '{}' must use http or https",
                self.to
            )));
        }

        for entry in &self.path_entries {
            if entry.from.is_empty() {
                return Err(AppError::Validation(format!(
                    "path map entry of '{}' has an empty prefix",
                    self.from
                )));
            }
            if let PathTarget::Relative(path) = &entry.to {
                if !path.starts_with('/') {
                    return Err(AppError::Validation(format!(
                        "path map target '{}' must start with '/' or be an http(s) URL",
                        path
                    )));
                }
            }
        }

        Ok(())
    }

    /// Normalize for storage: lowercase domain, longest path prefixes first.
    ///
    /// The sort is stable, so entries of equal prefix length keep the order
    /// they were submitted in.
    pub fn normalize(&mut self) {
        self.from = self.from.trim().to_ascii_lowercase();
        self.to = self.to.trim().to_string();
        self.path_entries
            .sort_by(|a, b| b.from.len().cmp(&a.from.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_allowed_codes() {
        for code in ALLOWED_CODES {
            let rule = Rule::new("example.com", "https://www.example.com", code);
            assert!(rule.validate().is_ok(), "code {code} should be accepted");
        }
    }

    #[test]
    fn test_validate_rejects_303_306_and_out_of_range() {
        for code in [0, 200, 300, 303, 306, 309, 404] {
            let rule = Rule::new("example.com", "https://www.example.com", code);
            assert!(
                matches!(rule.validate(), Err(AppError::Validation(_))),
                "code {code} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_malformed_domain() {
        for from in ["", "   ", "http://example.com", "example.com/path", "exa mple.com"] {
            let rule = Rule::new(from, "https://www.example.com", 301);
            assert!(rule.validate().is_err(), "domain {from:?} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_empty_target() {
        let rule = Rule::new("example.com", " ", 301);
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_target_scheme() {
        let rule = Rule::new("example.com", "ftp://files.example.com", 301);
        assert!(matches!(rule.validate(), Err(AppError::Validation(_))));

        // Bare hosts get the listener scheme later
        let rule = Rule::new("example.com", "www.example.com", 301);
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_relative_path_target_without_slash() {
        let mut rule = Rule::new("example.com", "https://x.com", 301);
        rule.path_entries = vec![PathEntry::new("/old", "new")];
        assert!(matches!(rule.validate(), Err(AppError::Validation(_))));

        rule.path_entries = vec![PathEntry::new("/old", "ftp://files.example.com/")];
        assert!(rule.validate().is_err());

        rule.path_entries = vec![
            PathEntry::new("/old", "/new"),
            PathEntry::new("/blog", "https://blog.example.com/"),
            PathEntry::new("/gone", ""),
        ];
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_normalize_sorts_longest_prefix_first() {
        let mut rule = Rule::new("Example.COM ", "https://www.example.com", 301);
        rule.path_entries = vec![
            PathEntry::new("/a", "/short"),
            PathEntry::new("/a/b/c", "/longest"),
            PathEntry::new("/a/b", "/middle"),
            PathEntry::new("/x/y", "/same-length"),
        ];

        rule.normalize();

        assert_eq!(rule.from, "example.com");
        let prefixes: Vec<_> = rule.path_entries.iter().map(|e| e.from.as_str()).collect();
        assert_eq!(prefixes, ["/a/b/c", "/a/b", "/x/y", "/a"]);
    }

    #[test]
    fn test_path_target_classification() {
        assert_eq!(
            PathTarget::from("https://other.example/".to_string()),
            PathTarget::Absolute("https://other.example/".to_string())
        );
        assert_eq!(
            PathTarget::from("http://other.example".to_string()),
            PathTarget::Absolute("http://other.example".to_string())
        );
        assert_eq!(
            PathTarget::from("/new/target".to_string()),
            PathTarget::Relative("/new/target".to_string())
        );
        assert_eq!(PathTarget::from(String::new()), PathTarget::Inert);
    }

    #[test]
    fn test_rule_json_field_names() {
        let json = r#"{
            "redirect_from": "example.com",
            "redirect_to": "https://www.example.com",
            "promotable": true,
            "code": 308,
            "path_map": [{"from": "/old", "to": "/new"}, {"from": "/gone", "to": ""}]
        }"#;

        let rule: Rule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.from, "example.com");
        assert!(rule.promotable);
        assert_eq!(rule.code, 308);
        assert_eq!(rule.path_entries[0].to, PathTarget::Relative("/new".into()));
        assert_eq!(rule.path_entries[1].to, PathTarget::Inert);
        assert!(rule.created_at.is_none());

        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["path_map"][1]["to"], "");
        assert!(value.get("created").is_none());
    }
}
