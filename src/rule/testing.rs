//! Rule fixtures shared by unit tests.

use super::Rule;

/// A plain, non-promotable 301 rule for `domain`.
pub fn rule(domain: &str) -> Rule {
    Rule::new(domain, format!("https://www.{domain}"), 301)
}
