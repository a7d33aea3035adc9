use http::Uri;

use super::{has_scheme, PathTarget, Rule};

/// Scheme of the listener a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Prefix put in front of scheme-less targets.
    pub fn prefix(self) -> &'static str {
        match self {
            Scheme::Http => "http://",
            Scheme::Https => "https://",
        }
    }

    /// Listener label used in metrics.
    pub fn label(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// Computed destination for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub location: String,
    pub status: u16,
}

/// Compute where a request for `rule`'s domain goes.
///
/// Matching and promotion both use the path exactly as received, so
/// percent-encoded segments pass through untouched. Never fails.
pub fn resolve(rule: &Rule, uri: &Uri, scheme: Scheme) -> Redirect {
    let req_path = uri.path();
    let req_query = uri.query().unwrap_or("");

    let mut target = rule.to.as_str();
    let mut path = String::new();
    let mut query = String::new();

    if rule.promotable {
        path.push_str(req_path);
        if !req_query.is_empty() {
            query.push('?');
            query.push_str(req_query);
        }
    }

    if !rule.path_entries.is_empty() {
        let candidate = format!("{req_path}?{req_query}");

        for entry in &rule.path_entries {
            if !candidate.starts_with(&entry.from) {
                continue;
            }

            // A prefix that only matches across the '?' leaves no usable
            // remainder; the prefix itself stands in for it.
            let remainder = req_path
                .strip_prefix(entry.from.as_str())
                .unwrap_or(entry.from.as_str());

            match &entry.to {
                PathTarget::Inert => continue,
                PathTarget::Absolute(url) => {
                    target = url.as_str();
                    path = remainder.to_string();
                }
                PathTarget::Relative(to) if rule.promotable => path = join(to, remainder),
                PathTarget::Relative(to) => path = to.clone(),
            }
            break;
        }
    }

    if target.ends_with('/') && path.starts_with('/') {
        path = path.trim_start_matches('/').to_string();
    }

    let mut location = String::with_capacity(target.len() + path.len() + query.len() + 8);
    if !has_scheme(target) {
        location.push_str(scheme.prefix());
    }
    location.push_str(target);
    location.push_str(&path);
    location.push_str(&query);

    Redirect {
        location,
        status: rule.code,
    }
}

/// Join two path fragments with exactly one separating slash.
fn join(base: &str, rest: &str) -> String {
    let base = base.trim_end_matches('/');
    let rest = rest.trim_start_matches('/');
    match (base.is_empty(), rest.is_empty()) {
        (true, true) => "/".to_string(),
        (false, true) => base.to_string(),
        (true, false) => format!("/{rest}"),
        (false, false) => format!("{base}/{rest}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::PathEntry;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    fn rule(to: &str, promotable: bool, entries: &[(&str, &str)]) -> Rule {
        let mut rule = Rule::new("example.com", to, 301);
        rule.promotable = promotable;
        rule.path_entries = entries
            .iter()
            .map(|(from, to)| PathEntry::new(*from, *to))
            .collect();
        rule.normalize();
        rule
    }

    fn location(rule: &Rule, request: &str) -> String {
        resolve(rule, &uri(request), Scheme::Https).location
    }

    #[test]
    fn test_non_promotable_drops_path_and_query() {
        let r = rule("https://www.example.com", false, &[]);
        let redirect = resolve(&r, &uri("/path/to/promote?with=query"), Scheme::Https);
        assert_eq!(redirect.location, "https://www.example.com");
        assert_eq!(redirect.status, 301);

        let r = rule("https://www.example.com/", false, &[]);
        assert_eq!(location(&r, "/path/to/promote?with=query"), "https://www.example.com/");
    }

    #[test]
    fn test_promotable_keeps_path_and_query() {
        let r = rule("https://www.example.com", true, &[]);
        assert_eq!(
            location(&r, "/path/to/promote?with=query"),
            "https://www.example.com/path/to/promote?with=query"
        );
        assert_eq!(
            location(&r, "/path/to/promote/"),
            "https://www.example.com/path/to/promote/"
        );
    }

    #[test]
    fn test_promotable_collapses_double_slash() {
        let r = rule("https://www.example.com/", true, &[]);
        assert_eq!(location(&r, "/a/b?c=d"), "https://www.example.com/a/b?c=d");
    }

    #[test]
    fn test_path_entry_relative_target_promotable() {
        let r = rule("https://www.example.com", true, &[("/old/path", "/new/target")]);
        assert_eq!(
            location(&r, "/path/to/promote?with=query"),
            "https://www.example.com/path/to/promote?with=query"
        );
        assert_eq!(
            location(&r, "/old/path/to/promote?with=query"),
            "https://www.example.com/new/target/to/promote?with=query"
        );
    }

    #[test]
    fn test_path_entry_relative_target_non_promotable() {
        let r = rule("https://www.example.com/", false, &[("/old/path", "/new/target")]);
        assert_eq!(location(&r, "/path/to/promote?with=query"), "https://www.example.com/");
        assert_eq!(
            location(&r, "/old/path/to/promote?with=query"),
            "https://www.example.com/new/target"
        );
    }

    #[test]
    fn test_path_entry_absolute_target() {
        let entries = [("/old/path", "https://theotherserver.com/new/target/")];

        let r = rule("https://www.example.com", true, &entries);
        assert_eq!(
            location(&r, "/old/path/to/promote?with=query"),
            "https://theotherserver.com/new/target/to/promote?with=query"
        );

        let r = rule("https://www.example.com", false, &entries);
        assert_eq!(
            location(&r, "/old/path/to/promote?with=query"),
            "https://theotherserver.com/new/target/to/promote"
        );
    }

    #[test]
    fn test_inert_entries_are_skipped() {
        let r = rule("https://www.example.com", true, &[("/old", ""), ("/o", "/fallback")]);
        assert_eq!(location(&r, "/old/page"), "https://www.example.com/fallback/ld/page");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let r = rule(
            "https://www.example.com",
            true,
            &[("/docs", "/manual"), ("/docs/v1", "/archive/v1")],
        );
        assert_eq!(location(&r, "/docs/v1/intro"), "https://www.example.com/archive/v1/intro");
        assert_eq!(location(&r, "/docs/intro"), "https://www.example.com/manual/intro");
    }

    #[test]
    fn test_prefix_spanning_query_uses_prefix_as_remainder() {
        let r = rule("https://www.example.com", false, &[("/search?q=", "https://find.example")]);
        assert_eq!(location(&r, "/search?q=rust"), "https://find.example/search?q=");
    }

    #[test]
    fn test_scheme_less_target_gets_listener_scheme() {
        let r = rule("www.example.com", true, &[]);
        assert_eq!(
            resolve(&r, &uri("/a"), Scheme::Http).location,
            "http://www.example.com/a"
        );
        assert_eq!(
            resolve(&r, &uri("/a"), Scheme::Https).location,
            "https://www.example.com/a"
        );
    }

    #[test]
    fn test_escaped_path_is_preserved() {
        let r = rule("https://www.example.com", true, &[]);
        assert_eq!(
            location(&r, "/caf%C3%A9/a%20b"),
            "https://www.example.com/caf%C3%A9/a%20b"
        );
    }

    #[test]
    fn test_status_code_is_rule_code() {
        let mut r = rule("https://www.example.com", false, &[]);
        r.code = 308;
        assert_eq!(resolve(&r, &uri("/"), Scheme::Https).status, 308);
    }

    #[test]
    fn test_join() {
        assert_eq!(join("/new/target/", "//rest"), "/new/target/rest");
        assert_eq!(join("/new/target", ""), "/new/target");
        assert_eq!(join("", "rest"), "/rest");
        assert_eq!(join("/", "/"), "/");
    }
}
