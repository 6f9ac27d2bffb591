//! Hostnames derived from container names

use regex_lite::Regex;
use std::sync::OnceLock;

fn disallowed_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^-a-z0-9.]+").expect("valid hostname regex"))
}

fn hyphen_runs() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").expect("valid hyphen regex"))
}

/// Build a DNS label from a container name.
///
/// Runs of characters outside `[-a-z0-9.]` become a single `-`, leading and
/// trailing hyphens are trimmed and remaining hyphen runs collapse to one.
/// Uppercase letters are not folded, so they count as disallowed.
///
/// Returns `None` when nothing usable is left.
pub fn derive_hostname(container_name: &str) -> Option<String> {
    let replaced = disallowed_chars().replace_all(container_name, "-");
    let trimmed = replaced.trim_matches('-');
    let collapsed = hyphen_runs().replace_all(trimmed, "-");

    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}
