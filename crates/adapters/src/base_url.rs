use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/v\d+(beta)?/?$").expect("invalid version suffix regex"));

/// Normalizes an OpenAI-style base URL. A trailing `#` means "use as is";
/// otherwise `/v1` is appended when no version segment is present.
pub fn check_base_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(verbatim) = trimmed.strip_suffix('#') {
        return verbatim.to_string();
    }
    if VERSION_SUFFIX_RE.is_match(trimmed) || trimmed.contains("/v1/") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("{}/v1", trimmed.trim_end_matches('/'))
    }
}

/// The configured base URL, or `default` when none is set, normalized.
pub fn resolve_base_url(configured: &str, default: &str) -> String {
    if configured.trim().is_empty() {
        check_base_url(default)
    } else {
        check_base_url(configured)
    }
}

pub fn join_endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_v1_when_missing() {
        assert_eq!(check_base_url("https://example.com"), "https://example.com/v1");
        assert_eq!(check_base_url("https://example.com/"), "https://example.com/v1");
    }

    #[test]
    fn keeps_existing_version() {
        assert_eq!(check_base_url("https://example.com/v2"), "https://example.com/v2");
        assert_eq!(
            check_base_url("https://example.com/v1beta/"),
            "https://example.com/v1beta"
        );
    }

    #[test]
    fn hash_suffix_disables_normalization() {
        assert_eq!(
            check_base_url("https://example.com/api/#"),
            "https://example.com/api/"
        );
    }

    #[test]
    fn falls_back_to_default_and_joins_paths() {
        let base = resolve_base_url("  ", "https://api.deepseek.com");
        assert_eq!(base, "https://api.deepseek.com/v1");
        assert_eq!(
            join_endpoint(&base, "/chat/completions"),
            "https://api.deepseek.com/v1/chat/completions"
        );
    }
}
