use url::Url;

const MIN_API_KEY_LEN: usize = 12;

/// Checks that `value` is an absolute `http`/`https` URL with a host.
pub fn validate_base_url(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return false;
    }
    match Url::parse(trimmed) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Checks key shape only; whether the key works is for the connection probe.
pub fn validate_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.chars().count() >= MIN_API_KEY_LEN && trimmed.chars().all(is_api_key_char)
}

fn is_api_key_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '+' | '.')
}

/// Trimmed, lowercased form used for name comparisons.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// True when no entry other than `exclude_id` already uses `name`.
///
/// `existing` yields `(id, name)` pairs.
pub fn validate_name_unique<'a, I>(name: &str, existing: I, exclude_id: Option<&str>) -> bool
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let wanted = normalize_name(name);
    !existing
        .into_iter()
        .filter(|(id, _)| Some(*id) != exclude_id)
        .any(|(_, other)| normalize_name(other) == wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_variants() {
        assert!(validate_base_url("https://api.example.com"));
        assert!(validate_base_url("http://localhost:8080"));
        assert!(validate_base_url("  https://api.example.com/v1/  "));
        assert!(!validate_base_url(""));
        assert!(!validate_base_url("   "));
        assert!(!validate_base_url("api.example.com"));
        assert!(!validate_base_url("/relative/path"));
        assert!(!validate_base_url("ftp://files.example.com"));
        assert!(!validate_base_url("file:///etc/passwd"));
        assert!(!validate_base_url("https://"));
    }

    #[test]
    fn api_key_variants() {
        assert!(validate_api_key("sk-ant-abcdefghij12"));
        assert!(validate_api_key("custom-key-1234567890"));
        assert!(validate_api_key("a.b_c+d-e123"));
        assert!(validate_api_key("  abcdefghijkl  "));
        assert!(!validate_api_key(""));
        assert!(!validate_api_key("    "));
        assert!(!validate_api_key("short-key"));
        assert!(!validate_api_key("abcdefghijk"));
        assert!(!validate_api_key("has space inside"));
        assert!(!validate_api_key("sk-ant/abcdefghij"));
        assert!(!validate_api_key("ключключключключ"));
    }

    #[test]
    fn name_uniqueness_is_case_and_space_insensitive() {
        let existing = [("1", "Prod"), ("2", "Dev")];
        assert!(!validate_name_unique("prod", existing, None));
        assert!(!validate_name_unique("  PROD ", existing, None));
        assert!(validate_name_unique("Staging", existing, None));
        assert!(validate_name_unique("prod", existing, Some("1")));
        assert!(!validate_name_unique("dev", existing, Some("1")));
    }
}
