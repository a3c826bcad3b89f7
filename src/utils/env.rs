/// Get environment variable with GATESYNC_ prefix, falling back to unprefixed version
///
/// Checks `GATESYNC_{key}` first, then `{key}`, so deployments can share
/// conventional names like `DATABASE_URL` with other services.
///
/// # Examples
///
/// ```rust
/// use gatesync::utils::get_env_with_prefix;
///
/// // Checks GATESYNC_SYNC_PAGE_SIZE first, then SYNC_PAGE_SIZE
/// let page_size = get_env_with_prefix("SYNC_PAGE_SIZE");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("GATESYNC_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse a boolean flag the way operators tend to write them.
///
/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Read a prefixed environment variable and parse it with `FromStr`.
///
/// Returns `None` when the variable is unset or does not parse.
pub fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_with_prefix() {
        unsafe {
            std::env::set_var("GATESYNC_ENV_TEST_VAR", "prefixed_value");
            std::env::set_var("ENV_TEST_VAR", "unprefixed_value");
        }
        assert_eq!(get_env_with_prefix("ENV_TEST_VAR"), Some("prefixed_value".to_string()));
        unsafe {
            std::env::remove_var("GATESYNC_ENV_TEST_VAR");
        }
        assert_eq!(get_env_with_prefix("ENV_TEST_VAR"), Some("unprefixed_value".to_string()));
        unsafe {
            std::env::remove_var("ENV_TEST_VAR");
        }

        assert_eq!(get_env_with_prefix("ENV_TEST_NON_EXISTENT"), None);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_parse_env_ignores_garbage() {
        unsafe {
            std::env::set_var("GATESYNC_ENV_TEST_NUMBER", "not-a-number");
        }
        assert_eq!(parse_env::<u32>("ENV_TEST_NUMBER"), None);
        unsafe {
            std::env::set_var("GATESYNC_ENV_TEST_NUMBER", " 42 ");
        }
        assert_eq!(parse_env::<u32>("ENV_TEST_NUMBER"), Some(42));
        unsafe {
            std::env::remove_var("GATESYNC_ENV_TEST_NUMBER");
        }
    }
}
