/// Get environment variable with FUNDWAY_ prefix, falling back to unprefixed version
///
/// Checks `FUNDWAY_{key}` first, then `{key}`.
///
/// # Examples
///
/// ```rust,ignore
/// use fundway::utils::get_env_with_prefix;
///
/// // Checks FUNDWAY_MAX_CHARGE_RETRIES first, then MAX_CHARGE_RETRIES
/// let retries = get_env_with_prefix("MAX_CHARGE_RETRIES");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("FUNDWAY_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Parse an environment variable, ignoring values that fail to parse.
pub fn parse_env_with_prefix<T: std::str::FromStr>(key: &str) -> Option<T> {
    get_env_with_prefix(key).and_then(|v| v.parse().ok())
}
