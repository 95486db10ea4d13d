//! Small string helpers shared by workers and the orchestrator.

/// Longest value written to a log line before it is truncated.
pub const MAX_LOG_VALUE_LENGTH: usize = 100;

/// Sanitize an untrusted value (video id, object key, error text) for logging.
///
/// Control characters are dropped, surrounding whitespace is trimmed and
/// anything longer than [`MAX_LOG_VALUE_LENGTH`] characters is cut and
/// suffixed with `...`.
pub fn sanitize_for_log(input: &str) -> String {
    let cleaned: String = input.chars().filter(|c| !c.is_control()).collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() > MAX_LOG_VALUE_LENGTH {
        let mut cut: String = trimmed.chars().take(MAX_LOG_VALUE_LENGTH).collect();
        cut.push_str("...");
        cut
    } else {
        trimmed.to_string()
    }
}

/// Last path segment of an object key.
///
/// `"trimmed/v-1.mp4"` → `"v-1.mp4"`. Keys without a separator are returned
/// unchanged; a trailing separator yields the key itself.
pub fn object_basename(key: &str) -> &str {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("  v-1\r\n\u{1b}[31m "), "v-1[31m");
    }

    #[test]
    fn test_sanitize_truncates_long_values() {
        let long = "x".repeat(150);
        let out = sanitize_for_log(&long);
        assert_eq!(out.len(), MAX_LOG_VALUE_LENGTH + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn test_sanitize_keeps_short_values() {
        assert_eq!(sanitize_for_log("raw/v-1.mp4"), "raw/v-1.mp4");
    }

    #[test]
    fn test_object_basename() {
        assert_eq!(object_basename("trimmed/v-1.mp4"), "v-1.mp4");
        assert_eq!(object_basename("a/b/c.mp4"), "c.mp4");
        assert_eq!(object_basename("v-1.mp4"), "v-1.mp4");
        assert_eq!(object_basename("dir/"), "dir/");
    }
}
