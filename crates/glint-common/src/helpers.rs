//! Common helper functions for Glint.

/// Reads a boolean toggle from the environment.
///
/// `1`, `true`, `yes` and `on` (any case) are true; any other value is
/// false. Returns `default` when the variable is unset.
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_bool_flag(&value),
        Err(_) => default,
    }
}

/// Microseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

fn parse_bool_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_flag_truthy() {
        assert!(parse_bool_flag("1"));
        assert!(parse_bool_flag("TRUE"));
        assert!(parse_bool_flag(" yes "));
        assert!(parse_bool_flag("On"));
    }

    #[test]
    fn test_parse_bool_flag_falsy() {
        assert!(!parse_bool_flag("0"));
        assert!(!parse_bool_flag(""));
        assert!(!parse_bool_flag("off"));
        assert!(!parse_bool_flag("enabled"));
    }

    #[test]
    fn test_env_bool_default_when_unset() {
        assert!(env_bool("GLINT_TEST_SURELY_UNSET_TOGGLE", true));
        assert!(!env_bool("GLINT_TEST_SURELY_UNSET_TOGGLE", false));
    }

    #[test]
    fn test_now_us_is_monotonic_enough() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
        assert!(a > 0);
    }
}
