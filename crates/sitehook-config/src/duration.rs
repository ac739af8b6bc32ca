//! Duration strings such as `30s`, `5m` or `1h`.

use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Parse a duration string like "30s", "5m", "1h" into a Duration.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let invalid = |message: String| ConfigError::InvalidValue {
        field: "duration".to_string(),
        message,
    };

    let s = s.trim();
    if s.is_empty() {
        return Err(invalid("empty duration string".to_string()));
    }

    let (num_str, suffix) = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| (&s[..i], &s[i..]))
        .unwrap_or((s, ""));

    let num: u64 = num_str
        .parse()
        .map_err(|_| invalid(format!("invalid number in duration: {}", s)))?;

    let multiplier = match suffix.trim() {
        "ms" | "millis" | "millisecond" | "milliseconds" => {
            return Ok(Duration::from_millis(num));
        }
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3600,
        "d" | "day" | "days" => 86400,
        other => return Err(invalid(format!("unknown duration suffix: {}", other))),
    };

    let secs = num
        .checked_mul(multiplier)
        .ok_or_else(|| invalid(format!("duration out of range: {}", s)))?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration(" 2 hours ").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_durations() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("30x").is_err());
        assert!(parse_duration("abcs").is_err());
        assert!(parse_duration("-5m").is_err());
        assert!(matches!(
            parse_duration("999999999999999999d"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
