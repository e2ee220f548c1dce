// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Parse durations of the form `500ms`, `10s`, `5m`, `24h`. A bare number
/// is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => s.split_at(pos),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration: {s}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        other => Err(format!("unknown duration unit: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_units() {
        assert_eq!(Ok(Duration::from_millis(500)), parse_duration("500ms"));
        assert_eq!(Ok(Duration::from_secs(10)), parse_duration("10s"));
        assert_eq!(Ok(Duration::from_secs(300)), parse_duration("5m"));
        assert_eq!(Ok(Duration::from_secs(86400)), parse_duration("24h"));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(Ok(Duration::from_secs(30)), parse_duration("30"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10d").is_err());
        assert!(parse_duration("").is_err());
    }
}
