//! # Approval Timeouts
//!
//! Parses step timeout strings such as `"10m"`, `"1h 30m"` or `"7d"` into
//! milliseconds and derives approval deadlines from them.
//!
//! A timeout is a sequence of `<n><unit>` groups with optional whitespace
//! between them. Units: `w`, `d`, `h`, `m`, `s`, `ms`.

use crate::error::{GatekeeperError, GatekeeperResult};
use crate::models::step_parameters::{ParameterField, EXPRESSION_PREFIX};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;

fn invalid(value: &str, reason: impl Into<String>) -> GatekeeperError {
    GatekeeperError::InvalidTimeout {
        value: value.to_string(),
        reason: reason.into(),
    }
}

/// Parse a duration string into milliseconds. The result is always positive.
pub fn parse_duration_millis(raw: &str) -> GatekeeperResult<i64> {
    if raw.contains(EXPRESSION_PREFIX) {
        return Err(invalid(raw, "timeout still contains an unresolved expression"));
    }

    let input = raw.trim();
    if input.is_empty() {
        return Err(invalid(raw, "timeout is empty"));
    }

    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut total: i64 = 0;

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let digits_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if digits_start == pos {
            return Err(invalid(
                raw,
                format!("expected a number at position {digits_start}"),
            ));
        }
        let amount: i64 = input[digits_start..pos]
            .parse()
            .map_err(|_| invalid(raw, "number is too large"))?;

        let unit_start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let unit_millis = match &input[unit_start..pos] {
            "w" => MS_PER_WEEK,
            "d" => MS_PER_DAY,
            "h" => MS_PER_HOUR,
            "m" => MS_PER_MINUTE,
            "s" => MS_PER_SECOND,
            "ms" => 1,
            "" => return Err(invalid(raw, format!("missing unit after {amount}"))),
            other => return Err(invalid(raw, format!("unknown unit '{other}'"))),
        };

        total = amount
            .checked_mul(unit_millis)
            .and_then(|millis| total.checked_add(millis))
            .ok_or_else(|| invalid(raw, "timeout overflows"))?;
    }

    if total <= 0 {
        return Err(invalid(raw, "timeout must be greater than zero"));
    }

    Ok(total)
}

/// Resolve a step's declared timeout, falling back to `default_timeout` when
/// the step declares none (or an empty string).
pub fn resolve_timeout_millis(
    timeout: Option<&ParameterField<String>>,
    default_timeout: &str,
) -> GatekeeperResult<i64> {
    match timeout {
        None => parse_duration_millis(default_timeout),
        Some(ParameterField::Expression { expression }) => Err(invalid(
            expression,
            "timeout still contains an unresolved expression",
        )),
        Some(ParameterField::Value(value)) if value.trim().is_empty() => {
            parse_duration_millis(default_timeout)
        }
        Some(ParameterField::Value(value)) => parse_duration_millis(value),
    }
}

/// Deadline in epoch millis for an instance created at `created_at`
pub fn compute_deadline(
    created_at: i64,
    timeout: Option<&ParameterField<String>>,
    default_timeout: &str,
) -> GatekeeperResult<i64> {
    let millis = resolve_timeout_millis(timeout, default_timeout)?;
    created_at
        .checked_add(millis)
        .ok_or_else(|| invalid(default_timeout, "deadline overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_units() {
        assert_eq!(parse_duration_millis("10m").unwrap(), 600_000);
        assert_eq!(parse_duration_millis("1h").unwrap(), 3_600_000);
        assert_eq!(parse_duration_millis("7d").unwrap(), 604_800_000);
        assert_eq!(parse_duration_millis("2w").unwrap(), 1_209_600_000);
        assert_eq!(parse_duration_millis("45s").unwrap(), 45_000);
        assert_eq!(parse_duration_millis("250ms").unwrap(), 250);
    }

    #[test]
    fn test_compound_durations() {
        assert_eq!(parse_duration_millis("1h 30m").unwrap(), 5_400_000);
        assert_eq!(parse_duration_millis("1d2h").unwrap(), 93_600_000);
        assert_eq!(parse_duration_millis("  1m 500ms ").unwrap(), 60_500);
    }

    #[test]
    fn test_malformed_durations() {
        for raw in ["", "   ", "10", "m", "10x", "ten minutes", "0s", "1h -5m"] {
            assert!(
                matches!(
                    parse_duration_millis(raw),
                    Err(GatekeeperError::InvalidTimeout { .. })
                ),
                "expected '{raw}' to be rejected"
            );
        }
    }

    #[test]
    fn test_unresolved_expression_is_invalid() {
        let err = parse_duration_millis("<+pipeline.variables.timeout>").unwrap_err();
        assert!(err.to_string().contains("unresolved expression"));

        let field = ParameterField::Expression {
            expression: "<+stage.timeout>".to_string(),
        };
        assert!(resolve_timeout_millis(Some(&field), "7d").is_err());
    }

    #[test]
    fn test_absent_or_empty_timeout_uses_default() {
        assert_eq!(resolve_timeout_millis(None, "7d").unwrap(), 604_800_000);
        let empty = ParameterField::Value(String::new());
        assert_eq!(resolve_timeout_millis(Some(&empty), "1h").unwrap(), 3_600_000);
    }

    #[test]
    fn test_ten_minute_deadline() {
        let created_at = 1_700_000_000_000;
        let timeout = ParameterField::Value("10m".to_string());
        assert_eq!(
            compute_deadline(created_at, Some(&timeout), "7d").unwrap(),
            created_at + 600_000
        );
    }
}
