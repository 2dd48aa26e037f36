//! Minimal human-friendly duration parsing for `--timeout`.
//!
//! Accepts a bare integer (seconds) or a suffixed value: `30s`, `5m`,
//! `2h`. Nothing fancier — the CLI surface doesn't need combined units
//! like `1h30m`.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[error("invalid duration '{0}': expected a number of seconds, or a value suffixed with s/m/h")]
pub struct ParseDurationError(String);

pub fn parse_duration(input: &str) -> Result<Duration, ParseDurationError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseDurationError(input.to_string()));
    }

    let (digits, multiplier) = match input.chars().last() {
        Some('s') => (&input[..input.len() - 1], 1),
        Some('m') => (&input[..input.len() - 1], 60),
        Some('h') => (&input[..input.len() - 1], 3600),
        _ => (input, 1),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| ParseDurationError(input.to_string()))?;

    Ok(Duration::from_secs(value * multiplier))
}
