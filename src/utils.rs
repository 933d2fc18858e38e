//! Small helpers shared by players and the manager.

use url::Url;

use crate::{Error, Result};

const SECOND: u64 = 1_000;
const MINUTE: u64 = SECOND * 60;
const HOUR: u64 = MINUTE * 60;

/// Convierte un tiempo estilo YouTube ("10:30" o "1:02:03") a milisegundos.
pub fn to_millis(input: &str) -> Result<u64> {
    let parts = input
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| {
            Error::validation(format!(
                "expected a time string (ex: 10:30) but received {input}"
            ))
        })?;

    let (hours, minutes, seconds) = match parts.as_slice() {
        [minutes, seconds] => (0, *minutes, *seconds),
        [hours, minutes, seconds] => (*hours, *minutes, *seconds),
        _ => {
            return Err(Error::validation(format!(
                "expected MM:SS or H:MM:SS but received {input}"
            )))
        }
    };

    hours
        .checked_mul(HOUR)
        .zip(minutes.checked_mul(MINUTE))
        .zip(seconds.checked_mul(SECOND))
        .and_then(|((h, m), s)| h.checked_add(m)?.checked_add(s))
        .ok_or_else(|| Error::validation(format!("time {input} is too large")))
}

/// Convierte milisegundos a un tiempo estilo YouTube, redondeando al segundo.
pub fn to_time_string(millis: u64) -> String {
    let total = millis.saturating_add(SECOND / 2) / SECOND;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Checks whether the input is an absolute http(s) URI.
pub fn is_valid_uri(input: &str) -> bool {
    Url::parse(input)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.has_host())
        .unwrap_or(false)
}
