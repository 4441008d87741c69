use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use aipal_error::{RelayError, Result};

/// `[YYYYMMDDTHHMM]` for `at` shifted to `offset`.
pub fn timestamp_prefix(at: OffsetDateTime, offset: UtcOffset) -> String {
    let format = format_description!("[year][month][day]T[hour][minute]");
    let local = at.to_offset(offset);
    // The format has no fallible components for in-range dates.
    let formatted = local.format(&format).unwrap_or_default();
    format!("[{formatted}]")
}

/// Prefixes non-blank `text` with [`timestamp_prefix`]; blank text is returned as is.
pub fn prefix_with_timestamp(text: &str, at: OffsetDateTime, offset: UtcOffset) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }
    format!("{} {}", timestamp_prefix(at, offset), text.trim_start())
}

/// Parses `UTC`, `Z` or a signed `+HH:MM` offset.
pub fn parse_offset(value: &str) -> Result<UtcOffset> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("utc") || value.eq_ignore_ascii_case("z") {
        return Ok(UtcOffset::UTC);
    }
    let format = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    UtcOffset::parse(value, &format).map_err(|err| RelayError::Config {
        message: format!("invalid timestamp offset {value:?}: {err}"),
    })
}
