//! Provides parsers and formatters for the byte sizes and durations used in the system config.
use std::fmt::Write;
use std::time::Duration;

use anyhow::Context;

/// Parses a size in bytes from a given string.
///
/// The string can have the following suffixes:
/// * **b** or **B**: treats the value as bytes (same as no suffix)
/// * **k** or **K**: treats the value as KiB
/// * **m** or **M**: treats the value as MiB
/// * **g** or **G**: treats the value as GiB
///
/// Returns an **Err** if a non-integer value or an unknown suffix is given or if the value
/// overflows.
///
/// # Examples
///
/// ```
/// assert_eq!(shardcache::fmt::parse_size("100").unwrap(), 100);
/// assert_eq!(shardcache::fmt::parse_size("100b").unwrap(), 100);
/// assert_eq!(shardcache::fmt::parse_size("2k").unwrap(), 2048);
/// assert_eq!(shardcache::fmt::parse_size("8 M").unwrap(), 8 * 1024 * 1024);
/// assert_eq!(shardcache::fmt::parse_size("1g").unwrap(), 1024 * 1024 * 1024);
///
/// // Unknown suffixes, decimal and negative numbers are rejected...
/// assert_eq!(shardcache::fmt::parse_size("3 Y").is_err(), true);
/// assert_eq!(shardcache::fmt::parse_size("1.2g").is_err(), true);
/// assert_eq!(shardcache::fmt::parse_size("-1").is_err(), true);
/// ```
pub fn parse_size(str: impl AsRef<str>) -> anyhow::Result<usize> {
    lazy_static::lazy_static! {
        static ref SIZE: regex::Regex = regex::Regex::new(r"^\s*(\d+)\s*([bBkKmMgG]?)\s*$").unwrap();
    }

    let input = str.as_ref();
    let captures = SIZE.captures(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a size. Expected a positive number and optionally 'b', 'k', 'm' or 'g' as suffix.",
            input
        )
    })?;

    let number = captures[1]
        .parse::<usize>()
        .with_context(|| format!("Cannot parse '{}' into a size.", input))?;
    let unit: usize = match &captures[2] {
        "k" | "K" => 1 << 10,
        "m" | "M" => 1 << 20,
        "g" | "G" => 1 << 30,
        _ => 1,
    };

    number
        .checked_mul(unit)
        .ok_or_else(|| anyhow::anyhow!("The size '{}' is too large.", input))
}

/// Parses a duration from a given string.
///
/// The string can have the following suffixes:
/// * **ms**: treats the value as milliseconds
/// * **s**: treats the value as seconds (same as no suffix)
/// * **m**: treats the value as minutes
/// * **h**: treats the value as hours
/// * **d**: treats the value as days
///
/// Suffixes are case insensitive. Returns an **Err** if a non-integer value or an unknown suffix
/// is given.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(shardcache::fmt::parse_duration("100 ms").unwrap(), Duration::from_millis(100));
/// assert_eq!(shardcache::fmt::parse_duration("12").unwrap(), Duration::from_secs(12));
/// assert_eq!(shardcache::fmt::parse_duration("10m").unwrap(), Duration::from_secs(600));
/// assert_eq!(shardcache::fmt::parse_duration("2 H").unwrap(), Duration::from_secs(2 * 60 * 60));
/// assert_eq!(shardcache::fmt::parse_duration("1d").unwrap(), Duration::from_secs(24 * 60 * 60));
///
/// // Unknown suffixes, decimal and negative numbers are rejected...
/// assert_eq!(shardcache::fmt::parse_duration("3 Y").is_err(), true);
/// assert_eq!(shardcache::fmt::parse_duration("1.2s").is_err(), true);
/// assert_eq!(shardcache::fmt::parse_duration("-1m").is_err(), true);
/// ```
pub fn parse_duration(str: impl AsRef<str>) -> anyhow::Result<Duration> {
    lazy_static::lazy_static! {
        static ref DURATION: regex::Regex =
            regex::Regex::new(r"(?i)^\s*(\d+)\s*(ms|s|m|h|d)?\s*$").unwrap();
    }

    let input = str.as_ref();
    let captures = DURATION.captures(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Cannot parse '{}' into a duration. Expected a positive number and optionally 'ms', 's', 'm', 'h' or 'd' as suffix.",
            input
        )
    })?;

    let number = captures[1]
        .parse::<u64>()
        .with_context(|| format!("Cannot parse '{}' into a duration.", input))?;
    let suffix = captures
        .get(2)
        .map(|suffix| suffix.as_str().to_ascii_lowercase())
        .unwrap_or_default();

    let seconds = match suffix.as_str() {
        "ms" => return Ok(Duration::from_millis(number)),
        "m" => number.checked_mul(60),
        "h" => number.checked_mul(60 * 60),
        "d" => number.checked_mul(24 * 60 * 60),
        _ => Some(number),
    };

    seconds
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow::anyhow!("The duration '{}' is too long.", input))
}

/// Formats a given size in bytes using the largest fitting binary unit.
///
/// # Examples
///
/// ```
/// assert_eq!(shardcache::fmt::format_size(0), "0 bytes");
/// assert_eq!(shardcache::fmt::format_size(1), "1 byte");
/// assert_eq!(shardcache::fmt::format_size(1023), "1023 bytes");
/// assert_eq!(shardcache::fmt::format_size(2048), "2.00 KiB");
/// assert_eq!(shardcache::fmt::format_size(87_340), "85.3 KiB");
/// assert_eq!(shardcache::fmt::format_size(873_400_000), "833 MiB");
/// assert_eq!(shardcache::fmt::format_size(8_734_000_000), "8.13 GiB");
/// ```
pub fn format_size(size_in_bytes: usize) -> String {
    const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

    match size_in_bytes {
        1 => return "1 byte".to_owned(),
        0..=1023 => return format!("{} bytes", size_in_bytes),
        _ => (),
    }

    let mut size = size_in_bytes as f64 / 1024.;
    let mut unit = 0;
    while size >= 1024. && unit < UNITS.len() - 1 {
        size /= 1024.;
        unit += 1;
    }

    if size < 10. {
        format!("{:.2} {}", size, UNITS[unit])
    } else if size < 100. {
        format!("{:.1} {}", size, UNITS[unit])
    } else {
        format!("{:.0} {}", size, UNITS[unit])
    }
}

/// Formats a duration into a string like "1d 3h 17m 2s 12ms".
///
/// Units which are zero are omitted.
///
/// # Examples
///
/// ```
/// # use std::time::Duration;
/// assert_eq!(shardcache::fmt::format_duration(Duration::from_millis(13)), "13ms");
/// assert_eq!(shardcache::fmt::format_duration(Duration::from_millis(62_013)), "1m 2s 13ms");
/// assert_eq!(shardcache::fmt::format_duration(Duration::from_secs(600)), "10m");
/// assert_eq!(shardcache::fmt::format_duration(Duration::from_secs(24 * 60 * 60 + 59)), "1d 59s");
/// assert_eq!(shardcache::fmt::format_duration(Duration::ZERO), "0ms");
/// ```
pub fn format_duration(duration: Duration) -> String {
    const UNITS: [(u128, &str); 5] = [
        (24 * 60 * 60 * 1000, "d"),
        (60 * 60 * 1000, "h"),
        (60 * 1000, "m"),
        (1000, "s"),
        (1, "ms"),
    ];

    let mut result = String::new();
    let mut remainder = duration.as_millis();
    for (millis, suffix) in UNITS {
        let value = remainder / millis;
        if value > 0 {
            if !result.is_empty() {
                result.push(' ');
            }
            let _ = write!(result, "{}{}", value, suffix);
            remainder %= millis;
        }
    }

    if result.is_empty() {
        result.push_str("0ms");
    }

    result
}
