use std::{
    cmp::Ordering,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum DateParseError {
    #[error("Invalid Timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("Invalid Fractional Seconds: {0}")]
    InvalidFraction(String),
}

/// An instant stored as seconds relative to 2001-01-01T00:00:00 UTC.
///
/// The offset may be fractional and may be negative.
#[derive(Clone, Copy, Debug, Default)]
pub struct Date(f64);

impl Date {
    /// Seconds between the Unix epoch and the reference epoch.
    pub const REFERENCE_EPOCH_UNIX: i64 = 978_307_200;

    const NANOSECONDS_PER_SECOND: f64 = 1_000_000_000f64;

    /// Length of `YYYY-MM-DDTHH:MM:SS`, where the fraction starts.
    const FRACTION_START: usize = 19;

    /// Creates a date at the given offset from the reference epoch.
    pub fn from_apple_epoch(seconds: f64) -> Self {
        Self(seconds)
    }

    /// Creates a date at the current instant.
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Creates a date from calendar fields interpreted as UTC. Returns None if the fields are not a valid time.
    pub fn from_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, second).single().map(Self::from)
    }

    pub fn set_time_from_apple_epoch(&mut self, seconds: f64) {
        self.0 = seconds;
    }

    pub fn time_as_apple_epoch(&self) -> f64 {
        self.0
    }

    pub fn set_time_from_unix_epoch(&mut self, seconds: f64) {
        self.0 = seconds - Self::REFERENCE_EPOCH_UNIX as f64;
    }

    pub fn time_as_unix_epoch(&self) -> f64 {
        self.0 + Self::REFERENCE_EPOCH_UNIX as f64
    }

    /// Parses an ISO-8601 timestamp such as `2011-09-25T02:31:04Z`, with any number of fractional digits.
    pub fn set_time_from_xml_convention(&mut self, text: &str) -> Result<(), DateParseError> {
        *self = text.parse()?;
        Ok(())
    }

    /// Formats the date as an ISO-8601 UTC timestamp.
    ///
    /// Fractional seconds carry the shortest digits that read back as the same offset.
    /// Returns None for non-finite offsets and for years outside 0000 to 9999.
    pub fn time_as_xml_convention(&self) -> Option<String> {
        if !self.0.is_finite() {
            return None;
        }

        let magnitude = self.0.abs().to_string();
        let (whole, fraction) = magnitude.split_once('.').unwrap_or((magnitude.as_str(), ""));
        let whole: i64 = whole.parse().ok()?;

        // A negative offset borrows one second so the fraction counts forward from it.
        let (seconds, fraction) = if self.0 >= 0f64 {
            (whole, fraction.to_string())
        } else if fraction.is_empty() {
            (-whole, String::new())
        } else {
            (-whole.checked_add(1)?, complement_fraction(fraction))
        };

        let date_time = DateTime::from_timestamp(seconds.checked_add(Self::REFERENCE_EPOCH_UNIX)?, 0)?;
        if !(0..=9999).contains(&date_time.year()) {
            return None;
        }

        let mut text = date_time.format("%Y-%m-%dT%H:%M:%S").to_string();
        if !fraction.is_empty() {
            text.push('.');
            text.push_str(&fraction);
        }
        text.push('Z');
        Some(text)
    }

    /// Converts the date to a calendar time rounded to the nanosecond. Returns None for non-finite or out of range offsets.
    pub fn to_date_time(&self) -> Option<DateTime<Utc>> {
        if !self.0.is_finite() {
            return None;
        }

        let whole = self.0.floor();
        let mut seconds = whole as i64;
        let mut nanoseconds = ((self.0 - whole) * Self::NANOSECONDS_PER_SECOND).round() as u32;

        if nanoseconds >= Self::NANOSECONDS_PER_SECOND as u32 {
            seconds = seconds.checked_add(1)?;
            nanoseconds = 0;
        }

        DateTime::from_timestamp(seconds.checked_add(Self::REFERENCE_EPOCH_UNIX)?, nanoseconds)
    }

    /// Returns -1, 0 or 1 as the first date is earlier than, equal to or later than the second.
    ///
    /// Offsets compare numerically, so `-0.0` equals `0.0`. NaN equals only NaN and sorts after every number.
    pub fn compare(a: &Date, b: &Date) -> i32 {
        let ordering = a.0.partial_cmp(&b.0).unwrap_or_else(|| a.0.is_nan().cmp(&b.0.is_nan()));

        match ordering {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        }
    }

    /// Returns the whole number of seconds from the other date to this one.
    pub fn seconds_since_date(&self, other: &Date) -> i64 {
        (self.0 - other.0) as i64
    }
}

/// Returns the digits of `1 - 0.digits`. The last digit must not be zero.
fn complement_fraction(digits: &str) -> String {
    let last = digits.len() - 1;

    digits
        .bytes()
        .enumerate()
        .map(|(index, digit)| {
            let value = digit - b'0';
            let complement = if index == last { 10 - value } else { 9 - value };
            (b'0' + complement) as char
        })
        .collect()
}

impl PartialEq for Date {
    fn eq(&self, other: &Self) -> bool {
        Self::compare(self, other) == 0
    }
}

impl Eq for Date {}

impl PartialOrd for Date {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Date {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::compare(self, other).cmp(&0)
    }
}

impl From<DateTime<Utc>> for Date {
    fn from(value: DateTime<Utc>) -> Self {
        let seconds = (value.timestamp() - Self::REFERENCE_EPOCH_UNIX) as f64;
        Self(seconds + value.timestamp_subsec_nanos() as f64 / Self::NANOSECONDS_PER_SECOND)
    }
}

impl FromStr for Date {
    type Err = DateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();

        let (timestamp, fraction) = match text.find('.') {
            Some(start) => {
                let digits = &text[start + 1..];
                let length = digits.bytes().take_while(u8::is_ascii_digit).count();
                if start != Self::FRACTION_START || length == 0 {
                    return Err(DateParseError::InvalidFraction(text.to_string()));
                }
                (format!("{}{}", &text[..start], &digits[length..]), digits[..length].trim_end_matches('0'))
            }
            None => (text.to_string(), ""),
        };

        let date_time = DateTime::parse_from_rfc3339(&timestamp)?;
        let seconds = date_time.timestamp() - Self::REFERENCE_EPOCH_UNIX;

        if fraction.is_empty() {
            return Ok(Self(seconds as f64));
        }

        // Rebuild the exact decimal so a single correctly rounded parse yields the offset.
        let decimal = if seconds >= 0 {
            format!("{}.{}", seconds, fraction)
        } else {
            format!("-{}.{}", -(seconds + 1), complement_fraction(fraction))
        };

        decimal
            .parse()
            .map(Self)
            .map_err(|_| DateParseError::InvalidFraction(text.to_string()))
    }
}

impl Display for Date {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.time_as_xml_convention() {
            Some(text) => f.write_str(&text),
            None => write!(f, "{}", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xml_round_trip(seconds: f64) -> f64 {
        let text = Date::from_apple_epoch(seconds).time_as_xml_convention().unwrap();
        text.parse::<Date>().unwrap().time_as_apple_epoch()
    }

    #[test]
    fn stores_apple_epoch_offset() {
        let mut date = Date::default();
        date.set_time_from_apple_epoch(338610664f64);
        assert_eq!(date.time_as_apple_epoch(), 338610664f64);
        assert_eq!(date.time_as_unix_epoch(), 1316917864f64);
    }

    #[test]
    fn compares_offsets() {
        let date = Date::from_apple_epoch(338610664.75);
        let time = date.time_as_apple_epoch();

        let mut greater = date;
        greater.set_time_from_apple_epoch(time + 1f64);
        let mut less = date;
        less.set_time_from_apple_epoch(time - 1f64);

        assert_eq!(Date::compare(&greater, &less), 1);
        assert_eq!(Date::compare(&less, &greater), -1);
        assert_eq!(Date::compare(&date, &date), 0);
        assert!(greater > less);
        assert!(less < greater);
        assert_eq!(date, Date::from_apple_epoch(time));

        greater.set_time_from_apple_epoch(time + 100f64);
        assert_eq!(greater.seconds_since_date(&date), 100);
        assert_eq!(date.seconds_since_date(&greater), -100);
    }

    #[test]
    fn signed_zero_offsets_are_equal() {
        let negative = Date::from_apple_epoch(-0.0);
        let positive = Date::from_apple_epoch(0.0);
        assert_eq!(Date::compare(&negative, &positive), 0);
        assert_eq!(Date::compare(&positive, &negative), 0);
        assert_eq!(negative, positive);
    }

    #[test]
    fn nan_equals_only_nan() {
        let nan = Date::from_apple_epoch(f64::NAN);
        let number = Date::from_apple_epoch(1e300);
        assert_eq!(Date::compare(&nan, &nan), 0);
        assert_eq!(Date::compare(&nan, &number), 1);
        assert_eq!(Date::compare(&number, &nan), -1);
        assert_ne!(nan, number);
    }

    #[test]
    fn xml_convention() {
        let date = Date::from_apple_epoch(338610664f64);
        assert_eq!(date.time_as_xml_convention().as_deref(), Some("2011-09-25T02:31:04Z"));

        let mut parsed = Date::default();
        parsed.set_time_from_xml_convention("2011-09-25T02:31:04Z").unwrap();
        assert_eq!(parsed, date);

        assert!(parsed.set_time_from_xml_convention("yesterday").is_err());
        assert!(parsed.set_time_from_xml_convention("2011-09-25T02:31:04.Z").is_err());
    }

    #[test]
    fn fractional_and_negative_offsets() {
        let date = Date::from_apple_epoch(-0.5);
        let text = date.time_as_xml_convention().unwrap();
        assert_eq!(text, "2000-12-31T23:59:59.5Z");
        assert_eq!(text.parse::<Date>().unwrap(), date);

        assert_eq!(Date::from_apple_epoch(0.25).time_as_xml_convention().as_deref(), Some("2001-01-01T00:00:00.25Z"));
        assert_eq!(Date::from_apple_epoch(-0.0).time_as_xml_convention().as_deref(), Some("2001-01-01T00:00:00Z"));
    }

    #[test]
    fn xml_keeps_every_fractional_digit() {
        for seconds in [1.0 / 3.0, 1e-10, -1e-20, -2.0 / 3.0, 338610664.123456789, -338610664.987654321, 5e-324, -5e-324] {
            assert_eq!(xml_round_trip(seconds).to_bits(), seconds.to_bits(), "{seconds}");
        }
    }

    #[test]
    fn reads_fractions_and_offsets() {
        let date: Date = "2001-01-01T01:00:00.125+01:00".parse().unwrap();
        assert_eq!(date.time_as_apple_epoch(), 0.125);

        let date: Date = "2000-12-31T23:59:59.750000000Z".parse().unwrap();
        assert_eq!(date.time_as_apple_epoch(), -0.25);
    }

    #[test]
    fn calendar_fields() {
        let date = Date::from_utc(2001, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(date.time_as_apple_epoch(), 0f64);
        assert!(Date::from_utc(2001, 2, 30, 0, 0, 0).is_none());
    }

    #[test]
    fn unwritable_dates_have_no_xml_form() {
        assert!(Date::from_apple_epoch(f64::NAN).to_date_time().is_none());
        assert!(Date::from_apple_epoch(f64::INFINITY).time_as_xml_convention().is_none());
        assert!(Date::from_apple_epoch(1e12).time_as_xml_convention().is_none());
        assert!(Date::from_apple_epoch(-1e300).time_as_xml_convention().is_none());
    }
}
