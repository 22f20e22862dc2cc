//! Validated request values: ticker symbols and trade dates.
//!
//! Both types are immutable and compared by value. Construction goes through `parse`, which
//! applies the submission rules; once built, a value is known to be well-formed.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Maximum ticker length in characters.
pub const MAX_TICKER_LEN: usize = 10;

/// First calendar year accepted for a trade date.
pub const EARLIEST_TRADE_YEAR: i32 = 2000;

/// An upper-case, alphanumeric ticker symbol of 1 to 10 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Validate and normalize a raw ticker.
    ///
    /// Surrounding whitespace is ignored. Rules are checked in order (empty, length,
    /// character set) and the first violation is reported.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyTicker);
        }

        let len = trimmed.chars().count();
        if len > MAX_TICKER_LEN {
            return Err(ValidationError::TickerTooLong {
                len,
                max: MAX_TICKER_LEN,
            });
        }

        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::TickerNotAlphanumeric(trimmed.to_string()));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against a raw filter string.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl core::fmt::Display for Ticker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Ticker {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

/// The market session a job analyzes, as a `YYYY-MM-DD` calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradeDate(NaiveDate);

impl TradeDate {
    /// Validate a raw date for a new submission.
    ///
    /// The value must be `YYYY-MM-DD`, a real calendar date, not before 2000-01-01 and not
    /// after `today`.
    pub fn parse(raw: &str, today: NaiveDate) -> Result<Self, ValidationError> {
        let date = parse_calendar_date(raw)?;

        if date.year() < EARLIEST_TRADE_YEAR {
            return Err(ValidationError::TradeDateTooEarly(date));
        }
        if date > today {
            return Err(ValidationError::TradeDateInFuture { date, today });
        }

        Ok(Self(date))
    }

    pub fn as_date(&self) -> NaiveDate {
        self.0
    }
}

/// Format-checked `YYYY-MM-DD` parse without range rules.
fn parse_calendar_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 10
        && bytes.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
    if !well_formed {
        return Err(ValidationError::MalformedTradeDate(raw.to_string()));
    }

    let malformed = || ValidationError::MalformedTradeDate(raw.to_string());
    let year: i32 = raw[0..4].parse().map_err(|_| malformed())?;
    let month: u32 = raw[5..7].parse().map_err(|_| malformed())?;
    let day: u32 = raw[8..10].parse().map_err(|_| malformed())?;

    NaiveDate::from_ymd_opt(year, month, day)
        .ok_or_else(|| ValidationError::InvalidCalendarDate(raw.to_string()))
}

impl core::fmt::Display for TradeDate {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl TryFrom<String> for TradeDate {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        parse_calendar_date(&value).map(Self)
    }
}

impl From<TradeDate> for String {
    fn from(value: TradeDate) -> Self {
        value.to_string()
    }
}
