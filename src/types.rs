//! Field types and the typed values stored in album columns.
//!
//! Every mapping here is a total `match` over [`FieldType`], so a new type
//! only compiles once each conversion has an arm for it.

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Date format used for internal conversions and as a parsing fallback.
pub const ISO_DATE_FORMAT: &str = "%Y-%m-%d";

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Id,
    Text,
    Decimal,
    Date,
    Time,
    Uuid,
    StarRating,
    Url,
    Integer,
    Option,
}

/// Column kinds of the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Text,
    Integer,
    Real,
    Date,
    Time,
}

impl StorageKind {
    pub fn sql_type(&self) -> &'static str {
        match self {
            StorageKind::Text => "TEXT",
            StorageKind::Integer => "INTEGER",
            StorageKind::Real => "REAL",
            StorageKind::Date => "DATE",
            StorageKind::Time => "TIME",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, StorageKind::Integer | StorageKind::Real)
    }
}

impl FieldType {
    pub const ALL: [FieldType; 10] = [
        FieldType::Id,
        FieldType::Text,
        FieldType::Decimal,
        FieldType::Date,
        FieldType::Time,
        FieldType::Uuid,
        FieldType::StarRating,
        FieldType::Url,
        FieldType::Integer,
        FieldType::Option,
    ];

    /// Name persisted in typeinfo tables and CSV headers.
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Id => "ID",
            FieldType::Text => "TEXT",
            FieldType::Decimal => "DECIMAL",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Uuid => "UUID",
            FieldType::StarRating => "STAR_RATING",
            FieldType::Url => "URL",
            FieldType::Integer => "INTEGER",
            FieldType::Option => "OPTION",
        }
    }

    pub fn storage_kind(&self) -> StorageKind {
        match self {
            FieldType::Id => StorageKind::Integer,
            FieldType::Text => StorageKind::Text,
            FieldType::Decimal => StorageKind::Real,
            FieldType::Date => StorageKind::Date,
            FieldType::Time => StorageKind::Time,
            FieldType::Uuid => StorageKind::Text,
            FieldType::StarRating => StorageKind::Integer,
            FieldType::Url => StorageKind::Text,
            FieldType::Integer => StorageKind::Integer,
            FieldType::Option => StorageKind::Text,
        }
    }

    pub fn default_value(&self) -> FieldValue {
        match self {
            FieldType::Id => FieldValue::Id(0),
            FieldType::Text => FieldValue::Text(String::new()),
            FieldType::Decimal => FieldValue::Decimal(0.0),
            FieldType::Date => FieldValue::Date(Utc::now().date_naive()),
            FieldType::Time => FieldValue::Time(current_time()),
            FieldType::Uuid => FieldValue::Uuid(Uuid::new_v4()),
            FieldType::StarRating => FieldValue::StarRating(StarRating::ZERO),
            FieldType::Url => FieldValue::Url(String::new()),
            FieldType::Integer => FieldValue::Integer(0),
            FieldType::Option => FieldValue::Option(OptionType::Unknown),
        }
    }

    /// Values of text-like types are quoted when inlined into a query.
    pub fn is_text_like(&self) -> bool {
        self.storage_kind() == StorageKind::Text
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        FieldType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| format!("unknown field type: {s}"))
    }
}

/// Tri-state value of OPTION fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OptionType {
    Yes,
    No,
    #[default]
    Unknown,
}

impl OptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionType::Yes => "YES",
            OptionType::No => "NO",
            OptionType::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for OptionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(OptionType::Yes),
            "NO" => Ok(OptionType::No),
            "UNKNOWN" | "" => Ok(OptionType::Unknown),
            _ => Err(format!("invalid option value: {s}")),
        }
    }
}

/// A rating between zero and five stars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct StarRating(u8);

impl StarRating {
    pub const ZERO: StarRating = StarRating(0);
    pub const MAX: u8 = 5;

    pub fn new(stars: u8) -> Option<Self> {
        (stars <= Self::MAX).then_some(StarRating(stars))
    }

    pub fn stars(&self) -> u8 {
        self.0
    }
}

impl FromStr for StarRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const NAMES: [&str; 6] = ["ZERO", "ONE", "TWO", "THREE", "FOUR", "FIVE"];
        let trimmed = s.trim();
        if let Some(pos) = NAMES.iter().position(|n| n.eq_ignore_ascii_case(trimmed)) {
            return Ok(StarRating(pos as u8));
        }
        trimmed
            .parse::<u8>()
            .ok()
            .and_then(StarRating::new)
            .ok_or_else(|| format!("invalid star rating: {s}"))
    }
}

/// A value bound to one field of an item.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Id(i64),
    Text(String),
    Decimal(f64),
    Date(NaiveDate),
    Time(NaiveTime),
    Uuid(Uuid),
    StarRating(StarRating),
    Url(String),
    Integer(i64),
    Option(OptionType),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Id(_) => FieldType::Id,
            FieldValue::Text(_) => FieldType::Text,
            FieldValue::Decimal(_) => FieldType::Decimal,
            FieldValue::Date(_) => FieldType::Date,
            FieldValue::Time(_) => FieldType::Time,
            FieldValue::Uuid(_) => FieldType::Uuid,
            FieldValue::StarRating(_) => FieldType::StarRating,
            FieldValue::Url(_) => FieldType::Url,
            FieldValue::Integer(_) => FieldType::Integer,
            FieldValue::Option(_) => FieldType::Option,
        }
    }

    /// Parse user input (CSV cells, command line values) into a value of `field_type`.
    ///
    /// Dates are read with `date_format` first and ISO `YYYY-MM-DD` second.
    pub fn parse(field_type: FieldType, raw: &str, date_format: &str) -> Option<FieldValue> {
        let trimmed = raw.trim();
        match field_type {
            FieldType::Id => trimmed.parse().ok().map(FieldValue::Id),
            FieldType::Text => Some(FieldValue::Text(raw.to_string())),
            FieldType::Decimal => trimmed.parse().ok().map(FieldValue::Decimal),
            FieldType::Date => parse_date(trimmed, date_format).map(FieldValue::Date),
            FieldType::Time => parse_time(trimmed).map(FieldValue::Time),
            FieldType::Uuid => Uuid::parse_str(trimmed).ok().map(FieldValue::Uuid),
            FieldType::StarRating => trimmed.parse().ok().map(FieldValue::StarRating),
            FieldType::Url => Some(FieldValue::Url(raw.to_string())),
            FieldType::Integer => trimmed.parse().ok().map(FieldValue::Integer),
            FieldType::Option => trimmed.parse().ok().map(FieldValue::Option),
        }
    }

    /// Read a stored column back as a value of `field_type`.
    ///
    /// NULLs and representations the type cannot hold read back as the
    /// type's default value.
    pub fn from_sql(field_type: FieldType, raw: ValueRef<'_>) -> FieldValue {
        let value = match raw {
            ValueRef::Null => None,
            ValueRef::Integer(i) => from_integer(field_type, i),
            ValueRef::Real(r) => from_real(field_type, r),
            ValueRef::Text(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                FieldValue::parse(field_type, &text, ISO_DATE_FORMAT)
            }
            ValueRef::Blob(_) => None,
        };
        value.unwrap_or_else(|| field_type.default_value())
    }

    /// Convert to another field type, or `None` when the storage kinds are
    /// incompatible or the value has no representation in the target type.
    pub fn convert_to(&self, target: FieldType) -> Option<FieldValue> {
        let source = self.field_type();
        if source == target {
            return Some(self.clone());
        }

        let from = source.storage_kind();
        let to = target.storage_kind();
        let convertible =
            from == to || to == StorageKind::Text || (from.is_numeric() && to.is_numeric());
        if !convertible {
            return None;
        }

        FieldValue::parse(target, &self.format_with(ISO_DATE_FORMAT), ISO_DATE_FORMAT)
    }

    /// String form used by exporters and displays.
    pub fn format_with(&self, date_format: &str) -> String {
        match self {
            FieldValue::Id(v) | FieldValue::Integer(v) => v.to_string(),
            FieldValue::Text(s) | FieldValue::Url(s) => s.clone(),
            FieldValue::Decimal(v) => v.to_string(),
            FieldValue::Date(d) => d.format(date_format).to_string(),
            FieldValue::Time(t) => t.format("%H:%M:%S").to_string(),
            FieldValue::Uuid(u) => u.to_string(),
            FieldValue::StarRating(r) => r.stars().to_string(),
            FieldValue::Option(o) => o.as_str().to_string(),
        }
    }

    /// Literal used when the value is inlined into a query string.
    pub fn sql_literal(&self) -> String {
        match self {
            FieldValue::Date(d) => date_to_millis(*d).to_string(),
            FieldValue::Time(t) => time_to_millis(*t).to_string(),
            other => other.format_with(ISO_DATE_FORMAT),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_with(ISO_DATE_FORMAT))
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Id(v) | FieldValue::Integer(v) => ToSqlOutput::from(*v),
            FieldValue::Text(s) | FieldValue::Url(s) => ToSqlOutput::from(s.as_str()),
            FieldValue::Decimal(v) => ToSqlOutput::from(*v),
            FieldValue::Date(d) => ToSqlOutput::from(date_to_millis(*d)),
            FieldValue::Time(t) => ToSqlOutput::from(time_to_millis(*t)),
            FieldValue::Uuid(u) => ToSqlOutput::from(u.to_string()),
            FieldValue::StarRating(r) => ToSqlOutput::from(i64::from(r.stars())),
            FieldValue::Option(o) => ToSqlOutput::from(o.as_str()),
        })
    }
}

fn from_integer(field_type: FieldType, i: i64) -> Option<FieldValue> {
    match field_type {
        FieldType::Id => Some(FieldValue::Id(i)),
        FieldType::Integer => Some(FieldValue::Integer(i)),
        FieldType::Decimal => Some(FieldValue::Decimal(i as f64)),
        FieldType::Date => millis_to_date(i).map(FieldValue::Date),
        FieldType::Time => millis_to_time(i).map(FieldValue::Time),
        FieldType::StarRating => u8::try_from(i)
            .ok()
            .and_then(StarRating::new)
            .map(FieldValue::StarRating),
        FieldType::Text => Some(FieldValue::Text(i.to_string())),
        FieldType::Url => Some(FieldValue::Url(i.to_string())),
        FieldType::Uuid | FieldType::Option => None,
    }
}

fn from_real(field_type: FieldType, r: f64) -> Option<FieldValue> {
    match field_type {
        FieldType::Decimal => Some(FieldValue::Decimal(r)),
        FieldType::Integer if r.fract() == 0.0 => Some(FieldValue::Integer(r as i64)),
        FieldType::Date => millis_to_date(r as i64).map(FieldValue::Date),
        FieldType::Time => millis_to_time(r as i64).map(FieldValue::Time),
        FieldType::Text => Some(FieldValue::Text(r.to_string())),
        FieldType::Url => Some(FieldValue::Url(r.to_string())),
        _ => None,
    }
}

pub fn parse_date(raw: &str, date_format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, date_format)
        .or_else(|_| NaiveDate::parse_from_str(raw, ISO_DATE_FORMAT))
        .ok()
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
}

/// UTC epoch milliseconds at midnight of `date`.
pub fn date_to_millis(date: NaiveDate) -> i64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

pub fn millis_to_date(millis: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

/// Milliseconds since midnight.
pub fn time_to_millis(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight()) * 1000 + i64::from(time.nanosecond() / 1_000_000)
}

pub fn millis_to_time(millis: i64) -> Option<NaiveTime> {
    let secs = u32::try_from(millis.div_euclid(1000)).ok()?;
    let nanos = u32::try_from(millis.rem_euclid(1000)).ok()? * 1_000_000;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos)
}

fn current_time() -> NaiveTime {
    let now = Utc::now().time();
    NaiveTime::from_hms_opt(now.hour(), now.minute(), now.second()).unwrap_or(NaiveTime::MIN)
}
