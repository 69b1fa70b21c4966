use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Every value that can cross the boundary with the native client library,
/// either as a bound parameter or as a decoded column.
///
/// ```rust
/// use comdb2_session::prelude::*;
///
/// let params = params! {
///     "key" => 1,
///     "val" => "alice",
///     "raw" => Value::Null,
/// };
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// IEEE-754 double
    Real(f64),
    /// Binary data (BLOB)
    Bytes(Vec<u8>),
    /// UTF-8 text (CSTRING)
    Text(String),
    /// Zoned timestamp with millisecond precision (DATETIME)
    Datetime(Datetime),
    /// Zoned timestamp with microsecond precision (DATETIMEUS)
    DatetimeUs(DatetimeUs),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Value::Integer(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Real(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Bytes(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// The timestamp of either datetime variant.
    #[must_use]
    pub fn as_datetime(&self) -> Option<&DateTime<Tz>> {
        match self {
            Value::Datetime(dt) => Some(&dt.0),
            Value::DatetimeUs(dt) => Some(&dt.0),
            _ => None,
        }
    }

    /// Name of the variant, used in conversion error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Datetime(_) => "datetime",
            Value::DatetimeUs(_) => "datetimeus",
        }
    }
}

/// A DATETIME value. Sub-millisecond precision is rounded away when bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Datetime(pub DateTime<Tz>);

/// A DATETIMEUS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatetimeUs(pub DateTime<Tz>);

impl Datetime {
    /// A naive timestamp, taken to be UTC.
    #[must_use]
    pub fn from_naive_utc(naive: NaiveDateTime) -> Self {
        Self(naive.and_utc().with_timezone(&Tz::UTC))
    }
}

impl DatetimeUs {
    /// A naive timestamp, taken to be UTC.
    #[must_use]
    pub fn from_naive_utc(naive: NaiveDateTime) -> Self {
        Self(naive.and_utc().with_timezone(&Tz::UTC))
    }
}

impl From<DateTime<Utc>> for Datetime {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.with_timezone(&Tz::UTC))
    }
}

impl From<DateTime<Utc>> for DatetimeUs {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.with_timezone(&Tz::UTC))
    }
}

/// Column type codes reported by `cdb2_column_type` and accepted by
/// `cdb2_bind_param`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ColumnType {
    Integer = 1,
    Real = 2,
    Cstring = 3,
    Blob = 4,
    Datetime = 6,
    IntervalYm = 7,
    IntervalDs = 8,
    DatetimeUs = 9,
    IntervalDsUs = 10,
}

/// Coarse grouping of column types, as exposed in cursor descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    String,
    Binary,
    Number,
    Datetime,
}

impl ColumnType {
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => ColumnType::Integer,
            2 => ColumnType::Real,
            3 => ColumnType::Cstring,
            4 => ColumnType::Blob,
            6 => ColumnType::Datetime,
            7 => ColumnType::IntervalYm,
            8 => ColumnType::IntervalDs,
            9 => ColumnType::DatetimeUs,
            10 => ColumnType::IntervalDsUs,
            _ => return None,
        })
    }

    #[must_use]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Interval types have no category.
    #[must_use]
    pub fn category(self) -> Option<TypeCategory> {
        match self {
            ColumnType::Cstring => Some(TypeCategory::String),
            ColumnType::Blob => Some(TypeCategory::Binary),
            ColumnType::Integer | ColumnType::Real => Some(TypeCategory::Number),
            ColumnType::Datetime | ColumnType::DatetimeUs => Some(TypeCategory::Datetime),
            ColumnType::IntervalYm | ColumnType::IntervalDs | ColumnType::IntervalDsUs => None,
        }
    }
}

/// Name and raw type code of one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_code: i32,
}

impl ColumnDescriptor {
    /// `None` when the server reported a code this client does not know.
    #[must_use]
    pub fn column_type(&self) -> Option<ColumnType> {
        ColumnType::from_code(self.type_code)
    }
}

/// Flags passed to `cdb2_open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionFlags(pub i32);

impl ConnectionFlags {
    pub const NONE: Self = Self(0);
    pub const READ_INTRANS_RESULTS: Self = Self(2);
    /// The tier argument names a host rather than a tier.
    pub const DIRECT_CPU: Self = Self(4);
    pub const RANDOM: Self = Self(8);
    pub const RANDOMROOM: Self = Self(16);
    pub const ROOM: Self = Self(32);

    #[must_use]
    pub fn bits(self) -> i32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ConnectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ConnectionFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Row counts reported by `cdb2_get_effects`.
///
/// Inside a transaction these are running totals since `begin`; otherwise they
/// cover the last statement only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Effects {
    pub num_affected: i32,
    pub num_selected: i32,
    pub num_updated: i32,
    pub num_deleted: i32,
    pub num_inserted: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_type_codes_are_stable() {
        for code in [1, 2, 3, 4, 6, 7, 8, 9, 10] {
            let ty = ColumnType::from_code(code).unwrap();
            assert_eq!(ty.code(), code);
        }
        assert_eq!(ColumnType::from_code(5), None);
        assert_eq!(ColumnType::Blob.category(), Some(TypeCategory::Binary));
        assert_eq!(ColumnType::IntervalDs.category(), None);
    }

    #[test]
    fn flags_combine() {
        let flags = ConnectionFlags::RANDOM | ConnectionFlags::DIRECT_CPU;
        assert_eq!(flags.bits(), 12);
        assert!(flags.contains(ConnectionFlags::DIRECT_CPU));
        assert!(!flags.contains(ConnectionFlags::ROOM));
    }

    #[test]
    fn datetime_variants_are_distinct() {
        let naive = chrono::NaiveDate::from_ymd_opt(2020, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let ms = Value::Datetime(Datetime::from_naive_utc(naive));
        let us = Value::DatetimeUs(DatetimeUs::from_naive_utc(naive));
        assert_ne!(ms, us);
        assert_eq!(ms.as_datetime(), us.as_datetime());
    }
}
