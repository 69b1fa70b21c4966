//! Wire codec between [`Value`] and the buffers exchanged with cdb2api.
//!
//! Integers and reals travel as 8-byte native-endian words, text as bytes up
//! to the first NUL, blobs as-is. Both datetime types share one 76-byte
//! layout:
//!
//! | offset | field                                                         |
//! |--------|---------------------------------------------------------------|
//! | 0      | nine `i32`: sec, min, hour, mday, mon, year, wday, yday, isdst |
//! | 36     | `u32` fraction (milliseconds or microseconds)                  |
//! | 40     | 36-byte NUL-padded time zone name                              |

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, TimeZone, Timelike};
use chrono_tz::{OffsetComponents, Tz};

use crate::error::{Cdb2Error, mangle_message};
use crate::types::{ColumnType, Datetime, DatetimeUs, Value};

pub const DATETIME_SIZE: usize = 76;
const TM_FIELDS: usize = 9;
const FRACTION_OFFSET: usize = TM_FIELDS * 4;
const TZNAME_OFFSET: usize = FRACTION_OFFSET + 4;
const TZNAME_LEN: usize = DATETIME_SIZE - TZNAME_OFFSET;

/// How many bytes of an undecodable text column end up in the error message.
const PREVIEW_LEN: usize = 32;

/// A value laid out for `cdb2_bind_param`.
///
/// `buf` is `None` for NULL, which the native library expects as an INTEGER
/// bind with a null pointer and zero length.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedValue {
    pub type_code: i32,
    pub buf: Option<Box<[u8]>>,
}

impl EncodedValue {
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.as_ref().map_or(0, |buf| buf.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.buf
            .as_ref()
            .map_or(std::ptr::null(), |buf| buf.as_ptr())
    }
}

/// Encode one value for binding.
///
/// # Errors
///
/// Returns `DataError` when a datetime cannot be represented on the wire
/// (out-of-range year, zone name too long).
pub fn encode(value: &Value) -> Result<EncodedValue, Cdb2Error> {
    let (column_type, buf): (ColumnType, Option<Box<[u8]>>) = match value {
        Value::Null => (ColumnType::Integer, None),
        Value::Integer(v) => (ColumnType::Integer, Some(Box::new(v.to_ne_bytes()))),
        Value::Real(v) => (ColumnType::Real, Some(Box::new(v.to_ne_bytes()))),
        Value::Text(s) => (ColumnType::Cstring, Some(s.as_bytes().into())),
        Value::Bytes(b) => (ColumnType::Blob, Some(b.as_slice().into())),
        Value::Datetime(Datetime(dt)) => {
            let rounded = round_to_millis(dt)?;
            let millis = rounded.timestamp_subsec_micros().min(999_999) / 1000;
            (ColumnType::Datetime, Some(encode_datetime(&rounded, millis)?))
        }
        Value::DatetimeUs(DatetimeUs(dt)) => {
            let rounded = round_to_micros(dt)?;
            let micros = rounded.timestamp_subsec_micros().min(999_999);
            (ColumnType::DatetimeUs, Some(encode_datetime(&rounded, micros)?))
        }
    };
    Ok(EncodedValue {
        type_code: column_type.code(),
        buf,
    })
}

/// Round half away from zero to whole milliseconds.
fn round_to_millis(dt: &DateTime<Tz>) -> Result<DateTime<Tz>, Cdb2Error> {
    round_to(dt, Duration::microseconds(500), 1_000_000)
}

fn round_to_micros(dt: &DateTime<Tz>) -> Result<DateTime<Tz>, Cdb2Error> {
    round_to(dt, Duration::nanoseconds(500), 1_000)
}

fn round_to(
    dt: &DateTime<Tz>,
    half: Duration,
    unit_nanos: u32,
) -> Result<DateTime<Tz>, Cdb2Error> {
    let shifted = dt
        .checked_add_signed(half)
        .ok_or_else(|| Cdb2Error::data("datetime out of range"))?;
    let excess = i64::from(shifted.timestamp_subsec_nanos() % unit_nanos);
    shifted
        .checked_sub_signed(Duration::nanoseconds(excess))
        .ok_or_else(|| Cdb2Error::data("datetime out of range"))
}

fn encode_datetime(dt: &DateTime<Tz>, fraction: u32) -> Result<Box<[u8]>, Cdb2Error> {
    let naive = dt.naive_local();
    let tzname = dt.timezone().name();
    if tzname.len() >= TZNAME_LEN {
        return Err(Cdb2Error::data(format!(
            "Time zone name '{tzname}' is longer than {} bytes",
            TZNAME_LEN - 1
        )));
    }
    let isdst = i32::from(dt.offset().dst_offset() != chrono::TimeDelta::zero());
    let field = |v: u32| i32::try_from(v).map_err(|_| Cdb2Error::data("datetime out of range"));
    let fields: [i32; TM_FIELDS] = [
        field(naive.second())?,
        field(naive.minute())?,
        field(naive.hour())?,
        field(naive.day())?,
        field(naive.month0())?,
        naive.year() - 1900,
        field(naive.weekday().num_days_from_sunday())?,
        field(naive.ordinal0())?,
        isdst,
    ];

    let mut buf = vec![0u8; DATETIME_SIZE];
    for (slot, field) in buf.chunks_exact_mut(4).zip(fields) {
        slot.copy_from_slice(&field.to_ne_bytes());
    }
    buf[FRACTION_OFFSET..TZNAME_OFFSET].copy_from_slice(&fraction.to_ne_bytes());
    buf[TZNAME_OFFSET..TZNAME_OFFSET + tzname.len()].copy_from_slice(tzname.as_bytes());
    Ok(buf.into_boxed_slice())
}

/// Decode the raw bytes of column `col`.
///
/// # Errors
///
/// `DataError` for malformed payloads, undecodable text or unknown zone names;
/// `NotSupportedError` for interval types and type codes this client does not
/// know.
pub fn decode(raw: Option<&[u8]>, type_code: i32, col: usize) -> Result<Value, Cdb2Error> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    let Some(column_type) = ColumnType::from_code(type_code) else {
        return Err(Cdb2Error::not_supported(format!(
            "Unknown type {type_code} for column {col}"
        )));
    };
    match column_type {
        ColumnType::Integer => Ok(Value::Integer(i64::from_ne_bytes(fixed(raw, col)?))),
        ColumnType::Real => Ok(Value::Real(f64::from_ne_bytes(fixed(raw, col)?))),
        ColumnType::Blob => Ok(Value::Bytes(raw.to_vec())),
        ColumnType::Cstring => decode_text(raw, col).map(Value::Text),
        ColumnType::Datetime => {
            decode_datetime(raw, col, 1000).map(|dt| Value::Datetime(Datetime(dt)))
        }
        ColumnType::DatetimeUs => {
            decode_datetime(raw, col, 1).map(|dt| Value::DatetimeUs(DatetimeUs(dt)))
        }
        ColumnType::IntervalYm | ColumnType::IntervalDs | ColumnType::IntervalDsUs => Err(
            Cdb2Error::not_supported(format!("Unsupported type {column_type:?} for column {col}")),
        ),
    }
}

fn fixed<const N: usize>(raw: &[u8], col: usize) -> Result<[u8; N], Cdb2Error> {
    raw.try_into().map_err(|_| {
        Cdb2Error::data(format!(
            "Column {col} has {} bytes, expected {N}",
            raw.len()
        ))
    })
}

fn until_nul(raw: &[u8]) -> &[u8] {
    raw.iter()
        .position(|b| *b == 0)
        .map_or(raw, |end| &raw[..end])
}

fn decode_text(raw: &[u8], col: usize) -> Result<String, Cdb2Error> {
    let bytes = until_nul(raw);
    match std::str::from_utf8(bytes) {
        Ok(text) => Ok(text.to_owned()),
        Err(err) => {
            let preview = &bytes[..bytes.len().min(PREVIEW_LEN)];
            let ellipsis = if bytes.len() > PREVIEW_LEN { "..." } else { "" };
            Err(Cdb2Error::data(format!(
                "Failed to decode CSTRING column {col} as UTF-8 ({err}): '{}'{ellipsis}",
                mangle_message(preview)
            )))
        }
    }
}

fn decode_datetime(
    raw: &[u8],
    col: usize,
    micros_per_unit: u32,
) -> Result<DateTime<Tz>, Cdb2Error> {
    let raw: [u8; DATETIME_SIZE] = fixed(raw, col)?;
    let mut fields = [0i32; TM_FIELDS];
    for (field, chunk) in fields.iter_mut().zip(raw.chunks_exact(4)) {
        let mut word = [0u8; 4];
        word.copy_from_slice(chunk);
        *field = i32::from_ne_bytes(word);
    }
    let mut word = [0u8; 4];
    word.copy_from_slice(&raw[FRACTION_OFFSET..TZNAME_OFFSET]);
    let fraction = u32::from_ne_bytes(word);
    let [sec, min, hour, mday, mon, year, _wday, _yday, isdst] = fields;

    let tzname = std::str::from_utf8(until_nul(&raw[TZNAME_OFFSET..]))
        .map_err(|_| Cdb2Error::data(format!("Column {col} has a non-UTF-8 time zone name")))?;
    let tz: Tz = tzname
        .parse()
        .map_err(|_| Cdb2Error::data(format!("Unknown time zone '{tzname}' in column {col}")))?;

    let out_of_range = || Cdb2Error::data(format!("Column {col} holds an invalid datetime"));
    let civil = mon
        .checked_add(1)
        .and_then(|month| u32::try_from(month).ok())
        .zip(u32::try_from(mday).ok())
        .zip(year.checked_add(1900))
        .and_then(|((month, day), year)| NaiveDate::from_ymd_opt(year, month, day))
        .and_then(|date| {
            date.and_hms_micro_opt(
                u32::try_from(hour).ok()?,
                u32::try_from(min).ok()?,
                u32::try_from(sec).ok()?,
                fraction.checked_mul(micros_per_unit)?,
            )
        })
        .ok_or_else(out_of_range)?;

    let dt = match tz.from_local_datetime(&civil) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(first, second) => {
            let first_is_dst = first.offset().dst_offset() != chrono::TimeDelta::zero();
            if first_is_dst == (isdst > 0) { first } else { second }
        }
        LocalResult::None => {
            return Err(Cdb2Error::data(format!(
                "Column {col} holds {civil}, which does not exist in {tzname}"
            )));
        }
    };
    Ok(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn utc(h: u32, m: u32, s: u32, micro: u32) -> DateTime<Tz> {
        Tz::UTC
            .with_ymd_and_hms(2009, 2, 13, h, m, s)
            .unwrap()
            + Duration::microseconds(i64::from(micro))
    }

    fn round_trip(value: &Value) -> Value {
        let encoded = encode(value).unwrap();
        decode(encoded.buf.as_deref(), encoded.type_code, 0).unwrap()
    }

    #[test]
    fn null_binds_as_integer_with_no_payload() {
        let encoded = encode(&Value::Null).unwrap();
        assert_eq!(encoded.type_code, ColumnType::Integer.code());
        assert!(encoded.as_ptr().is_null());
        assert_eq!(encoded.len(), 0);
    }

    #[test]
    fn scalars_round_trip() {
        for value in [
            Value::Integer(i64::MIN),
            Value::Real(-0.5),
            Value::Text("h\u{e9}llo".into()),
            Value::Bytes(vec![0, 159, 146, 150]),
        ] {
            assert_eq!(round_trip(&value), value);
        }
    }

    #[test]
    fn text_stops_at_nul() {
        let value = decode(Some(b"abc\0junk"), ColumnType::Cstring.code(), 0).unwrap();
        assert_eq!(value, Value::Text("abc".into()));
    }

    #[test]
    fn bad_utf8_is_data_error_with_preview() {
        let err = decode(Some(b"caf\xe9"), ColumnType::Cstring.code(), 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.message().contains("caf\\xe9"), "{err}");
    }

    #[test]
    fn millisecond_rounding() {
        let down = Value::Datetime(Datetime(utc(23, 59, 59, 999_499)));
        assert_eq!(round_trip(&down), Value::Datetime(Datetime(utc(23, 59, 59, 999_000))));

        let up = Value::Datetime(Datetime(utc(23, 59, 59, 999_500)));
        let next_day = Tz::UTC.with_ymd_and_hms(2009, 2, 14, 0, 0, 0).unwrap();
        assert_eq!(round_trip(&up), Value::Datetime(Datetime(next_day)));
    }

    #[test]
    fn microseconds_survive() {
        let value = Value::DatetimeUs(DatetimeUs(utc(1, 2, 3, 123_456)));
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn zone_survives() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let dt = tz.with_ymd_and_hms(2016, 7, 4, 12, 30, 0).unwrap();
        let decoded = round_trip(&Value::DatetimeUs(DatetimeUs(dt)));
        let Value::DatetimeUs(DatetimeUs(back)) = decoded else {
            panic!("wrong variant: {decoded:?}");
        };
        assert_eq!(back, dt);
        assert_eq!(back.timezone(), tz);
    }

    #[test]
    fn ambiguous_local_time_uses_isdst() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let LocalResult::Ambiguous(_, standard) = tz.with_ymd_and_hms(2016, 11, 6, 1, 30, 0)
        else {
            panic!("expected an ambiguous local time");
        };
        let value = Value::DatetimeUs(DatetimeUs(standard));
        assert_eq!(round_trip(&value), value);
    }

    #[test]
    fn unknown_zone_is_data_error() {
        let mut encoded = encode(&Value::Datetime(Datetime(utc(0, 0, 0, 0))))
            .unwrap()
            .buf
            .unwrap();
        encoded[TZNAME_OFFSET..TZNAME_OFFSET + 7].copy_from_slice(b"Nowhere");
        let err = decode(Some(&encoded), ColumnType::Datetime.code(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    fn raw_datetime(mon: i32, year: i32) -> Vec<u8> {
        let mut raw = vec![0u8; DATETIME_SIZE];
        for (index, value) in [(3, 1), (4, mon), (5, year)] {
            raw[index * 4..index * 4 + 4].copy_from_slice(&i32::to_ne_bytes(value));
        }
        raw[TZNAME_OFFSET..TZNAME_OFFSET + 3].copy_from_slice(b"UTC");
        raw
    }

    #[test]
    fn overflowing_tm_fields_are_data_errors() {
        for raw in [raw_datetime(0, i32::MAX), raw_datetime(i32::MAX, 100)] {
            let err = decode(Some(&raw), ColumnType::Datetime.code(), 1).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Data);
            assert_eq!(err.message(), "Column 1 holds an invalid datetime");
        }
        let ok = decode(Some(&raw_datetime(0, 100)), ColumnType::Datetime.code(), 1).unwrap();
        let expected = Tz::UTC.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(ok, Value::Datetime(Datetime(expected)));
    }

    #[test]
    fn rounding_past_the_last_instant_is_data_error() {
        let last = DateTime::<chrono::Utc>::MAX_UTC.with_timezone(&Tz::UTC);
        for value in [Value::Datetime(Datetime(last)), Value::DatetimeUs(DatetimeUs(last))] {
            let err = encode(&value).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Data);
            assert_eq!(err.message(), "datetime out of range");
        }
    }

    #[test]
    fn interval_and_unknown_types_are_not_supported() {
        let err = decode(Some(&[0; 8]), ColumnType::IntervalYm.code(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        let err = decode(Some(&[0; 8]), 42, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
    }

    #[test]
    fn short_integer_is_data_error() {
        let err = decode(Some(&[1, 2, 3]), ColumnType::Integer.code(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
    }

    #[test]
    fn null_decodes_whatever_the_type() {
        assert_eq!(decode(None, 99, 0).unwrap(), Value::Null);
    }
}
