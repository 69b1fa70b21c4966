use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value as JsonValue;

use crate::error::Cdb2Error;
use crate::types::{Datetime, DatetimeUs, Value};

/// Named statement parameters, in bind order.
///
/// Setting a name twice replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(pub Vec<(String, Value)>);

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to an already-built value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
        self
    }

    /// Convert `value` and set it as `name`.
    ///
    /// # Errors
    ///
    /// Returns `DataError` or `NotSupportedError` naming the parameter when
    /// the value has no Comdb2 representation.
    pub fn try_insert<T: ToSqlValue + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<&mut Self, Cdb2Error> {
        let name = name.into();
        let value = value
            .to_sql_value()
            .map_err(|err| for_parameter(err, value.sql_type_name(), &name))?;
        Ok(self.insert(name, value))
    }

    /// Build parameters from a JSON object.
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when `json` is not an object or a member has no
    /// Comdb2 representation; `DataError` for out-of-range numbers.
    pub fn from_json(json: &JsonValue) -> Result<Self, Cdb2Error> {
        let JsonValue::Object(map) = json else {
            return Err(Cdb2Error::not_supported(format!(
                "Parameters must be a JSON object, not {}",
                json_type_name(json)
            )));
        };
        let mut params = Self::new();
        for (name, value) in map {
            params.try_insert(name.as_str(), value)?;
        }
        Ok(params)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a str, &'a Value);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a Value)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Build [`Params`] from `name => value` pairs; values go through
/// `Value::from`.
#[macro_export]
macro_rules! params {
    () => { $crate::params::Params::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut params = $crate::params::Params::new();
        $( params.insert($name, $crate::types::Value::from($value)); )+
        params
    }};
}

pub(crate) fn for_parameter(err: Cdb2Error, type_name: &str, name: &str) -> Cdb2Error {
    let message = format!(
        "Can't bind {type_name} value for parameter '{name}': {}",
        err.message()
    );
    err.kind().error(err.code(), message)
}

/// Fallible conversion into a bindable [`Value`].
pub trait ToSqlValue {
    /// # Errors
    ///
    /// `DataError` when the value is out of range for its Comdb2 type,
    /// `NotSupportedError` when there is no Comdb2 type for it at all.
    fn to_sql_value(&self) -> Result<Value, Cdb2Error>;

    /// Name used in conversion error messages.
    fn sql_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

macro_rules! infallible_to_sql {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
                    Ok(Value::from(self.clone()))
                }
            }
        )+
    };
}

infallible_to_sql!(
    i8, i16, i32, i64, u8, u16, u32, bool, f32, f64, String, Vec<u8>, Value, Datetime,
    DatetimeUs, DateTime<Tz>, DateTime<Utc>, NaiveDateTime,
);

impl ToSqlValue for str {
    fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
        Ok(Value::Text(self.to_owned()))
    }
}

impl ToSqlValue for [u8] {
    fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
        Ok(Value::Bytes(self.to_vec()))
    }
}

impl<T: ToSqlValue + ?Sized> ToSqlValue for &T {
    fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
        (**self).to_sql_value()
    }

    fn sql_type_name(&self) -> &'static str {
        (**self).sql_type_name()
    }
}

impl<T: ToSqlValue> ToSqlValue for Option<T> {
    fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
        self.as_ref().map_or(Ok(Value::Null), ToSqlValue::to_sql_value)
    }
}

macro_rules! wide_int_to_sql {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSqlValue for $ty {
                fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
                    i64::try_from(*self).map(Value::Integer).map_err(|_| {
                        Cdb2Error::data(format!("{self} does not fit in a 64-bit integer"))
                    })
                }
            }
        )+
    };
}

wide_int_to_sql!(u64, usize, i128, u128, isize);

impl ToSqlValue for JsonValue {
    fn to_sql_value(&self) -> Result<Value, Cdb2Error> {
        match self {
            JsonValue::Null => Ok(Value::Null),
            JsonValue::Bool(b) => Ok(Value::from(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(u) = n.as_u64() {
                    u.to_sql_value()
                } else {
                    n.as_f64()
                        .map(Value::Real)
                        .ok_or_else(|| Cdb2Error::data(format!("{n} is not representable")))
                }
            }
            JsonValue::String(s) => Ok(Value::Text(s.clone())),
            JsonValue::Array(_) | JsonValue::Object(_) => Err(Cdb2Error::not_supported(format!(
                "Can't map JSON {} to a Comdb2 type",
                json_type_name(self)
            ))),
        }
    }

    fn sql_type_name(&self) -> &'static str {
        json_type_name(self)
    }
}

fn json_type_name(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

macro_rules! value_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Integer(i64::from(value))
                }
            }
        )+
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32, bool);

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Real(f64::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<Datetime> for Value {
    fn from(value: Datetime) -> Self {
        Value::Datetime(value)
    }
}

impl From<DatetimeUs> for Value {
    fn from(value: DatetimeUs) -> Self {
        Value::DatetimeUs(value)
    }
}

/// Zoned timestamps bind as DATETIME; wrap in [`DatetimeUs`] for microseconds.
impl From<DateTime<Tz>> for Value {
    fn from(value: DateTime<Tz>) -> Self {
        Value::Datetime(Datetime(value))
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Datetime(Datetime::from(value))
    }
}

/// Naive timestamps are taken to be UTC.
impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::Datetime(Datetime::from_naive_utc(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn macro_builds_ordered_params() {
        let params = crate::params! { "k" => 1, "v" => "two", "n" => None::<i64> };
        let names: Vec<&str> = params.iter().map(|(name, _)| name).collect();
        assert_eq!(names, ["k", "v", "n"]);
        assert_eq!(params.get("v"), Some(&Value::Text("two".into())));
        assert_eq!(params.get("n"), Some(&Value::Null));
    }

    #[test]
    fn repeated_name_replaces_value() {
        let mut params = Params::new();
        params.insert("a", Value::Integer(1)).insert("a", Value::Integer(2));
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("a"), Some(&Value::Integer(2)));
    }

    #[test]
    fn integer_overflow_is_data_error_naming_parameter() {
        let mut params = Params::new();
        let err = params.try_insert("big", &(1u64 << 63)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(err.message().contains("parameter 'big'"), "{err}");

        let err = params.try_insert("small", &(i128::from(i64::MIN) - 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Data);
        assert!(params.is_empty());
    }

    #[test]
    fn max_i64_fits() {
        let mut params = Params::new();
        params.try_insert("max", &(i64::MAX as u64)).unwrap();
        assert_eq!(params.get("max"), Some(&Value::Integer(i64::MAX)));
    }

    #[test]
    fn json_params() {
        let params = Params::from_json(&json!({"a": 1, "b": 2.5, "c": "x", "d": null, "e": true}))
            .unwrap();
        assert_eq!(params.get("a"), Some(&Value::Integer(1)));
        assert_eq!(params.get("b"), Some(&Value::Real(2.5)));
        assert_eq!(params.get("d"), Some(&Value::Null));
        assert_eq!(params.get("e"), Some(&Value::Integer(1)));
    }

    #[test]
    fn json_array_is_not_supported() {
        let err = Params::from_json(&json!({"list": [1, 2]})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupported);
        assert!(err.message().contains("array"), "{err}");
        assert!(err.message().contains("'list'"), "{err}");
    }
}
