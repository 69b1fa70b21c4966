//! Row shapes and the factories that build them.
//!
//! A [`RowFactory`] is asked once per result set for a [`RowBuilder`], given
//! the column names; the builder is then applied to every row's values. The
//! default shape is a positional list.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::Cdb2Error;
use crate::types::Value;

static FIELD_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$"));

/// Single-column results of DML statements run with `READ_INTRANS_RESULTS`.
const DML_COUNT_COLUMNS: [&str; 3] = ["rows inserted", "rows updated", "rows deleted"];

/// A result row as handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    List(Vec<Value>),
    Dict(HashMap<String, Value>),
    Record(Record),
}

impl Row {
    /// Value by column name; lists have no names.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Row::List(_) => None,
            Row::Dict(map) => map.get(name),
            Row::Record(record) => record.get(name),
        }
    }

    /// Value by position; dicts have no order.
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        match self {
            Row::List(values) => values.get(index),
            Row::Dict(_) => None,
            Row::Record(record) => record.get_by_index(index),
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        if let Row::List(values) = self {
            Some(values)
        } else {
            None
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Row::List(values) => values.len(),
            Row::Dict(map) => map.len(),
            Row::Record(record) => record.values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A row with both positional and named access.
///
/// Field names are shared by every row of a result set.
#[derive(Debug, Clone)]
pub struct Record {
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
    values: Vec<Value>,
}

impl Record {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.index.get(name).and_then(|&idx| self.values.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names && self.values == other.values
    }
}

/// Chooses the row shape for a result set.
pub trait RowFactory: Debug {
    /// Called once per executed statement with its column names.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when the names cannot be used for this shape.
    fn build(&self, column_names: &[String]) -> Result<Box<dyn RowBuilder>, Cdb2Error>;
}

/// Turns one row's values into a [`Row`].
pub trait RowBuilder {
    /// # Errors
    ///
    /// Implementation-defined; the built-in builders never fail.
    fn make_row(&self, values: Vec<Value>) -> Result<Row, Cdb2Error>;
}

/// Rows as positional lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListRowFactory;

struct ListRowBuilder;

impl RowFactory for ListRowFactory {
    fn build(&self, _column_names: &[String]) -> Result<Box<dyn RowBuilder>, Cdb2Error> {
        Ok(Box::new(ListRowBuilder))
    }
}

impl RowBuilder for ListRowBuilder {
    fn make_row(&self, values: Vec<Value>) -> Result<Row, Cdb2Error> {
        Ok(Row::List(values))
    }
}

/// Rows as maps from column name to value.
#[derive(Debug, Clone, Copy, Default)]
pub struct DictRowFactory;

struct DictRowBuilder {
    names: Vec<String>,
}

impl RowFactory for DictRowFactory {
    fn build(&self, column_names: &[String]) -> Result<Box<dyn RowBuilder>, Cdb2Error> {
        reject_duplicates(column_names)?;
        Ok(Box::new(DictRowBuilder {
            names: column_names.to_vec(),
        }))
    }
}

impl RowBuilder for DictRowBuilder {
    fn make_row(&self, values: Vec<Value>) -> Result<Row, Cdb2Error> {
        Ok(Row::Dict(self.names.iter().cloned().zip(values).collect()))
    }
}

/// Rows as [`Record`]s.
///
/// Column names must look like identifiers (a letter, then letters, digits
/// or underscores). The lone count column that DML statements can return is
/// renamed to `_0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordRowFactory;

struct RecordRowBuilder {
    names: Arc<[String]>,
    index: Arc<HashMap<String, usize>>,
}

impl RowFactory for RecordRowFactory {
    fn build(&self, column_names: &[String]) -> Result<Box<dyn RowBuilder>, Cdb2Error> {
        let names: Vec<String> = match column_names {
            [only] if DML_COUNT_COLUMNS.contains(&only.as_str()) => vec!["_0".to_string()],
            _ => {
                reject_duplicates(column_names)?;
                let field_name = FIELD_NAME.as_ref().map_err(Clone::clone)?;
                if let Some(bad) = column_names.iter().find(|name| !field_name.is_match(name)) {
                    return Err(Cdb2Error::interface(format!(
                        "Column name '{bad}' is not a valid record field name"
                    )));
                }
                column_names.to_vec()
            }
        };
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Ok(Box::new(RecordRowBuilder {
            names: names.into(),
            index: Arc::new(index),
        }))
    }
}

impl RowBuilder for RecordRowBuilder {
    fn make_row(&self, values: Vec<Value>) -> Result<Row, Cdb2Error> {
        Ok(Row::Record(Record {
            names: Arc::clone(&self.names),
            index: Arc::clone(&self.index),
            values,
        }))
    }
}

/// Fails naming each duplicated column once, in order of first appearance.
fn reject_duplicates(column_names: &[String]) -> Result<(), Cdb2Error> {
    let mut counts: HashMap<&str, usize> = HashMap::with_capacity(column_names.len());
    for name in column_names {
        *counts.entry(name.as_str()).or_default() += 1;
    }
    if counts.len() == column_names.len() {
        return Ok(());
    }
    let mut duplicated: Vec<&str> = Vec::new();
    for name in column_names {
        if counts[name.as_str()] > 1 && !duplicated.contains(&name.as_str()) {
            duplicated.push(name);
        }
    }
    Err(Cdb2Error::interface(format!(
        "Duplicated column names: {}",
        duplicated.join(", ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn list_keeps_duplicates() {
        let builder = ListRowFactory.build(&names(&["a", "a"])).unwrap();
        let row = builder
            .make_row(vec![Value::Integer(1), Value::Integer(2)])
            .unwrap();
        assert_eq!(row, Row::List(vec![Value::Integer(1), Value::Integer(2)]));
    }

    #[test]
    fn keyed_factories_reject_duplicates() {
        let cols = names(&["a", "b", "a", "c", "b"]);
        for factory in [&DictRowFactory as &dyn RowFactory, &RecordRowFactory] {
            let Err(err) = factory.build(&cols) else {
                panic!("{factory:?} accepted duplicated names");
            };
            assert_eq!(err.kind(), ErrorKind::Interface);
            assert_eq!(err.message(), "Duplicated column names: a, b");
        }
    }

    #[test]
    fn dict_rows() {
        let builder = DictRowFactory.build(&names(&["x", "y"])).unwrap();
        let row = builder
            .make_row(vec![Value::Integer(1), Value::Text("2".into())])
            .unwrap();
        assert_eq!(row.get("x"), Some(&Value::Integer(1)));
        assert_eq!(row.get("y"), Some(&Value::Text("2".into())));
        assert_eq!(row.get_by_index(0), None);
    }

    #[test]
    fn record_rows() {
        let builder = RecordRowFactory.build(&names(&["x", "y_2"])).unwrap();
        let row = builder
            .make_row(vec![Value::Integer(1), Value::Null])
            .unwrap();
        let Row::Record(record) = &row else {
            panic!("expected a record, got {row:?}");
        };
        assert_eq!(record.names(), ["x", "y_2"]);
        assert_eq!(row.get("y_2"), Some(&Value::Null));
        assert_eq!(row.get_by_index(0), Some(&Value::Integer(1)));
    }

    #[test]
    fn record_renames_dml_count_column() {
        let builder = RecordRowFactory.build(&names(&["rows inserted"])).unwrap();
        let row = builder.make_row(vec![Value::Integer(3)]).unwrap();
        assert_eq!(row.get("_0"), Some(&Value::Integer(3)));
    }

    #[test]
    fn record_rejects_non_identifiers() {
        let Err(err) = RecordRowFactory.build(&names(&["count(*)"])) else {
            panic!("accepted a non-identifier");
        };
        assert_eq!(err.kind(), ErrorKind::Interface);
        assert!(DictRowFactory.build(&names(&["count(*)"])).is_ok());
    }
}
