//! Convenient imports for common functionality.
//!
//! ```rust
//! use comdb2_session::prelude::*;
//!
//! let params = params! { "id" => 7, "name" => "bob" };
//! assert_eq!(params.get("id"), Some(&Value::Integer(7)));
//! ```

pub use crate::config::{ConnectOptions, ConnectOptionsBuilder};
pub use crate::connection::{Connection, connect};
pub use crate::cursor::Cursor;
pub use crate::error::{Cdb2Error, ErrorKind};
pub use crate::factories::{DictRowFactory, ListRowFactory, RecordRowFactory, Row, RowFactory};
pub use crate::params;
pub use crate::params::{Params, ToSqlValue};
pub use crate::session::Session;
pub use crate::transaction::TransactionMode;
pub use crate::types::{ColumnType, ConnectionFlags, Datetime, DatetimeUs, Effects, Value};
