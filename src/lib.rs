//! Client session layer for Comdb2.
//!
//! [`Session`] wraps one cdb2api handle: it binds parameters, runs
//! statements and decodes rows into [`Value`]s. [`Connection`] and [`Cursor`]
//! build DB-API style transaction handling on top of it. The native library
//! sits behind the [`native::Driver`] and [`native::NativeHandle`] traits;
//! enable the `ffi` feature for the implementation that loads `libcdb2api`.

pub mod binder;
pub mod config;
pub mod connection;
pub mod conversion;
pub mod cursor;
pub mod error;
pub mod factories;
pub mod native;
pub mod params;
pub mod prelude;
pub mod session;
pub mod transaction;
pub mod translation;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{ConnectOptions, ConnectOptionsBuilder};
pub use connection::{Connection, connect};
pub use cursor::Cursor;
pub use error::{Cdb2Error, DbFailure, ErrorKind};
pub use factories::{
    DictRowFactory, ListRowFactory, Record, RecordRowFactory, Row, RowBuilder, RowFactory,
};
pub use params::{Params, ToSqlValue};
pub use session::{Rows, Session, SessionState};
pub use transaction::TransactionMode;
pub use types::{
    ColumnDescriptor, ColumnType, ConnectionFlags, Datetime, DatetimeUs, Effects, TypeCategory,
    Value,
};
