//! Contract with the native cdb2api client library.
//!
//! Everything above this module talks to the database through [`Driver`] and
//! [`NativeHandle`]. The traits mirror the C entry points one to one and keep
//! their return-code conventions; translating those codes into [`Cdb2Error`]
//! happens in the session layer, never here.
//!
//! [`Cdb2Error`]: crate::error::Cdb2Error
#![allow(unsafe_code)]

use std::ffi::CStr;

#[cfg(feature = "ffi")]
pub mod ffi;

use crate::types::{ConnectionFlags, Effects};

/// Success.
pub const CDB2_OK: i32 = 0;
/// `next_record` has no further rows.
pub const CDB2_OK_DONE: i32 = 1;

/// Named error codes from `cdb2api.h`.
pub mod codes {
    pub const CONNECT_ERROR: i32 = -1;
    pub const NOTCONNECTED: i32 = -2;
    pub const PREPARE_ERROR: i32 = -3;
    pub const IO_ERROR: i32 = -4;
    pub const INTERNAL: i32 = -5;
    pub const NOSTATEMENT: i32 = -6;
    pub const BADCOLUMN: i32 = -7;
    pub const BADSTATE: i32 = -8;
    pub const ASYNCERR: i32 = -9;
    pub const INVALID_ID: i32 = -12;
    pub const RECORD_OUT_OF_RANGE: i32 = -13;
    pub const REJECTED: i32 = -15;
    pub const STOPPED: i32 = -16;
    pub const BADREQ: i32 = -17;
    pub const DBCREATE_FAILED: i32 = -18;
    pub const THREADPOOL_INTERNAL: i32 = -20;
    pub const READONLY: i32 = -21;
    pub const NOMASTER: i32 = -101;
    pub const UNTAGGED_DATABASE: i32 = -102;
    pub const CONSTRAINTS: i32 = -103;
    pub const DEADLOCK: i32 = 203;
    pub const TRAN_IO_ERROR: i32 = -105;
    pub const ACCESS: i32 = -106;
    pub const TRAN_MODE_UNSUPPORTED: i32 = -107;
    pub const VERIFY_ERROR: i32 = 2;
    pub const FKEY_VIOLATION: i32 = 3;
    pub const NULL_CONSTRAINT: i32 = 4;
    pub const CONV_FAIL: i32 = 113;
    pub const NONKLESS: i32 = 114;
    pub const MALLOC: i32 = 115;
    pub const NOTSUPPORTED: i32 = 116;
    pub const DUPLICATE: i32 = 299;
    pub const TZNAME_FAIL: i32 = 401;
    pub const UNKNOWN: i32 = 300;
}

/// Every known error code, by its `cdb2api.h` name (without the `CDB2ERR_` prefix).
pub const ERROR_CODES: &[(&str, i32)] = &[
    ("CONNECT_ERROR", codes::CONNECT_ERROR),
    ("NOTCONNECTED", codes::NOTCONNECTED),
    ("PREPARE_ERROR", codes::PREPARE_ERROR),
    ("IO_ERROR", codes::IO_ERROR),
    ("INTERNAL", codes::INTERNAL),
    ("NOSTATEMENT", codes::NOSTATEMENT),
    ("BADCOLUMN", codes::BADCOLUMN),
    ("BADSTATE", codes::BADSTATE),
    ("ASYNCERR", codes::ASYNCERR),
    ("INVALID_ID", codes::INVALID_ID),
    ("RECORD_OUT_OF_RANGE", codes::RECORD_OUT_OF_RANGE),
    ("REJECTED", codes::REJECTED),
    ("STOPPED", codes::STOPPED),
    ("BADREQ", codes::BADREQ),
    ("DBCREATE_FAILED", codes::DBCREATE_FAILED),
    ("THREADPOOL_INTERNAL", codes::THREADPOOL_INTERNAL),
    ("READONLY", codes::READONLY),
    ("NOMASTER", codes::NOMASTER),
    ("UNTAGGED_DATABASE", codes::UNTAGGED_DATABASE),
    ("CONSTRAINTS", codes::CONSTRAINTS),
    ("DEADLOCK", codes::DEADLOCK),
    ("TRAN_IO_ERROR", codes::TRAN_IO_ERROR),
    ("ACCESS", codes::ACCESS),
    ("TRAN_MODE_UNSUPPORTED", codes::TRAN_MODE_UNSUPPORTED),
    ("VERIFY_ERROR", codes::VERIFY_ERROR),
    ("FKEY_VIOLATION", codes::FKEY_VIOLATION),
    ("NULL_CONSTRAINT", codes::NULL_CONSTRAINT),
    ("CONV_FAIL", codes::CONV_FAIL),
    ("NONKLESS", codes::NONKLESS),
    ("MALLOC", codes::MALLOC),
    ("NOTSUPPORTED", codes::NOTSUPPORTED),
    ("DUPLICATE", codes::DUPLICATE),
    ("TZNAME_FAIL", codes::TZNAME_FAIL),
    ("UNKNOWN", codes::UNKNOWN),
];

/// Look up the numeric value of a named error code.
#[must_use]
pub fn error_code(name: &str) -> Option<i32> {
    ERROR_CODES
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, code)| *code)
}

/// Opens native handles (`cdb2_open`).
pub trait Driver {
    type Handle: NativeHandle;

    /// Open a handle to `dbname` on `tier` (or a host name when
    /// [`ConnectionFlags::DIRECT_CPU`] is set).
    ///
    /// The native call hands back a handle even when it fails, so this returns
    /// both. On a non-OK code the caller reads `errstr` from the handle and
    /// must still close it.
    fn open(&self, dbname: &str, tier: &str, flags: ConnectionFlags) -> (i32, Self::Handle);
}

/// One native connection handle (`cdb2_hndl_tp`).
///
/// Only one result set can be live per handle. Column accessors refer to the
/// row most recently produced by [`next_record`](Self::next_record) and the
/// slices they return are valid until the next mutating call.
pub trait NativeHandle {
    /// Release the handle (`cdb2_close`).
    fn close(self) -> i32;

    /// `cdb2_run_statement`.
    fn run_statement(&mut self, sql: &str) -> i32;

    /// `cdb2_run_statement_typed`: ask the server to coerce each result column
    /// to the given type code.
    fn run_statement_typed(&mut self, sql: &str, types: &[i32]) -> i32;

    /// `cdb2_next_record`: [`CDB2_OK`] when a row is available,
    /// [`CDB2_OK_DONE`] at the end of the result set, anything else is an error.
    fn next_record(&mut self) -> i32;

    /// `cdb2_get_effects`. Consumes any rows left in the current result set.
    fn get_effects(&mut self, effects: &mut Effects) -> i32;

    /// `cdb2_bind_param`.
    ///
    /// # Safety
    ///
    /// The native library keeps `name` and `value` by address. Both must stay
    /// valid and unmodified until [`clear_bindings`](Self::clear_bindings)
    /// returns. `value` may be null only when `length` is zero.
    unsafe fn bind_param(
        &mut self,
        name: &CStr,
        type_code: i32,
        value: *const u8,
        length: usize,
    ) -> i32;

    /// `cdb2_clearbindings`.
    fn clear_bindings(&mut self) -> i32;

    /// `cdb2_clear_ack`: the last event delivered by a Lua consumer is not
    /// acknowledged when the handle closes, so the server redelivers it.
    fn clear_ack(&mut self) -> i32;

    /// `cdb2_numcolumns`.
    fn num_columns(&self) -> usize;

    /// `cdb2_column_name`, as raw bytes.
    fn column_name(&self, col: usize) -> &[u8];

    /// `cdb2_column_type`.
    fn column_type(&self, col: usize) -> i32;

    /// `cdb2_column_value` paired with `cdb2_column_size`; `None` for SQL NULL.
    fn column_value(&self, col: usize) -> Option<&[u8]>;

    /// `cdb2_errstr`, as raw bytes (not necessarily UTF-8).
    fn errstr(&self) -> &[u8];
}
