//! Scripted in-memory stand-in for the cdb2api client library.
//!
//! [`FakeDriver`] hands out [`FakeHandle`]s that share one fake server. Each
//! SQL string can be given a [`Script`] describing its result set, its row
//! counts or the failure it produces; unscripted statements succeed with no
//! rows. The server keeps simple transaction totals so that row counts after
//! `commit` behave like the real thing, and records every statement together
//! with the parameter values read back through the bound pointers at run time.
#![allow(unsafe_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_char};
use std::rc::Rc;

use crate::conversion::{decode, encode};
use crate::native::{CDB2_OK, CDB2_OK_DONE, Driver, NativeHandle, codes};
use crate::translation::sql_operation;
use crate::types::{ColumnType, ConnectionFlags, Effects, Value};

/// What the fake server does when it runs one SQL string.
#[derive(Debug, Clone, Default)]
pub struct Script {
    columns: Vec<(Vec<u8>, i32)>,
    rows: Vec<Vec<Option<Vec<u8>>>>,
    effects: Effects,
    run_failure: Option<(i32, String)>,
    row_failure: Option<(usize, i32, String)>,
    effects_failure: Option<(i32, String)>,
}

impl Script {
    /// Succeeds with no result set and no row counts.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result set; each column's type is taken from its first non-null
    /// value (INTEGER for all-null columns).
    ///
    /// # Panics
    ///
    /// If a value cannot be encoded.
    #[must_use]
    pub fn rows(names: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = names
            .iter()
            .enumerate()
            .map(|(col, name)| {
                let type_code = rows
                    .iter()
                    .filter_map(|row| row.get(col))
                    .find(|value| !value.is_null())
                    .map_or(ColumnType::Integer.code(), |value| {
                        encode(value).unwrap().type_code
                    });
                (name.as_bytes().to_vec(), type_code)
            })
            .collect();
        let rows = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|value| encode(value).unwrap().buf.map(Vec::from))
                    .collect()
            })
            .collect();
        Self {
            columns,
            rows,
            ..Self::default()
        }
    }

    /// A result set given as raw column bytes, for payloads no [`Value`]
    /// encodes to.
    #[must_use]
    pub fn raw_rows(columns: &[(&[u8], i32)], rows: Vec<Vec<Option<Vec<u8>>>>) -> Self {
        Self {
            columns: columns
                .iter()
                .map(|(name, type_code)| (name.to_vec(), *type_code))
                .collect(),
            rows,
            ..Self::default()
        }
    }

    /// A statement that changes `n` rows of unspecified kind.
    #[must_use]
    pub fn affecting(n: i32) -> Self {
        Self::empty().with_effects(Effects {
            num_affected: n,
            ..Effects::default()
        })
    }

    #[must_use]
    pub fn inserting(n: i32) -> Self {
        Self::empty().with_effects(Effects {
            num_affected: n,
            num_inserted: n,
            ..Effects::default()
        })
    }

    #[must_use]
    pub fn updating(n: i32) -> Self {
        Self::empty().with_effects(Effects {
            num_affected: n,
            num_updated: n,
            ..Effects::default()
        })
    }

    #[must_use]
    pub fn deleting(n: i32) -> Self {
        Self::empty().with_effects(Effects {
            num_affected: n,
            num_deleted: n,
            ..Effects::default()
        })
    }

    #[must_use]
    pub fn with_effects(mut self, effects: Effects) -> Self {
        self.effects = effects;
        self
    }

    /// `cdb2_run_statement` fails.
    #[must_use]
    pub fn failing(rc: i32, message: &str) -> Self {
        Self {
            run_failure: Some((rc, message.to_string())),
            ..Self::default()
        }
    }

    /// `cdb2_next_record` fails once `rows` rows have been delivered.
    #[must_use]
    pub fn failing_after(mut self, rows: usize, rc: i32, message: &str) -> Self {
        self.row_failure = Some((rows, rc, message.to_string()));
        self
    }

    /// `cdb2_get_effects` fails after this statement.
    #[must_use]
    pub fn failing_effects(mut self, rc: i32, message: &str) -> Self {
        self.effects_failure = Some((rc, message.to_string()));
        self
    }
}

/// One statement as the fake server saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    /// Bound parameters, decoded from the bound buffers when the statement ran.
    pub params: Vec<(String, Value)>,
    /// Types passed to `cdb2_run_statement_typed`; empty otherwise.
    pub column_types: Vec<i32>,
}

#[derive(Debug, Default)]
struct FakeServer {
    scripts: HashMap<String, Script>,
    open_failure: Option<(i32, String)>,
    executed: Vec<ExecutedStatement>,
    open_args: Vec<(String, String, ConnectionFlags)>,
    opens: usize,
    closes: usize,
    clears: usize,
    acks_cleared: usize,
    rows_read: usize,
    in_transaction: bool,
    transaction_effects: Effects,
    last_effects: Effects,
}

/// Driver over a shared fake server. Clones share the server.
#[derive(Debug, Clone, Default)]
pub struct FakeDriver {
    server: Rc<RefCell<FakeServer>>,
}

impl FakeDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what running exactly `sql` does.
    pub fn script(&self, sql: &str, script: Script) {
        self.server
            .borrow_mut()
            .scripts
            .insert(sql.to_string(), script);
    }

    /// Make every later `cdb2_open` fail.
    pub fn fail_open(&self, rc: i32, message: &str) {
        self.server.borrow_mut().open_failure = Some((rc, message.to_string()));
    }

    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.server.borrow().executed.clone()
    }

    /// SQL of every statement run so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.server
            .borrow()
            .executed
            .iter()
            .map(|stmt| stmt.sql.clone())
            .collect()
    }

    /// `(dbname, tier, flags)` of every open attempt.
    #[must_use]
    pub fn open_args(&self) -> Vec<(String, String, ConnectionFlags)> {
        self.server.borrow().open_args.clone()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.server.borrow().opens
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.server.borrow().closes
    }

    /// Number of `cdb2_clearbindings` calls.
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.server.borrow().clears
    }

    /// Number of `cdb2_clear_ack` calls.
    #[must_use]
    pub fn acks_cleared(&self) -> usize {
        self.server.borrow().acks_cleared
    }

    /// Rows produced by `cdb2_next_record`, whether or not the caller
    /// looked at them.
    #[must_use]
    pub fn rows_read(&self) -> usize {
        self.server.borrow().rows_read
    }

    #[must_use]
    pub fn server_in_transaction(&self) -> bool {
        self.server.borrow().in_transaction
    }
}

impl Driver for FakeDriver {
    type Handle = FakeHandle;

    fn open(&self, dbname: &str, tier: &str, flags: ConnectionFlags) -> (i32, FakeHandle) {
        let mut server = self.server.borrow_mut();
        server.opens += 1;
        server
            .open_args
            .push((dbname.to_string(), tier.to_string(), flags));
        let mut handle = FakeHandle {
            server: Rc::clone(&self.server),
            bindings: Vec::new(),
            result: None,
            errstr: Vec::new(),
        };
        match &server.open_failure {
            Some((rc, message)) => {
                handle.errstr = message.as_bytes().to_vec();
                (*rc, handle)
            }
            None => (CDB2_OK, handle),
        }
    }
}

struct Binding {
    name: *const c_char,
    type_code: i32,
    value: *const u8,
    length: usize,
}

struct ActiveResult {
    script: Script,
    delivered: usize,
    current: Option<usize>,
}

/// Handle onto the fake server.
pub struct FakeHandle {
    server: Rc<RefCell<FakeServer>>,
    bindings: Vec<Binding>,
    result: Option<ActiveResult>,
    errstr: Vec<u8>,
}

impl FakeHandle {
    fn fail(&mut self, rc: i32, message: &str) -> i32 {
        self.errstr = message.as_bytes().to_vec();
        rc
    }

    fn read_bindings(&self) -> Vec<(String, Value)> {
        self.bindings
            .iter()
            .enumerate()
            .map(|(idx, binding)| {
                // SAFETY: `bind_param`'s contract keeps both buffers alive
                // until `clear_bindings`, which has not run yet.
                let name = unsafe { CStr::from_ptr(binding.name) }
                    .to_string_lossy()
                    .into_owned();
                let raw = (!binding.value.is_null()).then(|| unsafe {
                    std::slice::from_raw_parts(binding.value, binding.length)
                });
                let value = decode(raw, binding.type_code, idx).unwrap_or_else(|err| {
                    Value::Text(format!("<undecodable: {err}>"))
                });
                (name, value)
            })
            .collect()
    }

    fn execute(&mut self, sql: &str, column_types: &[i32]) -> i32 {
        let params = self.read_bindings();
        self.result = None;
        let mut server = self.server.borrow_mut();
        server.executed.push(ExecutedStatement {
            sql: sql.to_string(),
            params,
            column_types: column_types.to_vec(),
        });
        let script = server.scripts.get(sql).cloned().unwrap_or_default();
        if let Some((rc, message)) = &script.run_failure {
            drop(server);
            return self.fail(*rc, message);
        }

        match sql_operation(sql).as_deref() {
            Some("begin") => {
                server.in_transaction = true;
                server.transaction_effects = Effects::default();
            }
            Some(op @ ("commit" | "rollback")) => {
                if !server.in_transaction {
                    drop(server);
                    return self.fail(codes::BADSTATE, "No transaction in progress");
                }
                server.in_transaction = false;
                server.last_effects = if op == "commit" {
                    server.transaction_effects
                } else {
                    Effects::default()
                };
            }
            _ if server.in_transaction => {
                let total = &mut server.transaction_effects;
                let add = script.effects;
                total.num_affected += add.num_affected;
                total.num_selected += add.num_selected;
                total.num_updated += add.num_updated;
                total.num_deleted += add.num_deleted;
                total.num_inserted += add.num_inserted;
            }
            _ => server.last_effects = script.effects,
        }
        drop(server);

        self.result = Some(ActiveResult {
            script,
            delivered: 0,
            current: None,
        });
        CDB2_OK
    }
}

impl NativeHandle for FakeHandle {
    fn close(self) -> i32 {
        self.server.borrow_mut().closes += 1;
        CDB2_OK
    }

    fn run_statement(&mut self, sql: &str) -> i32 {
        self.execute(sql, &[])
    }

    fn run_statement_typed(&mut self, sql: &str, types: &[i32]) -> i32 {
        self.execute(sql, types)
    }

    fn next_record(&mut self) -> i32 {
        let Some(result) = self.result.as_mut() else {
            return CDB2_OK_DONE;
        };
        result.current = None;
        if let Some((after, rc, message)) = result.script.row_failure.clone()
            && result.delivered == after
        {
            return self.fail(rc, &message);
        }
        if result.delivered < result.script.rows.len() {
            result.current = Some(result.delivered);
            result.delivered += 1;
            self.server.borrow_mut().rows_read += 1;
            CDB2_OK
        } else {
            CDB2_OK_DONE
        }
    }

    fn get_effects(&mut self, effects: &mut Effects) -> i32 {
        if let Some(result) = self.result.as_mut() {
            if let Some((rc, message)) = result.script.effects_failure.clone() {
                return self.fail(rc, &message);
            }
            result.delivered = result.script.rows.len();
            result.current = None;
        }
        let server = self.server.borrow();
        *effects = if server.in_transaction {
            server.transaction_effects
        } else {
            server.last_effects
        };
        CDB2_OK
    }

    unsafe fn bind_param(
        &mut self,
        name: &CStr,
        type_code: i32,
        value: *const u8,
        length: usize,
    ) -> i32 {
        self.bindings.push(Binding {
            name: name.as_ptr(),
            type_code,
            value,
            length,
        });
        CDB2_OK
    }

    fn clear_bindings(&mut self) -> i32 {
        self.bindings.clear();
        self.server.borrow_mut().clears += 1;
        CDB2_OK
    }

    fn clear_ack(&mut self) -> i32 {
        self.server.borrow_mut().acks_cleared += 1;
        CDB2_OK
    }

    fn num_columns(&self) -> usize {
        self.result
            .as_ref()
            .map_or(0, |result| result.script.columns.len())
    }

    fn column_name(&self, col: usize) -> &[u8] {
        self.result
            .as_ref()
            .and_then(|result| result.script.columns.get(col))
            .map_or(&[], |(name, _)| name.as_slice())
    }

    fn column_type(&self, col: usize) -> i32 {
        self.result
            .as_ref()
            .and_then(|result| result.script.columns.get(col))
            .map_or(0, |(_, type_code)| *type_code)
    }

    fn column_value(&self, col: usize) -> Option<&[u8]> {
        let result = self.result.as_ref()?;
        let row = result.script.rows.get(result.current?)?;
        row.get(col)?.as_deref()
    }

    fn errstr(&self) -> &[u8] {
        &self.errstr
    }
}
