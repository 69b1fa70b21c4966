use std::cell::RefCell;
use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;

use crate::connection::{Connection, ConnectionInner};
use crate::error::Cdb2Error;
use crate::factories::Row;
use crate::native::NativeHandle;
use crate::params::Params;
use crate::transaction::{
    Operation, ROWCOUNT_UNKNOWN, TransactionMode, forbidden_in_implicit_mode,
};
use crate::types::{ColumnDescriptor, Effects, Value};

static PROCEDURE_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]+$"));

/// Per-cursor state, held by the connection so that `commit` and `rollback`
/// can update the live cursor.
#[derive(Debug, Clone)]
pub(crate) struct CursorSlot {
    pub(crate) id: u64,
    pub(crate) rowcount: i64,
    pub(crate) effects: Option<Effects>,
    pub(crate) description: Option<Vec<ColumnDescriptor>>,
}

impl CursorSlot {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            rowcount: ROWCOUNT_UNKNOWN,
            effects: None,
            description: None,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.rowcount = ROWCOUNT_UNKNOWN;
        self.effects = None;
        self.description = None;
    }
}

/// Sends statements through a [`Connection`] and reads back their rows.
///
/// Only the most recently created cursor of a connection is usable; older
/// ones behave as closed.
pub struct Cursor<H: NativeHandle> {
    conn: Rc<RefCell<ConnectionInner<H>>>,
    id: u64,
    arraysize: usize,
}

impl<H: NativeHandle> std::fmt::Debug for Cursor<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("arraysize", &self.arraysize)
            .finish_non_exhaustive()
    }
}

impl<H: NativeHandle> Cursor<H> {
    pub(crate) fn new(conn: Rc<RefCell<ConnectionInner<H>>>, id: u64) -> Self {
        Self {
            conn,
            id,
            arraysize: 1,
        }
    }

    /// Run `f` against the connection if this cursor is still the live one.
    fn with_live<T>(
        &self,
        f: impl FnOnce(&mut ConnectionInner<H>) -> Result<T, Cdb2Error>,
    ) -> Result<T, Cdb2Error> {
        let mut inner = self.conn.borrow_mut();
        let live = inner.active.as_ref().is_some_and(|slot| slot.id == self.id)
            && !inner.session.is_closed();
        if live {
            f(&mut inner)
        } else {
            Err(Cdb2Error::interface("Attempted to use a closed cursor"))
        }
    }

    fn slot<T>(&self, f: impl FnOnce(&CursorSlot) -> T) -> Result<T, Cdb2Error> {
        self.with_live(|inner| {
            inner
                .active
                .as_ref()
                .map(f)
                .ok_or_else(|| Cdb2Error::interface("Attempted to use a closed cursor"))
        })
    }

    /// Execute one statement, with `%(name)s` placeholders for `params`.
    ///
    /// In implicit mode a `begin` is sent first when no transaction is open,
    /// and `begin`, `commit` and `rollback` statements are refused.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when the cursor is closed, the statement is refused,
    /// or a placeholder cannot be resolved; otherwise the translated native
    /// error.
    pub fn execute(&mut self, sql: &str, params: &Params) -> Result<&mut Self, Cdb2Error> {
        self.with_live(|inner| {
            if let Some(slot) = inner.active.as_mut() {
                slot.description = None;
            }
            let operation = Operation::of(sql);
            if inner.tx.mode == TransactionMode::Implicit
                && let Some(message) = forbidden_in_implicit_mode(operation.as_deref())
            {
                return Err(Cdb2Error::interface(message));
            }
            inner.run(&operation, sql, params)
        })?;
        Ok(self)
    }

    /// Execute `sql` once per parameter set.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first failure.
    pub fn executemany<'p>(
        &mut self,
        sql: &str,
        param_sets: impl IntoIterator<Item = &'p Params>,
    ) -> Result<(), Cdb2Error> {
        self.with_live(|_| Ok(()))?;
        for params in param_sets {
            self.execute(sql, params)?;
        }
        Ok(())
    }

    /// Call a stored procedure with positional arguments, returning a copy of
    /// them. Any result set the procedure emits can be fetched as usual.
    ///
    /// # Errors
    ///
    /// `InterfaceError` for a name outside `[A-Za-z0-9_.]+`; otherwise as for
    /// [`execute`](Self::execute).
    pub fn callproc(&mut self, procname: &str, args: &[Value]) -> Result<Vec<Value>, Cdb2Error> {
        let valid = PROCEDURE_NAME.as_ref().map_err(Clone::clone)?;
        if !valid.is_match(procname) {
            return Err(Cdb2Error::interface(format!(
                "Invalid procedure name '{procname}'"
            )));
        }
        let params: Params = args
            .iter()
            .enumerate()
            .map(|(i, value)| (i.to_string(), value.clone()))
            .collect();
        let placeholders: Vec<String> = (0..args.len()).map(|i| format!("%({i})s")).collect();
        let sql = format!("exec procedure {procname}({})", placeholders.join(", "));
        self.execute(&sql, &params)?;
        Ok(args.to_vec())
    }

    /// The next row, or `None` when the result set is exhausted.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when closed or when the last statement produced no
    /// result set.
    pub fn fetchone(&mut self) -> Result<Option<Row>, Cdb2Error> {
        self.with_live(|inner| {
            let has_result_set = inner
                .active
                .as_ref()
                .is_some_and(|slot| slot.description.is_some());
            if !has_result_set {
                return Err(Cdb2Error::interface("No result set exists"));
            }
            inner.session.next_row()
        })
    }

    /// Up to `n` rows, defaulting to [`arraysize`](Self::arraysize).
    ///
    /// # Errors
    ///
    /// As for [`fetchone`](Self::fetchone).
    pub fn fetchmany(&mut self, n: Option<usize>) -> Result<Vec<Row>, Cdb2Error> {
        let n = n.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(n);
        while rows.len() < n {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    /// All remaining rows.
    ///
    /// # Errors
    ///
    /// As for [`fetchone`](Self::fetchone).
    pub fn fetchall(&mut self) -> Result<Vec<Row>, Cdb2Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Column descriptors of the current result set, `None` when there is
    /// none.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn description(&self) -> Result<Option<Vec<ColumnDescriptor>>, Cdb2Error> {
        self.slot(|slot| slot.description.clone())
    }

    /// Rows affected by the last statement, or `-1` when unknown.
    ///
    /// Known only after a successful commit, or in autocommit mode after
    /// `insert`, `update` or `delete` outside an explicit transaction.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn rowcount(&self) -> Result<i64, Cdb2Error> {
        self.slot(|slot| slot.rowcount)
    }

    /// Full counts behind [`rowcount`](Self::rowcount), when known.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn effects(&self) -> Result<Option<Effects>, Cdb2Error> {
        self.slot(|slot| slot.effects)
    }

    #[must_use]
    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize;
    }

    /// The connection this cursor belongs to.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn connection(&self) -> Result<Connection<H>, Cdb2Error> {
        self.with_live(|_| Ok(()))?;
        Ok(Connection {
            inner: Rc::clone(&self.conn),
        })
    }

    /// Close the cursor. Uncommitted work is not rolled back.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if already closed.
    pub fn close(&mut self) -> Result<(), Cdb2Error> {
        self.with_live(|inner| {
            inner.active = None;
            Ok(())
        })
    }
}

impl<H: NativeHandle> Iterator for Cursor<H> {
    type Item = Result<Row, Cdb2Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.fetchone().transpose()
    }
}
