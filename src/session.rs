use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::binder::BoundParams;
use crate::config::ConnectOptions;
use crate::conversion::decode;
use crate::error::{Cdb2Error, ErrorKind, mangle_message, translate};
use crate::factories::{Row, RowBuilder, RowFactory};
use crate::native::{CDB2_OK, CDB2_OK_DONE, Driver, NativeHandle};
use crate::params::Params;
use crate::types::{ColumnDescriptor, ColumnType, Effects, Value};

/// Where a [`Session`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Closed for good; every operation fails.
    Closed,
    /// Open, with no undelivered rows.
    Idle,
    /// The current result set has at least one undelivered row.
    RowsPending,
}

/// One open cdb2api handle and its current result set.
///
/// Statements run in submission order and only one result set is live at a
/// time: executing a new statement first drains whatever rows the previous one
/// left behind. A session may be moved to another thread but never shared.
pub struct Session<H: NativeHandle> {
    handle: Option<H>,
    more_rows: bool,
    columns: Vec<ColumnDescriptor>,
    row_factory: Option<Arc<dyn RowFactory>>,
    builder: Option<Box<dyn RowBuilder>>,
    _not_sync: PhantomData<Cell<()>>,
}

impl<H: NativeHandle> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("columns", &self.columns)
            .field("row_factory", &self.row_factory)
            .finish_non_exhaustive()
    }
}

impl<H: NativeHandle> Session<H> {
    /// Open a handle and, unless `options.timezone` is `None`, send
    /// `set timezone` over it.
    ///
    /// # Errors
    ///
    /// `InterfaceError` for conflicting host/tier options, `OperationalError`
    /// when the handle cannot be opened (the partially opened handle is still
    /// closed), or whatever the `set timezone` statement fails with.
    pub fn open<D>(driver: &D, options: &ConnectOptions) -> Result<Self, Cdb2Error>
    where
        D: Driver<Handle = H>,
    {
        let (tier, flags) = options.target()?;
        tracing::debug!(
            database = %options.database_name,
            tier,
            flags = flags.bits(),
            "opening cdb2 handle"
        );
        let (rc, handle) = driver.open(&options.database_name, tier, flags);
        if rc != CDB2_OK {
            let message = mangle_message(handle.errstr());
            let close_rc = handle.close();
            if close_rc != CDB2_OK {
                tracing::warn!(rc = close_rc, "closing a handle that failed to open");
            }
            return Err(ErrorKind::Operational.error(Some(rc), message));
        }

        let mut session = Self::from_handle(handle);
        if let Some(tz) = &options.timezone {
            session.execute(&format!("set timezone {tz}"), &Params::new())?;
        }
        Ok(session)
    }

    /// Wrap an already-open handle.
    #[must_use]
    pub fn from_handle(handle: H) -> Self {
        Self {
            handle: Some(handle),
            more_rows: false,
            columns: Vec::new(),
            row_factory: None,
            builder: None,
            _not_sync: PhantomData,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        match (&self.handle, self.more_rows) {
            (None, _) => SessionState::Closed,
            (Some(_), true) => SessionState::RowsPending,
            (Some(_), false) => SessionState::Idle,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    #[must_use]
    pub fn row_factory(&self) -> Option<&Arc<dyn RowFactory>> {
        self.row_factory.as_ref()
    }

    /// Row shape for statements executed from now on; `None` means lists.
    pub fn set_row_factory(&mut self, factory: Option<Arc<dyn RowFactory>>) {
        self.row_factory = factory;
    }

    /// Run `sql` with `params` bound to its `@name` placeholders.
    ///
    /// Any rows left from the previous statement are read and discarded
    /// first. On success the first row (if any) has been fetched and the
    /// column descriptors are loaded.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if the session is closed, the SQL contains a NUL byte,
    /// or the row factory rejects the column names; binding errors naming the
    /// parameter; otherwise the translated native error.
    pub fn execute(&mut self, sql: &str, params: &Params) -> Result<&mut Self, Cdb2Error> {
        self.execute_typed(sql, params, &[])
    }

    /// Like [`execute`](Self::execute), but asks the server to coerce result
    /// column N to `column_types[N]`. An empty slice requests no coercion.
    ///
    /// # Errors
    ///
    /// As for [`execute`](Self::execute); a type list that does not match the
    /// result set is reported by the server.
    pub fn execute_typed(
        &mut self,
        sql: &str,
        params: &Params,
        column_types: &[ColumnType],
    ) -> Result<&mut Self, Cdb2Error> {
        self.ensure_open("execute")?;
        if sql.contains('\0') {
            return Err(Cdb2Error::interface("SQL statement contains a NUL byte"));
        }
        self.discard_rows()?;
        self.columns.clear();
        self.builder = None;

        tracing::debug!(sql, params = params.len(), "running statement");
        let handle = self.open_handle("execute")?;
        let failure = {
            let mut bound = BoundParams::bind(handle, params)?;
            let rc = if column_types.is_empty() {
                bound.handle().run_statement(sql)
            } else {
                let codes: Vec<i32> = column_types.iter().map(|ty| ty.code()).collect();
                bound.handle().run_statement_typed(sql, &codes)
            };
            (rc != CDB2_OK).then(|| translate(rc, bound.handle().errstr()))
        };
        if let Some(err) = failure {
            return Err(err);
        }

        self.advance()?;
        self.load_columns()?;
        if let Some(factory) = self.row_factory.clone() {
            let names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
            match factory.build(&names) {
                Ok(builder) => self.builder = Some(builder),
                Err(err) => {
                    self.discard_rows()?;
                    self.columns.clear();
                    return Err(err);
                }
            }
        }
        Ok(self)
    }

    /// The next row of the current result set, or `None` once it is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed. A column that cannot be decoded makes the
    /// session drain the rest of the result set first; if draining fails that
    /// error is returned instead of the decode error.
    pub fn next_row(&mut self) -> Result<Option<Row>, Cdb2Error> {
        self.ensure_open("next")?;
        if !self.more_rows {
            return Ok(None);
        }
        let values = match self.current_values() {
            Ok(values) => values,
            Err(err) => {
                self.discard_rows()?;
                return Err(err);
            }
        };
        self.advance()?;
        let row = match &self.builder {
            Some(builder) => builder.make_row(values)?,
            None => Row::List(values),
        };
        Ok(Some(row))
    }

    /// Iterate over the remaining rows of the current result set.
    pub fn rows(&mut self) -> Rows<'_, H> {
        Rows { session: self }
    }

    /// Row counts for the last statement, or the running totals of the open
    /// transaction. Any undelivered rows are discarded.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed, otherwise the translated native error.
    pub fn get_effects(&mut self) -> Result<Effects, Cdb2Error> {
        let handle = self.open_handle("get_effects")?;
        let mut effects = Effects::default();
        let rc = handle.get_effects(&mut effects);
        let result = if rc == CDB2_OK {
            Ok(effects)
        } else {
            Err(translate(rc, handle.errstr()))
        };
        self.more_rows = false;
        result
    }

    /// Descriptors of the current result set's columns.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn columns(&self) -> Result<&[ColumnDescriptor], Cdb2Error> {
        self.ensure_open("columns")?;
        Ok(&self.columns)
    }

    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn column_names(&self) -> Result<Vec<&str>, Cdb2Error> {
        Ok(self.columns()?.iter().map(|c| c.name.as_str()).collect())
    }

    /// Raw type codes; see [`ColumnType::from_code`].
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed.
    pub fn column_types(&self) -> Result<Vec<i32>, Cdb2Error> {
        Ok(self.columns()?.iter().map(|c| c.type_code).collect())
    }

    /// Release the handle, acknowledging any consumer event it delivered.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when the session was already closed.
    pub fn close(&mut self) -> Result<(), Cdb2Error> {
        self.close_with_ack(true)
    }

    /// Release the handle. With `ack_current_event` false the last event read
    /// from a Lua consumer is left unconsumed and goes to another consumer.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when the session was already closed.
    pub fn close_with_ack(&mut self, ack_current_event: bool) -> Result<(), Cdb2Error> {
        let mut handle = self
            .handle
            .take()
            .ok_or_else(|| Cdb2Error::interface("close() called on closed connection"))?;
        if !ack_current_event {
            let rc = handle.clear_ack();
            if rc != CDB2_OK {
                tracing::warn!(rc, "cdb2_clear_ack failed");
            }
        }
        self.more_rows = false;
        self.columns.clear();
        self.builder = None;
        tracing::debug!(ack_current_event, "closing cdb2 handle");
        let rc = handle.close();
        if rc != CDB2_OK {
            tracing::warn!(rc, "cdb2_close failed");
        }
        Ok(())
    }

    fn ensure_open(&self, operation: &str) -> Result<(), Cdb2Error> {
        if self.handle.is_some() {
            Ok(())
        } else {
            Err(Cdb2Error::interface(format!(
                "{operation}() called on closed connection"
            )))
        }
    }

    fn open_handle(&mut self, operation: &str) -> Result<&mut H, Cdb2Error> {
        self.handle.as_mut().ok_or_else(|| {
            Cdb2Error::interface(format!("{operation}() called on closed connection"))
        })
    }

    /// Move to the next row, recording whether there is one.
    fn advance(&mut self) -> Result<(), Cdb2Error> {
        self.more_rows = false;
        let handle = self.open_handle("next")?;
        match handle.next_record() {
            CDB2_OK => {
                self.more_rows = true;
                Ok(())
            }
            CDB2_OK_DONE => Ok(()),
            rc => Err(translate(rc, handle.errstr())),
        }
    }

    fn discard_rows(&mut self) -> Result<(), Cdb2Error> {
        while self.more_rows {
            self.advance()?;
        }
        Ok(())
    }

    fn load_columns(&mut self) -> Result<(), Cdb2Error> {
        let handle = self.open_handle("execute")?;
        let columns = (0..handle.num_columns())
            .map(|col| ColumnDescriptor {
                name: mangle_message(handle.column_name(col)),
                type_code: handle.column_type(col),
            })
            .collect();
        self.columns = columns;
        Ok(())
    }

    fn current_values(&mut self) -> Result<Vec<Value>, Cdb2Error> {
        let handle = self.open_handle("next")?;
        (0..handle.num_columns())
            .map(|col| decode(handle.column_value(col), handle.column_type(col), col))
            .collect()
    }
}

impl<H: NativeHandle> Drop for Session<H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let rc = handle.close();
            if rc != CDB2_OK {
                tracing::warn!(rc, "cdb2_close failed while dropping session");
            }
        }
    }
}

/// Iterator over the remaining rows of a [`Session`].
pub struct Rows<'s, H: NativeHandle> {
    session: &'s mut Session<H>,
}

impl<H: NativeHandle> Iterator for Rows<'_, H> {
    type Item = Result<Row, Cdb2Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.session.next_row().transpose()
    }
}
