//! DB-API style connections.
//!
//! A [`Connection`] owns one [`Session`] and layers transaction handling on
//! top of it: in [`TransactionMode::Implicit`] every statement runs inside a
//! transaction that only [`Connection::commit`] or [`Connection::rollback`]
//! can end; in [`TransactionMode::Autocommit`] statements apply immediately
//! unless the caller sends `begin`.
//!
//! ```rust
//! use comdb2_session::prelude::*;
//! use comdb2_session::test_utils::{FakeDriver, Script};
//!
//! let driver = FakeDriver::new();
//! driver.script("insert into t(key, val) values(@k, @v)", Script::affecting(1));
//!
//! let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
//! let mut cursor = conn.cursor()?;
//! cursor.execute("insert into t(key, val) values(%(k)s, %(v)s)", &params! { "k" => 1, "v" => 2 })?;
//! assert_eq!(cursor.rowcount()?, -1);
//! conn.commit()?;
//! assert_eq!(cursor.rowcount()?, 1);
//! # Ok::<(), Cdb2Error>(())
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::ConnectOptions;
use crate::cursor::{Cursor, CursorSlot};
use crate::error::Cdb2Error;
use crate::factories::RowFactory;
use crate::native::{Driver, NativeHandle};
use crate::params::Params;
use crate::session::Session;
use crate::transaction::{
    Operation, ROWCOUNT_UNKNOWN, TransactionMode, TransactionState, ends_transaction,
};
use crate::translation::interpolate_placeholders;

/// Open a connection described by `options`.
///
/// # Errors
///
/// `InterfaceError` for a host combined with a non-default tier; otherwise
/// see [`Session::open`].
pub fn connect<D: Driver>(
    driver: &D,
    options: &ConnectOptions,
) -> Result<Connection<D::Handle>, Cdb2Error> {
    options.target()?;
    let session = Session::open(driver, options)?;
    tracing::debug!(
        database = %options.database_name,
        mode = ?options.transaction_mode(),
        "connected"
    );
    Ok(Connection::new(session, options.transaction_mode()))
}

/// A connection to one database, with at most one live [`Cursor`].
///
/// Cloning yields another reference to the same connection.
pub struct Connection<H: NativeHandle> {
    pub(crate) inner: Rc<RefCell<ConnectionInner<H>>>,
}

impl<H: NativeHandle> Clone for Connection<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H: NativeHandle> std::fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Connection")
                .field("session", &inner.session)
                .field("transaction", &inner.tx)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("Connection { <in use> }"),
        }
    }
}

pub(crate) struct ConnectionInner<H: NativeHandle> {
    pub(crate) session: Session<H>,
    pub(crate) tx: TransactionState,
    pub(crate) active: Option<CursorSlot>,
    next_cursor_id: u64,
}

impl<H: NativeHandle> ConnectionInner<H> {
    fn check_open(&self) -> Result<(), Cdb2Error> {
        if self.session.is_closed() {
            Err(Cdb2Error::interface("Attempted to use a closed Connection"))
        } else {
            Ok(())
        }
    }

    /// Replace any live cursor with a fresh one and return its id.
    fn open_cursor(&mut self) -> u64 {
        self.next_cursor_id += 1;
        self.active = Some(CursorSlot::new(self.next_cursor_id));
        self.next_cursor_id
    }

    /// Run one statement on behalf of the active cursor, keeping the
    /// transaction state and the cursor's row count current.
    pub(crate) fn run(
        &mut self,
        operation: &Operation,
        sql: &str,
        params: &Params,
    ) -> Result<(), Cdb2Error> {
        if let Some(slot) = self.active.as_mut() {
            slot.reset();
        }
        let op = operation.as_deref();

        if self.tx.needs_begin(op) {
            tracing::debug!("starting implicit transaction");
            self.session.execute("begin", &Params::new())?;
            self.tx.in_transaction = true;
        }

        let sql = interpolate_placeholders(sql, params)?;

        if ends_transaction(op) {
            // The transaction is over even if the statement fails.
            self.tx.in_transaction = false;
            tracing::debug!(operation = op, "ending transaction");
        }

        self.session.execute(&sql, params)?;

        if operation.is("begin") {
            self.tx.in_transaction = true;
        } else if self.tx.effects_available(op) {
            match self.session.get_effects() {
                Ok(effects) => {
                    if let Some(slot) = self.active.as_mut() {
                        slot.rowcount = i64::from(effects.num_affected);
                        slot.effects = Some(effects);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "row count unavailable");
                }
            }
        }

        if let Some(slot) = self.active.as_mut()
            && slot.rowcount == ROWCOUNT_UNKNOWN
        {
            let columns = self.session.columns()?;
            slot.description = (!columns.is_empty()).then(|| columns.to_vec());
        }
        Ok(())
    }

    fn end_transaction(&mut self, keyword: &str) -> Result<(), Cdb2Error> {
        self.check_open()?;
        if self.active.is_none() {
            self.open_cursor();
        }
        self.run(&Operation::of(keyword), keyword, &Params::new())
    }
}

impl<H: NativeHandle> Connection<H> {
    /// Wrap an open session.
    #[must_use]
    pub fn new(session: Session<H>, mode: TransactionMode) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ConnectionInner {
                session,
                tx: TransactionState::new(mode),
                active: None,
                next_cursor_id: 0,
            })),
        }
    }

    /// A new cursor. Any outstanding cursor is closed first; its uncommitted
    /// work is not rolled back.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if the connection is closed.
    pub fn cursor(&self) -> Result<Cursor<H>, Cdb2Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_open()?;
        let id = inner.open_cursor();
        Ok(Cursor::new(Rc::clone(&self.inner), id))
    }

    /// Commit the current transaction.
    ///
    /// The connection is out of the transaction afterwards even if the commit
    /// fails. In autocommit mode this fails unless `begin` was sent.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed, otherwise the translated native error.
    pub fn commit(&self) -> Result<(), Cdb2Error> {
        self.inner.borrow_mut().end_transaction("commit")
    }

    /// Roll back the current transaction; see [`commit`](Self::commit).
    ///
    /// # Errors
    ///
    /// `InterfaceError` if closed, otherwise the translated native error.
    pub fn rollback(&self) -> Result<(), Cdb2Error> {
        self.inner.borrow_mut().end_transaction("rollback")
    }

    /// Close the outstanding cursor and the session.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when already closed.
    pub fn close(&self) -> Result<(), Cdb2Error> {
        self.close_with_ack(true)
    }

    /// Like [`close`](Self::close); `ack_current_event = false` sends the last
    /// Lua consumer event back to be redelivered.
    ///
    /// # Errors
    ///
    /// `InterfaceError` when already closed.
    pub fn close_with_ack(&self, ack_current_event: bool) -> Result<(), Cdb2Error> {
        let mut inner = self.inner.borrow_mut();
        if inner.session.is_closed() {
            return Err(Cdb2Error::interface(
                "close() called on already closed connection",
            ));
        }
        inner.active = None;
        inner.session.close_with_ack(ack_current_event)
    }

    /// # Errors
    ///
    /// `InterfaceError` if the connection is closed.
    pub fn row_factory(&self) -> Result<Option<Arc<dyn RowFactory>>, Cdb2Error> {
        let inner = self.inner.borrow();
        inner.check_open()?;
        Ok(inner.session.row_factory().cloned())
    }

    /// Row shape for statements executed from now on; `None` means lists.
    ///
    /// # Errors
    ///
    /// `InterfaceError` if the connection is closed.
    pub fn set_row_factory(&self, factory: Option<Arc<dyn RowFactory>>) -> Result<(), Cdb2Error> {
        let mut inner = self.inner.borrow_mut();
        inner.check_open()?;
        inner.session.set_row_factory(factory);
        Ok(())
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.inner.borrow().tx.in_transaction
    }

    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.borrow().tx.mode
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().session.is_closed()
    }
}
