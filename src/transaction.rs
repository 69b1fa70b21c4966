use serde::{Deserialize, Serialize};

use crate::translation::sql_operation;

/// Row count reported while the real count is not known.
pub const ROWCOUNT_UNKNOWN: i64 = -1;

/// How a connection wraps statements in transactions. Fixed at connect time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Every statement other than `set` runs inside a transaction, started
    /// with an implicit `begin`. Only the connection may commit or roll back.
    #[default]
    Implicit,
    /// Statements apply immediately unless the caller sends `begin`.
    Autocommit,
}

/// Transaction bookkeeping for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionState {
    pub mode: TransactionMode,
    pub in_transaction: bool,
}

impl TransactionState {
    #[must_use]
    pub fn new(mode: TransactionMode) -> Self {
        Self {
            mode,
            in_transaction: false,
        }
    }

    /// Whether `operation` must be preceded by an implicit `begin`.
    #[must_use]
    pub fn needs_begin(&self, operation: Option<&str>) -> bool {
        self.mode == TransactionMode::Implicit
            && !self.in_transaction
            && operation != Some("set")
    }

    /// Whether the row counts of a just-finished `operation` are meaningful.
    #[must_use]
    pub fn effects_available(&self, operation: Option<&str>) -> bool {
        !self.in_transaction && modifies_rows(operation)
    }
}

/// The first keyword of a statement, as used for classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation(Option<String>);

impl Operation {
    #[must_use]
    pub fn of(sql: &str) -> Self {
        Self(sql_operation(sql))
    }

    #[must_use]
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn is(&self, keyword: &str) -> bool {
        self.0.as_deref() == Some(keyword)
    }
}

/// `commit` and `rollback` end the current transaction.
#[must_use]
pub fn ends_transaction(operation: Option<&str>) -> bool {
    matches!(operation, Some("commit" | "rollback"))
}

/// Operations after which `cdb2_get_effects` is safe and meaningful.
///
/// `exec` is left out: a procedure may produce a result set, which reading
/// the effects would discard.
#[must_use]
pub fn modifies_rows(operation: Option<&str>) -> bool {
    matches!(operation, Some("commit" | "insert" | "update" | "delete"))
}

/// Message for statements an implicit-mode cursor refuses to run.
#[must_use]
pub fn forbidden_in_implicit_mode(operation: Option<&str>) -> Option<&'static str> {
    match operation? {
        "begin" => Some("Transactions may not be started explicitly"),
        "commit" => Some("Use Connection::commit to commit transactions"),
        "rollback" => Some("Use Connection::rollback to roll back transactions"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ends_transaction(Some("commit")));
        assert!(ends_transaction(Some("rollback")));
        assert!(!ends_transaction(Some("begin")));
        assert!(modifies_rows(Some("delete")));
        assert!(!modifies_rows(Some("exec")));
        assert!(!modifies_rows(None));
    }

    #[test]
    fn implicit_begin_rules() {
        let mut state = TransactionState::new(TransactionMode::Implicit);
        assert!(state.needs_begin(Some("select")));
        assert!(state.needs_begin(None));
        assert!(!state.needs_begin(Some("set")));
        state.in_transaction = true;
        assert!(!state.needs_begin(Some("insert")));

        let autocommit = TransactionState::new(TransactionMode::Autocommit);
        assert!(!autocommit.needs_begin(Some("insert")));
    }

    #[test]
    fn operation_of_commented_statement() {
        let op = Operation::of("-- tidy up\nDELETE from t");
        assert!(op.is("delete"));
        assert!(TransactionState::new(TransactionMode::Autocommit).effects_available(op.as_deref()));
    }

    #[test]
    fn forbidden_messages() {
        assert!(forbidden_in_implicit_mode(Some("begin")).is_some());
        assert!(forbidden_in_implicit_mode(Some("select")).is_none());
        assert!(forbidden_in_implicit_mode(None).is_none());
    }
}
