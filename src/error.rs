use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use thiserror::Error;

use crate::native::codes;

/// Details of a failure reported by (or on behalf of) the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFailure {
    /// The cdb2api return code, when the failure came from a native call.
    pub code: Option<i32>,
    pub message: String,
}

impl DbFailure {
    #[must_use]
    pub fn new(code: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for DbFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (cdb2api rc {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Every failure surfaced by this crate.
///
/// The variants are the leaves of the DB-API exception tree. The intermediate
/// nodes (`DatabaseError`, `IntegrityError` as a parent) are available through
/// [`Cdb2Error::is_database_error`] and [`Cdb2Error::is_integrity_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Cdb2Error {
    /// Misuse of the client API: reuse after close, bad format strings,
    /// forbidden transaction statements, duplicated column names.
    #[error("Interface error: {0}")]
    InterfaceError(String),

    #[error("Internal error: {0}")]
    InternalError(DbFailure),

    /// Connectivity, I/O, rejected or stopped server, deadlock, unknown codes.
    #[error("Operational error: {0}")]
    OperationalError(DbFailure),

    /// Bad SQL, wrong statement state, missing statement.
    #[error("Programming error: {0}")]
    ProgrammingError(DbFailure),

    #[error("Integrity error: {0}")]
    IntegrityError(DbFailure),

    #[error("Unique key constraint violated: {0}")]
    UniqueKeyConstraintError(DbFailure),

    #[error("Foreign key constraint violated: {0}")]
    ForeignKeyConstraintError(DbFailure),

    #[error("Non-null constraint violated: {0}")]
    NonNullConstraintError(DbFailure),

    /// Conversion failures, bad time zone names, undecodable column values.
    #[error("Data error: {0}")]
    DataError(DbFailure),

    #[error("Not supported: {0}")]
    NotSupportedError(DbFailure),
}

/// The taxonomy member of a [`Cdb2Error`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Interface,
    Internal,
    Operational,
    Programming,
    Integrity,
    UniqueKeyConstraint,
    ForeignKeyConstraint,
    NonNullConstraint,
    Data,
    NotSupported,
}

impl ErrorKind {
    /// Build an error of this kind.
    #[must_use]
    pub fn error(self, code: Option<i32>, message: impl Into<String>) -> Cdb2Error {
        let failure = DbFailure::new(code, message);
        match self {
            ErrorKind::Interface => Cdb2Error::InterfaceError(failure.to_string()),
            ErrorKind::Internal => Cdb2Error::InternalError(failure),
            ErrorKind::Operational => Cdb2Error::OperationalError(failure),
            ErrorKind::Programming => Cdb2Error::ProgrammingError(failure),
            ErrorKind::Integrity => Cdb2Error::IntegrityError(failure),
            ErrorKind::UniqueKeyConstraint => Cdb2Error::UniqueKeyConstraintError(failure),
            ErrorKind::ForeignKeyConstraint => Cdb2Error::ForeignKeyConstraintError(failure),
            ErrorKind::NonNullConstraint => Cdb2Error::NonNullConstraintError(failure),
            ErrorKind::Data => Cdb2Error::DataError(failure),
            ErrorKind::NotSupported => Cdb2Error::NotSupportedError(failure),
        }
    }
}

impl Cdb2Error {
    pub(crate) fn interface(message: impl Into<String>) -> Self {
        Cdb2Error::InterfaceError(message.into())
    }

    pub(crate) fn data(message: impl Into<String>) -> Self {
        Cdb2Error::DataError(DbFailure::new(None, message))
    }

    pub(crate) fn not_supported(message: impl Into<String>) -> Self {
        Cdb2Error::NotSupportedError(DbFailure::new(None, message))
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Cdb2Error::InterfaceError(_) => ErrorKind::Interface,
            Cdb2Error::InternalError(_) => ErrorKind::Internal,
            Cdb2Error::OperationalError(_) => ErrorKind::Operational,
            Cdb2Error::ProgrammingError(_) => ErrorKind::Programming,
            Cdb2Error::IntegrityError(_) => ErrorKind::Integrity,
            Cdb2Error::UniqueKeyConstraintError(_) => ErrorKind::UniqueKeyConstraint,
            Cdb2Error::ForeignKeyConstraintError(_) => ErrorKind::ForeignKeyConstraint,
            Cdb2Error::NonNullConstraintError(_) => ErrorKind::NonNullConstraint,
            Cdb2Error::DataError(_) => ErrorKind::Data,
            Cdb2Error::NotSupportedError(_) => ErrorKind::NotSupported,
        }
    }

    /// Everything except `InterfaceError` descends from `DatabaseError`.
    #[must_use]
    pub fn is_database_error(&self) -> bool {
        !matches!(self, Cdb2Error::InterfaceError(_))
    }

    /// `IntegrityError` and its three constraint-specific children.
    #[must_use]
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Cdb2Error::IntegrityError(_)
                | Cdb2Error::UniqueKeyConstraintError(_)
                | Cdb2Error::ForeignKeyConstraintError(_)
                | Cdb2Error::NonNullConstraintError(_)
        )
    }

    /// The native return code, if this error came from one.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        self.failure().and_then(|failure| failure.code)
    }

    /// The message without the kind prefix or return code.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Cdb2Error::InterfaceError(message) => message,
            _ => self.failure().map_or("", |failure| failure.message.as_str()),
        }
    }

    fn failure(&self) -> Option<&DbFailure> {
        match self {
            Cdb2Error::InterfaceError(_) => None,
            Cdb2Error::InternalError(f)
            | Cdb2Error::OperationalError(f)
            | Cdb2Error::ProgrammingError(f)
            | Cdb2Error::IntegrityError(f)
            | Cdb2Error::UniqueKeyConstraintError(f)
            | Cdb2Error::ForeignKeyConstraintError(f)
            | Cdb2Error::NonNullConstraintError(f)
            | Cdb2Error::DataError(f)
            | Cdb2Error::NotSupportedError(f) => Some(f),
        }
    }
}

impl From<regex::Error> for Cdb2Error {
    fn from(err: regex::Error) -> Self {
        Cdb2Error::InternalError(DbFailure::new(None, format!("Invalid pattern: {err}")))
    }
}

/// The server reports some constraint violations with the undocumented code `1`.
const CONSTRAINT_QUIRK_RC: i32 = 1;

/// Messages containing this text are non-null violations whatever their code.
const NULL_CONSTRAINT_MARKER: &str = "null constraint violation";

static KIND_BY_RC: LazyLock<HashMap<i32, ErrorKind>> = LazyLock::new(|| {
    use ErrorKind::*;
    HashMap::from([
        (codes::CONNECT_ERROR, Operational),
        (codes::NOTCONNECTED, Programming),
        (codes::PREPARE_ERROR, Programming),
        (codes::IO_ERROR, Operational),
        (codes::INTERNAL, Internal),
        (codes::NOSTATEMENT, Programming),
        (codes::BADCOLUMN, Programming),
        (codes::BADSTATE, Programming),
        (codes::ASYNCERR, Operational),
        (codes::INVALID_ID, Internal),
        (codes::RECORD_OUT_OF_RANGE, Operational),
        (codes::REJECTED, Operational),
        (codes::STOPPED, Operational),
        (codes::BADREQ, Operational),
        (codes::DBCREATE_FAILED, Operational),
        (codes::THREADPOOL_INTERNAL, Operational),
        (codes::READONLY, NotSupported),
        (codes::NOMASTER, Internal),
        (codes::UNTAGGED_DATABASE, NotSupported),
        (codes::CONSTRAINTS, Integrity),
        (codes::DEADLOCK, Operational),
        (codes::TRAN_IO_ERROR, Operational),
        (codes::ACCESS, Operational),
        (codes::TRAN_MODE_UNSUPPORTED, NotSupported),
        (codes::VERIFY_ERROR, Operational),
        (codes::FKEY_VIOLATION, ForeignKeyConstraint),
        (codes::NULL_CONSTRAINT, NonNullConstraint),
        (codes::CONV_FAIL, Data),
        (codes::NONKLESS, NotSupported),
        (codes::MALLOC, Operational),
        (codes::NOTSUPPORTED, NotSupported),
        (codes::DUPLICATE, UniqueKeyConstraint),
        (codes::TZNAME_FAIL, Data),
        (codes::UNKNOWN, Operational),
        (CONSTRAINT_QUIRK_RC, Integrity),
    ])
});

/// Classify a native return code. Unknown codes are operational errors.
#[must_use]
pub fn kind_for_code(code: i32) -> ErrorKind {
    KIND_BY_RC
        .get(&code)
        .copied()
        .unwrap_or(ErrorKind::Operational)
}

/// Turn a native `(code, errstr)` pair into a typed error.
///
/// Never fails: a message that is not UTF-8 is escaped byte by byte.
#[must_use]
pub fn translate(code: i32, raw_message: &[u8]) -> Cdb2Error {
    let message = mangle_message(raw_message);
    let kind = if message.contains(NULL_CONSTRAINT_MARKER) {
        ErrorKind::NonNullConstraint
    } else {
        kind_for_code(code)
    };
    kind.error(Some(code), message)
}

/// Decode `raw` as UTF-8, replacing each invalid byte with a `\xNN` escape.
#[must_use]
pub fn mangle_message(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for chunk in raw.utf8_chunks() {
        out.push_str(chunk.valid());
        for byte in chunk.invalid() {
            out.push_str(&format!("\\x{byte:02x}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_their_kind() {
        assert_eq!(translate(codes::DUPLICATE, b"dup").kind(), ErrorKind::UniqueKeyConstraint);
        assert_eq!(translate(codes::PREPARE_ERROR, b"bad sql").kind(), ErrorKind::Programming);
        assert_eq!(translate(codes::TZNAME_FAIL, b"tz").kind(), ErrorKind::Data);
        assert_eq!(translate(codes::READONLY, b"ro").kind(), ErrorKind::NotSupported);
        assert_eq!(translate(codes::NOMASTER, b"nm").kind(), ErrorKind::Internal);
    }

    #[test]
    fn unknown_code_is_operational() {
        let err = translate(42, b"Not supported error");
        assert_eq!(err.kind(), ErrorKind::Operational);
        assert_eq!(err.code(), Some(42));
    }

    #[test]
    fn constraint_quirk_code() {
        assert!(translate(1, b"constraint").is_integrity_error());
    }

    #[test]
    fn null_constraint_message_overrides_code() {
        let err = translate(codes::CONSTRAINTS, b"null constraint violation on column a");
        assert_eq!(err.kind(), ErrorKind::NonNullConstraint);
        assert!(err.is_integrity_error());
    }

    #[test]
    fn invalid_utf8_is_escaped() {
        let err = translate(codes::PREPARE_ERROR, b"no such column: \xc3");
        assert_eq!(err.message(), "no such column: \\xc3");
        assert!(err.to_string().contains("(cdb2api rc -3)"));
    }

    #[test]
    fn valid_multibyte_text_is_kept() {
        assert_eq!(mangle_message("caf\u{e9}".as_bytes()), "caf\u{e9}");
        assert_eq!(mangle_message(b"\xff\xfe!"), "\\xff\\xfe!");
    }

    #[test]
    fn hierarchy_predicates() {
        assert!(!Cdb2Error::interface("closed").is_database_error());
        assert!(Cdb2Error::data("bad").is_database_error());
        assert!(!Cdb2Error::data("bad").is_integrity_error());
    }
}
