use comdb2_session::native::codes;
use comdb2_session::prelude::*;
use comdb2_session::test_utils::{FakeDriver, Script};

const INSERT: &str = "insert into t(key, val) values(%(k)s, %(v)s)";
const INSERT_NATIVE: &str = "insert into t(key, val) values(@k, @v)";

fn autocommit(driver: &FakeDriver) -> Result<Connection<comdb2_session::test_utils::FakeHandle>, Cdb2Error> {
    ConnectOptions::builder("mattdb").autocommit(true).connect(driver)
}

#[test]
fn test02_implicit_mode_wraps_statements() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(INSERT_NATIVE, Script::inserting(1));
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    assert_eq!(conn.mode(), TransactionMode::Implicit);
    let mut cursor = conn.cursor()?;

    cursor.execute(INSERT, &params! { "k" => 1, "v" => 10 })?;
    assert!(conn.in_transaction());
    assert_eq!(cursor.rowcount()?, -1);

    cursor.execute(INSERT, &params! { "k" => 2, "v" => 20 })?;
    conn.commit()?;
    assert!(!conn.in_transaction());
    assert_eq!(cursor.rowcount()?, 2);
    assert_eq!(cursor.effects()?.map(|e| e.num_inserted), Some(2));

    assert_eq!(
        driver.statements(),
        ["set timezone UTC", "begin", INSERT_NATIVE, INSERT_NATIVE, "commit"]
    );
    Ok(())
}

#[test]
fn test02_set_statements_skip_implicit_begin() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("SET transaction read committed", &Params::new())?;
    assert!(!conn.in_transaction());
    assert_eq!(
        driver.statements(),
        ["set timezone UTC", "SET transaction read committed"]
    );
    Ok(())
}

#[test]
fn test02_explicit_transaction_statements_refused() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;

    for (sql, message) in [
        ("BEGIN", "Transactions may not be started explicitly"),
        ("/* done */ commit", "Use Connection::commit to commit transactions"),
        ("-- undo\nrollback", "Use Connection::rollback to roll back transactions"),
    ] {
        let err = cursor.execute(sql, &Params::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Interface);
        assert_eq!(err.message(), message);
    }
    assert_eq!(driver.statements(), ["set timezone UTC"]);
    Ok(())
}

#[test]
fn test02_rollback_discards_counts() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("delete from t where 1", Script::deleting(3));
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("delete from t where 1", &Params::new())?;
    conn.rollback()?;
    assert!(!conn.in_transaction());
    // Effects are only read after commit.
    assert_eq!(cursor.rowcount()?, -1);
    assert_eq!(driver.statements().last().map(String::as_str), Some("rollback"));
    Ok(())
}

#[test]
fn test02_commit_without_work_begins_first() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    conn.commit()?;
    assert_eq!(driver.statements(), ["set timezone UTC", "begin", "commit"]);
    Ok(())
}

#[test]
fn test02_failed_commit_still_ends_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(INSERT_NATIVE, Script::inserting(1));
    driver.script("commit", Script::failing(codes::DUPLICATE, "add key constraint duplicate key"));
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute(INSERT, &params! { "k" => 1, "v" => 1 })?;

    let err = conn.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UniqueKeyConstraint);
    assert!(err.is_integrity_error());
    assert!(!conn.in_transaction());
    assert_eq!(cursor.rowcount()?, -1);
    Ok(())
}

#[test]
fn test02_autocommit_counts_immediately() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(INSERT_NATIVE, Script::inserting(1));
    driver.script("update t set val = 0", Script::updating(4));
    let conn = autocommit(&driver)?;
    let mut cursor = conn.cursor()?;

    cursor.execute(INSERT, &params! { "k" => 1, "v" => 10 })?;
    assert_eq!(cursor.rowcount()?, 1);
    assert!(cursor.description()?.is_none());

    cursor.execute("update t set val = 0", &Params::new())?;
    assert_eq!(cursor.rowcount()?, 4);

    cursor.execute("select 1", &Params::new())?;
    assert_eq!(cursor.rowcount()?, -1);
    assert!(!conn.in_transaction());
    assert_eq!(
        driver.statements(),
        ["set timezone UTC", INSERT_NATIVE, "update t set val = 0", "select 1"]
    );
    Ok(())
}

#[test]
fn test02_autocommit_explicit_transaction() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(INSERT_NATIVE, Script::inserting(1));
    let conn = autocommit(&driver)?;
    let mut cursor = conn.cursor()?;

    cursor.execute("begin", &Params::new())?;
    assert!(conn.in_transaction());
    cursor.execute(INSERT, &params! { "k" => 1, "v" => 10 })?;
    cursor.execute(INSERT, &params! { "k" => 2, "v" => 20 })?;
    assert_eq!(cursor.rowcount()?, -1);

    cursor.execute("commit", &Params::new())?;
    assert!(!conn.in_transaction());
    assert_eq!(cursor.rowcount()?, 2);
    Ok(())
}

#[test]
fn test02_autocommit_commit_outside_transaction_fails() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = autocommit(&driver)?;
    let err = conn.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Programming);
    assert_eq!(err.code(), Some(codes::BADSTATE));
    assert!(!conn.in_transaction());
    Ok(())
}

#[test]
fn test02_unavailable_effects_leave_rowcount_unknown() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(
        INSERT_NATIVE,
        Script::inserting(1).failing_effects(codes::BADSTATE, "no effects"),
    );
    let conn = autocommit(&driver)?;
    let mut cursor = conn.cursor()?;
    cursor.execute(INSERT, &params! { "k" => 1, "v" => 10 })?;
    assert_eq!(cursor.rowcount()?, -1);
    assert!(cursor.effects()?.is_none());
    Ok(())
}

#[test]
fn test02_missing_parameter_after_implicit_begin() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    let err = cursor
        .execute(INSERT, &params! { "k" => 1 })
        .unwrap_err();
    assert_eq!(err.message(), "No value provided for parameter 'v'");
    // The implicit begin went out before the statement was rewritten.
    assert_eq!(driver.statements(), ["set timezone UTC", "begin"]);
    assert!(conn.in_transaction());
    Ok(())
}

#[test]
fn test02_autocommit_delete_reports_counts() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("delete from t where 1=1", Script::deleting(5));
    let conn = autocommit(&driver)?;
    let mut cursor = conn.cursor()?;
    cursor.execute("delete from t where 1=1", &Params::new())?;
    let effects = cursor.effects()?.ok_or("missing effects")?;
    assert_eq!(effects.num_affected, 5);
    assert_eq!(effects.num_deleted, 5);
    assert!(!driver.statements().iter().any(|sql| sql == "begin"));
    Ok(())
}
