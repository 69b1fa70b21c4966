use std::sync::Arc;

use comdb2_session::prelude::*;
use comdb2_session::test_utils::{FakeDriver, Script};
use comdb2_session::types::TypeCategory;

fn people() -> Script {
    Script::rows(
        &["id", "name"],
        vec![
            vec![Value::Integer(1), Value::Text("ann".into())],
            vec![Value::Integer(2), Value::Text("bob".into())],
            vec![Value::Integer(3), Value::Text("cid".into())],
        ],
    )
}

#[test]
fn test03_fetch_variants() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("select id, name from people", people());
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("select id, name from people", &Params::new())?;

    let description = cursor.description()?.ok_or("missing description")?;
    let categories: Vec<_> = description
        .iter()
        .map(|column| column.column_type().and_then(ColumnType::category))
        .collect();
    assert_eq!(
        categories,
        [Some(TypeCategory::Number), Some(TypeCategory::String)]
    );

    let first = cursor.fetchone()?.ok_or("missing first row")?;
    assert_eq!(first.as_list(), Some(&[Value::Integer(1), Value::Text("ann".into())][..]));

    cursor.set_arraysize(5);
    let rest = cursor.fetchmany(None)?;
    assert_eq!(rest.len(), 2);
    assert!(cursor.fetchone()?.is_none());
    assert!(cursor.fetchall()?.is_empty());
    Ok(())
}

#[test]
fn test03_cursor_iterates() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("select id, name from people", people());
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("select id, name from people", &Params::new())?;
    let ids = cursor
        .by_ref()
        .map(|row| row.map(|row| row.get_by_index(0).and_then(Value::as_int)))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(ids, [Some(1), Some(2), Some(3)]);
    Ok(())
}

#[test]
fn test03_dict_rows() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("select id, name from people", people());
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    conn.set_row_factory(Some(Arc::new(DictRowFactory)))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("select id, name from people", &Params::new())?;
    let row = cursor.fetchone()?.ok_or("missing row")?;
    assert!(matches!(row, Row::Dict(_)));
    assert_eq!(row.get("name"), Some(&Value::Text("ann".into())));
    Ok(())
}

#[test]
fn test03_record_rows() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("select id, name from people", people());
    driver.script(
        "insert into people select * from staging",
        Script::rows(&["rows inserted"], vec![vec![Value::Integer(7)]]),
    );
    let opts = ConnectOptions::builder("mattdb")
        .flags(ConnectionFlags::READ_INTRANS_RESULTS)
        .finish();
    let conn = connect(&driver, &opts)?;
    conn.set_row_factory(Some(Arc::new(RecordRowFactory)))?;
    let mut cursor = conn.cursor()?;

    cursor.execute("select id, name from people", &Params::new())?;
    let Some(Row::Record(record)) = cursor.fetchone()? else {
        return Err("expected a record".into());
    };
    assert_eq!(record.names(), ["id", "name"]);
    assert_eq!(record.get("id"), Some(&Value::Integer(1)));

    cursor.execute("insert into people select * from staging", &Params::new())?;
    let row = cursor.fetchone()?.ok_or("missing count row")?;
    assert_eq!(row.get("_0"), Some(&Value::Integer(7)));
    Ok(())
}

#[test]
fn test03_duplicate_columns_rejected_by_named_shapes() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script(
        "select a.id, b.id from a, b",
        Script::rows(&["id", "id"], vec![vec![Value::Integer(1), Value::Integer(2)]]),
    );
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;

    cursor.execute("select a.id, b.id from a, b", &Params::new())?;
    assert_eq!(cursor.fetchall()?.len(), 1);

    conn.set_row_factory(Some(Arc::new(DictRowFactory)))?;
    let err = cursor
        .execute("select a.id, b.id from a, b", &Params::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Interface);
    assert_eq!(err.message(), "Duplicated column names: id");
    Ok(())
}

#[test]
fn test03_closing_does_not_drain() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    driver.script("select id, name from people", people());
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let mut cursor = conn.cursor()?;
    cursor.execute("select id, name from people", &Params::new())?;
    cursor.close()?;
    assert_eq!(driver.rows_read(), 1);

    let mut next = conn.cursor()?;
    next.execute("select 1", &Params::new())?;
    assert_eq!(driver.rows_read(), 3);
    assert!(next.description()?.is_none());
    Ok(())
}

#[test]
fn test03_executemany() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = ConnectOptions::builder("mattdb").autocommit(true).connect(&driver)?;
    let mut cursor = conn.cursor()?;
    let rows: Vec<Params> = (1..=3).map(|k| params! { "k" => k }).collect();
    cursor.executemany("insert into t(k) values(%(k)s)", &rows)?;

    let bound: Vec<Value> = driver
        .executed()
        .into_iter()
        .filter(|stmt| stmt.sql == "insert into t(k) values(@k)")
        .flat_map(|stmt| stmt.params.into_iter().map(|(_, value)| value))
        .collect();
    assert_eq!(bound, [Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    Ok(())
}

#[test]
fn test03_percent_escapes() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = ConnectOptions::builder("mattdb").autocommit(true).connect(&driver)?;
    let mut cursor = conn.cursor()?;
    cursor.execute(
        "select * from t where name like %(p)s || '%%'",
        &params! { "p" => "ab" },
    )?;
    let err = cursor
        .execute("select * from t where name like 'ab%'", &Params::new())
        .unwrap_err();
    assert_eq!(err.message(), "Invalid format string for query");
    assert_eq!(
        driver.statements().last().map(String::as_str),
        Some("select * from t where name like @p || '%'")
    );
    Ok(())
}

#[test]
fn test03_connection_from_cursor() -> Result<(), Box<dyn std::error::Error>> {
    let driver = FakeDriver::new();
    let conn = connect(&driver, &ConnectOptions::new("mattdb"))?;
    let cursor = conn.cursor()?;
    let same = cursor.connection()?;
    same.close()?;
    assert!(conn.is_closed());
    assert_eq!(
        cursor.rowcount().unwrap_err().message(),
        "Attempted to use a closed cursor"
    );
    Ok(())
}
