use std::collections::HashMap;

use sql_runtime::marshal::SqlType;
use sql_runtime::prelude::*;
use sql_runtime::test_utils::MockClient;

async fn transaction(mock: &MockClient) -> Result<Transaction, SqlRuntimeError> {
    let conn = Connection::new(mock.library(), ConnectionOptions::new("placeholders.fdb"));
    conn.connect().await?;
    conn.start_transaction(&TransactionOptions::default()).await
}

#[tokio::test]
async fn prepared_text_keeps_every_column_offset() -> Result<(), SqlRuntimeError> {
    let sql = "SELECT * FROM T WHERE X = :id -- :ignored\n  AND NAME = ':literal'";
    let mock = MockClient::new();
    let tx = transaction(&mock).await?;
    let stmt = tx.prepare(sql).await?;

    assert_eq!(stmt.param_names(), ["id"]);
    let prepared = mock.prepared_sql().pop().expect("prepared text");
    assert_eq!(
        prepared,
        "SELECT * FROM T WHERE X = ?   -- :ignored\n  AND NAME = ':literal'"
    );
    assert_eq!(prepared.len(), sql.len());
    assert_eq!(prepared.find("AND"), sql.find("AND"));

    stmt.dispose().await?;
    tx.rollback().await?;
    Ok(())
}

#[tokio::test]
async fn repeated_name_binds_both_positions() -> Result<(), SqlRuntimeError> {
    let sql = "SELECT ID FROM T WHERE LO <= :v AND HI >= :v AND KIND = :kind";
    let mock = MockClient::new();
    mock.script_statement(
        sql,
        MockClient::statement()
            .input(SqlType::Int64, 8)
            .input(SqlType::Int64, 8)
            .input(SqlType::Varying, 16),
    );
    let tx = transaction(&mock).await?;

    let params: HashMap<String, Value> = [
        ("v".to_owned(), Value::Int(12)),
        ("kind".to_owned(), Value::from("range")),
        ("unused".to_owned(), Value::Bool(true)),
    ]
    .into_iter()
    .collect();
    tx.execute(sql, params).await?;
    tx.commit().await?;

    let (_, values) = mock.executed().pop().expect("one execution");
    assert_eq!(
        values,
        [Value::Int(12), Value::Int(12), Value::Text("range".into())]
    );
    Ok(())
}

#[tokio::test]
async fn missing_value_names_the_parameter_and_sql() -> Result<(), SqlRuntimeError> {
    let sql = "UPDATE T SET A = :a WHERE B = :b";
    let mock = MockClient::new();
    mock.script_statement(
        sql,
        MockClient::statement()
            .input(SqlType::Int64, 8)
            .input(SqlType::Int64, 8),
    );
    let tx = transaction(&mock).await?;
    let stmt = tx.prepare(sql).await?;

    match stmt.execute(ParamValues::named([("a", 1i64)])).await {
        Err(SqlRuntimeError::MissingParameter { name, sql }) => {
            assert_eq!(name, "b");
            assert_eq!(sql, "UPDATE T SET A = ?  WHERE B = ? ");
        }
        other => panic!("expected missing parameter, got {other:?}"),
    }
    assert_eq!(mock.calls_named("execute"), 0);
    assert_eq!(stmt.state(), LifecycleState::Active);

    stmt.execute(ParamValues::named([("a", 1i64), ("b", 2i64)]))
        .await?;
    stmt.dispose().await?;
    tx.commit().await?;
    Ok(())
}

#[tokio::test]
async fn positional_values_skip_name_resolution() -> Result<(), SqlRuntimeError> {
    let sql = "INSERT INTO T (A, B) VALUES (?, ?)";
    let mock = MockClient::new();
    mock.script_statement(
        sql,
        MockClient::statement()
            .input(SqlType::Int64, 8)
            .input(SqlType::Double, 8),
    );
    let tx = transaction(&mock).await?;
    let stmt = tx.prepare(sql).await?;
    assert!(stmt.param_names().is_empty());

    stmt.execute(vec![Value::Int(1), Value::Int(2)]).await?;
    assert!(matches!(
        stmt.execute(vec![Value::Int(1)]).await,
        Err(SqlRuntimeError::ArityMismatch { .. })
    ));

    let (_, values) = mock.executed().pop().expect("one execution");
    // Integers are accepted into double columns.
    assert_eq!(values, [Value::Int(1), Value::Double(2.0)]);
    stmt.dispose().await?;
    tx.commit().await?;
    Ok(())
}

#[tokio::test]
async fn custom_analyzer_applies_to_every_prepare() -> Result<(), SqlRuntimeError> {
    let analyzer = PlaceholderAnalyzer::new(
        &[regex::Regex::new(r"\[[^\]]*\]").expect("pattern")],
        regex::Regex::new(r"@(\w+)").expect("pattern"),
    )?;
    let mock = MockClient::new();
    let conn = Connection::with_analyzer(
        mock.library(),
        ConnectionOptions::new("placeholders.fdb"),
        analyzer,
    );
    conn.connect().await?;
    let tx = conn.start_transaction(&TransactionOptions::default()).await?;
    let stmt = tx.prepare("SELECT [@col] FROM T WHERE A = @a").await?;

    assert_eq!(stmt.param_names(), ["a"]);
    assert_eq!(stmt.sql(), "SELECT [@col] FROM T WHERE A = ? ");
    stmt.dispose().await?;
    tx.commit().await?;
    conn.disconnect().await?;
    Ok(())
}
