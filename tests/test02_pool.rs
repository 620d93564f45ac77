use std::time::Duration;

use sql_runtime::prelude::*;
use sql_runtime::test_utils::MockClient;

async fn pool_of_one(mock: &MockClient) -> Result<ConnectionPool, SqlRuntimeError> {
    let pool = ConnectionPool::new(mock.library());
    pool.create(
        ConnectionOptions::new("pool.fdb"),
        PoolOptions::builder().max_size(1).finish(),
    )
    .await?;
    Ok(pool)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_get_waits_for_disconnect() -> Result<(), SqlRuntimeError> {
    let mock = MockClient::new();
    let pool = std::sync::Arc::new(pool_of_one(&mock).await?);

    let first = pool.get().await?;
    assert!(first.connected());

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.get().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished(), "second get must block while the only connection is out");

    first.disconnect()?;
    let second = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("second get should complete after disconnect")
        .expect("task panicked")?;
    assert!(second.connected());
    assert!(!first.connected() || first.ptr_eq(&second));

    second.disconnect()?;
    assert!(!second.connected());
    // Second disconnect is a no-op.
    second.disconnect()?;
    assert_eq!(pool.status()?.available, 1);

    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn session_trait_covers_direct_and_pooled() -> Result<(), SqlRuntimeError> {
    async fn names(session: &dyn Session) -> Result<Vec<String>, SqlRuntimeError> {
        let rows = session
            .query("SELECT NAME FROM T", ParamValues::none())
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get("NAME").and_then(Value::as_text).map(str::to_owned))
            .collect())
    }

    let mock = MockClient::new();
    mock.script_query(
        "SELECT NAME FROM T",
        MockClient::varchar_columns(&["NAME"], 8),
        vec![vec![Value::from("a")], vec![Value::from("b")]],
    );

    let direct = Connection::new(mock.library(), ConnectionOptions::new("pool.fdb"));
    direct.connect().await?;
    assert_eq!(names(&direct).await?, ["a", "b"]);
    Session::disconnect(&direct).await?;
    assert!(!Session::connected(&direct));

    let pool = pool_of_one(&mock).await?;
    let pooled = pool.get().await?;
    assert_eq!(names(&pooled).await?, ["a", "b"]);
    Session::disconnect(&pooled).await?;
    assert!(!Session::connected(&pooled));
    assert!(matches!(
        names(&pooled).await,
        Err(SqlRuntimeError::NotReady(_))
    ));
    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn returning_with_open_transaction_is_refused() -> Result<(), SqlRuntimeError> {
    let mock = MockClient::new();
    let pool = pool_of_one(&mock).await?;
    let conn = pool.get().await?;
    let tx = conn.start_transaction(&TransactionOptions::default()).await?;
    assert!(matches!(
        conn.disconnect(),
        Err(SqlRuntimeError::OpenChildren { .. })
    ));
    assert!(conn.connected());
    tx.commit().await?;
    conn.disconnect()?;
    pool.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn native_failures_do_not_leak_pool_slots() -> Result<(), SqlRuntimeError> {
    let mock = MockClient::new();
    let pool = pool_of_one(&mock).await?;
    let conn = pool.get().await?;
    let first_id = conn.id();
    conn.disconnect()?;

    mock.fail_next("start_transaction");
    let conn = pool.get().await?;
    assert_eq!(conn.id(), first_id);
    assert!(conn.start_transaction(&TransactionOptions::default()).await.is_err());
    conn.disconnect()?;

    let status = pool.status()?;
    assert_eq!(status.max_size, 1);
    assert_eq!(status.borrowed, 0);
    pool.destroy().await?;
    assert!(!pool.is_created());
    Ok(())
}
