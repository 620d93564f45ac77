use chrono::NaiveDate;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use sql_runtime::marshal::{FieldDescriptor, MessageLayout, RowBuffer, SqlType, decode_row, encode_value};
use sql_runtime::prelude::*;
use sql_runtime::test_utils::MockClient;
use sql_runtime::types::ConnectionId;
use tokio::runtime::Runtime;

fn layout() -> (Vec<FieldDescriptor>, usize) {
    let mut fields = vec![
        FieldDescriptor::new(SqlType::Long, 4).named("ID"),
        FieldDescriptor::new(SqlType::Varying, 64).named("NAME"),
        FieldDescriptor::new(SqlType::Double, 8).named("SCORE"),
        FieldDescriptor::new(SqlType::Timestamp, 8).named("SEEN_AT"),
        FieldDescriptor::new(SqlType::Boolean, 1).named("ACTIVE"),
    ];
    let len = MessageLayout::assign(&mut fields);
    (fields, len)
}

fn sample_row(i: i64) -> Vec<Value> {
    let seen = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(12, 30, 0))
        .unwrap_or_default();
    vec![
        Value::Int(i),
        Value::Text(format!("row-{i}")),
        Value::Double(i as f64 * 0.5),
        Value::Timestamp(seen),
        Value::Bool(i % 2 == 0),
    ]
}

fn benchmark_codec(c: &mut Criterion) {
    let (fields, len) = layout();
    let owner = ConnectionId::from_raw(1);
    let mut group = c.benchmark_group("codec");

    for rows in [1usize, 100, 1000] {
        let values: Vec<Vec<Value>> = (0..rows as i64).map(sample_row).collect();
        group.bench_with_input(BenchmarkId::new("encode", rows), &values, |b, values| {
            b.iter(|| {
                for row in values {
                    let mut buffer = RowBuffer::new(len);
                    for (desc, value) in fields.iter().zip(row) {
                        encode_value(desc, &mut buffer, value).expect("encode");
                    }
                }
            });
        });

        let buffers: Vec<RowBuffer> = values
            .iter()
            .map(|row| {
                let mut buffer = RowBuffer::new(len);
                for (desc, value) in fields.iter().zip(row) {
                    encode_value(desc, &mut buffer, value).expect("encode");
                }
                buffer
            })
            .collect();
        group.bench_with_input(BenchmarkId::new("decode", rows), &buffers, |b, buffers| {
            b.iter(|| {
                for buffer in buffers {
                    decode_row(&fields, buffer, owner).expect("decode");
                }
            });
        });
    }
    group.finish();
}

fn benchmark_placeholders(c: &mut Criterion) {
    let sql = "SELECT * FROM ORDERS O -- :not_a_param\n\
               WHERE O.CUSTOMER = :customer AND O.PLACED >= :since \
               AND O.NOTE <> ':literal' AND O.REGION IN (:region, :fallback)";
    c.bench_function("analyze_placeholders", |b| {
        b.iter(|| analyze_placeholders(sql));
    });
}

fn benchmark_statement_execute(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let mock = MockClient::new();
    mock.script_statement(
        "UPDATE T SET NAME = :name WHERE ID = :id",
        MockClient::statement()
            .input(SqlType::Varying, 64)
            .input(SqlType::Int64, 8),
    );
    let (tx, stmt) = rt.block_on(async {
        let conn = Connection::new(mock.library(), ConnectionOptions::new("bench.fdb"));
        conn.connect().await.expect("connect");
        let tx = conn
            .start_transaction(&TransactionOptions::default())
            .await
            .expect("transaction");
        let stmt = tx
            .prepare("UPDATE T SET NAME = :name WHERE ID = :id")
            .await
            .expect("prepare");
        (tx, stmt)
    });

    c.bench_function("statement_execute", |b| {
        b.to_async(&rt).iter(|| async {
            stmt.execute(ParamValues::named([
                ("name", Value::from("bench")),
                ("id", Value::Int(7)),
            ]))
            .await
            .expect("execute");
        });
    });

    rt.block_on(async {
        stmt.dispose().await.expect("dispose");
        tx.rollback().await.expect("rollback");
    });
}

criterion_group!(
    benches,
    benchmark_codec,
    benchmark_placeholders,
    benchmark_statement_execute
);
criterion_main!(benches);
