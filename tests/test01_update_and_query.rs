use chrono::{NaiveDate, NaiveTime};
use sql_transact::prelude::*;

fn runner(db: &MemoryDb) -> TransactionRunner {
    TransactionRunner::new(db.provider())
}

const SCALARS_DDL: &str = "create table scalars (
    i int, l bigint, b tinyint, d double, f real, ok boolean,
    s varchar, dt date, tm time, ts timestamp, amount decimal
)";

const SCALARS_INSERT: &str = "insert into scalars \
    (i, l, b, d, f, ok, s, dt, tm, ts, amount) \
    values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

#[test]
fn insert_then_query_within_one_transaction() {
    let db = MemoryDb::new();

    runner(&db)
        .execute(|handle| {
            let created = handle.update(
                "create table users (id integer, name varchar)",
                vec![],
            )?;
            assert_eq!(created, 0);

            let inserted = handle.update(
                "insert into users (id, name) values (?, ?)",
                vec![InputParameter::integer(1), InputParameter::string("ada")],
            )?;
            assert_eq!(inserted, 1);
            handle.update(
                "insert into users (id, name) values (?, ?)",
                vec![InputParameter::integer(2), InputParameter::string("grace")],
            )?;

            // Rows inserted earlier in the same transaction are visible.
            let names = handle
                .query(
                    "select id, name from users order by id",
                    |row| {
                        Ok((
                            row.as_i64("id")?.unwrap(),
                            row.as_text("name")?.unwrap(),
                        ))
                    },
                    vec![],
                )?
                .collect_rows()?;
            assert_eq!(names, vec![(1, "ada".to_string()), (2, "grace".to_string())]);
            Ok(())
        })
        .unwrap();

    // A later transaction sees the committed rows.
    runner(&db)
        .execute(|handle| {
            let rows = handle
                .query_rows(
                    "select name from users where id = ?",
                    vec![InputParameter::integer(2)],
                )?
                .collect_rows()?;
            assert_eq!(rows.len(), 1);
            // Column lookup is case-insensitive.
            assert_eq!(rows[0].as_text("NAME")?, Some("grace".to_string()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn update_batch_runs_each_row_and_reports_counts() {
    let db = MemoryDb::new();

    runner(&db)
        .execute(|handle| {
            handle.update("create table points (x integer, y integer)", vec![])?;
            let counts = handle.update_batch(
                "insert into points (x, y) values (?, ?)",
                vec![
                    Batch::new(vec![InputParameter::integer(1), InputParameter::integer(10)]),
                    Batch::new(vec![InputParameter::integer(2), InputParameter::integer(20)]),
                    Batch::new(vec![InputParameter::integer(3), InputParameter::integer(30)]),
                ],
            )?;
            assert_eq!(counts, vec![1, 1, 1]);
            Ok(())
        })
        .unwrap();

    let events = db.events();
    assert_eq!(events.iter().filter(|e| *e == "add-batch").count(), 3);
    assert_eq!(events.iter().filter(|e| *e == "execute-batch").count(), 1);

    runner(&db)
        .execute(|handle| {
            let deleted = handle.update(
                "delete from points where x = ?",
                vec![InputParameter::integer(2)],
            )?;
            assert_eq!(deleted, 1);
            let left = handle.query_rows("select x from points", vec![])?.collect_rows()?;
            assert_eq!(left.len(), 2);
            Ok(())
        })
        .unwrap();
}

#[test]
fn preconditions_fail_before_any_driver_call() {
    let db = MemoryDb::new();
    let conn = db.provider().connect().unwrap();
    let mut handle = ConnectionHandle::new(conn).unwrap();
    db.clear_events();

    let err = handle.update("   ", vec![]).unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    let err = handle.update_batch("insert into t values (?)", vec![]).unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    let err = handle
        .update_batch(
            "insert into t values (?)",
            vec![
                Batch::new(vec![InputParameter::integer(1)]),
                Batch::new(vec![]),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    let err = handle
        .update_batch(
            "insert into t values (?)",
            vec![
                Batch::new(vec![InputParameter::integer(1)]),
                Batch::new(vec![InputParameter::integer(2), InputParameter::integer(3)]),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    // None of the rejected calls reached the driver.
    assert!(db.events().is_empty(), "unexpected events: {:?}", db.events());

    handle.close().unwrap();
}

#[test]
fn operations_on_a_closed_handle_are_invalid_usage() {
    let db = MemoryDb::new();
    let conn = db.provider().connect().unwrap();
    let mut handle = ConnectionHandle::new(conn).unwrap();

    handle.close().unwrap();
    assert!(handle.is_closed());
    // Idempotent.
    handle.close().unwrap();

    let err = handle.update("delete from t", vec![]).unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");
    let err = handle.query_rows("select id from t", vec![]).unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");
    let err = handle.commit().unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    // Exactly one rollback / connection-close pair despite two close calls.
    let events = db.events();
    assert_eq!(events.iter().filter(|e| *e == "rollback").count(), 1);
    assert_eq!(events.iter().filter(|e| *e == "connection-closed").count(), 1);
}

#[test]
fn every_scalar_type_round_trips() {
    let db = MemoryDb::new();
    let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
    let time = NaiveTime::from_hms_opt(8, 30, 15).unwrap();
    let ts = date.and_hms_opt(8, 30, 15).unwrap();

    runner(&db)
        .execute(|handle| {
            handle.update(SCALARS_DDL, vec![])?;
            handle.update(
                SCALARS_INSERT,
                vec![
                    InputParameter::integer(41),
                    InputParameter::long(1_234_567_890_123),
                    InputParameter::byte(7),
                    InputParameter::double(3.25),
                    InputParameter::float(2.5),
                    InputParameter::boolean(true),
                    InputParameter::string("hello"),
                    InputParameter::date(date),
                    InputParameter::time(time),
                    InputParameter::timestamp(ts),
                    InputParameter::decimal("12.340"),
                ],
            )?;

            let rows = handle.query_rows("select * from scalars", vec![])?.collect_rows()?;
            assert_eq!(rows.len(), 1);
            let row = &rows[0];
            assert_eq!(row.as_i32("i")?, Some(41));
            assert_eq!(row.as_i64("l")?, Some(1_234_567_890_123));
            assert_eq!(row.get("b")?.as_i8()?, Some(7));
            assert_eq!(row.as_f64("d")?, Some(3.25));
            assert_eq!(row.get("f")?.as_f32()?, Some(2.5));
            assert_eq!(row.as_bool("ok")?, Some(true));
            assert_eq!(row.as_text("s")?, Some("hello".to_string()));
            assert_eq!(row.as_date("dt")?, Some(date));
            assert_eq!(row.as_time("tm")?, Some(time));
            assert_eq!(row.as_timestamp("ts")?, Some(ts));
            assert_eq!(row.as_decimal("amount")?, Some("12.340".to_string()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn typed_nulls_round_trip_as_absent() {
    let db = MemoryDb::new();

    runner(&db)
        .execute(|handle| {
            handle.update(SCALARS_DDL, vec![])?;
            handle.update(
                SCALARS_INSERT,
                vec![
                    InputParameter::null(SqlType::Integer),
                    InputParameter::null(SqlType::BigInt),
                    InputParameter::null(SqlType::TinyInt),
                    InputParameter::null(SqlType::Double),
                    InputParameter::null(SqlType::Real),
                    InputParameter::null(SqlType::Boolean),
                    InputParameter::null(SqlType::Varchar),
                    InputParameter::null(SqlType::Date),
                    InputParameter::null(SqlType::Time),
                    InputParameter::null(SqlType::Timestamp),
                    InputParameter::null(SqlType::Decimal),
                ],
            )?;

            let rows = handle.query_rows("select * from scalars", vec![])?.collect_rows()?;
            let row = &rows[0];
            for label in ["i", "l", "b", "d", "f", "ok", "s", "dt", "tm", "ts", "amount"] {
                assert!(row.get(label)?.is_null(), "column {label} should be NULL");
            }
            assert_eq!(row.as_i32("i")?, None);
            assert_eq!(row.as_i64("l")?, None);
            assert_eq!(row.get("b")?.as_i8()?, None);
            assert_eq!(row.as_f64("d")?, None);
            assert_eq!(row.get("f")?.as_f32()?, None);
            assert_eq!(row.as_bool("ok")?, None);
            assert_eq!(row.as_text("s")?, None);
            assert_eq!(row.as_date("dt")?, None);
            assert_eq!(row.as_time("tm")?, None);
            assert_eq!(row.as_timestamp("ts")?, None);
            assert_eq!(row.as_decimal("amount")?, None);
            Ok(())
        })
        .unwrap();
}

#[test]
fn batch_inserted_rows_read_back_in_order() {
    let db = MemoryDb::new();

    runner(&db)
        .execute(|handle| {
            handle.update("create table items (id integer, label varchar)", vec![])?;
            let counts = handle.update_batch(
                "insert into items (id, label) values (?, ?)",
                vec![
                    Batch::new(vec![InputParameter::integer(12), InputParameter::string("a12")]),
                    Batch::new(vec![InputParameter::integer(10), InputParameter::string("a10")]),
                    Batch::new(vec![InputParameter::integer(11), InputParameter::string("a11")]),
                ],
            )?;
            assert_eq!(counts, vec![1, 1, 1]);

            let rows = handle
                .query(
                    "select id, label from items order by id",
                    |row| {
                        Ok((
                            row.as_i64("id")?.unwrap(),
                            row.as_text("label")?.unwrap(),
                        ))
                    },
                    vec![],
                )?
                .collect_rows()?;
            assert_eq!(
                rows,
                vec![
                    (10, "a10".to_string()),
                    (11, "a11".to_string()),
                    (12, "a12".to_string()),
                ]
            );
            Ok(())
        })
        .unwrap();
}

#[test]
fn strict_type_checking_rejects_mismatched_inserts() {
    let db = MemoryDb::with_config(MemoryConfig { strict_types: true });

    let result = runner(&db).execute(|handle| {
        handle.update("create table strict_t (id integer)", vec![])?;
        handle.update(
            "insert into strict_t (id) values (?)",
            vec![InputParameter::string("not a number")],
        )?;
        Ok(())
    });
    let err = result.unwrap_err();
    assert!(matches!(err, SqlTransactError::Driver(_)), "{err}");
}
