use sql_transact::prelude::*;
use tokio::runtime::Runtime;

fn runner(db: &MemoryDb) -> TransactionRunner {
    TransactionRunner::new(db.provider())
}

#[test]
fn async_transaction_commits_on_success() {
    let rt = Runtime::new().unwrap();
    let db = MemoryDb::new();

    rt.block_on(async {
        runner(&db)
            .execute_async(|handle| {
                handle.update("create table jobs (id integer, state varchar)", vec![])?;
                handle.update(
                    "insert into jobs (id, state) values (?, ?)",
                    vec![InputParameter::integer(1), InputParameter::string("queued")],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    });

    // Verify from a plain synchronous transaction.
    let states = runner(&db)
        .execute_with_result(|handle| {
            handle
                .query("select state from jobs", |row| Ok(row.as_text("state")?.unwrap()), vec![])?
                .collect_rows()
        })
        .unwrap();
    assert_eq!(states, vec!["queued".to_string()]);
}

#[test]
fn async_transaction_returns_the_body_value() {
    let rt = Runtime::new().unwrap();
    let db = MemoryDb::new();

    let count = rt.block_on(async {
        runner(&db)
            .execute_with_result_async(|handle| {
                handle.update("create table seen (id integer)", vec![])?;
                let counts = handle.update_batch(
                    "insert into seen (id) values (?)",
                    vec![
                        Batch::new(vec![InputParameter::integer(1)]),
                        Batch::new(vec![InputParameter::integer(2)]),
                    ],
                )?;
                Ok(counts.iter().sum::<u64>())
            })
            .await
            .unwrap()
    });
    assert_eq!(count, 2);
}

#[test]
fn async_transaction_rolls_back_on_body_error() {
    let rt = Runtime::new().unwrap();
    let db = MemoryDb::new();

    // The table must pre-exist: a rollback undoes the DDL too.
    runner(&db)
        .execute(|handle| handle.update("create table audit (id integer)", vec![]).map(|_| ()))
        .unwrap();

    let result = rt.block_on(async {
        runner(&db)
            .execute_async(|handle| {
                handle.update(
                    "insert into audit (id) values (?)",
                    vec![InputParameter::integer(7)],
                )?;
                Err(SqlTransactError::Other("validation failed".into()))
            })
            .await
    });
    let err = result.unwrap_err();
    assert!(matches!(err, SqlTransactError::Other(_)), "{err}");

    let events = db.events();
    assert!(events.iter().any(|e| e == "rollback"), "{events:?}");

    let rows = runner(&db)
        .execute_with_result(|handle| {
            handle.query_rows("select id from audit", vec![])?.collect_rows()
        })
        .unwrap();
    assert!(rows.is_empty());
}

#[test]
fn cloned_runner_moves_into_a_spawned_task() {
    let rt = Runtime::new().unwrap();
    let db = MemoryDb::new();

    let shared = runner(&db);
    rt.block_on(async {
        shared
            .execute_async(|handle| {
                handle.update("create table hits (id integer)", vec![]).map(|_| ())
            })
            .await
            .unwrap();

        let task_runner = shared.clone();
        tokio::spawn(async move {
            task_runner
                .execute_async(|handle| {
                    handle.update(
                        "insert into hits (id) values (?)",
                        vec![InputParameter::integer(1)],
                    )?;
                    Ok(())
                })
                .await
        })
        .await
        .unwrap()
        .unwrap();
    });

    let rows = runner(&db)
        .execute_with_result(|handle| {
            handle.query_rows("select id from hits", vec![])?.collect_rows()
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
}
