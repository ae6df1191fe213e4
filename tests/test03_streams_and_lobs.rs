use std::io::Read;

use sql_transact::prelude::*;

/// Reader that journals its own drop, so tests can pin down exactly when the
/// binding layer releases a bound input stream.
struct JournalingReader {
    inner: std::io::Cursor<Vec<u8>>,
    db: MemoryDb,
}

impl JournalingReader {
    fn new(db: MemoryDb, bytes: Vec<u8>) -> Self {
        Self {
            inner: std::io::Cursor::new(bytes),
            db,
        }
    }
}

impl Read for JournalingReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Drop for JournalingReader {
    fn drop(&mut self) {
        self.db.record_event("param-stream-closed");
    }
}

fn index_of(events: &[String], needle: &str) -> usize {
    events
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("missing event `{needle}` in {events:?}"))
}

fn open_handle(db: &MemoryDb) -> ConnectionHandle {
    ConnectionHandle::new(db.provider().connect().unwrap()).unwrap()
}

#[test]
fn bound_stream_outlives_execute_and_dies_with_the_statement_scope() {
    let db = MemoryDb::new();
    let mut handle = open_handle(&db);
    handle
        .update("create table blobs (id integer, payload blob)", vec![])
        .unwrap();
    db.clear_events();

    let stream_db = db.clone();
    handle
        .update(
            "insert into blobs (id, payload) values (?, ?)",
            vec![
                InputParameter::integer(1),
                InputParameter::blob(move || {
                    Ok(Some(
                        Box::new(JournalingReader::new(stream_db, b"hello lob".to_vec()))
                            as Box<dyn Read>,
                    ))
                }),
            ],
        )
        .unwrap();

    let events = db.events();
    let bound = index_of(&events, "bind-stream(2)");
    let executed = index_of(&events, "execute");
    let released = index_of(&events, "param-stream-closed");
    let closed = index_of(&events, "statement-closed");
    assert!(bound < executed, "{events:?}");
    assert!(executed < released, "stream must stay alive through execute: {events:?}");
    assert!(released < closed, "{events:?}");

    handle.commit().unwrap();
    handle.close().unwrap();
}

#[test]
fn absent_stream_binds_sql_null() {
    let db = MemoryDb::new();
    let mut handle = open_handle(&db);
    handle
        .update("create table blobs (id integer, payload blob)", vec![])
        .unwrap();
    db.clear_events();

    handle
        .update(
            "insert into blobs (id, payload) values (?, ?)",
            vec![InputParameter::integer(1), InputParameter::blob(|| Ok(None))],
        )
        .unwrap();

    let events = db.events();
    assert!(events.contains(&"bind-null(2)".to_string()), "{events:?}");
    assert!(!events.contains(&"bind-stream(2)".to_string()), "{events:?}");

    // The NULL round-trips as an absent large object.
    let mut stream = handle
        .query_rows(
            "select payload from blobs where id = ?",
            vec![InputParameter::integer(1)],
        )
        .unwrap();
    let row = stream.next_row().unwrap().unwrap();
    let read = row.read_lob("payload", |r| {
        let mut v = Vec::new();
        r.read_to_end(&mut v)?;
        Ok(v)
    });
    assert_eq!(read.unwrap(), None);
    stream.close().unwrap();
    handle.close().unwrap();
}

#[test]
fn lob_column_reads_once_then_rejects_a_second_read() {
    let db = MemoryDb::new();
    let mut handle = open_handle(&db);
    handle
        .update("create table blobs (id integer, payload blob)", vec![])
        .unwrap();
    let content_db = db.clone();
    handle
        .update(
            "insert into blobs (id, payload) values (?, ?)",
            vec![
                InputParameter::integer(1),
                InputParameter::blob(move || {
                    Ok(Some(
                        Box::new(JournalingReader::new(content_db, b"payload bytes".to_vec()))
                            as Box<dyn Read>,
                    ))
                }),
            ],
        )
        .unwrap();
    db.clear_events();

    let mut stream = handle
        .query_rows(
            "select payload from blobs where id = ?",
            vec![InputParameter::integer(1)],
        )
        .unwrap();
    let row = stream.next_row().unwrap().unwrap();

    let bytes = row
        .read_lob("payload", |r| {
            let mut v = Vec::new();
            r.read_to_end(&mut v)?;
            Ok(v)
        })
        .unwrap();
    assert_eq!(bytes, Some(b"payload bytes".to_vec()));

    let events = db.events();
    assert!(index_of(&events, "lob-opened") < index_of(&events, "lob-freed"), "{events:?}");

    // The handle is one-shot.
    let err = row
        .read_lob("payload", |r| {
            let mut v = Vec::new();
            r.read_to_end(&mut v)?;
            Ok(v)
        })
        .unwrap_err();
    assert!(matches!(err, SqlTransactError::InvalidUsage(_)), "{err}");

    stream.close().unwrap();
    handle.close().unwrap();
}

#[test]
fn unread_lob_handles_are_freed_when_the_connection_closes() {
    let db = MemoryDb::new();
    let mut handle = open_handle(&db);
    handle
        .update("create table blobs (id integer, payload blob)", vec![])
        .unwrap();
    let content_db = db.clone();
    handle
        .update(
            "insert into blobs (id, payload) values (?, ?)",
            vec![
                InputParameter::integer(1),
                InputParameter::blob(move || {
                    Ok(Some(
                        Box::new(JournalingReader::new(content_db, b"never read".to_vec()))
                            as Box<dyn Read>,
                    ))
                }),
            ],
        )
        .unwrap();
    db.clear_events();

    let mut stream = handle
        .query_rows(
            "select payload from blobs where id = ?",
            vec![InputParameter::integer(1)],
        )
        .unwrap();
    let row = stream.next_row().unwrap().unwrap();
    stream.close().unwrap();

    // The handle is still live after the stream closes; only the connection
    // close releases it.
    assert!(!db.events().contains(&"lob-freed".to_string()));
    handle.close().unwrap();

    let events = db.events();
    let rollback = index_of(&events, "rollback");
    let freed = index_of(&events, "lob-freed");
    let closed = index_of(&events, "connection-closed");
    assert!(rollback < freed && freed < closed, "{events:?}");
    assert!(row.get("payload").unwrap().as_lob().unwrap().is_freed());
}

#[test]
fn exhausting_a_stream_closes_cursor_before_statement() {
    let db = MemoryDb::new();
    let mut handle = open_handle(&db);
    handle
        .update("create table nums (n integer)", vec![])
        .unwrap();
    for n in [3, 1, 2] {
        handle
            .update(
                "insert into nums (n) values (?)",
                vec![InputParameter::integer(n)],
            )
            .unwrap();
    }
    db.clear_events();

    let mut stream = handle
        .query(
            "select n from nums order by n desc",
            |row| Ok(row.as_i64("n")?.unwrap()),
            vec![],
        )
        .unwrap();

    let mut seen = Vec::new();
    while let Some(n) = stream.next_row().unwrap() {
        seen.push(n);
    }
    assert_eq!(seen, vec![3, 2, 1]);
    // Exhaustion closes the stream without an explicit close call.
    assert!(stream.is_closed());

    let events = db.events();
    assert!(
        index_of(&events, "cursor-closed") < index_of(&events, "statement-closed"),
        "{events:?}"
    );

    handle.close().unwrap();
}
