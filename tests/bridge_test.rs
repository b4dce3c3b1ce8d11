mod common;

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::{MockServer, ids, make_pool, test_config};
use dbpool::bridge::SyncBridge;
use dbpool::{DbError, ExecOutcome, Value};

#[test]
fn bridge_mirrors_the_session_surface() {
    let server = MockServer::new();
    server.seed(2);
    let bridge = SyncBridge::for_pool(make_pool(&server, test_config())).unwrap();

    assert!(bridge.ping());

    let outcome = bridge
        .execute_insert("INSERT INTO t(name) VALUES (?)", &[Value::from("carol")])
        .unwrap();
    assert_eq!(outcome, ExecOutcome::LastInsertId(3));

    let rows = bridge.fetch_all("SELECT * FROM t", &[]).unwrap();
    assert_eq!(ids(&rows), vec![1, 2, 3]);

    let some = bridge.fetch_many("SELECT * FROM t", &[], 2).unwrap();
    assert_eq!(ids(&some), vec![1, 2]);

    let one = bridge.fetch_one("SELECT * FROM t", &[]).unwrap();
    assert_eq!(one.unwrap().get("id"), Some(&Value::I64(1)));

    let outcome = bridge.execute("UPDATE t SET name = ?", &[]).unwrap();
    assert_eq!(outcome, ExecOutcome::AffectedRows(3));

    bridge.close();
}

#[test]
fn bridge_accepts_a_caller_owned_runtime() {
    let server = MockServer::new();
    server.seed(1);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .unwrap();
    let bridge = SyncBridge::new(runtime, make_pool(&server, test_config()));

    let rows = bridge.fetch_all("SELECT * FROM t", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    bridge.close();
}

#[test]
fn bounded_call_times_out_but_still_releases_the_connection() {
    common::init_tracing();
    let server = MockServer::new();
    server.seed(1);
    let pool = make_pool(&server, test_config());
    let bridge = SyncBridge::for_pool(pool.clone())
        .unwrap()
        .wait(Some(Duration::from_millis(50)));

    // The mock stalls 300ms on a SLOW query.
    match bridge.fetch_all("SLOW SELECT * FROM t", &[]) {
        Err(DbError::Timeout(_)) => {}
        other => panic!("expected Timeout, got {other:?}"),
    }

    // The abandoned operation finishes on the bridge runtime and hands its
    // connection back.
    thread::sleep(Duration::from_millis(400));
    let rows = bridge.fetch_all("SELECT * FROM t", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(server.connects.load(Ordering::SeqCst), 1);

    bridge.close();
}

#[test]
fn bridge_transactions_commit_and_roll_back() {
    let server = MockServer::new();
    server.seed(1);
    let bridge = SyncBridge::for_pool(make_pool(&server, test_config())).unwrap();

    let mut tx = bridge.begin().unwrap();
    tx.execute_insert("INSERT INTO t(name) VALUES (?)", &[Value::from("x")])
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(server.rows(), vec![1, 2]);

    let before = server.rows();
    let mut tx = bridge.begin().unwrap();
    tx.execute_insert("INSERT INTO t(name) VALUES (?)", &[Value::from("y")])
        .unwrap();
    tx.rollback().unwrap();
    assert_eq!(server.rows(), before);

    bridge.close();
}

#[test]
fn dropped_bridge_transaction_rolls_back() {
    let server = MockServer::new();
    server.seed(1);
    let bridge = SyncBridge::for_pool(make_pool(&server, test_config())).unwrap();
    let before = server.rows();

    {
        let mut tx = bridge.begin().unwrap();
        tx.execute_insert("INSERT INTO t(name) VALUES (?)", &[Value::from("z")])
            .unwrap();
        // Dropped without commit.
    }
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.rows(), before);

    bridge.close();
}

#[test]
fn ping_over_a_dead_server_reports_false() {
    let server = MockServer::new();
    server.refuse_connects(true);
    let bridge = SyncBridge::for_pool(make_pool(&server, test_config())).unwrap();
    assert!(!bridge.ping());
    bridge.close();
}
