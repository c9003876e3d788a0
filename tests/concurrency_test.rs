//! Two-phase locking and transaction-worker coverage (`spec.md` §8
//! properties 9/10, scenario F): disjoint-key transactions all commit,
//! and contending transactions on the same key serialize to at most
//! one commit per race, with the loser retried to eventual success.

use std::sync::Arc;

use lstore::{Database, EngineConfig, Operation, Query, Transaction, TransactionWorker};

fn small_db(dir: &std::path::Path) -> Database {
    Database::with_config(dir, EngineConfig::small()).unwrap()
}

#[test]
fn disjoint_key_transactions_all_commit() {
    let dir = tempfile::tempdir().unwrap();
    let db = small_db(dir.path());
    let table = db.create_table("accounts", 2, 0).unwrap();
    Query::new(&table).insert(&[1, 100]).unwrap();
    Query::new(&table).insert(&[2, 100]).unwrap();

    let lock_manager = db.lock_manager();
    let mut worker = TransactionWorker::new(Arc::clone(&lock_manager));
    worker.add_transaction(vec![Operation::Update {
        table: table.clone(),
        key: 1,
        values: vec![None, Some(200)],
    }]);
    worker.add_transaction(vec![Operation::Update {
        table: table.clone(),
        key: 2,
        values: vec![None, Some(300)],
    }]);
    worker.run();
    let results = worker.join();

    assert!(results.iter().all(|(committed, _)| *committed));
    let row1 = Query::new(&table).select(1, 0, &[true, true]).unwrap();
    let row2 = Query::new(&table).select(2, 0, &[true, true]).unwrap();
    assert_eq!(row1, vec![vec![Some(1), Some(200)]]);
    assert_eq!(row2, vec![vec![Some(2), Some(300)]]);
}

#[test]
fn concurrent_updates_to_the_same_key_serialize_and_both_eventually_commit() {
    // Scenario F: two transactions each update key 3006 with disjoint
    // column sets; at most one commits per race, both eventually commit
    // after retries, and the final row reflects the last commit.
    let dir = tempfile::tempdir().unwrap();
    let db = small_db(dir.path());
    let table = db.create_table("accounts", 3, 0).unwrap();
    Query::new(&table).insert(&[3006, 0, 0]).unwrap();

    let lock_manager = db.lock_manager();
    let mut handles = Vec::new();
    for col_value in [10i64, 20i64] {
        let table = table.clone();
        let lock_manager = Arc::clone(&lock_manager);
        handles.push(std::thread::spawn(move || {
            let ops = vec![Operation::Update {
                table,
                key: 3006,
                values: vec![None, Some(col_value), None],
            }];
            let mut worker = TransactionWorker::new(lock_manager).with_max_attempts(100);
            worker.add_transaction(ops);
            worker.run();
            worker.join()
        }));
    }

    let mut all_committed = true;
    for h in handles {
        let results = h.join().unwrap();
        all_committed &= results.iter().all(|(committed, _)| *committed);
    }
    assert!(all_committed, "both transactions must eventually commit");

    let row = Query::new(&table).select(3006, 0, &[true, true, true]).unwrap();
    let col1 = row[0][1].unwrap();
    assert!(col1 == 10 || col1 == 20, "final value must be one of the two updates");
}

#[test]
fn transaction_rolls_back_compensating_delete_on_duplicate_key_abort() {
    let dir = tempfile::tempdir().unwrap();
    let db = small_db(dir.path());
    let table = db.create_table("accounts", 2, 0).unwrap();
    Query::new(&table).insert(&[1, 1]).unwrap();

    let lock_manager = db.lock_manager();
    let ops = vec![
        Operation::Insert { table: table.clone(), columns: vec![2, 2] },
        // duplicate of the pre-existing key; this aborts the whole txn
        Operation::Insert { table: table.clone(), columns: vec![1, 99] },
    ];
    let txn = Transaction::new(lock_manager, ops);
    let (committed, _tag) = txn.run();
    assert!(!committed);

    // The first insert's compensating delete should have fired: key 2
    // is still indexed (rollback is a logical delete, not a physical
    // one — `spec.md` §4.6/§9) but its latest version is now a deletion
    // marker, so every projected column reads back `None`.
    let rolled_back = Query::new(&table).select(2, 0, &[true, true]).unwrap();
    assert_eq!(rolled_back, vec![vec![None, None]]);
    // The pre-existing row is untouched.
    let row = Query::new(&table).select(1, 0, &[true, true]).unwrap();
    assert_eq!(row, vec![vec![Some(1), Some(1)]]);
}
