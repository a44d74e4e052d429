//! End-to-end check of a JTA-managed datasource
//!
//! Configures `xadb` from TOML (MaxActive 25, MaxIdle 25, InitialSize 3),
//! resolves it by name and runs every closing pattern five times over. The
//! pool must end each round with nothing active and a full idle set.
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test xa_datasource_tests
//! ```

use std::sync::Arc;
use xapool::{
    lookup_datasource, register_datasource, AmbientTransaction, DataSourcesFile,
    LocalTransactionManager, ManagedConnection, ManagedDataSource, MemoryConnectionFactory,
    TransactionOutcome, MEMORY_PRODUCT_NAME,
};

const CONFIG: &str = r#"
[[datasource]]
name = "xadb"
url = "mem:tomcat-xa"
user = "sa"
password = ""
JtaManaged = true
MaxIdle = 25
MaxActive = 25
InitialSize = 3
"#;

const POOL_SIZE: usize = 25;
const ITERATIONS: usize = 5;

fn setup() -> (Arc<ManagedDataSource>, Arc<LocalTransactionManager>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let file = DataSourcesFile::from_toml_str(CONFIG).unwrap();
    let config = file.get("xadb").unwrap().clone();
    let factory = MemoryConnectionFactory::new(config.url.clone(), config.user.clone());
    let txm = Arc::new(LocalTransactionManager::new());

    let ds = Arc::new(
        ManagedDataSource::builder(config)
            .factory(Arc::new(factory))
            .transactions(txm.clone())
            .build()
            .unwrap(),
    );
    register_datasource(&ds).unwrap();
    (lookup_datasource("xadb").unwrap(), txm)
}

fn assert_settled(ds: &ManagedDataSource) {
    assert_eq!(ds.active(), 0);
    assert_eq!(ds.idle(), POOL_SIZE);
}

fn touch(conn: &ManagedConnection) {
    let metadata = conn.metadata().unwrap();
    assert_eq!(metadata.product_name, MEMORY_PRODUCT_NAME);
}

#[test]
fn check() {
    let (ds, txm) = setup();
    assert!(ds.is_jta_managed());
    assert_eq!(ds.idle(), 3);

    // Single connection outside any transaction
    {
        let conn = ds.get_connection().unwrap();
        touch(&conn);
        conn.close().unwrap();
    }
    assert_eq!(ds.active(), 0);
    assert_eq!(ds.idle(), 3);

    // No transaction: fill the pool, then drain it
    for _ in 0..ITERATIONS {
        let conns: Vec<_> = (0..POOL_SIZE)
            .map(|_| {
                let conn = ds.get_connection().unwrap();
                touch(&conn);
                conn
            })
            .collect();
        assert_eq!(ds.active(), POOL_SIZE);
        assert_eq!(ds.idle(), 0);
        for conn in &conns {
            conn.close().unwrap();
        }
        assert_settled(&ds);
    }

    // In transaction, closing inside it
    for _ in 0..ITERATIONS {
        for _ in 0..POOL_SIZE {
            txm.in_transaction(|_| {
                let first = ds.get_connection()?;
                touch(&first);
                let id = first.physical_id()?;
                for _ in 1..POOL_SIZE {
                    let conn = ds.get_connection()?;
                    touch(&conn);
                    assert_eq!(conn.physical_id()?, id);
                }
                first.close()
            })
            .unwrap();
        }
        assert_settled(&ds);
    }

    // In transaction, closing after it
    for _ in 0..ITERATIONS {
        for _ in 0..POOL_SIZE {
            let kept = txm
                .in_transaction(|_| {
                    let first = ds.get_connection()?;
                    touch(&first);
                    let id = first.physical_id()?;
                    for _ in 1..POOL_SIZE {
                        let conn = ds.get_connection()?;
                        assert_eq!(conn.physical_id()?, id);
                    }
                    Ok(first)
                })
                .unwrap();
            assert!(kept.is_closed());
            kept.close().unwrap();
            assert!(kept.is_closed());
        }
        assert_settled(&ds);
    }

    // In transaction, closing from a completion hook
    for _ in 0..ITERATIONS {
        for _ in 0..POOL_SIZE {
            txm.in_transaction(|txn| {
                let conn = ds.get_connection()?;
                touch(&conn);
                txm.register_completion(txn, Box::new(move |_: TransactionOutcome| conn.close()))
            })
            .unwrap();
        }
        assert_settled(&ds);
    }

    let stats = ds.stats();
    assert_eq!(stats.pool.total_borrowed, stats.pool.total_returned);
    assert_eq!(stats.pool.total_destroyed, 0);
    let enlistment = stats.enlistment.unwrap();
    assert_eq!(enlistment.enlisted, (3 * ITERATIONS * POOL_SIZE) as u64);
    assert_eq!(enlistment.completed, enlistment.enlisted);
    assert_eq!(txm.metrics().total_committed, (3 * ITERATIONS * POOL_SIZE) as u64);
}
