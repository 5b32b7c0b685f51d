use keel_orm::{Database, Model, col};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Model, Debug, Clone, PartialEq)]
struct Account {
    #[orm(primary_key, auto_increment)]
    id: i64,
    #[orm(unique)]
    owner: String,
    balance: i64,
}

fn account(owner: &str, balance: i64) -> Account {
    Account { id: 0, owner: owner.to_string(), balance }
}

/// File-backed database so a second connection sees committed data.
struct TempDb {
    path: PathBuf,
    db: Database,
}

impl TempDb {
    async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let _ = env_logger::builder().is_test(true).try_init();
        let path = std::env::temp_dir().join(format!("keel_tx_{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let db = Database::builder().max_connections(2).connect(&url).await?;
        db.migrator().register::<Account>().run().await?;
        Ok(Self { path, db })
    }
}

impl Drop for TempDb {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", self.path.display(), suffix));
        }
    }
}

#[tokio::test]
async fn commit_is_visible_to_other_connections() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let db = &temp.db;
    let mut writer = db.open().await?;
    let mut reader = db.open().await?;

    let mut tx = writer.begin().await?;
    assert!(tx.is_outermost());
    assert!(tx.in_transaction());
    tx.insert(&mut account("ann", 100)).await?;

    assert_eq!(reader.count(&db.from::<Account>()).await?, 0);
    tx.commit().await?;
    assert!(!writer.in_transaction());
    assert_eq!(reader.count(&db.from::<Account>()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn rollback_discards_writes() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let db = &temp.db;
    let mut conn = db.open().await?;

    conn.insert(&mut account("kept", 1)).await?;

    let mut tx = conn.begin().await?;
    tx.insert(&mut account("discarded", 2)).await?;
    tx.update_add(&[("balance", keel_orm::Value::I64(10))], &db.from::<Account>()).await?;
    tx.rollback().await?;

    let rows = conn.select_all::<Account>().await?;
    assert_eq!(rows.len(), 1);
    assert_eq!((rows[0].owner.as_str(), rows[0].balance), ("kept", 1));
    Ok(())
}

#[tokio::test]
async fn dropped_transaction_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let db = &temp.db;
    let mut conn = db.open().await?;

    {
        let mut tx = conn.begin().await?;
        tx.insert(&mut account("lost", 5)).await?;
    }
    assert!(!conn.in_transaction());
    assert_eq!(conn.count(&db.from::<Account>()).await?, 0);

    // The connection is usable for a fresh transaction afterwards.
    let mut tx = conn.begin().await?;
    tx.insert(&mut account("found", 6)).await?;
    tx.commit().await?;
    assert_eq!(conn.count(&db.from::<Account>()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn nested_scopes_use_savepoints() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let db = &temp.db;
    let mut conn = db.open().await?;

    let mut outer = conn.begin().await?;
    outer.insert(&mut account("outer", 1)).await?;
    {
        let mut inner = outer.begin().await?;
        assert_eq!(inner.depth(), 2);
        assert!(!inner.is_outermost());
        inner.insert(&mut account("inner", 2)).await?;
        inner.rollback().await?;
    }
    {
        let mut inner = outer.begin().await?;
        inner.insert(&mut account("second", 3)).await?;
        inner.commit().await?;
    }
    outer.commit().await?;

    let q = db.from::<Account>().order_by(col(account_fields::ID));
    let owners: Vec<String> = conn.select(&q).await?.into_iter().map(|a| a.owner).collect();
    assert_eq!(owners, vec!["outer", "second"]);

    println!("Nested transaction test passed!");
    Ok(())
}

#[tokio::test]
async fn bulk_writes_are_atomic() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let db = &temp.db;
    let mut conn = db.open().await?;

    conn.insert(&mut account("taken", 0)).await?;

    let mut batch = vec![account("a", 1), account("taken", 2)];
    assert!(conn.insert_all(&mut batch).await.is_err());
    assert_eq!(conn.count(&db.from::<Account>()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn separate_memory_databases_write_independently() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let first = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    let second = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    first.migrator().register::<Account>().run().await?;
    second.migrator().register::<Account>().run().await?;

    let mut held = first.open().await?;
    let mut tx = held.begin().await?;
    tx.insert(&mut account("first", 1)).await?;

    let mut other = second.open().await?;
    tokio::time::timeout(Duration::from_secs(2), other.insert(&mut account("second", 2))).await??;
    assert_eq!(other.count(&second.from::<Account>()).await?, 1);

    tx.commit().await?;
    assert_eq!(held.count(&first.from::<Account>()).await?, 1);
    Ok(())
}

#[tokio::test]
async fn databases_on_one_file_share_the_writer() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDb::new().await?;
    let url = format!("sqlite://{}", temp.path.display());
    let twin = Database::builder().max_connections(1).connect(&url).await?;

    let mut conn = temp.db.open().await?;
    let mut tx = conn.begin().await?;
    tx.insert(&mut account("first", 1)).await?;

    let mut other = twin.open().await?;
    let waited = tokio::time::timeout(Duration::from_millis(200), other.insert(&mut account("second", 2))).await;
    assert!(waited.is_err(), "write ran while a transaction held the store");

    tx.commit().await?;
    other.insert(&mut account("second", 2)).await?;
    assert_eq!(other.count(&twin.from::<Account>()).await?, 2);
    Ok(())
}
