use keel_orm::{Database, Model, col};

#[derive(Model, Debug, Clone, PartialEq)]
struct City {
    #[orm(primary_key, auto_increment)]
    id: i64,
    name: String,
    population: i64,
}

async fn setup() -> Result<Database, Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.migrator().register::<City>().run().await?;

    let mut conn = db.open().await?;
    let mut cities = vec![
        City { id: 0, name: "Lyon".into(), population: 516_000 },
        City { id: 0, name: "Porto".into(), population: 232_000 },
        City { id: 0, name: "Graz".into(), population: 291_000 },
    ];
    conn.bulk_insert(&mut cities).await?;
    Ok(db)
}

#[tokio::test]
async fn batch_returns_typed_results() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;

    let mut batch = db.batch();
    let big = batch.select(db.from::<City>().filter(col(city_fields::POPULATION).gt(250_000)).order_by(col("name")));
    let total = batch.count(db.from::<City>());
    let first = batch.single_by_id::<City, _>(1i64);
    let names = batch.push(|mut conn| async move { conn.sql_column::<String>("SELECT name FROM City ORDER BY id").await });
    assert_eq!(batch.len(), 4);

    let mut results = batch.run().await?;
    let big = results.take(big)?;
    assert_eq!(big.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["Graz", "Lyon"]);
    assert_eq!(results.take(total)?, 3);
    assert_eq!(results.take(first)?.map(|c| c.name), Some("Lyon".to_string()));
    assert_eq!(results.take(names)?, vec!["Lyon", "Porto", "Graz"]);

    // A slot can only be taken once.
    assert!(results.take(total).is_err());
    Ok(())
}

#[tokio::test]
async fn batch_reports_first_failure() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;

    let mut batch = db.batch();
    batch.count(db.from::<City>());
    batch.push(|mut conn| async move { conn.sql_scalar::<i64>("SELECT COUNT(*) FROM nowhere").await });
    assert!(batch.run().await.is_err());

    assert!(db.batch().is_empty());
    Ok(())
}
