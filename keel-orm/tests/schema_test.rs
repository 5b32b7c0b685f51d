use futures::future::BoxFuture;
use keel_orm::{Database, DbConnection, Error, Model, col};

#[derive(Model, Debug, Clone, PartialEq)]
#[orm(table = "Gadget")]
struct GadgetV1 {
    #[orm(primary_key, auto_increment)]
    id: i64,
    name: String,
}

#[derive(Model, Debug, Clone, PartialEq)]
#[orm(table = "Gadget")]
struct GadgetV2 {
    #[orm(primary_key, auto_increment)]
    id: i64,
    name: String,
    #[orm(default = "'grey'")]
    color: Option<String>,
}

#[derive(Model, Debug, Clone, PartialEq)]
#[orm(table = "Gadget")]
struct GadgetV3 {
    #[orm(primary_key, auto_increment)]
    id: i64,
    name: String,
    colour: Option<String>,
}

#[derive(Model, Debug, Clone, PartialEq)]
#[orm(post_create = "INSERT INTO Setting (name, value) VALUES ('version', '1')")]
#[orm(index("name", "value DESC"))]
struct Setting {
    #[orm(primary_key, auto_increment)]
    id: i64,
    #[orm(unique)]
    name: String,
    value: String,
}

#[derive(Model, Debug, Clone)]
#[orm(pre_create = "THIS IS NOT SQL")]
struct Broken {
    #[orm(primary_key)]
    id: i64,
}

async fn memory_db() -> Result<Database, Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    Ok(Database::builder().max_connections(1).connect("sqlite::memory:").await?)
}

fn seed_gadgets(conn: &mut DbConnection) -> BoxFuture<'_, Result<(), Error>> {
    Box::pin(async move {
        for name in ["lamp", "kettle"] {
            conn.insert(&mut GadgetV1 { id: 0, name: name.into() }).await?;
        }
        Ok(())
    })
}

#[tokio::test]
async fn migrations_are_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let db = memory_db().await?;
    db.migrator().register::<Setting>().run().await?;
    db.migrator().register::<Setting>().run().await?;

    let mut conn = db.open().await?;
    assert!(conn.table_exists::<Setting>().await?);
    assert_eq!(conn.count(&db.from::<Setting>()).await?, 1, "post-create hook runs once");

    let err = conn.insert(&mut Setting { id: 0, name: "version".into(), value: "2".into() }).await.unwrap_err();
    assert!(err.is_constraint_violation());

    conn.drop_and_create_table::<Setting>().await?;
    assert_eq!(conn.count(&db.from::<Setting>()).await?, 1);

    conn.drop_table::<Setting>().await?;
    assert!(!conn.table_exists::<Setting>().await?);
    assert!(conn.create_table_if_not_exists::<Setting>().await?);
    assert!(!conn.create_table_if_not_exists::<Setting>().await?);
    Ok(())
}

#[tokio::test]
async fn failed_pre_create_hook_stops_creation() -> Result<(), Box<dyn std::error::Error>> {
    let db = memory_db().await?;
    assert!(db.migrator().register::<Broken>().run().await.is_err());

    let mut conn = db.open().await?;
    assert!(!conn.table_exists::<Broken>().await?);
    Ok(())
}

#[tokio::test]
async fn custom_steps_run_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let db = memory_db().await?;
    db.migrator().register::<GadgetV1>().step("seed gadgets", seed_gadgets).run().await?;

    let mut conn = db.open().await?;
    let names: Vec<String> = conn.column(&db.from::<GadgetV1>().select([col("name")]).order_by(col("id"))).await?;
    assert_eq!(names, vec!["lamp", "kettle"]);
    Ok(())
}

#[tokio::test]
async fn columns_evolve() -> Result<(), Box<dyn std::error::Error>> {
    let db = memory_db().await?;
    db.migrator().register::<GadgetV1>().run().await?;
    let mut conn = db.open().await?;
    conn.insert(&mut GadgetV1 { id: 0, name: "lamp".into() }).await?;

    // Rows without the column read it as NULL.
    let early: Vec<GadgetV2> = conn.sql_list("SELECT * FROM Gadget").await?;
    assert_eq!(early[0].color, None);

    conn.add_column::<GadgetV2>(gadget_v2_fields::COLOR).await?;
    let mut kettle = GadgetV2 { id: 0, name: "kettle".into(), color: None };
    conn.insert(&mut kettle).await?;
    let colors: Vec<Option<String>> = conn.column(&db.from::<GadgetV2>().select([col("color")]).order_by(col("id"))).await?;
    assert_eq!(colors, vec![Some("grey".to_string()), Some("grey".to_string())]);

    conn.rename_column::<GadgetV2>("color", "colour").await?;
    let renamed: Vec<GadgetV3> = conn.select_all().await?;
    assert!(renamed.iter().all(|g| g.colour.as_deref() == Some("grey")));

    conn.drop_column::<GadgetV3>("colour").await?;
    let back: Vec<GadgetV1> = conn.select_all().await?;
    assert_eq!(back.len(), 2);
    assert!(conn.add_column::<GadgetV1>("missing").await.is_err());
    Ok(())
}
