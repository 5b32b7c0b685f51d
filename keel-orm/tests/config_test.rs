use keel_orm::{
    CaptureSqlFilter, Command, Database, DialectKind, Error, ExecFilter, Model, OrmConfig, Value, col,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Model, Debug, Clone, PartialEq)]
struct Note {
    #[orm(primary_key, auto_increment)]
    id: i64,
    body: String,
    nickname: Option<String>,
    revision: i32,
    archived: bool,
}

fn note(body: &str) -> Note {
    Note { id: 0, body: body.to_string(), nickname: None, revision: 0, archived: false }
}

async fn setup(config: OrmConfig) -> Result<Database, Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = Database::builder().max_connections(1).config(config).connect("sqlite::memory:").await?;
    db.migrator().register::<Note>().run().await?;
    Ok(db)
}

#[tokio::test]
async fn insert_and_update_filters() -> Result<(), Box<dyn std::error::Error>> {
    let config = OrmConfig::new();
    let db = setup(config.clone()).await?;
    let mut conn = db.open().await?;

    config.set_insert_filter(|def, entity| {
        if def.name == "Note" && entity.get("nickname") == Some(Value::Null) {
            entity.set("nickname", Value::Text("anon".into()))?;
        }
        Ok(())
    });
    config.insert_filter_for::<Note>(|n| {
        if n.body.trim().is_empty() {
            return Err(Error::filter("a note needs a body"));
        }
        Ok(())
    });
    config.update_filter_for::<Note>(|n| {
        n.revision += 1;
        Ok(())
    });

    let mut first = note("hello");
    conn.insert_and_get_id(&mut first).await?;
    assert_eq!(first.nickname.as_deref(), Some("anon"));

    let err = conn.insert(&mut note("   ")).await.unwrap_err();
    assert!(matches!(err, Error::Filter(_)));
    assert_eq!(conn.count(&db.from::<Note>()).await?, 1);

    first.body = "hello again".into();
    conn.update(&mut first).await?;
    conn.update(&mut first).await?;
    let stored: Note = conn.single_by_id(first.id).await?.ok_or("missing note")?;
    assert_eq!(stored.revision, 2);
    assert_eq!(stored.nickname.as_deref(), Some("anon"));

    config.clear_write_filters();
    conn.insert(&mut note("")).await?;
    assert_eq!(conn.count(&db.from::<Note>()).await?, 2);
    Ok(())
}

#[tokio::test]
async fn read_filters_are_scoped() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup(OrmConfig::new()).await?;
    let mut conn = db.open().await?;

    let mut padded = note("padded   ");
    conn.insert_and_get_id(&mut padded).await?;

    {
        let _guard = db.config().scoped();
        db.config().set_string_filter(|s| s.trim_end().to_string());
        db.config().set_null_filter(|field| (field.name == "nickname").then(|| Value::Text("n/a".into())));

        let read: Note = conn.single_by_id(padded.id).await?.ok_or("missing note")?;
        assert_eq!(read.body, "padded");
        assert_eq!(read.nickname.as_deref(), Some("n/a"));
    }

    let read: Note = conn.single_by_id(padded.id).await?.ok_or("missing note")?;
    assert_eq!(read.body, "padded   ");
    assert_eq!(read.nickname, None);
    Ok(())
}

#[tokio::test]
async fn select_filters_apply_to_from() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup(OrmConfig::new()).await?;
    let mut conn = db.open().await?;

    conn.insert(&mut note("visible")).await?;
    let mut hidden = note("hidden");
    hidden.archived = true;
    conn.insert(&mut hidden).await?;

    db.config().select_filter::<Note>(col(note_fields::ARCHIVED).equals(false));
    let notes = conn.select(&db.from::<Note>()).await?;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].body, "visible");

    // Explicit filters combine with the configured one.
    let q = db.from::<Note>().filter(col("body").equals("hidden"));
    assert_eq!(conn.count(&q).await?, 0);
    assert_eq!(conn.count(&db.from::<Note>().clear_ensure()).await?, 2);

    db.config().clear_select_filters::<Note>();
    assert_eq!(conn.select_all::<Note>().await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn capture_sql_without_running_it() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup(OrmConfig::new()).await?;
    let mut conn = db.open().await?;

    let capture = CaptureSqlFilter::new();
    db.config().set_exec_filter(Arc::new(capture.clone()));
    conn.insert(&mut note("never stored")).await?;
    assert!(conn.select_all::<Note>().await?.is_empty());
    db.config().clear_exec_filter();

    let sql = capture.sql();
    assert_eq!(sql.len(), 2);
    assert!(sql[0].starts_with("INSERT INTO"));
    assert!(sql[1].starts_with("SELECT"));
    assert_eq!(capture.commands()[0].params.len(), 4);
    assert_eq!(conn.count(&db.from::<Note>()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn capture_sql_for_other_dialects() -> Result<(), Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let capture = CaptureSqlFilter::new();
    let config = OrmConfig::new();
    config.set_exec_filter(Arc::new(capture.clone()));

    let db = Database::builder()
        .max_connections(1)
        .dialect(DialectKind::SqlServer)
        .config(config)
        .connect("sqlite::memory:")
        .await?;
    db.migrator().register::<Note>().run().await?;
    assert!(capture.sql().iter().any(|sql| sql.starts_with("CREATE TABLE [Note]")));

    capture.clear();
    let mut conn = db.open().await?;
    conn.select(&db.from::<Note>().filter(col("revision").gt(1)).order_by(col("id")).limit(10, 5)).await?;
    let sql = capture.sql().join("\n");
    assert!(sql.contains("[revision] > @0"), "{}", sql);
    assert!(sql.contains("OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"), "{}", sql);
    Ok(())
}

#[derive(Default)]
struct Counting {
    executed: AtomicUsize,
    failed: AtomicUsize,
}

impl ExecFilter for Counting {
    fn after_execute(&self, _cmd: &Command, _elapsed: Duration) {
        self.executed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_error(&self, _cmd: &Command, _err: &Error) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn exec_filter_observes_commands() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup(OrmConfig::new()).await?;
    let mut conn = db.open().await?;
    let counting = Arc::new(Counting::default());
    db.config().set_exec_filter(counting.clone());

    conn.insert(&mut note("one")).await?;
    conn.select_all::<Note>().await?;
    assert!(conn.execute_sql("SELECT * FROM missing_table").await.is_err());

    assert_eq!(counting.executed.load(Ordering::SeqCst), 2);
    assert_eq!(counting.failed.load(Ordering::SeqCst), 1);
    assert_eq!(conn.last_sql(), Some("SELECT * FROM missing_table"));
    Ok(())
}

#[tokio::test]
async fn slow_commands_time_out() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup(OrmConfig::new()).await?;
    let mut conn = db.open().await?;

    let slow = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 50000000) SELECT COUNT(*) FROM c";
    let err = conn.with_timeout(Duration::from_millis(50)).sql_scalar::<i64>(slow).await.unwrap_err();
    assert!(matches!(err, Error::Timeout(limit) if limit == Duration::from_millis(50)));
    Ok(())
}

#[tokio::test]
async fn default_timeout_comes_from_config() -> Result<(), Box<dyn std::error::Error>> {
    let config = OrmConfig::new();
    config.set_command_timeout(Some(Duration::from_secs(5)));
    let db = setup(config).await?;
    assert_eq!(db.config().command_timeout(), Some(Duration::from_secs(5)));

    let mut conn = db.open().await?;
    conn.insert(&mut note("quick")).await?;
    assert_eq!(conn.count(&db.from::<Note>()).await?, 1);
    Ok(())
}
