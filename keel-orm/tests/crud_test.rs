use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use keel_orm::{ConstraintKind, Database, Error, Model, OnConflict, SqlEnum, Value, col};
use uuid::Uuid;

#[derive(SqlEnum, Debug, Clone, Copy, PartialEq, Default)]
enum Status {
    #[default]
    Active,
    #[orm(rename = "on_hold")]
    OnHold,
}

#[derive(SqlEnum, Debug, Clone, Copy, PartialEq, Default)]
#[orm(as_int)]
enum Priority {
    #[default]
    Low = 1,
    High = 10,
}

#[derive(Model, Debug, Clone, PartialEq)]
struct Person {
    #[orm(primary_key, auto_increment)]
    id: i64,
    #[orm(length = 100)]
    name: String,
    age: i32,
    email: Option<String>,
    score: f64,
    active: bool,
    external_id: Uuid,
    born: NaiveDate,
    created_at: DateTime<Utc>,
    status: Status,
    priority: Priority,
    #[orm(ignore)]
    scratch: String,
}

fn person(name: &str, age: i32) -> Person {
    Person {
        id: 0,
        name: name.to_string(),
        age,
        email: None,
        score: 1.5,
        active: true,
        external_id: Uuid::new_v4(),
        born: NaiveDate::from_ymd_opt(1990, 4, 12).unwrap_or_default(),
        created_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
        status: Status::Active,
        priority: Priority::Low,
        scratch: String::new(),
    }
}

#[derive(Model, Debug, Clone, PartialEq)]
struct Token {
    #[orm(primary_key, auto_id)]
    id: Uuid,
    label: String,
}

#[derive(Model, Debug, Clone, PartialEq)]
struct Slug {
    #[orm(primary_key, auto_id, length = 36)]
    id: String,
    label: String,
}

#[derive(Model, Debug, Clone, PartialEq)]
struct Enrollment {
    #[orm(primary_key)]
    student: i32,
    #[orm(primary_key)]
    course: i32,
    grade: Option<String>,
}

#[derive(Model, Debug, Clone, PartialEq)]
#[orm(unique("first", "last"))]
struct Member {
    #[orm(primary_key, auto_increment)]
    id: i64,
    #[orm(unique)]
    handle: String,
    first: String,
    last: String,
}

#[derive(Model, Debug, Clone, PartialEq)]
struct Stamp {
    #[orm(primary_key, auto_increment)]
    id: i64,
    day: NaiveDate,
    at: NaiveTime,
    local: NaiveDateTime,
    moment: DateTime<Utc>,
    due: Option<NaiveDate>,
}

#[derive(Model, Debug, Clone)]
struct Checked {
    #[orm(primary_key, auto_increment)]
    id: i32,
    #[orm(check = "age > 1")]
    age: i32,
    #[orm(check = "name IS NOT NULL")]
    name: Option<String>,
}

async fn setup() -> Result<Database, Box<dyn std::error::Error>> {
    let _ = env_logger::builder().is_test(true).try_init();
    let db = Database::builder().max_connections(1).connect("sqlite::memory:").await?;
    db.migrator()
        .register::<Person>()
        .register::<Token>()
        .register::<Slug>()
        .register::<Enrollment>()
        .register::<Member>()
        .register::<Checked>()
        .register::<Stamp>()
        .run()
        .await?;
    Ok(db)
}

#[tokio::test]
async fn insert_and_read_back_every_type() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut ada = person("Ada", 36);
    ada.email = Some("ada@example.com".to_string());
    ada.status = Status::OnHold;
    ada.priority = Priority::High;
    ada.scratch = "not stored".to_string();

    let id = conn.insert_and_get_id(&mut ada).await?;
    assert!(id > 0);
    assert_eq!(ada.id, id);

    let loaded: Person = conn.single_by_id(id).await?.ok_or("missing row")?;
    assert_eq!(loaded.name, "Ada");
    assert_eq!(loaded.email.as_deref(), Some("ada@example.com"));
    assert_eq!(loaded.external_id, ada.external_id);
    assert_eq!(loaded.born, ada.born);
    assert_eq!(loaded.created_at, ada.created_at);
    assert_eq!(loaded.status, Status::OnHold);
    assert_eq!(loaded.priority, Priority::High);
    assert!(loaded.active);
    assert_eq!(loaded.scratch, "");

    println!("Round-trip test passed!");
    Ok(())
}

#[tokio::test]
async fn generated_keys_are_read_back() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut first = person("First", 30);
    let mut second = person("Second", 40);
    let first_id = conn.insert_and_get_id(&mut first).await?;
    let second_id = conn.insert_and_get_id(&mut second).await?;
    assert!(first_id > 0);
    assert!(second_id > first_id);
    assert_eq!((first.id, second.id), (first_id, second_id));

    let loaded: Person = conn.single_by_id(second_id).await?.ok_or("missing row")?;
    assert_eq!(loaded.name, "Second");

    // Only auto-increment keys can be read back.
    let err = conn.insert_and_get_id(&mut Enrollment { student: 1, course: 1, grade: None }).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert_eq!(conn.count(&db.from::<Enrollment>()).await?, 0);
    Ok(())
}

#[tokio::test]
async fn temporal_values_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let day = NaiveDate::from_ymd_opt(2024, 2, 29).ok_or("bad date")?;
    let at = NaiveTime::from_hms_micro_opt(9, 30, 15, 250_000).ok_or("bad time")?;
    let mut stamp = Stamp {
        id: 0,
        day,
        at,
        local: day.and_time(at),
        moment: Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap(),
        due: None,
    };
    conn.insert_and_get_id(&mut stamp).await?;

    let loaded: Stamp = conn.single_by_id(stamp.id).await?.ok_or("missing stamp")?;
    assert_eq!(loaded, stamp);

    stamp.due = Some(day.succ_opt().ok_or("no next day")?);
    conn.update(&mut stamp).await?;
    let by_day = db.from::<Stamp>().filter(col(stamp_fields::DAY).equals(day));
    let found = conn.single(&by_day).await?.ok_or("missing stamp by day")?;
    assert_eq!(found.due, NaiveDate::from_ymd_opt(2024, 3, 1));

    let moments: Vec<DateTime<Utc>> = conn.column(&db.from::<Stamp>().select([col(stamp_fields::MOMENT)])).await?;
    assert_eq!(moments, vec![stamp.moment]);
    Ok(())
}

#[tokio::test]
async fn update_save_and_delete() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut bob = person("Bob", 20);
    assert!(conn.save(&mut bob).await?, "first save inserts");
    assert!(bob.id > 0);

    bob.age = 21;
    assert!(!conn.save(&mut bob).await?, "second save updates");
    bob.name = "Robert".to_string();
    assert_eq!(conn.update(&mut bob).await?, 1);

    let loaded: Person = conn.single_by_id(bob.id).await?.ok_or("missing row")?;
    assert_eq!((loaded.name.as_str(), loaded.age), ("Robert", 21));

    assert_eq!(conn.delete(&bob).await?, 1);
    assert!(conn.single_by_id::<Person>(bob.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn bulk_operations() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut people: Vec<Person> = (1..=5).map(|i| person(&format!("P{}", i), 10 * i)).collect();
    conn.insert_all(&mut people).await?;
    let mut more: Vec<Person> = (6..=8).map(|i| person(&format!("P{}", i), 10 * i)).collect();
    assert_eq!(conn.bulk_insert(&mut more).await?, 3);

    let all = db.from::<Person>();
    assert_eq!(conn.count(&all).await?, 8);

    let over_50 = db.from::<Person>().filter(col(person_fields::AGE).gt(50));
    assert_eq!(conn.update_only(&[(person_fields::ACTIVE, Value::Bool(false))], &over_50).await?, 3);
    assert_eq!(conn.update_add(&[(person_fields::AGE, Value::I32(1))], &over_50).await?, 3);

    let ages: Vec<i32> = conn.column(&db.from::<Person>().select([col(person_fields::AGE)]).order_by(col("age"))).await?;
    assert_eq!(ages, vec![10, 20, 30, 40, 50, 61, 71, 81]);

    let max: i32 = conn.scalar(&db.from::<Person>().select([keel_orm::Sql::max(col("age"))])).await?;
    assert_eq!(max, 81);

    let inactive = db.from::<Person>().filter(col(person_fields::ACTIVE).equals(false));
    assert!(conn.exists(&inactive).await?);

    let ids: Vec<i64> = conn.column(&db.from::<Person>().select([col("id")]).order_by(col("id")).take(2)).await?;
    assert_eq!(conn.delete_by_ids::<Person, _>(ids).await?, 2);
    assert_eq!(conn.delete_where(&inactive).await?, 3);
    assert_eq!(conn.count(&all).await?, 3);
    assert_eq!(conn.delete_all::<Person>().await?, 3);
    Ok(())
}

#[tokio::test]
async fn auto_id_keys_are_generated() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut token = Token { id: Uuid::nil(), label: "first".into() };
    conn.insert(&mut token).await?;
    assert!(!token.id.is_nil());

    let given = Uuid::new_v4();
    let mut fixed = Token { id: given, label: "fixed".into() };
    conn.insert(&mut fixed).await?;
    assert_eq!(fixed.id, given);

    let mut slug = Slug { id: String::new(), label: "text key".into() };
    assert!(conn.save(&mut slug).await?);
    assert_eq!(slug.id.len(), 36);

    let loaded: Token = conn.single_by_id(token.id).await?.ok_or("missing token")?;
    assert_eq!(loaded.label, "first");
    Ok(())
}

#[tokio::test]
async fn composite_keys() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    for (student, course) in [(1, 1), (1, 2), (2, 1)] {
        conn.insert(&mut Enrollment { student, course, grade: None }).await?;
    }

    let q = db
        .from::<Enrollment>()
        .filter(col(enrollment_fields::STUDENT).equals(1).and(col(enrollment_fields::COURSE).equals(2)));
    let mut found = conn.single(&q).await?.ok_or("missing enrollment")?;

    // Several rows match: single returns the first in query order.
    let by_student = db.from::<Enrollment>().filter(col(enrollment_fields::STUDENT).equals(1));
    let last = conn.single(&by_student.clone().order_by_desc(col(enrollment_fields::COURSE))).await?;
    assert_eq!(last.map(|e| e.course), Some(2));
    let first = conn.single(&by_student.order_by(col(enrollment_fields::COURSE))).await?;
    assert_eq!(first.map(|e| e.course), Some(1));

    found.grade = Some("A".into());
    assert_eq!(conn.update(&mut found).await?, 1);

    let graded = db.from::<Enrollment>().filter(col("grade").is_not_null());
    assert_eq!(conn.count(&graded).await?, 1);

    let err = conn.single_by_id::<Enrollment>(1).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    Ok(())
}

#[tokio::test]
async fn unique_constraints_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    let mut a = Member { id: 0, handle: "ada".into(), first: "Ada".into(), last: "Lovelace".into() };
    conn.insert(&mut a).await?;

    let mut same_handle = Member { id: 0, handle: "ada".into(), first: "Other".into(), last: "Person".into() };
    let err = conn.insert(&mut same_handle).await.unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));

    let mut same_name = Member { id: 0, handle: "ada2".into(), first: "Ada".into(), last: "Lovelace".into() };
    let err = conn.insert(&mut same_name).await.unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Unique));

    assert_eq!(conn.insert_with(&mut same_name, OnConflict::Ignore).await?, 0);
    Ok(())
}

#[tokio::test]
async fn check_constraints_are_reported() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    conn.insert(&mut Checked { id: 0, age: 2, name: Some("ok".into()) }).await?;

    let err = conn.insert(&mut Checked { id: 0, age: 1, name: Some("young".into()) }).await.unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));
    assert!(err.to_string().to_lowercase().contains("constraint"));
    assert!(err.to_string().contains("age"), "{}", err);

    let err = conn.insert(&mut Checked { id: 0, age: 5, name: None }).await.unwrap_err();
    assert_eq!(err.constraint_kind(), Some(ConstraintKind::Check));
    assert!(err.to_string().contains("name"), "{}", err);
    Ok(())
}

#[tokio::test]
async fn custom_sql() -> Result<(), Box<dyn std::error::Error>> {
    let db = setup().await?;
    let mut conn = db.open().await?;

    for (name, age) in [("A", 1), ("B", 2), ("C", 3)] {
        conn.insert(&mut person(name, age)).await?;
    }

    let total: i64 = conn.sql_scalar("SELECT SUM(age) FROM Person").await?;
    assert_eq!(total, 6);

    let names: Vec<String> = conn.sql_column("SELECT name FROM Person ORDER BY name DESC").await?;
    assert_eq!(names, vec!["C", "B", "A"]);

    let rows: Vec<Person> = conn
        .sql_list(keel_orm::Command::with_params("SELECT * FROM Person WHERE age >= ?", vec![Value::I32(2)]))
        .await?;
    assert_eq!(rows.len(), 2);

    let dicts = conn.select_dicts(&db.from::<Person>().select_fields(&["name", "age"]).order_by(col("age"))).await?;
    assert_eq!(dicts[0].get("name"), Some(&Value::Text("A".into())));

    assert_eq!(conn.execute_sql("DELETE FROM Person WHERE age < 3").await?, 2);
    assert!(conn.last_sql().is_some_and(|sql| sql.starts_with("DELETE")));
    Ok(())
}
