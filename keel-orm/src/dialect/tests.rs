use super::*;
use crate::model::{CompositeIndex, FieldDefinition, ForeignKey, Model, ModelDefinition};
use crate::row::RowReader;

#[derive(Debug, Default)]
struct Owner {
    id: i32,
}

impl crate::model::FromDataRow for Owner {
    fn from_data_row(row: &RowReader<'_>) -> Result<Self, Error> {
        Ok(Self { id: row.get("id")? })
    }
}

impl Model for Owner {
    fn build_definition() -> ModelDefinition {
        ModelDefinition::new("Owner").field(FieldDefinition::new("id", FieldType::Int32))
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        (field == "id").then_some(Value::I32(self.id))
    }

    fn set_value(&mut self, _field: &str, _value: Value) -> Result<(), Error> {
        Ok(())
    }
}

fn person() -> ModelDefinition {
    ModelDefinition::new("Person")
        .field(FieldDefinition::new("id", FieldType::Int32).primary_key().auto_increment())
        .field(FieldDefinition::new("age", FieldType::Int32).check("age > 1"))
        .field(FieldDefinition::new("name", FieldType::String).nullable(true).check("name IS NOT NULL"))
        .build()
}

fn pet() -> ModelDefinition {
    ModelDefinition::new("Pet")
        .field(FieldDefinition::new("id", FieldType::Int32))
        .field(
            FieldDefinition::new("owner_id", FieldType::Int32).foreign_key(
                ForeignKey::to::<Owner>()
                    .on_delete(ReferentialAction::Cascade)
                    .on_update(ReferentialAction::Cascade),
            ),
        )
        .build()
}

fn all_dialects() -> Vec<Arc<dyn Dialect>> {
    [
        DialectKind::Sqlite,
        DialectKind::Postgres,
        DialectKind::MySql,
        DialectKind::SqlServer,
        DialectKind::Oracle,
        DialectKind::Firebird,
    ]
    .iter()
    .map(DialectKind::dialect)
    .collect()
}

#[test]
fn sqlite_create_table_with_checks() {
    let sql = SqliteDialect::new().to_create_table_statement(&person());
    assert_eq!(
        sql,
        "CREATE TABLE \"Person\" \n(\n  \
         \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n  \
         \"age\" INTEGER NOT NULL CONSTRAINT CHK_Person_age CHECK (age > 1),\n  \
         \"name\" VARCHAR(8000) NULL CONSTRAINT CHK_Person_name CHECK (name IS NOT NULL)\n)"
    );
}

#[test]
fn identity_keyword_position_follows_backend() {
    let sqlserver = SqlServerDialect::new().to_create_table_statement(&person());
    assert!(sqlserver.contains("[id] INT IDENTITY(1,1) PRIMARY KEY"), "{}", sqlserver);

    let mysql = MySqlDialect::new().to_create_table_statement(&person());
    assert!(mysql.contains("`id` INT PRIMARY KEY AUTO_INCREMENT"), "{}", mysql);

    let firebird = FirebirdDialect::new().to_create_table_statement(&person());
    assert!(firebird.contains("\"id\" INTEGER GENERATED BY DEFAULT AS IDENTITY PRIMARY KEY"));
    // Firebird rejects an explicit NULL constraint.
    assert!(firebird.contains("\"name\" VARCHAR(255) CONSTRAINT"), "{}", firebird);
}

#[test]
fn composite_key_is_a_table_constraint() {
    let def = ModelDefinition::new("Membership")
        .field(FieldDefinition::new("group_id", FieldType::Int32).primary_key())
        .field(FieldDefinition::new("user_id", FieldType::Int32).primary_key())
        .build();
    let sql = PostgresDialect::new().to_create_table_statement(&def);
    assert!(sql.contains("\"group_id\" INTEGER NOT NULL"), "{}", sql);
    assert!(sql.contains("PRIMARY KEY (\"group_id\", \"user_id\")"), "{}", sql);
}

#[test]
fn foreign_keys_render_supported_actions() {
    let sqlite = SqliteDialect::new().to_create_table_statement(&pet());
    assert!(sqlite.contains(
        "CONSTRAINT FK_Pet_Owner_owner_id FOREIGN KEY (\"owner_id\") REFERENCES \"Owner\" (\"id\") \
         ON DELETE CASCADE ON UPDATE CASCADE"
    ));

    let oracle = OracleDialect::new().to_create_table_statement(&pet());
    assert!(oracle.contains("ON DELETE CASCADE"));
    assert!(!oracle.contains("ON UPDATE"));
}

#[test]
fn unique_constraints_and_indexes() {
    let def = ModelDefinition::new("Person")
        .field(FieldDefinition::new("id", FieldType::Int32))
        .field(FieldDefinition::new("age", FieldType::Int32))
        .field(FieldDefinition::new("name", FieldType::String).index())
        .unique_constraint(&["age", "name"], None)
        .composite_index(CompositeIndex::new(&["age", "name DESC"]).unique())
        .build();
    let dialect = SqliteDialect::new();

    let ddl = dialect.to_create_table_statement(&def);
    assert!(ddl.contains("CONSTRAINT UC_Person_age_name UNIQUE (\"age\", \"name\")"), "{}", ddl);

    let indexes = dialect.to_create_index_statements(&def);
    assert_eq!(
        indexes,
        vec![
            "CREATE INDEX idx_person_name ON \"Person\" (\"name\")".to_string(),
            "CREATE UNIQUE INDEX uidx_person_age_name ON \"Person\" (\"age\", \"name\" DESC)".to_string(),
        ]
    );
}

#[test]
fn schemas_fold_into_table_names_without_support() {
    let def = ModelDefinition::new("Person").schema("hr").field(FieldDefinition::new("id", FieldType::Int32)).build();
    assert_eq!(PostgresDialect::new().get_quoted_table_name(&def), "\"hr\".\"Person\"");
    assert_eq!(SqlServerDialect::new().get_quoted_table_name(&def), "[hr].[Person]");
    assert_eq!(SqliteDialect::new().get_quoted_table_name(&def), "\"hr_Person\"");
    assert!(SqliteDialect::new().to_create_schema_statement("hr").is_err());
}

#[test]
fn oracle_restricts_long_names() {
    let dialect = OracleDialect::new();
    let long = "a_remarkably_long_identifier_that_oracle_rejects";
    let restricted = dialect.apply_name_restrictions(long);
    assert!(restricted.chars().count() <= 30);
    assert_eq!(restricted, dialect.apply_name_restrictions(long));
    assert_ne!(restricted, dialect.apply_name_restrictions("a_remarkably_long_identifier_that_oracle_accepts"));
    assert_eq!(dialect.apply_name_restrictions("short"), "short");
}

#[test]
fn quoted_name_of_nothing_is_nothing() {
    for dialect in all_dialects() {
        assert_eq!(dialect.get_quoted_name(None), None);
    }
    assert_eq!(MySqlDialect::new().get_quoted_name(Some("a`b")), Some("`a``b`".to_string()));
}

#[test]
fn paging_clauses() {
    let cases: Vec<(Arc<dyn Dialect>, &str, &str)> = vec![
        (Arc::new(SqliteDialect::new()), "LIMIT 5 OFFSET 10", "LIMIT 5"),
        (Arc::new(PostgresDialect::new()), "LIMIT 5 OFFSET 10", "LIMIT 5"),
        (Arc::new(MySqlDialect::new()), "LIMIT 5 OFFSET 10", "LIMIT 5"),
        (Arc::new(SqlServerDialect::new()), "OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY", "OFFSET 0 ROWS FETCH NEXT 5 ROWS ONLY"),
        (Arc::new(OracleDialect::new()), "OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY", "FETCH FIRST 5 ROWS ONLY"),
        (Arc::new(FirebirdDialect::new()), "ROWS 11 TO 15", "ROWS 5"),
    ];
    for (dialect, both, rows_only) in cases {
        assert_eq!(dialect.sql_limit(Some(10), Some(5)), both, "{:?}", dialect.kind());
        assert_eq!(dialect.sql_limit(None, Some(5)), rows_only, "{:?}", dialect.kind());
        assert_eq!(dialect.sql_limit(None, None), "");
    }
}

#[test]
fn firebird_row_ranges_saturate() {
    let dialect = FirebirdDialect::new();
    assert_eq!(dialect.sql_limit(Some(u64::MAX), Some(5)), format!("ROWS {} TO {}", u64::MAX, u64::MAX));
    assert_eq!(dialect.sql_limit(Some(u64::MAX - 1), None), format!("ROWS {} TO {}", u64::MAX, i64::MAX));
    assert_eq!(dialect.sql_limit(Some(10), Some(u64::MAX)), format!("ROWS 11 TO {}", u64::MAX));
}

#[test]
fn sqlite_reads_temporal_columns_as_text() {
    let dialect = SqliteDialect::new();
    let def = ModelDefinition::new("Event")
        .field(FieldDefinition::new("id", FieldType::Int64).primary_key().auto_increment())
        .field(FieldDefinition::new("day", FieldType::Date))
        .field(FieldDefinition::new("at", FieldType::Time))
        .field(FieldDefinition::new("stamp", FieldType::DateTime))
        .field(FieldDefinition::new("moment", FieldType::DateTimeOffset))
        .build();
    let column = |name: &str| def.fields.iter().find(|f| f.name == name).cloned().unwrap();

    assert_eq!(dialect.select_column_expr("\"day\"", &column("day")).as_deref(), Some("CAST(\"day\" AS TEXT)"));
    assert_eq!(dialect.select_column_expr("\"at\"", &column("at")).as_deref(), Some("CAST(\"at\" AS TEXT)"));
    assert!(dialect.select_column_expr("\"stamp\"", &column("stamp")).is_some());
    assert!(dialect.select_column_expr("\"moment\"", &column("moment")).is_some());
    assert_eq!(dialect.select_column_expr("\"id\"", &column("id")), None);
    assert_eq!(dialect.identity_fetch(), IdentityFetch::Returning);
}

#[test]
fn empty_spread_never_matches() {
    for dialect in all_dialects() {
        assert_eq!(dialect.sql_spread(&[]), "(NULL)");
    }
    let spread = SqliteDialect::new().sql_spread(&[Value::I32(1), Value::Text("it's".into())]);
    assert_eq!(spread, "(1,'it''s')");
}

#[test]
fn placeholders_per_backend() {
    assert_eq!(SqliteDialect::new().param_placeholder(3), "?");
    assert_eq!(PostgresDialect::new().param_placeholder(0), "$1");
    assert_eq!(SqlServerDialect::new().param_placeholder(2), "@2");
    assert_eq!(OracleDialect::new().param_placeholder(1), ":1");
    assert_eq!(FirebirdDialect::new().param_placeholder(0), "@0");
}

#[test]
fn conflict_resolution_rewrites_insert() {
    let def = person();
    let sql = "INSERT INTO \"Person\" (\"age\") VALUES (?)";
    assert_eq!(
        SqliteDialect::new().sql_conflict(&def, sql, OnConflict::Ignore).unwrap(),
        "INSERT OR IGNORE INTO \"Person\" (\"age\") VALUES (?)"
    );
    assert!(MySqlDialect::new().sql_conflict(&def, sql, OnConflict::Replace).unwrap().starts_with("REPLACE INTO"));
    assert!(matches!(
        SqlServerDialect::new().sql_conflict(&def, sql, OnConflict::Ignore),
        Err(Error::Unsupported(_))
    ));
    assert_eq!(SqlServerDialect::new().sql_conflict(&def, sql, OnConflict::Fail).unwrap(), sql);
}

#[test]
fn bulk_insert_literals() {
    let dialect = SqliteDialect::new();
    let def = person();
    assert_eq!(dialect.to_insert_rows_sql(&def, &[]), "");

    let rows = vec![
        vec![Value::I32(30), Value::Text("Ann".into())],
        vec![Value::I32(41), Value::Null],
    ];
    assert_eq!(
        dialect.to_insert_rows_sql(&def, &rows),
        "INSERT INTO \"Person\" (\"age\",\"name\") VALUES\n(30,'Ann'),\n(41,NULL);"
    );
}

#[test]
fn column_changes() {
    let dialect = SqliteDialect::new();
    let def = person();
    let field = FieldDefinition::new("email", FieldType::String).nullable(true).length(100);
    assert_eq!(
        dialect.to_add_column_statement(&def, &field),
        "ALTER TABLE \"Person\" ADD COLUMN \"email\" VARCHAR(100) NULL"
    );
    assert_eq!(
        dialect.to_drop_column_statement(&def, "email").unwrap(),
        "ALTER TABLE \"Person\" DROP COLUMN \"email\""
    );
    assert_eq!(
        SqlServerDialect::new().to_rename_column_statement(&def, "email", "mail"),
        "EXEC sp_rename 'Person.email', 'mail', 'COLUMN'"
    );
}

#[test]
fn literals_follow_backend_conventions() {
    assert_eq!(SqliteDialect::new().get_quoted_value(&Value::Bool(true)), "1");
    assert_eq!(PostgresDialect::new().get_quoted_value(&Value::Bool(true)), "true");
    assert_eq!(SqlServerDialect::new().get_quoted_value(&Value::Bytes(vec![0xAB, 0x01])), "0xAB01");
    assert_eq!(OracleDialect::new().get_quoted_value(&Value::Bytes(vec![0xFF])), "HEXTORAW('FF')");
}

#[test]
fn url_schemes_select_backends() {
    assert_eq!(DialectKind::from_url("sqlite::memory:"), Some(DialectKind::Sqlite));
    assert_eq!(DialectKind::from_url("postgresql://localhost/db"), Some(DialectKind::Postgres));
    assert_eq!(DialectKind::from_url("mariadb://localhost/db"), Some(DialectKind::MySql));
    assert_eq!(DialectKind::from_url("nope"), None);
    assert!(!DialectKind::Oracle.is_executable());
}

#[test]
fn naming_strategy_flows_into_names() {
    let dialect = DialectKind::Postgres.with_naming(Arc::new(crate::naming::SnakeCaseNaming));
    let def = ModelDefinition::new("OrderLine").field(FieldDefinition::new("UnitPrice", FieldType::Double)).build();
    assert_eq!(dialect.get_quoted_table_name(&def), "\"order_line\"");
    assert_eq!(dialect.get_quoted_column_name(&def.fields[0]), "\"unit_price\"");
}
