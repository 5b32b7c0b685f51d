//! # Model Module
//!
//! Declarative description of entity types.
//!
//! A [`ModelDefinition`] lists a table's fields in declaration order together
//! with keys, constraints, indexes, custom SQL fragments and DDL hooks. It is
//! normally produced by `#[derive(Model)]`, but can be assembled by hand with
//! the builder methods for types the macro cannot see:
//!
//! ```rust,ignore
//! use keel_orm::{FieldDefinition, FieldType, ModelDefinition};
//!
//! let def = ModelDefinition::new("Person")
//!     .field(FieldDefinition::new("id", FieldType::Int32).primary_key().auto_increment())
//!     .field(FieldDefinition::new("age", FieldType::Int32).check("age > 1"))
//!     .field(FieldDefinition::new("name", FieldType::String).check("name IS NOT NULL"))
//!     .build();
//! ```
//!
//! Definitions are built once per type and cached by the [`catalog`](crate::catalog).

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::{
    Error,
    catalog,
    row::RowReader,
    value::{FieldType, Value},
};

// ============================================================================
// Referential Actions
// ============================================================================

/// ON DELETE / ON UPDATE behaviour of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferentialAction {
    #[default]
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses an action name, case-insensitive. Returns `None` if unrecognised.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('_', " ").as_str() {
            "NO ACTION" | "NOACTION" => Some(ReferentialAction::NoAction),
            "RESTRICT" => Some(ReferentialAction::Restrict),
            "CASCADE" => Some(ReferentialAction::Cascade),
            "SET NULL" | "SETNULL" => Some(ReferentialAction::SetNull),
            "SET DEFAULT" | "SETDEFAULT" => Some(ReferentialAction::SetDefault),
            _ => None,
        }
    }
}

// ============================================================================
// Model References
// ============================================================================

/// A lazily resolved pointer to another model's definition.
///
/// Resolution is deferred so self-referencing models can be described
/// without recursing while their own definition is being built.
#[derive(Clone, Copy)]
pub struct ModelRef {
    pub type_id: TypeId,
    pub name: &'static str,
    resolve: fn() -> Arc<ModelDefinition>,
}

impl ModelRef {
    pub fn of<T: Model>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            resolve: catalog::definition::<T>,
        }
    }

    pub fn definition(&self) -> Arc<ModelDefinition> {
        (self.resolve)()
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

impl fmt::Debug for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModelRef({})", self.name)
    }
}

/// Foreign key metadata on a field.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub model: ModelRef,
    /// Referenced field (logical name). `None` targets the primary key.
    pub field: Option<String>,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
    pub name: Option<String>,
}

impl ForeignKey {
    pub fn to<T: Model>() -> Self {
        Self {
            model: ModelRef::of::<T>(),
            field: None,
            on_delete: ReferentialAction::NoAction,
            on_update: ReferentialAction::NoAction,
            name: None,
        }
    }

    pub fn field(mut self, field: &str) -> Self {
        self.field = Some(field.to_string());
        self
    }

    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// A non-column field holding referenced rows (one or many).
#[derive(Debug, Clone)]
pub struct ReferenceDefinition {
    pub field: String,
    pub model: ModelRef,
    pub many: bool,
}

// ============================================================================
// Field Definition
// ============================================================================

/// One persisted column of a model.
#[derive(Debug, Clone)]
pub struct FieldDefinition {
    /// Logical name, the Rust field name.
    pub name: String,
    /// Explicit column name, bypassing the naming strategy.
    pub alias: Option<String>,
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary_key: bool,
    pub auto_increment: bool,
    pub auto_id: bool,
    pub length: Option<u32>,
    /// Use the dialect's unbounded text type.
    pub max_text: bool,
    pub precision: Option<(u8, u8)>,
    pub default_value: Option<String>,
    /// Column type used verbatim in DDL.
    pub custom_field: Option<String>,
    /// SQL expression selected in place of the column. Not created, not written.
    pub custom_select: Option<String>,
    /// Read-only column maintained by the database. Created, never written.
    pub computed: bool,
    pub unique: bool,
    pub index: bool,
    pub check: Option<String>,
    pub foreign_key: Option<ForeignKey>,
}

impl FieldDefinition {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            field_type,
            nullable: false,
            primary_key: false,
            auto_increment: false,
            auto_id: false,
            length: None,
            max_text: false,
            precision: None,
            default_value: None,
            custom_field: None,
            custom_select: None,
            computed: false,
            unique: false,
            index: false,
            check: None,
            foreign_key: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    pub fn max_text(mut self) -> Self {
        self.max_text = true;
        self
    }

    pub fn precision(mut self, precision: u8, scale: u8) -> Self {
        self.precision = Some((precision, scale));
        if self.field_type == FieldType::Double || self.field_type == FieldType::Float {
            self.field_type = FieldType::Decimal;
        }
        self
    }

    pub fn default_value(mut self, sql: &str) -> Self {
        self.default_value = Some(sql.to_string());
        self
    }

    pub fn custom_field(mut self, sql_type: &str) -> Self {
        self.custom_field = Some(sql_type.to_string());
        self
    }

    pub fn custom_select(mut self, sql: &str) -> Self {
        self.custom_select = Some(sql.to_string());
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_key = Some(fk);
        self
    }

    /// Logical name used for column naming: the alias if set, else the field name.
    pub fn column_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// True when the column exists in the table (custom selects do not).
    pub fn is_created(&self) -> bool {
        self.custom_select.is_none()
    }

    /// True when inserts and updates write this column.
    pub fn is_writable(&self) -> bool {
        self.custom_select.is_none() && !self.computed
    }
}

// ============================================================================
// Table-Level Constraints
// ============================================================================

/// Index spanning one or more fields.
#[derive(Debug, Clone)]
pub struct CompositeIndex {
    /// Logical field names; a trailing ` DESC` orders that column descending.
    pub fields: Vec<String>,
    pub unique: bool,
    pub name: Option<String>,
}

impl CompositeIndex {
    pub fn new(fields: &[&str]) -> Self {
        Self { fields: fields.iter().map(|f| f.to_string()).collect(), unique: false, name: None }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Named or anonymous UNIQUE constraint over a field group.
#[derive(Debug, Clone)]
pub struct UniqueConstraint {
    pub fields: Vec<String>,
    pub name: Option<String>,
}

/// How a model's key values are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// Generated by the backend, read back after insert on request.
    AutoIncrement,
    /// UUID generated client-side when the key is left empty.
    AutoId,
    /// Supplied by the caller (natural or composite keys).
    Assigned,
}

// ============================================================================
// Model Definition
// ============================================================================

/// Complete description of one entity type.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    /// Logical model name (struct name).
    pub name: String,
    /// Explicit table name.
    pub alias: Option<String>,
    pub schema: Option<String>,
    pub fields: Vec<FieldDefinition>,
    pub composite_indexes: Vec<CompositeIndex>,
    pub unique_constraints: Vec<UniqueConstraint>,
    pub references: Vec<ReferenceDefinition>,
    pub pre_create_sql: Option<String>,
    pub post_create_sql: Option<String>,
    pub pre_drop_sql: Option<String>,
    pub post_drop_sql: Option<String>,
    pub soft_delete_field: Option<String>,
    /// Disables the "field named id is the key" convention.
    pub no_implicit_key: bool,
}

impl ModelDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            schema: None,
            fields: Vec::new(),
            composite_indexes: Vec::new(),
            unique_constraints: Vec::new(),
            references: Vec::new(),
            pre_create_sql: None,
            post_create_sql: None,
            pre_drop_sql: None,
            post_drop_sql: None,
            soft_delete_field: None,
            no_implicit_key: false,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.to_string());
        self
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn composite_index(mut self, index: CompositeIndex) -> Self {
        self.composite_indexes.push(index);
        self
    }

    pub fn unique_constraint(mut self, fields: &[&str], name: Option<&str>) -> Self {
        self.unique_constraints.push(UniqueConstraint {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            name: name.map(str::to_string),
        });
        self
    }

    pub fn reference(mut self, field: &str, model: ModelRef, many: bool) -> Self {
        self.references.push(ReferenceDefinition { field: field.to_string(), model, many });
        self
    }

    pub fn pre_create_sql(mut self, sql: &str) -> Self {
        self.pre_create_sql = Some(sql.to_string());
        self
    }

    pub fn post_create_sql(mut self, sql: &str) -> Self {
        self.post_create_sql = Some(sql.to_string());
        self
    }

    pub fn pre_drop_sql(mut self, sql: &str) -> Self {
        self.pre_drop_sql = Some(sql.to_string());
        self
    }

    pub fn post_drop_sql(mut self, sql: &str) -> Self {
        self.post_drop_sql = Some(sql.to_string());
        self
    }

    pub fn soft_delete_field(mut self, field: &str) -> Self {
        self.soft_delete_field = Some(field.to_string());
        self
    }

    pub fn no_implicit_key(mut self) -> Self {
        self.no_implicit_key = true;
        self
    }

    /// Applies key conventions and normalises identity flags.
    ///
    /// Without an explicit primary key, a field named `id` (any case) becomes
    /// the key. An integer key with no other strategy keeps caller-assigned
    /// values; a UUID key marked `auto_id` is generated on insert. When more
    /// than one strategy is flagged, auto-increment wins.
    pub fn build(mut self) -> Self {
        if !self.no_implicit_key && !self.fields.iter().any(|f| f.primary_key) {
            if let Some(field) = self.fields.iter_mut().find(|f| f.name.eq_ignore_ascii_case("id")) {
                field.primary_key = true;
            }
        }

        let has_auto_increment = self.fields.iter().any(|f| f.auto_increment);
        for field in self.fields.iter_mut() {
            if field.auto_increment && field.auto_id {
                log::warn!("field '{}.{}' is both auto_increment and auto_id; using auto_increment", self.name, field.name);
                field.auto_id = false;
            }
            if has_auto_increment && field.auto_id {
                field.auto_id = false;
            }
            if field.primary_key {
                field.nullable = false;
            }
        }
        self
    }

    /// Logical table name: alias if set, else the model name.
    pub fn table_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn primary_keys(&self) -> Vec<&FieldDefinition> {
        self.fields.iter().filter(|f| f.primary_key).collect()
    }

    /// The single primary key field, or the first of a composite key.
    pub fn primary_key(&self) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.primary_key)
    }

    pub fn has_composite_key(&self) -> bool {
        self.fields.iter().filter(|f| f.primary_key).count() > 1
    }

    pub fn identity_strategy(&self) -> IdentityStrategy {
        if self.fields.iter().any(|f| f.auto_increment) {
            IdentityStrategy::AutoIncrement
        } else if self.fields.iter().any(|f| f.auto_id) {
            IdentityStrategy::AutoId
        } else {
            IdentityStrategy::Assigned
        }
    }

    /// Finds a field by logical name, then by column alias, ignoring case.
    pub fn get_field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .or_else(|| self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name)))
            .or_else(|| self.fields.iter().find(|f| f.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))))
    }

    pub fn writable_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.is_writable())
    }

    /// The foreign key field in this model that points at `target`, if any.
    pub fn foreign_key_to(&self, target: TypeId) -> Option<&FieldDefinition> {
        self.fields
            .iter()
            .find(|f| f.foreign_key.as_ref().is_some_and(|fk| fk.model.type_id == target))
    }
}

// ============================================================================
// Model Traits
// ============================================================================

/// Types that can be built from a result row.
///
/// Implemented by `#[derive(Model)]` and `#[derive(FromRow)]`, and for tuples
/// of models (each element reading its own prefixed columns).
pub trait FromDataRow: Sized {
    fn from_data_row(row: &RowReader<'_>) -> Result<Self, Error>;
}

/// A persisted entity type.
pub trait Model: FromDataRow + Send + Sync + 'static {
    /// Builds the definition. Use [`Model::model_definition`] for the cached copy.
    fn build_definition() -> ModelDefinition;

    /// Reads a field by logical name.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Writes a field by logical name.
    fn set_value(&mut self, field: &str, value: Value) -> Result<(), Error>;

    fn model_definition() -> Arc<ModelDefinition> {
        catalog::definition::<Self>()
    }

    /// Values of the primary key fields, in declaration order.
    fn primary_key_values(&self) -> Vec<Value> {
        Self::model_definition()
            .primary_keys()
            .iter()
            .map(|f| self.get_value(&f.name).unwrap_or(Value::Null))
            .collect()
    }
}

/// Models with a logical-deletion flag.
///
/// Implemented by `#[derive(Model)]` for a `bool` field marked
/// `#[orm(soft_delete)]`; enable the filter with
/// [`OrmConfig::soft_delete`](crate::OrmConfig::soft_delete).
pub trait SoftDelete: Model {
    const SOFT_DELETE_FIELD: &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_named_id_becomes_key() {
        let def = ModelDefinition::new("Thing")
            .field(FieldDefinition::new("Id", FieldType::Int32))
            .field(FieldDefinition::new("name", FieldType::String))
            .build();
        assert_eq!(def.primary_key().map(|f| f.name.as_str()), Some("Id"));
        assert_eq!(def.identity_strategy(), IdentityStrategy::Assigned);
    }

    #[test]
    fn implicit_key_can_be_suppressed() {
        let def = ModelDefinition::new("Thing")
            .no_implicit_key()
            .field(FieldDefinition::new("id", FieldType::Int32))
            .build();
        assert!(def.primary_key().is_none());
    }

    #[test]
    fn auto_increment_wins_over_auto_id() {
        let def = ModelDefinition::new("Thing")
            .field(FieldDefinition::new("id", FieldType::Int64).primary_key().auto_increment())
            .field(FieldDefinition::new("token", FieldType::Guid).auto_id())
            .build();
        assert_eq!(def.identity_strategy(), IdentityStrategy::AutoIncrement);
        assert!(!def.fields[1].auto_id);
    }

    #[test]
    fn precision_turns_floats_into_decimals() {
        let field = FieldDefinition::new("price", FieldType::Double).precision(18, 2);
        assert_eq!(field.field_type, FieldType::Decimal);
    }

    #[test]
    fn referential_action_parsing() {
        assert_eq!(ReferentialAction::parse("cascade"), Some(ReferentialAction::Cascade));
        assert_eq!(ReferentialAction::parse("SET_NULL"), Some(ReferentialAction::SetNull));
        assert_eq!(ReferentialAction::parse("bogus"), None);
    }
}
