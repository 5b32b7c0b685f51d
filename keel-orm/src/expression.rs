//! # SQL Expression Builder
//!
//! [`SqlExpression<T>`] is a fluent, typed builder for queries against a
//! model `T`. Predicates are [`Expr`] trees built from [`col`] references and
//! plain values; every value becomes a positional parameter.
//!
//! ```rust,ignore
//! use keel_orm::{col, Sql};
//!
//! let q = db.from::<Person>()
//!     .filter(col("age").gt(18))
//!     .or(col("name").starts_with("A"))
//!     .ensure(col("tenant_id").equals(7))
//!     .order_by_desc(col("age"))
//!     .limit(10, 5);
//!
//! // WHERE "TenantId" = ? AND ("Age" > ? OR "Name" LIKE ? ESCAPE '^')
//! let people = conn.select(&q).await?;
//! ```
//!
//! Ensure predicates are kept apart from the user filter and always ANDed in
//! front of it, whatever order `filter`/`or`/`ensure` were called in.
//!
//! Rendering never caches: each `to_*_statement` call renders the current
//! state, so a builder can be changed and executed again.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ops;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use uuid::Uuid;

use crate::{
    Error,
    command::{Command, SqlWriter},
    dialect::Dialect,
    model::{FieldDefinition, Model, ModelDefinition, ModelRef},
    value::{FieldType, ToValue, Value},
};

// ============================================================================
// Expression Tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub const fn as_sql(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt | BinaryOp::Le)
    }
}

/// Which table a column reference points at.
#[derive(Debug, Clone)]
pub enum ColumnSource {
    /// The model the query was started from.
    Main,
    /// The main model or a joined model, by type.
    Model(ModelRef),
    /// A joined table by its alias.
    Alias(String),
}

/// A SQL expression over model fields and values.
#[derive(Debug, Clone)]
pub enum Expr {
    Column { source: ColumnSource, field: String },
    Value(Value),
    /// Verbatim SQL.
    Raw(String),
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Not(Box<Expr>),
    IsNull { expr: Box<Expr>, negated: bool },
    InList { expr: Box<Expr>, values: Vec<Value>, negated: bool },
    Like { expr: Box<Expr>, pattern: String, negated: bool, escaped: bool },
    Between { expr: Box<Expr>, low: Box<Expr>, high: Box<Expr> },
    Func { name: String, args: Vec<Expr> },
    CountDistinct(Box<Expr>),
    Alias { expr: Box<Expr>, alias: String },
    Random,
    Star,
}

/// A field of the main model.
pub fn col(field: &str) -> Expr {
    Expr::Column { source: ColumnSource::Main, field: field.to_string() }
}

/// A field of model `M`, which must be the main model or joined.
pub fn col_of<M: Model>(field: &str) -> Expr {
    Expr::Column { source: ColumnSource::Model(ModelRef::of::<M>()), field: field.to_string() }
}

/// A field of the table joined under `alias`.
pub fn col_in(alias: &str, field: &str) -> Expr {
    Expr::Column { source: ColumnSource::Alias(alias.to_string()), field: field.to_string() }
}

/// A parameter value.
pub fn val(value: impl ToValue) -> Expr {
    Expr::Value(value.to_value())
}

/// Escape character used by the LIKE helpers.
const LIKE_ESCAPE: char = '^';

fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    for c in text.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

impl Expr {
    pub fn raw(sql: &str) -> Expr {
        Expr::Raw(sql.to_string())
    }

    fn binary(self, op: BinaryOp, right: impl Into<Expr>) -> Expr {
        Expr::Binary { op, left: Box::new(self), right: Box::new(right.into()) }
    }

    /// `=`; comparing with NULL renders `IS NULL`.
    pub fn equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Eq, other)
    }

    /// `<>`; comparing with NULL renders `IS NOT NULL`.
    pub fn not_equals(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn gt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn lt(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Expr>) -> Expr {
        self.binary(BinaryOp::Le, other)
    }

    pub fn and(self, other: Expr) -> Expr {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: Expr) -> Expr {
        self.binary(BinaryOp::Or, other)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull { expr: Box::new(self), negated: false }
    }

    pub fn is_not_null(self) -> Expr {
        Expr::IsNull { expr: Box::new(self), negated: true }
    }

    /// `IN (...)` with one parameter per value. An empty list never matches.
    pub fn in_list<V: ToValue>(self, values: impl IntoIterator<Item = V>) -> Expr {
        let values = values.into_iter().map(|v| v.to_value()).collect();
        Expr::InList { expr: Box::new(self), values, negated: false }
    }

    /// `NOT IN (...)`. An empty list matches every row.
    pub fn not_in_list<V: ToValue>(self, values: impl IntoIterator<Item = V>) -> Expr {
        let values = values.into_iter().map(|v| v.to_value()).collect();
        Expr::InList { expr: Box::new(self), values, negated: true }
    }

    /// `LIKE` with a caller-supplied pattern, wildcards included.
    pub fn like(self, pattern: &str) -> Expr {
        Expr::Like { expr: Box::new(self), pattern: pattern.to_string(), negated: false, escaped: false }
    }

    pub fn not_like(self, pattern: &str) -> Expr {
        Expr::Like { expr: Box::new(self), pattern: pattern.to_string(), negated: true, escaped: false }
    }

    pub fn starts_with(self, text: &str) -> Expr {
        Expr::Like { expr: Box::new(self), pattern: format!("{}%", escape_like(text)), negated: false, escaped: true }
    }

    pub fn ends_with(self, text: &str) -> Expr {
        Expr::Like { expr: Box::new(self), pattern: format!("%{}", escape_like(text)), negated: false, escaped: true }
    }

    pub fn contains(self, text: &str) -> Expr {
        Expr::Like { expr: Box::new(self), pattern: format!("%{}%", escape_like(text)), negated: false, escaped: true }
    }

    pub fn between(self, low: impl Into<Expr>, high: impl Into<Expr>) -> Expr {
        Expr::Between { expr: Box::new(self), low: Box::new(low.into()), high: Box::new(high.into()) }
    }

    /// Names the expression in a projection.
    pub fn as_(self, alias: &str) -> Expr {
        Expr::Alias { expr: Box::new(self), alias: alias.to_string() }
    }
}

impl ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

macro_rules! arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Expr;

            fn $method(self, rhs: R) -> Expr {
                self.binary($op, rhs)
            }
        }
    };
}

arithmetic!(Add, add, BinaryOp::Add);
arithmetic!(Sub, sub, BinaryOp::Sub);
arithmetic!(Mul, mul, BinaryOp::Mul);
arithmetic!(Div, div, BinaryOp::Div);

macro_rules! value_expr {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl From<$ty> for Expr {
                fn from(value: $ty) -> Expr {
                    Expr::Value(value.to_value())
                }
            }
        )+
    };
}

value_expr!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    f32,
    f64,
    char,
    String,
    &str,
    &String,
    Vec<u8>,
    Uuid,
    DateTime<Utc>,
    NaiveDateTime,
    NaiveDate,
    NaiveTime,
);

impl From<Value> for Expr {
    fn from(value: Value) -> Expr {
        Expr::Value(value)
    }
}

impl<T: ToValue> From<Option<T>> for Expr {
    fn from(value: Option<T>) -> Expr {
        Expr::Value(value.to_value())
    }
}

/// SQL functions and operators that read better as calls.
pub struct Sql;

impl Sql {
    pub fn in_<V: ToValue>(expr: Expr, values: impl IntoIterator<Item = V>) -> Expr {
        expr.in_list(values)
    }

    pub fn count(expr: Expr) -> Expr {
        Sql::func("COUNT", vec![expr])
    }

    /// `COUNT(*)`
    pub fn count_all() -> Expr {
        Sql::func("COUNT", vec![Expr::Star])
    }

    pub fn count_distinct(expr: Expr) -> Expr {
        Expr::CountDistinct(Box::new(expr))
    }

    pub fn sum(expr: Expr) -> Expr {
        Sql::func("SUM", vec![expr])
    }

    pub fn min(expr: Expr) -> Expr {
        Sql::func("MIN", vec![expr])
    }

    pub fn max(expr: Expr) -> Expr {
        Sql::func("MAX", vec![expr])
    }

    pub fn avg(expr: Expr) -> Expr {
        Sql::func("AVG", vec![expr])
    }

    pub fn as_(expr: impl Into<Expr>, alias: &str) -> Expr {
        expr.into().as_(alias)
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Func { name: name.to_string(), args }
    }
}

// ============================================================================
// Builder State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
}

impl JoinKind {
    const fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
        }
    }
}

#[derive(Debug, Clone)]
struct JoinClause {
    kind: JoinKind,
    model: ModelRef,
    def: Arc<ModelDefinition>,
    alias: Option<String>,
    on: Expr,
}

#[derive(Debug, Clone)]
struct OrderTerm {
    expr: Expr,
    desc: bool,
}

/// Fluent query builder for model `T`.
pub struct SqlExpression<T> {
    dialect: Arc<dyn Dialect>,
    def: Arc<ModelDefinition>,
    model: ModelRef,
    ensure: Vec<Expr>,
    filter: Option<Expr>,
    joins: Vec<JoinClause>,
    select: Vec<Expr>,
    distinct: bool,
    group_by: Vec<Expr>,
    having: Option<Expr>,
    order_by: Vec<OrderTerm>,
    offset: Option<u64>,
    rows: Option<u64>,
    /// First builder misuse, reported when the statement is rendered.
    error: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for SqlExpression<T> {
    fn clone(&self) -> Self {
        Self {
            dialect: Arc::clone(&self.dialect),
            def: Arc::clone(&self.def),
            model: self.model,
            ensure: self.ensure.clone(),
            filter: self.filter.clone(),
            joins: self.joins.clone(),
            select: self.select.clone(),
            distinct: self.distinct,
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            offset: self.offset,
            rows: self.rows,
            error: self.error.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for SqlExpression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlExpression")
            .field("model", &self.def.name)
            .field("dialect", &self.dialect.kind())
            .field("ensure", &self.ensure)
            .field("filter", &self.filter)
            .field("joins", &self.joins.len())
            .field("offset", &self.offset)
            .field("rows", &self.rows)
            .finish()
    }
}

impl<T: Model> SqlExpression<T> {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            def: T::model_definition(),
            model: ModelRef::of::<T>(),
            ensure: Vec::new(),
            filter: None,
            joins: Vec::new(),
            select: Vec::new(),
            distinct: false,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            offset: None,
            rows: None,
            error: None,
            _marker: PhantomData,
        }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub fn definition(&self) -> &ModelDefinition {
        &self.def
    }

    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    pub fn rows(&self) -> Option<u64> {
        self.rows
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some() || !self.ensure.is_empty()
    }

    // ------------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------------

    /// ANDs a predicate into the user filter.
    pub fn filter(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn and(self, predicate: Expr) -> Self {
        self.filter(predicate)
    }

    /// ORs a predicate with the user filter built so far.
    pub fn or(mut self, predicate: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.or(predicate),
            None => predicate,
        });
        self
    }

    /// Adds a predicate that is always ANDed with the whole user filter.
    pub fn ensure(mut self, predicate: Expr) -> Self {
        self.ensure.push(predicate);
        self
    }

    /// Drops the user filter; ensure predicates stay.
    pub fn clear_filter(mut self) -> Self {
        self.filter = None;
        self
    }

    /// Drops ensure predicates, including registered select filters.
    pub fn clear_ensure(mut self) -> Self {
        self.ensure.clear();
        self
    }

    // ------------------------------------------------------------------------
    // Joins
    // ------------------------------------------------------------------------

    fn push_join<J: Model>(mut self, kind: JoinKind, alias: Option<&str>, on: Expr) -> Self {
        self.joins.push(JoinClause {
            kind,
            model: ModelRef::of::<J>(),
            def: J::model_definition(),
            alias: alias.map(str::to_string),
            on,
        });
        self
    }

    pub fn join<J: Model>(self, on: Expr) -> Self {
        self.push_join::<J>(JoinKind::Inner, None, on)
    }

    pub fn left_join<J: Model>(self, on: Expr) -> Self {
        self.push_join::<J>(JoinKind::Left, None, on)
    }

    pub fn right_join<J: Model>(self, on: Expr) -> Self {
        self.push_join::<J>(JoinKind::Right, None, on)
    }

    /// Joins `J` under an alias; reference its columns with [`col_in`].
    pub fn join_as<J: Model>(self, alias: &str, on: Expr) -> Self {
        self.push_join::<J>(JoinKind::Inner, Some(alias), on)
    }

    pub fn left_join_as<J: Model>(self, alias: &str, on: Expr) -> Self {
        self.push_join::<J>(JoinKind::Left, Some(alias), on)
    }

    /// Joins `J` on the foreign key between it and a model already in the query.
    pub fn join_on_fk<J: Model>(self) -> Self {
        self.join_fk::<J>(JoinKind::Inner)
    }

    pub fn left_join_on_fk<J: Model>(self) -> Self {
        self.join_fk::<J>(JoinKind::Left)
    }

    fn join_fk<J: Model>(mut self, kind: JoinKind) -> Self {
        match self.infer_join_condition::<J>() {
            Some(on) => self.push_join::<J>(kind, None, on),
            None => {
                let target = J::model_definition();
                self.error.get_or_insert_with(|| format!("no foreign key links {} to {}", target.name, self.def.name));
                self
            }
        }
    }

    fn infer_join_condition<J: Model>(&self) -> Option<Expr> {
        let target_ref = ModelRef::of::<J>();
        let target = J::model_definition();

        let mut sources: Vec<(ModelRef, Arc<ModelDefinition>)> = vec![(self.model, Arc::clone(&self.def))];
        sources.extend(self.joins.iter().map(|j| (j.model, Arc::clone(&j.def))));

        for (source_ref, source_def) in sources {
            // J holds the key pointing at an existing table.
            if let Some(fk_field) = target.foreign_key_to(source_ref.type_id) {
                let key = referenced_key(fk_field, &source_def)?;
                let left = Expr::Column { source: ColumnSource::Model(target_ref), field: fk_field.name.clone() };
                let right = Expr::Column { source: ColumnSource::Model(source_ref), field: key };
                return Some(left.equals(right));
            }
            // An existing table holds the key pointing at J.
            if let Some(fk_field) = source_def.foreign_key_to(target_ref.type_id) {
                let key = referenced_key(fk_field, &target)?;
                let left = Expr::Column { source: ColumnSource::Model(source_ref), field: fk_field.name.clone() };
                let right = Expr::Column { source: ColumnSource::Model(target_ref), field: key };
                return Some(left.equals(right));
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    // Projection and grouping
    // ------------------------------------------------------------------------

    /// Replaces the projection. An empty projection selects every model field.
    pub fn select(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.select = exprs.into_iter().collect();
        self
    }

    pub fn select_fields(self, fields: &[&str]) -> Self {
        self.select(fields.iter().map(|f| col(f)))
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn group_by(mut self, exprs: impl IntoIterator<Item = Expr>) -> Self {
        self.group_by = exprs.into_iter().collect();
        self
    }

    pub fn having(mut self, predicate: Expr) -> Self {
        self.having = Some(match self.having.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    // ------------------------------------------------------------------------
    // Ordering and paging
    // ------------------------------------------------------------------------

    /// Replaces the ordering with one ascending term.
    pub fn order_by(mut self, expr: Expr) -> Self {
        self.order_by = vec![OrderTerm { expr, desc: false }];
        self
    }

    pub fn order_by_desc(mut self, expr: Expr) -> Self {
        self.order_by = vec![OrderTerm { expr, desc: true }];
        self
    }

    pub fn then_by(mut self, expr: Expr) -> Self {
        self.order_by.push(OrderTerm { expr, desc: false });
        self
    }

    pub fn then_by_desc(mut self, expr: Expr) -> Self {
        self.order_by.push(OrderTerm { expr, desc: true });
        self
    }

    /// Replaces the ordering with field names; a leading `-` sorts descending.
    pub fn order_by_fields(mut self, fields: &[&str]) -> Self {
        self.order_by = fields
            .iter()
            .map(|f| match f.strip_prefix('-') {
                Some(name) => OrderTerm { expr: col(name.trim()), desc: true },
                None => OrderTerm { expr: col(f.trim()), desc: false },
            })
            .collect();
        self
    }

    pub fn order_by_random(mut self) -> Self {
        self.order_by = vec![OrderTerm { expr: Expr::Random, desc: false }];
        self
    }

    pub fn skip(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn take(mut self, rows: u64) -> Self {
        self.rows = Some(rows);
        self
    }

    pub fn limit(mut self, skip: u64, rows: u64) -> Self {
        self.offset = Some(skip);
        self.rows = Some(rows);
        self
    }

    pub fn clear_limits(mut self) -> Self {
        self.offset = None;
        self.rows = None;
        self
    }

    // ------------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------------

    fn renderer(&self, qualify: bool) -> Result<Renderer<'_>, Error> {
        if let Some(message) = &self.error {
            return Err(Error::invalid_argument(message.clone()));
        }
        Ok(Renderer {
            dialect: self.dialect.as_ref(),
            def: &self.def,
            model: self.model.type_id,
            joins: &self.joins,
            qualify,
            w: SqlWriter::new(self.dialect.as_ref()),
        })
    }

    fn render_select(&self, r: &mut Renderer<'_>, multi: Option<&[Arc<ModelDefinition>]>, paged: bool) -> Result<(), Error> {
        r.w.push("SELECT ");
        if self.distinct {
            r.w.push("DISTINCT ");
        }
        match multi {
            Some(defs) => r.multi_projection(defs)?,
            None => r.projection(&self.select)?,
        }
        r.from()?;
        r.where_clause(&self.ensure, self.filter.as_ref())?;
        if !self.group_by.is_empty() {
            r.w.push(" GROUP BY ");
            r.list(&self.group_by)?;
        }
        if let Some(having) = &self.having {
            r.w.push(" HAVING ");
            r.expr(having)?;
        }
        if paged {
            r.order_and_limit(&self.order_by, self.offset, self.rows)?;
        }
        Ok(())
    }

    pub fn to_select_statement(&self) -> Result<Command, Error> {
        let mut r = self.renderer(!self.joins.is_empty())?;
        self.render_select(&mut r, None, true)?;
        Ok(r.w.finish())
    }

    /// Selects every field of each model as `<table>__<column>`, for tuple reads.
    pub fn to_multi_select_statement(&self, defs: &[Arc<ModelDefinition>]) -> Result<Command, Error> {
        let mut r = self.renderer(true)?;
        self.render_select(&mut r, Some(defs), true)?;
        Ok(r.w.finish())
    }

    /// `COUNT(*)` over the filtered rows, ignoring order and paging.
    ///
    /// Grouped or distinct queries are counted through a derived table.
    pub fn to_count_statement(&self) -> Result<Command, Error> {
        let mut r = self.renderer(!self.joins.is_empty())?;
        if self.distinct || !self.group_by.is_empty() {
            r.w.push("SELECT COUNT(*) FROM (");
            self.render_select(&mut r, None, false)?;
            r.w.push(") count_source");
        } else {
            r.w.push("SELECT COUNT(*)");
            r.from()?;
            r.where_clause(&self.ensure, self.filter.as_ref())?;
        }
        Ok(r.w.finish())
    }

    pub fn to_delete_statement(&self) -> Result<Command, Error> {
        self.reject_joins("DELETE")?;
        let mut r = self.renderer(false)?;
        r.w.push("DELETE FROM ");
        r.w.push(&self.dialect.get_quoted_table_name(&self.def));
        r.where_clause(&self.ensure, self.filter.as_ref())?;
        Ok(r.w.finish())
    }

    /// `UPDATE ... SET field = value, ...` over the filtered rows.
    pub fn to_update_statement<S: AsRef<str>>(&self, values: &[(S, Value)]) -> Result<Command, Error> {
        self.render_update(values, false)
    }

    /// `UPDATE ... SET field = field + value, ...` over the filtered rows.
    pub fn to_update_add_statement<S: AsRef<str>>(&self, values: &[(S, Value)]) -> Result<Command, Error> {
        self.render_update(values, true)
    }

    fn render_update<S: AsRef<str>>(&self, values: &[(S, Value)], increment: bool) -> Result<Command, Error> {
        self.reject_joins("UPDATE")?;
        if values.is_empty() {
            return Err(Error::invalid_argument("update requires at least one field"));
        }
        let mut r = self.renderer(false)?;
        r.w.push("UPDATE ");
        r.w.push(&self.dialect.get_quoted_table_name(&self.def));
        r.w.push(" SET ");
        for (i, (name, value)) in values.iter().enumerate() {
            let name = name.as_ref();
            let field = self
                .def
                .get_field(name)
                .filter(|f| f.is_writable())
                .ok_or_else(|| Error::invalid_argument(format!("{} has no writable field '{}'", self.def.name, name)))?;
            let column = self.dialect.get_quoted_column_name(field);
            if i > 0 {
                r.w.push(", ");
            }
            r.w.push(&column).push(" = ");
            if increment {
                r.w.push(&column).push(" + ");
            }
            r.w.push_typed_param(value.clone(), field.field_type);
        }
        r.where_clause(&self.ensure, self.filter.as_ref())?;
        Ok(r.w.finish())
    }

    fn reject_joins(&self, statement: &str) -> Result<(), Error> {
        if self.joins.is_empty() {
            Ok(())
        } else {
            Err(Error::unsupported(format!("{} with joins", statement)))
        }
    }

    /// The select statement with parameters merged in, for diagnostics.
    pub fn to_debug_sql(&self) -> Result<String, Error> {
        Ok(self.to_select_statement()?.to_debug_sql(self.dialect.as_ref()))
    }
}

fn referenced_key(fk_field: &FieldDefinition, target: &ModelDefinition) -> Option<String> {
    let fk = fk_field.foreign_key.as_ref()?;
    match &fk.field {
        Some(field) => Some(field.clone()),
        None => target.primary_key().map(|f| f.name.clone()),
    }
}

// ============================================================================
// Renderer
// ============================================================================

struct Renderer<'a> {
    dialect: &'a dyn Dialect,
    def: &'a ModelDefinition,
    model: TypeId,
    joins: &'a [JoinClause],
    qualify: bool,
    w: SqlWriter<'a>,
}

impl<'a> Renderer<'a> {
    fn join_qualifier(&self, join: &JoinClause) -> String {
        match &join.alias {
            Some(alias) => self.dialect.quote_name(alias),
            None => self.dialect.get_quoted_table_name(&join.def),
        }
    }

    /// Table qualifier and definition behind a column source.
    fn resolve(&self, source: &ColumnSource) -> Result<(String, &'a ModelDefinition), Error> {
        let joins = self.joins;
        let main = || (self.dialect.get_quoted_table_name(self.def), self.def);
        match source {
            ColumnSource::Main => Ok(main()),
            ColumnSource::Model(model) if model.type_id == self.model => Ok(main()),
            ColumnSource::Model(model) => joins
                .iter()
                .find(|j| j.model.type_id == model.type_id)
                .map(|j| (self.join_qualifier(j), j.def.as_ref()))
                .ok_or_else(|| Error::invalid_argument(format!("{} is not part of the query", model.name))),
            ColumnSource::Alias(alias) => joins
                .iter()
                .find(|j| j.alias.as_deref() == Some(alias.as_str()))
                .map(|j| (self.join_qualifier(j), j.def.as_ref()))
                .ok_or_else(|| Error::invalid_argument(format!("no join aliased '{}'", alias))),
        }
    }

    fn qualified(&self, qualifier: &str, column: &str) -> String {
        if self.qualify { format!("{}.{}", qualifier, column) } else { column.to_string() }
    }

    /// SQL for a column reference plus its field definition when declared.
    fn column(&self, source: &ColumnSource, name: &str) -> Result<(String, Option<&'a FieldDefinition>), Error> {
        let (qualifier, def) = self.resolve(source)?;
        match def.get_field(name) {
            Some(field) => match &field.custom_select {
                Some(sql) => Ok((format!("({})", sql), Some(field))),
                None => Ok((self.qualified(&qualifier, &self.dialect.get_quoted_column_name(field)), Some(field))),
            },
            None => {
                let physical = self.dialect.apply_name_restrictions(&self.dialect.naming().column_name(name));
                Ok((self.qualified(&qualifier, &self.dialect.quote_name(&physical)), None))
            }
        }
    }

    fn type_hint(&self, expr: &Expr) -> Result<Option<FieldType>, Error> {
        match expr {
            Expr::Column { source, field } => Ok(self.column(source, field)?.1.map(|f| f.field_type)),
            _ => Ok(None),
        }
    }

    /// Renders an operand, binding bare values with the type of the column they meet.
    fn operand(&mut self, expr: &Expr, hint: Option<FieldType>) -> Result<(), Error> {
        match (expr, hint) {
            (Expr::Value(value), Some(field_type)) => {
                self.w.push_typed_param(value.clone(), field_type);
                Ok(())
            }
            _ => self.expr(expr),
        }
    }

    fn list(&mut self, exprs: &[Expr]) -> Result<(), Error> {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.w.push(", ");
            }
            self.expr(expr)?;
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), Error> {
        match expr {
            Expr::Column { source, field } => {
                let (sql, _) = self.column(source, field)?;
                self.w.push(&sql);
            }
            Expr::Value(value) => {
                self.w.push_param(value.clone());
            }
            Expr::Raw(sql) => {
                self.w.push(sql);
            }
            Expr::Binary { op, left, right } if op.is_logical() => {
                self.logical_operand(*op, left)?;
                self.w.push(" ").push(op.as_sql()).push(" ");
                self.logical_operand(*op, right)?;
            }
            Expr::Binary { op, left, right } if op.is_comparison() => self.comparison(*op, left, right)?,
            Expr::Binary { op, left, right } => {
                let (left_hint, right_hint) = (self.type_hint(left)?, self.type_hint(right)?);
                self.w.push("(");
                self.operand(left, right_hint)?;
                self.w.push(" ").push(op.as_sql()).push(" ");
                self.operand(right, left_hint)?;
                self.w.push(")");
            }
            Expr::Not(inner) => {
                self.w.push("NOT (");
                self.expr(inner)?;
                self.w.push(")");
            }
            Expr::IsNull { expr, negated } => {
                self.expr(expr)?;
                self.w.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Expr::InList { expr, values, negated } => self.in_list(expr, values, *negated)?,
            Expr::Like { expr, pattern, negated, escaped } => {
                self.expr(expr)?;
                self.w.push(if *negated { " NOT LIKE " } else { " LIKE " });
                self.w.push_param(Value::Text(pattern.clone()));
                if *escaped {
                    self.w.push(&format!(" ESCAPE '{}'", LIKE_ESCAPE));
                }
            }
            Expr::Between { expr, low, high } => {
                let hint = self.type_hint(expr)?;
                self.expr(expr)?;
                self.w.push(" BETWEEN ");
                self.operand(low, hint)?;
                self.w.push(" AND ");
                self.operand(high, hint)?;
            }
            Expr::Func { name, args } => {
                self.w.push(name).push("(");
                self.list(args)?;
                self.w.push(")");
            }
            Expr::CountDistinct(inner) => {
                self.w.push("COUNT(DISTINCT ");
                self.expr(inner)?;
                self.w.push(")");
            }
            Expr::Alias { expr, .. } => self.expr(expr)?,
            Expr::Random => {
                self.w.push(self.dialect.sql_random());
            }
            Expr::Star => {
                self.w.push("*");
            }
        }
        Ok(())
    }

    fn logical_operand(&mut self, parent: BinaryOp, expr: &Expr) -> Result<(), Error> {
        let wrap = matches!(expr, Expr::Binary { op, .. } if op.is_logical() && *op != parent);
        if wrap {
            self.w.push("(");
        }
        self.expr(expr)?;
        if wrap {
            self.w.push(")");
        }
        Ok(())
    }

    fn comparison(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(), Error> {
        let null_side = match (left, right) {
            (other, Expr::Value(Value::Null)) | (Expr::Value(Value::Null), other) => Some(other),
            _ => None,
        };
        if let Some(other) = null_side {
            match op {
                BinaryOp::Eq => return self.expr(&other.clone().is_null()),
                BinaryOp::Ne => return self.expr(&other.clone().is_not_null()),
                _ => {}
            }
        }

        let (left_hint, right_hint) = (self.type_hint(left)?, self.type_hint(right)?);
        self.operand(left, right_hint)?;
        self.w.push(" ").push(op.as_sql()).push(" ");
        self.operand(right, left_hint)
    }

    fn in_list(&mut self, expr: &Expr, values: &[Value], negated: bool) -> Result<(), Error> {
        if values.is_empty() && negated {
            self.w.push("1 = 1");
            return Ok(());
        }
        let hint = self.type_hint(expr)?;
        self.expr(expr)?;
        self.w.push(if negated { " NOT IN " } else { " IN " });
        if values.is_empty() {
            self.w.push(&self.dialect.sql_spread(&[]));
            return Ok(());
        }
        self.w.push("(");
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.w.push(",");
            }
            match hint {
                Some(field_type) => self.w.push_typed_param(value.clone(), field_type),
                None => self.w.push_param(value.clone()),
            };
        }
        self.w.push(")");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Clauses
    // ------------------------------------------------------------------------

    /// A selected field, cast when the driver cannot decode the native type.
    fn field_projection(&self, qualifier: &str, field: &FieldDefinition, label: Option<&str>) -> String {
        let column = self.dialect.get_column_name(field);
        let label = label.map(str::to_string).unwrap_or_else(|| column.clone());
        if let Some(sql) = &field.custom_select {
            return format!("({}) AS {}", sql, self.dialect.quote_name(&label));
        }
        let base = self.qualified(qualifier, &self.dialect.quote_name(&column));
        match self.dialect.select_column_expr(&base, field) {
            Some(cast) => format!("{} AS {}", cast, self.dialect.quote_name(&label)),
            None if label != column => format!("{} AS {}", base, self.dialect.quote_name(&label)),
            None => base,
        }
    }

    fn projection(&mut self, select: &[Expr]) -> Result<(), Error> {
        if select.is_empty() {
            let qualifier = self.dialect.get_quoted_table_name(self.def);
            let columns: Vec<String> =
                self.def.fields.iter().map(|f| self.field_projection(&qualifier, f, None)).collect();
            self.w.push(&columns.join(", "));
            return Ok(());
        }

        for (i, expr) in select.iter().enumerate() {
            if i > 0 {
                self.w.push(", ");
            }
            match expr {
                Expr::Column { source, field } => {
                    let (qualifier, def) = self.resolve(source)?;
                    match def.get_field(field) {
                        Some(f) => {
                            let sql = self.field_projection(&qualifier, f, None);
                            self.w.push(&sql);
                        }
                        None => self.expr(expr)?,
                    }
                }
                Expr::Alias { expr, alias } => {
                    self.expr(expr)?;
                    let label = self.dialect.quote_name(alias);
                    self.w.push(" AS ").push(&label);
                }
                other => self.expr(other)?,
            }
        }
        Ok(())
    }

    fn multi_projection(&mut self, defs: &[Arc<ModelDefinition>]) -> Result<(), Error> {
        let mut columns = Vec::new();
        for def in defs {
            let qualifier = if def.name == self.def.name {
                self.dialect.get_quoted_table_name(self.def)
            } else {
                let join = self
                    .joins
                    .iter()
                    .find(|j| j.def.name == def.name)
                    .ok_or_else(|| Error::invalid_argument(format!("{} is not part of the query", def.name)))?;
                self.join_qualifier(join)
            };
            let prefix = self.dialect.get_table_name(def);
            for field in &def.fields {
                let label = format!("{}__{}", prefix, self.dialect.get_column_name(field));
                columns.push(self.field_projection(&qualifier, field, Some(&label)));
            }
        }
        self.w.push(&columns.join(", "));
        Ok(())
    }

    fn from(&mut self) -> Result<(), Error> {
        let table = self.dialect.get_quoted_table_name(self.def);
        self.w.push(" FROM ").push(&table);
        let joins = self.joins;
        for join in joins {
            let target = self.dialect.get_quoted_table_name(&join.def);
            self.w.push(" ").push(join.kind.as_sql()).push(" ").push(&target);
            if let Some(alias) = &join.alias {
                let alias = self.dialect.quote_name(alias);
                self.w.push(" ").push(&alias);
            }
            self.w.push(" ON ");
            self.expr(&join.on)?;
        }
        Ok(())
    }

    /// `WHERE ensure1 AND ensure2 AND (filter)`.
    fn where_clause(&mut self, ensure: &[Expr], filter: Option<&Expr>) -> Result<(), Error> {
        if ensure.is_empty() && filter.is_none() {
            return Ok(());
        }
        self.w.push(" WHERE ");
        for (i, predicate) in ensure.iter().enumerate() {
            if i > 0 {
                self.w.push(" AND ");
            }
            self.logical_operand(BinaryOp::And, predicate)?;
        }
        if let Some(filter) = filter {
            if ensure.is_empty() {
                self.expr(filter)?;
            } else {
                self.w.push(" AND (");
                self.expr(filter)?;
                self.w.push(")");
            }
        }
        Ok(())
    }

    fn order_and_limit(&mut self, terms: &[OrderTerm], offset: Option<u64>, rows: Option<u64>) -> Result<(), Error> {
        let paged = offset.is_some() || rows.is_some();
        if !terms.is_empty() {
            self.w.push(" ORDER BY ");
            for (i, term) in terms.iter().enumerate() {
                if i > 0 {
                    self.w.push(", ");
                }
                self.expr(&term.expr)?;
                if term.desc {
                    self.w.push(" DESC");
                }
            }
        } else if paged && self.dialect.paging_requires_order_by() {
            let qualifier = self.dialect.get_quoted_table_name(self.def);
            let keys: Vec<String> = self
                .def
                .primary_keys()
                .iter()
                .map(|f| self.qualified(&qualifier, &self.dialect.get_quoted_column_name(f)))
                .collect();
            self.w.push(" ORDER BY ");
            if keys.is_empty() {
                self.w.push("(SELECT NULL)");
            } else {
                self.w.push(&keys.join(", "));
            }
        }

        let limit = self.dialect.sql_limit(offset, rows);
        if !limit.is_empty() {
            self.w.push(" ").push(&limit);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqlServerDialect, SqliteDialect};
    use crate::model::{FieldDefinition, ForeignKey, ModelDefinition};
    use crate::row::RowReader;

    #[derive(Debug, Clone, Default)]
    struct Person {
        id: i32,
        name: String,
        age: i32,
    }

    impl crate::model::FromDataRow for Person {
        fn from_data_row(row: &RowReader<'_>) -> Result<Self, Error> {
            let def = Self::model_definition();
            let row = row.for_model(&def);
            Ok(Self { id: row.get("id")?, name: row.get("name")?, age: row.get("age")? })
        }
    }

    impl Model for Person {
        fn build_definition() -> ModelDefinition {
            ModelDefinition::new("Person")
                .field(FieldDefinition::new("id", FieldType::Int32).primary_key().auto_increment())
                .field(FieldDefinition::new("name", FieldType::String).alias("Name"))
                .field(FieldDefinition::new("age", FieldType::Int32).alias("Age"))
        }

        fn get_value(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.to_value()),
                "name" => Some(self.name.to_value()),
                "age" => Some(self.age.to_value()),
                _ => None,
            }
        }

        fn set_value(&mut self, field: &str, value: Value) -> Result<(), Error> {
            use crate::value::FromValue;
            match field {
                "id" => self.id = i32::from_value(value)?,
                "name" => self.name = String::from_value(value)?,
                "age" => self.age = i32::from_value(value)?,
                _ => return Err(Error::invalid_argument(format!("unknown field {}", field))),
            }
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Pet {
        id: i32,
        owner_id: i32,
    }

    impl crate::model::FromDataRow for Pet {
        fn from_data_row(row: &RowReader<'_>) -> Result<Self, Error> {
            let def = Self::model_definition();
            let row = row.for_model(&def);
            Ok(Self { id: row.get("id")?, owner_id: row.get("owner_id")? })
        }
    }

    impl Model for Pet {
        fn build_definition() -> ModelDefinition {
            ModelDefinition::new("Pet")
                .field(FieldDefinition::new("id", FieldType::Int32))
                .field(FieldDefinition::new("owner_id", FieldType::Int32).foreign_key(ForeignKey::to::<Person>()))
        }

        fn get_value(&self, field: &str) -> Option<Value> {
            match field {
                "id" => Some(self.id.to_value()),
                "owner_id" => Some(self.owner_id.to_value()),
                _ => None,
            }
        }

        fn set_value(&mut self, _field: &str, _value: Value) -> Result<(), Error> {
            Ok(())
        }
    }

    fn sqlite() -> SqlExpression<Person> {
        SqlExpression::new(Arc::new(SqliteDialect::new()))
    }

    #[test]
    fn selects_every_field_by_default() {
        let cmd = sqlite().to_select_statement().unwrap();
        assert_eq!(cmd.sql, "SELECT \"id\", \"Name\", \"Age\" FROM \"Person\"");
        assert!(cmd.params.is_empty());
    }

    #[test]
    fn ensure_is_anded_in_front_of_user_filter() {
        let q = sqlite()
            .filter(col("name").equals("a"))
            .ensure(col("age").gt(5))
            .or(col("name").equals("b"))
            .ensure(col("id").not_equals(0));
        let cmd = q.to_select_statement().unwrap();
        assert!(
            cmd.sql.ends_with("WHERE \"Age\" > ? AND \"id\" <> ? AND (\"Name\" = ? OR \"Name\" = ?)"),
            "{}",
            cmd.sql
        );
        assert_eq!(cmd.params, vec![Value::I32(5), Value::I32(0), Value::Text("a".into()), Value::Text("b".into())]);
    }

    #[test]
    fn in_list_uses_one_parameter_per_value() {
        let q: SqlExpression<Person> = SqlExpression::new(Arc::new(SqlServerDialect::new()));
        let fixed = q.clone().filter(Sql::in_(col("age"), [1, 2, 3])).to_select_statement().unwrap();
        let collected = q.filter(col("age").in_list(vec![1, 2, 3])).to_select_statement().unwrap();
        assert!(fixed.sql.ends_with("WHERE [Age] IN (@0,@1,@2)"), "{}", fixed.sql);
        assert_eq!(fixed.sql, collected.sql);
        assert_eq!(fixed.params, vec![Value::I32(1), Value::I32(2), Value::I32(3)]);
    }

    #[test]
    fn empty_in_list_never_matches() {
        let cmd = sqlite().filter(col("age").in_list(Vec::<i32>::new())).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("WHERE \"Age\" IN (NULL)"));
    }

    #[test]
    fn null_comparisons_render_is_null() {
        let cmd = sqlite().filter(col("name").equals(Value::Null)).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("WHERE \"Name\" IS NULL"));
        assert!(cmd.params.is_empty());
    }

    #[test]
    fn like_helpers_escape_wildcards() {
        let cmd = sqlite().filter(col("name").starts_with("50%_off")).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("\"Name\" LIKE ? ESCAPE '^'"));
        assert_eq!(cmd.params, vec![Value::Text("50^%^_off%".into())]);
    }

    #[test]
    fn paging_follows_order_by() {
        let cmd = sqlite().order_by_fields(&["-age", "name"]).limit(10, 5).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("ORDER BY \"Age\" DESC, \"Name\" LIMIT 5 OFFSET 10"), "{}", cmd.sql);
    }

    #[test]
    fn sql_server_paging_orders_by_key() {
        let q: SqlExpression<Person> = SqlExpression::new(Arc::new(SqlServerDialect::new()));
        let cmd = q.take(1).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("ORDER BY [id] OFFSET 0 ROWS FETCH NEXT 1 ROWS ONLY"), "{}", cmd.sql);
    }

    #[test]
    fn grouped_projection_with_aliases() {
        let cmd = sqlite()
            .select([col("age"), Sql::count_all().as_("total"), Sql::count_distinct(col("name")).as_("names")])
            .group_by([col("age")])
            .having(Sql::count_all().gt(1))
            .to_select_statement()
            .unwrap();
        assert_eq!(
            cmd.sql,
            "SELECT \"Age\", COUNT(*) AS \"total\", COUNT(DISTINCT \"Name\") AS \"names\" FROM \"Person\" \
             GROUP BY \"Age\" HAVING COUNT(*) > ?"
        );
    }

    #[test]
    fn count_wraps_grouped_queries() {
        let plain = sqlite().filter(col("age").gt(1)).order_by(col("age")).to_count_statement().unwrap();
        assert_eq!(plain.sql, "SELECT COUNT(*) FROM \"Person\" WHERE \"Age\" > ?");

        let grouped = sqlite().select([col("age")]).group_by([col("age")]).to_count_statement().unwrap();
        assert_eq!(grouped.sql, "SELECT COUNT(*) FROM (SELECT \"Age\" FROM \"Person\" GROUP BY \"Age\") count_source");
    }

    #[test]
    fn joins_qualify_columns() {
        let cmd = sqlite().join_on_fk::<Pet>().filter(col_of::<Pet>("id").gt(3)).to_select_statement().unwrap();
        assert!(
            cmd.sql.contains("INNER JOIN \"Pet\" ON \"Pet\".\"owner_id\" = \"Person\".\"id\""),
            "{}",
            cmd.sql
        );
        assert!(cmd.sql.starts_with("SELECT \"Person\".\"id\", \"Person\".\"Name\""));
        assert!(cmd.sql.ends_with("WHERE \"Pet\".\"id\" > ?"));
    }

    #[test]
    fn multi_select_prefixes_columns() {
        let defs = vec![Person::model_definition(), Pet::model_definition()];
        let cmd = sqlite().join_on_fk::<Pet>().to_multi_select_statement(&defs).unwrap();
        assert!(cmd.sql.contains("\"Person\".\"Name\" AS \"Person__Name\""), "{}", cmd.sql);
        assert!(cmd.sql.contains("\"Pet\".\"owner_id\" AS \"Pet__owner_id\""), "{}", cmd.sql);
    }

    #[test]
    fn unknown_join_is_reported_on_render() {
        let err = sqlite().filter(col_of::<Pet>("id").equals(1)).to_select_statement().unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn update_and_delete_keep_ensure() {
        let q = sqlite().ensure(col("age").ge(18)).filter(col("name").equals("x"));
        let update = q.to_update_statement(&[("name", Value::Text("y".into()))]).unwrap();
        assert_eq!(update.sql, "UPDATE \"Person\" SET \"Name\" = ? WHERE \"Age\" >= ? AND (\"Name\" = ?)");

        let add = q.to_update_add_statement(&[("age", Value::I32(1))]).unwrap();
        assert!(add.sql.starts_with("UPDATE \"Person\" SET \"Age\" = \"Age\" + ?"));

        let delete = q.to_delete_statement().unwrap();
        assert_eq!(delete.sql, "DELETE FROM \"Person\" WHERE \"Age\" >= ? AND (\"Name\" = ?)");
    }

    #[test]
    fn postgres_numbers_parameters_and_casts_by_column() {
        let q: SqlExpression<Person> = SqlExpression::new(Arc::new(PostgresDialect::new()));
        let cmd = q.filter(col("age").between(1, 9)).to_select_statement().unwrap();
        assert!(cmd.sql.ends_with("WHERE \"Age\" BETWEEN $1 AND $2"), "{}", cmd.sql);
        assert_eq!(cmd.param_types, vec![Some(FieldType::Int32), Some(FieldType::Int32)]);
    }

    #[test]
    fn debug_sql_inlines_parameters() {
        let sql = sqlite().filter(col("name").equals("O'Hara")).to_debug_sql().unwrap();
        assert!(sql.ends_with("WHERE \"Name\" = 'O''Hara'"));
    }
}
