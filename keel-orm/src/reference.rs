//! # References
//!
//! Loading and saving of related rows held in non-column fields.
//!
//! A child model declares `#[orm(foreign_key = "Parent")]` on its key column.
//! The parent may then hold `#[orm(reference)] children: Vec<Child>`, and the
//! child may hold `#[orm(reference)] parent: Option<Parent>`.
//! `#[derive(Model)]` implements [`References`] for such models using the
//! helpers in this module; models without reference fields get the no-op
//! defaults.
//!
//! Related rows are matched on key values in memory, so loading a page of
//! parents costs one extra query per reference field, not one per parent.

use std::any::TypeId;
use std::collections::HashMap;

use async_trait::async_trait;

use crate::{
    Error,
    database::DbConnection,
    expression::{SqlExpression, col},
    model::Model,
    value::Value,
};

/// Models whose reference fields can be loaded and saved.
#[async_trait]
pub trait References: Model {
    /// Fills every reference field of `items`.
    async fn load_references(_items: &mut [Self], _conn: &mut DbConnection) -> Result<(), Error> {
        Ok(())
    }

    /// Saves referenced parents and copies their keys into this row.
    async fn save_parents(&mut self, _conn: &mut DbConnection) -> Result<(), Error> {
        Ok(())
    }

    /// Copies this row's key into referenced children and saves them.
    async fn save_children(&mut self, _conn: &mut DbConnection) -> Result<(), Error> {
        Ok(())
    }
}

impl DbConnection {
    /// Runs a query and loads every reference field of the results.
    pub async fn load_select<T: References>(&mut self, query: &SqlExpression<T>) -> Result<Vec<T>, Error> {
        let mut items = self.select(query).await?;
        T::load_references(&mut items, self).await?;
        Ok(items)
    }

    pub async fn load_single_by_id<T: References>(&mut self, id: impl crate::ToValue) -> Result<Option<T>, Error> {
        let Some(item) = self.single_by_id::<T>(id).await? else { return Ok(None) };
        let mut items = vec![item];
        T::load_references(&mut items, self).await?;
        Ok(items.pop())
    }

    /// Saves parents, the entity, then children, in one transaction.
    ///
    /// Returns `true` when the entity itself was inserted.
    pub async fn save_references<T: References>(&mut self, entity: &mut T) -> Result<bool, Error> {
        let mut tx = self.begin().await?;
        entity.save_parents(&mut tx).await?;
        let inserted = tx.save(entity).await?;
        entity.save_children(&mut tx).await?;
        tx.commit().await?;
        Ok(inserted)
    }
}

// ============================================================================
// Helpers used by generated code
// ============================================================================

/// The child column pointing at `P`, and the parent column it targets.
fn link<C: Model, P: Model>() -> Result<(String, String), Error> {
    let child = C::model_definition();
    let parent = P::model_definition();
    let fk_field = child.foreign_key_to(TypeId::of::<P>()).ok_or_else(|| {
        Error::invalid_argument(format!("{} has no foreign key to {}", child.name, parent.name))
    })?;
    let target = match fk_field.foreign_key.as_ref().and_then(|fk| fk.field.clone()) {
        Some(field) => field,
        None => parent
            .primary_key()
            .map(|f| f.name.clone())
            .ok_or_else(|| Error::invalid_argument(format!("{} has no primary key", parent.name)))?,
    };
    Ok((fk_field.name.clone(), target))
}

fn distinct_keys<M: Model>(items: &[M], field: &str) -> Vec<Value> {
    let mut seen = std::collections::HashSet::new();
    items
        .iter()
        .filter_map(|item| item.get_value(field))
        .filter(|v| !v.is_null() && seen.insert(v.to_string()))
        .collect()
}

/// Children of `P` whose foreign key matches one of `parents`.
pub async fn load_many<P: Model, C: Model>(conn: &mut DbConnection, parents: &[P]) -> Result<Vec<C>, Error> {
    let (fk, target) = link::<C, P>()?;
    let keys = distinct_keys(parents, &target);
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let query = conn.from::<C>().filter(col(&fk).in_list(keys));
    conn.select(&query).await
}

/// Parents referenced by the foreign keys of `children`.
pub async fn load_one<C: Model, P: Model>(conn: &mut DbConnection, children: &[C]) -> Result<Vec<P>, Error> {
    let (fk, target) = link::<C, P>()?;
    let keys = distinct_keys(children, &fk);
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let query = conn.from::<P>().filter(col(&target).in_list(keys));
    conn.select(&query).await
}

/// Distributes `children` into the matching parent's collection.
///
/// Children without a matching parent are dropped.
pub fn merge<P, C, F>(parents: &mut [P], children: Vec<C>, mut slot: F) -> Result<(), Error>
where
    P: Model,
    C: Model,
    F: FnMut(&mut P) -> &mut Vec<C>,
{
    let (fk, target) = link::<C, P>()?;
    let mut groups: HashMap<String, Vec<C>> = HashMap::new();
    for child in children {
        let key = child.get_value(&fk).unwrap_or(Value::Null);
        if key.is_null() {
            continue;
        }
        groups.entry(key.to_string()).or_default().push(child);
    }
    for parent in parents.iter_mut() {
        let key = parent.get_value(&target).unwrap_or(Value::Null).to_string();
        if let Some(found) = groups.remove(&key) {
            slot(parent).extend(found);
        }
    }
    Ok(())
}

/// Sets each child's single reference to the parent its foreign key names.
pub fn merge_reference<C, P, F>(children: &mut [C], parents: Vec<P>, mut slot: F) -> Result<(), Error>
where
    C: Model,
    P: Model + Clone,
    F: FnMut(&mut C) -> &mut Option<P>,
{
    let (fk, target) = link::<C, P>()?;
    let by_key: HashMap<String, P> = parents
        .into_iter()
        .map(|p| (p.get_value(&target).unwrap_or(Value::Null).to_string(), p))
        .collect();
    for child in children.iter_mut() {
        let key = child.get_value(&fk).unwrap_or(Value::Null);
        if key.is_null() {
            continue;
        }
        *slot(child) = by_key.get(&key.to_string()).cloned();
    }
    Ok(())
}

/// Saves `parent`, then points `child`'s foreign key at it.
pub async fn save_parent<C: Model, P: Model>(conn: &mut DbConnection, child: &mut C, parent: &mut P) -> Result<(), Error> {
    let (fk, target) = link::<C, P>()?;
    conn.save(parent).await?;
    child.set_value(&fk, parent.get_value(&target).unwrap_or(Value::Null))
}

/// Points every child's foreign key at `parent`, then saves each child.
pub async fn save_children<P: Model, C: Model>(conn: &mut DbConnection, parent: &P, children: &mut [C]) -> Result<(), Error> {
    let (fk, target) = link::<C, P>()?;
    let key = parent.get_value(&target).unwrap_or(Value::Null);
    for child in children.iter_mut() {
        child.set_value(&fk, key.clone())?;
        conn.save(child).await?;
    }
    Ok(())
}
