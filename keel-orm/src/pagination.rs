//! # Pagination Module
//!
//! A serde-friendly [`Pagination`] request and the [`Page`] it produces, so
//! paging parameters can come straight from query strings and results go
//! straight back out as JSON.
//!
//! ```rust,ignore
//! use keel_orm::Pagination;
//!
//! let pagination = Pagination::new(2, 20);
//! let page = pagination.paginate(&mut conn, &conn.from::<Person>().order_by(col("name"))).await?;
//!
//! println!("{} of {} pages", page.page, page.total_pages);
//! ```

use serde::{Deserialize, Serialize};

use crate::{Error, database::DbConnection, expression::SqlExpression, model::Model};

/// Page request. Pages are 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub page: u64,

    #[serde(default = "default_limit")]
    pub limit: u64,
}

/// One page of results plus totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Rows matching the query across all pages.
    pub total: i64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

fn default_limit() -> u64 {
    10
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 0, limit: default_limit() }
    }
}

impl Pagination {
    pub fn new(page: u64, limit: u64) -> Self {
        Self { page, limit }
    }

    /// Sets offset and row count on the query.
    pub fn apply<T: Model>(self, query: SqlExpression<T>) -> SqlExpression<T> {
        query.limit(self.page * self.limit, self.limit)
    }

    /// Counts every match, then fetches this page.
    pub async fn paginate<T: Model>(self, conn: &mut DbConnection, query: &SqlExpression<T>) -> Result<Page<T>, Error> {
        let total = conn.count(&query.clone().clear_limits()).await?;
        let items = conn.select(&self.apply(query.clone())).await?;
        Ok(Page { items, total, page: self.page, limit: self.limit, total_pages: self.total_pages(total) })
    }

    fn total_pages(&self, total: i64) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        (total.max(0) as u64).div_ceil(self.limit)
    }
}

impl DbConnection {
    /// Shorthand for [`Pagination::paginate`].
    pub async fn paginate<T: Model>(&mut self, query: &SqlExpression<T>, pagination: Pagination) -> Result<Page<T>, Error> {
        pagination.paginate(self, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_serde() {
        let p: Pagination = serde_json::from_str(r#"{"page": 3}"#).unwrap();
        assert_eq!(p, Pagination::new(3, 10));
        assert_eq!(Pagination::default(), Pagination::new(0, 10));
    }

    #[test]
    fn total_pages_round_up() {
        let p = Pagination::new(0, 10);
        assert_eq!(p.total_pages(0), 0);
        assert_eq!(p.total_pages(10), 1);
        assert_eq!(p.total_pages(11), 2);
        assert_eq!(Pagination::new(0, 0).total_pages(5), 0);
    }

    #[test]
    fn page_serializes_with_totals() {
        let page = Page { items: vec![1, 2], total: 12, page: 1, limit: 2, total_pages: 6 };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["total_pages"], 6);
        assert_eq!(json["items"], serde_json::json!([1, 2]));
    }
}
