//! Query description and composable scopes.
//!
//! A [`Query`] is plain data: filters, ordering, eager-loads, paging and
//! soft-delete visibility. Stores translate it to their own dialect. A
//! [`Scope`] is a function `Query -> Query` that callers stack onto any read.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::TableMeta;

/// A single column predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// SQL-style pattern: `%` matches any run, `_` any single character.
    Like(String, String),
    IsNull(String),
    NotNull(String),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _)
            | Filter::Ne(c, _)
            | Filter::Gt(c, _)
            | Filter::Gte(c, _)
            | Filter::Lt(c, _)
            | Filter::Lte(c, _)
            | Filter::In(c, _)
            | Filter::Like(c, _)
            | Filter::IsNull(c)
            | Filter::NotNull(c) => c,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Which rows of a soft-deletable table a query sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    /// Rows without a deletion timestamp.
    #[default]
    Live,
    /// Every row.
    WithDeleted,
    /// Only soft-deleted rows.
    OnlyDeleted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub preloads: Vec<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub visibility: Visibility,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order.push(Order {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn preload(mut self, relation: impl Into<String>) -> Self {
        let relation = relation.into();
        if !self.preloads.contains(&relation) {
            self.preloads.push(relation);
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Apply `scopes` in order.
    pub fn apply(self, scopes: &[Scope]) -> Self {
        scopes.iter().fold(self, |query, scope| scope.apply(query))
    }

    /// Filters including the soft-delete predicate implied by `visibility`.
    pub fn effective_filters(&self, table: &TableMeta) -> Vec<Filter> {
        let mut filters = self.filters.clone();
        if let Some(column) = table.soft_delete {
            match self.visibility {
                Visibility::Live => filters.push(Filter::IsNull(column.to_string())),
                Visibility::OnlyDeleted => filters.push(Filter::NotNull(column.to_string())),
                Visibility::WithDeleted => {}
            }
        }
        filters
    }

    /// The same predicate without paging, ordering or eager-loads.
    pub fn for_count(&self) -> Self {
        Self {
            filters: self.filters.clone(),
            visibility: self.visibility,
            ..Self::default()
        }
    }
}

/// A composable query modifier.
#[derive(Clone)]
pub struct Scope(Arc<dyn Fn(Query) -> Query + Send + Sync>);

impl Scope {
    pub fn new(f: impl Fn(Query) -> Query + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn apply(&self, query: Query) -> Query {
        (self.0)(query)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Scope(..)")
    }
}

/// Ready-made scopes.
pub mod scope {
    use super::*;

    pub fn filter(filter: Filter) -> Scope {
        Scope::new(move |q| q.filter(filter.clone()))
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Eq(column.into(), value.into()))
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Ne(column.into(), value.into()))
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Gt(column.into(), value.into()))
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Gte(column.into(), value.into()))
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Lt(column.into(), value.into()))
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Value>) -> Scope {
        filter(Filter::Lte(column.into(), value.into()))
    }

    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Scope {
        filter(Filter::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Scope {
        filter(Filter::Like(column.into(), pattern.into()))
    }

    pub fn is_null(column: impl Into<String>) -> Scope {
        filter(Filter::IsNull(column.into()))
    }

    pub fn not_null(column: impl Into<String>) -> Scope {
        filter(Filter::NotNull(column.into()))
    }

    pub fn order_by(column: impl Into<String>, direction: Direction) -> Scope {
        let column = column.into();
        Scope::new(move |q| q.order_by(column.clone(), direction))
    }

    pub fn asc(column: impl Into<String>) -> Scope {
        order_by(column, Direction::Asc)
    }

    pub fn desc(column: impl Into<String>) -> Scope {
        order_by(column, Direction::Desc)
    }

    /// Eager-load a has-many relation by name.
    pub fn preload(relation: impl Into<String>) -> Scope {
        let relation = relation.into();
        Scope::new(move |q| q.preload(relation.clone()))
    }

    pub fn with_deleted() -> Scope {
        Scope::new(|q| q.visibility(Visibility::WithDeleted))
    }

    pub fn only_deleted() -> Scope {
        Scope::new(|q| q.visibility(Visibility::OnlyDeleted))
    }

    pub fn limit(limit: usize) -> Scope {
        Scope::new(move |q| q.limit(limit))
    }

    pub fn offset(offset: usize) -> Scope {
        Scope::new(move |q| q.offset(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scopes_apply_in_order() {
        let scopes = vec![
            scope::eq("category", "books"),
            scope::desc("price"),
            scope::asc("id"),
            scope::preload("reviews"),
            scope::preload("reviews"),
        ];
        let query = Query::new().apply(&scopes);
        assert_eq!(
            query.filters,
            vec![Filter::Eq("category".into(), json!("books"))]
        );
        assert_eq!(query.order[0].column, "price");
        assert_eq!(query.order[0].direction, Direction::Desc);
        assert_eq!(query.order[1].column, "id");
        assert_eq!(query.preloads, vec!["reviews".to_string()]);
    }

    #[test]
    fn test_for_count_drops_paging() {
        let query = Query::new()
            .apply(&[scope::gt("stock", 3), scope::limit(5), scope::offset(10), scope::with_deleted()])
            .order_by("id", Direction::Asc);
        let count = query.for_count();
        assert_eq!(count.filters, query.filters);
        assert_eq!(count.visibility, Visibility::WithDeleted);
        assert!(count.limit.is_none());
        assert!(count.offset.is_none());
        assert!(count.order.is_empty());
    }

    #[test]
    fn test_effective_filters_follow_visibility() {
        let soft = TableMeta::new("products", "id").with_soft_delete("deleted_at");
        let hard = TableMeta::new("tags", "id");

        let live = Query::new();
        assert_eq!(
            live.effective_filters(&soft),
            vec![Filter::IsNull("deleted_at".into())]
        );
        assert!(live.effective_filters(&hard).is_empty());

        let trashed = Query::new().visibility(Visibility::OnlyDeleted);
        assert_eq!(
            trashed.effective_filters(&soft),
            vec![Filter::NotNull("deleted_at".into())]
        );

        let all = Query::new().visibility(Visibility::WithDeleted);
        assert!(all.effective_filters(&soft).is_empty());
    }

    #[test]
    fn test_is_in_collects_values() {
        let query = Query::new().apply(&[scope::is_in("id", [1, 2, 3])]);
        assert_eq!(
            query.filters,
            vec![Filter::In("id".into(), vec![json!(1), json!(2), json!(3)])]
        );
        assert_eq!(query.filters[0].column(), "id");
    }

    #[test]
    fn test_custom_scope() {
        let cheap = Scope::new(|q| q.filter(Filter::Lt("price".into(), json!(10.0))).limit(3));
        let query = Query::new().apply(&[cheap]);
        assert_eq!(query.limit, Some(3));
        assert_eq!(query.filters.len(), 1);
    }
}
