//! Statement generation for [`PgStore`](super::PgStore).
//!
//! Rows travel as JSON in both directions. Reads project `to_jsonb(t.*)`;
//! writes expand a JSON document with `jsonb_populate_record(set)` so the
//! server converts every value to its column type. Filter operands are
//! converted the same way, which keeps comparisons typed (timestamps compare
//! as timestamps, numerics as numerics).

use once_cell::sync::Lazy;
use regex::Regex;
use repokit_core::{Direction, Filter, Query, RepoError, RepoResult, Row, TableMeta};
use serde_json::Value;
use tokio_postgres::types::ToSql;

static IDENTIFIER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$"));

/// Reject anything that is not a plain SQL identifier.
pub(crate) fn check_identifier(name: &str) -> RepoResult<&str> {
    let pattern = IDENTIFIER
        .as_ref()
        .map_err(|e| RepoError::invalid_query(format!("identifier pattern: {}", e)))?;
    if pattern.is_match(name) {
        Ok(name)
    } else {
        Err(RepoError::invalid_query(format!("invalid identifier: {:?}", name)))
    }
}

fn quoted(name: &str) -> RepoResult<String> {
    Ok(format!("\"{}\"", check_identifier(name)?))
}

/// Type-erased statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlParam {
    Json(Value),
    Text(String),
    Long(i64),
}

impl SqlParam {
    pub(crate) fn as_to_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            SqlParam::Json(v) => v,
            SqlParam::Text(v) => v,
            SqlParam::Long(v) => v,
        }
    }
}

/// A generated statement and its parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    fn new() -> Self {
        Self {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        format!("${}", self.params.len())
    }

    pub(crate) fn param_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(SqlParam::as_to_sql).collect()
    }

    /// `value` converted to the type of `column`.
    fn typed_operand(&mut self, table: &str, column: &str, value: Value) -> String {
        let placeholder = self.bind(SqlParam::Json(value));
        format!(
            "(jsonb_populate_record(NULL::{}, jsonb_build_object('{}', {}::jsonb))).\"{}\"",
            table, column, placeholder, column
        )
    }

    fn push_where(&mut self, meta: &TableMeta, query: &Query) -> RepoResult<()> {
        let table = quoted(meta.name)?;
        let mut clauses = Vec::new();
        for filter in query.effective_filters(meta) {
            let column = check_identifier(filter.column())?.to_string();
            let lhs = format!("t.\"{}\"", column);
            let clause = match filter {
                Filter::Eq(_, v) => format!("{} = {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::Ne(_, v) => format!("{} <> {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::Gt(_, v) => format!("{} > {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::Gte(_, v) => format!("{} >= {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::Lt(_, v) => format!("{} < {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::Lte(_, v) => format!("{} <= {}", lhs, self.typed_operand(&table, &column, v)),
                Filter::In(_, values) => {
                    if values.is_empty() {
                        "FALSE".to_string()
                    } else {
                        let placeholder = self.bind(SqlParam::Json(Value::Array(values)));
                        format!(
                            "{} = ANY(ARRAY(SELECT (jsonb_populate_record(NULL::{}, jsonb_build_object('{}', v))).\"{}\" FROM jsonb_array_elements({}::jsonb) AS v))",
                            lhs, table, column, column, placeholder
                        )
                    }
                }
                Filter::Like(_, pattern) => {
                    let placeholder = self.bind(SqlParam::Text(pattern));
                    format!("{}::text LIKE {}::text", lhs, placeholder)
                }
                Filter::IsNull(_) => format!("{} IS NULL", lhs),
                Filter::NotNull(_) => format!("{} IS NOT NULL", lhs),
            };
            clauses.push(clause);
        }
        if !clauses.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&clauses.join(" AND "));
        }
        Ok(())
    }
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn select(meta: &TableMeta, query: &Query) -> RepoResult<Statement> {
    let mut stmt = Statement::new();
    stmt.sql = format!("SELECT to_jsonb(t.*) FROM {} AS t", quoted(meta.name)?);
    stmt.push_where(meta, query)?;

    if !query.order.is_empty() {
        let mut terms = Vec::with_capacity(query.order.len());
        for order in &query.order {
            let direction = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            terms.push(format!("t.{} {}", quoted(&order.column)?, direction));
        }
        stmt.sql.push_str(" ORDER BY ");
        stmt.sql.push_str(&terms.join(", "));
    }
    if let Some(limit) = query.limit {
        let placeholder = stmt.bind(SqlParam::Long(to_i64(limit)));
        stmt.sql.push_str(&format!(" LIMIT {}", placeholder));
    }
    if let Some(offset) = query.offset {
        let placeholder = stmt.bind(SqlParam::Long(to_i64(offset)));
        stmt.sql.push_str(&format!(" OFFSET {}", placeholder));
    }
    Ok(stmt)
}

pub(crate) fn count(meta: &TableMeta, query: &Query) -> RepoResult<Statement> {
    let mut stmt = Statement::new();
    stmt.sql = format!("SELECT COUNT(*) FROM {} AS t", quoted(meta.name)?);
    stmt.push_where(meta, query)?;
    Ok(stmt)
}

/// Multi-row insert. Columns that are null in every row are left out so the
/// server applies its defaults (generated keys included).
pub(crate) fn insert(meta: &TableMeta, rows: &[Row]) -> RepoResult<Statement> {
    let table = quoted(meta.name)?;
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for (column, value) in row {
            if !value.is_null() && !columns.contains(&column.as_str()) {
                columns.push(column.as_str());
            }
        }
    }

    let mut stmt = Statement::new();
    if columns.is_empty() {
        stmt.sql = format!(
            "INSERT INTO {} AS t DEFAULT VALUES RETURNING to_jsonb(t.*)",
            table
        );
        return Ok(stmt);
    }

    let mut targets = Vec::with_capacity(columns.len());
    let mut sources = Vec::with_capacity(columns.len());
    for column in &columns {
        let column = quoted(column)?;
        sources.push(format!("p.{}", column));
        targets.push(column);
    }
    let document = Value::Array(rows.iter().cloned().map(Value::Object).collect());
    let placeholder = stmt.bind(SqlParam::Json(document));
    stmt.sql = format!(
        "INSERT INTO {table} AS t ({targets}) SELECT {sources} FROM jsonb_populate_recordset(NULL::{table}, {placeholder}::jsonb) AS p RETURNING to_jsonb(t.*)",
        table = table,
        targets = targets.join(", "),
        sources = sources.join(", "),
        placeholder = placeholder,
    );
    Ok(stmt)
}

pub(crate) fn update(meta: &TableMeta, query: &Query, patch: &Row) -> RepoResult<Statement> {
    let table = quoted(meta.name)?;
    if patch.contains_key(meta.primary_key) {
        return Err(RepoError::invalid_query("primary key cannot be updated"));
    }
    if patch.is_empty() {
        return Err(RepoError::invalid_query("empty update"));
    }

    let mut assignments = Vec::with_capacity(patch.len());
    for column in patch.keys() {
        let column = quoted(column)?;
        assignments.push(format!("{} = p.{}", column, column));
    }

    let mut stmt = Statement::new();
    let placeholder = stmt.bind(SqlParam::Json(Value::Object(patch.clone())));
    stmt.sql = format!(
        "UPDATE {table} AS t SET {assignments} FROM jsonb_populate_record(NULL::{table}, {placeholder}::jsonb) AS p",
        table = table,
        assignments = assignments.join(", "),
        placeholder = placeholder,
    );
    stmt.push_where(meta, query)?;
    Ok(stmt)
}

pub(crate) fn delete(meta: &TableMeta, query: &Query) -> RepoResult<Statement> {
    let mut stmt = Statement::new();
    stmt.sql = format!("DELETE FROM {} AS t", quoted(meta.name)?);
    stmt.push_where(meta, query)?;
    Ok(stmt)
}
