//! Immutable, chainable query builder.
//!
//! Every combinator returns a new [`Query`]; unchanged state is shared through
//! `Arc`s and filter layers form a persistent list, so branching a query never
//! lets one branch observe another's additions.
//!
//! ```
//! use std::sync::Arc;
//! use relq::query::{Query, Sort};
//! use relq::schema::{Schema, TableDef};
//! use serde_json::json;
//!
//! let schema = Arc::new(Schema::new().with_table(
//!     TableDef::new("users").pk("xata_id", "text").column("name", "text"),
//! ));
//! let base = Query::new(schema, "users").select(["name"]);
//! let named = base.filter(json!({ "name": "ada" })).sort(Sort::asc("name"));
//!
//! let compiled = named.compile().unwrap();
//! assert_eq!(
//!     compiled.sql,
//!     r#"select "xata_id", "name" from "users" where "name" = $1 order by "name" asc"#
//! );
//! assert_eq!(base.compile().unwrap().sql, r#"select "xata_id", "name" from "users""#);
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::engine::{Row, Transport};
use crate::error::{RelqError, RelqResult};
use crate::filter::{FilterExpr, compile_filter};
use crate::pagination::{
    Anchor, Cursor, MAX_OFFSET, Page, PageMeta, PageRequest, RecordStream, Window,
};
use crate::schema::Schema;
use crate::selection::resolve_columns;
use crate::transpiler::{CompiledQuery, Limit, SelectRequest, build_select};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
    Random,
}

impl SortDirection {
    /// Opposite direction; random stays random.
    pub fn reversed(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
            Self::Random => Self::Random,
        }
    }
}

/// One `order by` term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: SortDirection::Desc,
        }
    }

    /// Random order, rendered as `random()`.
    pub fn random() -> Self {
        Self {
            column: "*".to_string(),
            direction: SortDirection::Random,
        }
    }

    fn reversed(&self) -> Self {
        Self {
            column: self.column.clone(),
            direction: self.direction.reversed(),
        }
    }
}

/// One filter layer; layers chain back to the first one added.
#[derive(Debug)]
struct FilterLayer {
    value: Value,
    parent: Option<Arc<FilterLayer>>,
}

/// Immutable query description over one table.
#[derive(Debug, Clone)]
pub struct Query {
    schema: Arc<Schema>,
    table: Arc<str>,
    filter: Option<Arc<FilterLayer>>,
    sort: Arc<[Sort]>,
    columns: Option<Arc<[String]>>,
}

impl Query {
    /// Start a query over `table`. The table is checked when compiling.
    pub fn new(schema: Arc<Schema>, table: &str) -> Self {
        Self {
            schema,
            table: Arc::from(table),
            filter: None,
            sort: Arc::from(Vec::new()),
            columns: None,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Add a filter layer, combined with earlier layers by conjunction.
    pub fn filter(&self, filter: Value) -> Self {
        let mut next = self.clone();
        next.filter = Some(Arc::new(FilterLayer {
            value: filter,
            parent: self.filter.clone(),
        }));
        next
    }

    /// Shorthand for `filter({ column: value })`.
    pub fn filter_column(&self, column: &str, value: Value) -> Self {
        let mut map = Map::new();
        map.insert(column.to_string(), value);
        self.filter(Value::Object(map))
    }

    /// At least one of `filters` must match.
    pub fn any(&self, filters: Vec<Value>) -> Self {
        self.filter(json!({ "$any": filters }))
    }

    /// Every one of `filters` must match.
    pub fn all(&self, filters: Vec<Value>) -> Self {
        self.filter(json!({ "$all": filters }))
    }

    /// The conjunction of `filters` must not match.
    pub fn not(&self, filters: Vec<Value>) -> Self {
        self.filter(json!({ "$not": filters }))
    }

    /// None of `filters` may match.
    pub fn none(&self, filters: Vec<Value>) -> Self {
        self.filter(json!({ "$none": filters }))
    }

    /// Append a sort term.
    pub fn sort(&self, sort: Sort) -> Self {
        let mut terms = self.sort.to_vec();
        terms.push(sort);
        let mut next = self.clone();
        next.sort = Arc::from(terms);
        next
    }

    /// Replace the selected column paths.
    pub fn select<I, S>(&self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let mut next = self.clone();
        next.columns = Some(Arc::from(columns));
        next
    }

    pub fn sorts(&self) -> &[Sort] {
        &self.sort
    }

    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// All filter layers as one JSON expression.
    pub fn filter_value(&self) -> Value {
        let mut layers = Vec::new();
        let mut cursor = self.filter.as_deref();
        while let Some(layer) = cursor {
            layers.push(layer.value.clone());
            cursor = layer.parent.as_deref();
        }
        layers.reverse();
        match layers.len() {
            0 => Value::Object(Map::new()),
            1 => layers.remove(0),
            _ => json!({ "$all": layers }),
        }
    }

    /// Compile without pagination.
    pub fn compile(&self) -> RelqResult<CompiledQuery> {
        self.build(&self.sort, None)
    }

    /// Compile the statement for one page window.
    ///
    /// The primary key is appended as the final sort key. End-anchored windows
    /// invert the sort; their rows come back in reverse.
    pub fn compile_page(&self, window: &Window) -> RelqResult<CompiledQuery> {
        window.validate()?;
        let pk = self.schema.require_table(&self.table)?.primary_key();

        let mut sort = self.sort.to_vec();
        if !sort.iter().any(|s| s.column == pk) {
            sort.push(Sort::asc(pk));
        }
        let (sort, limit) = match window.anchor {
            Anchor::Start => (sort, window.size + 1),
            Anchor::End => (sort.iter().map(Sort::reversed).collect(), window.size),
        };

        self.build(
            &sort,
            Some(Limit {
                limit,
                offset: window.offset,
            }),
        )
    }

    fn build(&self, sort: &[Sort], limit: Option<Limit>) -> RelqResult<CompiledQuery> {
        let selection = match &self.columns {
            Some(columns) => resolve_columns(&self.schema, &self.table, &columns[..])?,
            None => resolve_columns::<&str>(&self.schema, &self.table, &[])?,
        };
        let expr = FilterExpr::from_json(&self.filter_value())?;
        let filter = compile_filter(&self.schema, &self.table, &expr)?;

        build_select(
            &self.schema,
            &SelectRequest {
                table: &self.table,
                selection: &selection,
                filter: &filter,
                sort,
                limit,
            },
        )
    }

    /// Fetch one page.
    pub async fn get_paginated(
        &self,
        transport: &dyn Transport,
        request: PageRequest,
    ) -> RelqResult<Page> {
        match request {
            PageRequest::Offset { size, offset } => {
                if offset > MAX_OFFSET {
                    return Err(RelqError::InvalidPagination(format!(
                        "offset must not exceed {}, got {}",
                        MAX_OFFSET, offset
                    )));
                }
                self.fetch_window(transport, Window::start(offset, size)).await
            }
            PageRequest::LastOf { size } => self.fetch_window(transport, Window::end(0, size)).await,
            PageRequest::After { cursor, size } => {
                let (query, window) = self.restore(&cursor)?;
                match window.after(size.unwrap_or(window.size)) {
                    Some(next) => query.fetch_window(transport, next).await,
                    None => query.empty_page(window),
                }
            }
            PageRequest::Before { cursor, size } => {
                let (query, window) = self.restore(&cursor)?;
                match window.before(size.unwrap_or(window.size)) {
                    Some(previous) => query.fetch_window(transport, previous).await,
                    None => query.empty_page(window),
                }
            }
            PageRequest::First { cursor, size } => {
                let (query, window) = self.restore(&cursor)?;
                let size = size.unwrap_or(window.size);
                query.fetch_window(transport, Window::start(0, size)).await
            }
            PageRequest::Last { cursor, size } => {
                let (query, window) = self.restore(&cursor)?;
                let size = size.unwrap_or(window.size);
                query.fetch_window(transport, Window::end(0, size)).await
            }
        }
    }

    /// Records of one page.
    pub async fn get_many(&self, transport: &dyn Transport, request: PageRequest) -> RelqResult<Vec<Row>> {
        Ok(self.get_paginated(transport, request).await?.records)
    }

    /// The first matching record, if any.
    pub async fn get_first(&self, transport: &dyn Transport) -> RelqResult<Option<Row>> {
        let page = self
            .get_paginated(transport, PageRequest::Offset { size: 1, offset: 0 })
            .await?;
        Ok(page.records.into_iter().next())
    }

    /// Every matching record, fetched `batch` rows at a time.
    pub async fn get_all(&self, transport: &dyn Transport, batch: u64) -> RelqResult<Vec<Row>> {
        let mut stream = self.records(transport, batch);
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Lazily iterate every matching record, one page round trip at a time.
    pub fn records<'t>(&self, transport: &'t dyn Transport, batch: u64) -> RecordStream<'t> {
        RecordStream::new(transport, self.clone(), Window::start(0, batch))
    }

    pub(crate) async fn fetch_window(&self, transport: &dyn Transport, window: Window) -> RelqResult<Page> {
        let compiled = self.compile_page(&window)?;
        let mut records = transport.execute(&compiled).await.map_err(RelqError::Transport)?;

        let more = match window.anchor {
            Anchor::Start => {
                let more = records.len() as u64 > window.size;
                records.truncate(window.size as usize);
                more
            }
            Anchor::End => {
                records.reverse();
                window.offset > 0
            }
        };
        tracing::debug!(table = %self.table, rows = records.len(), more, "fetched page");

        Ok(Page {
            records,
            meta: PageMeta {
                cursor: self.cursor(window).encode()?,
                more,
            },
            query: self.clone(),
            window,
        })
    }

    fn empty_page(&self, window: Window) -> RelqResult<Page> {
        Ok(Page {
            records: Vec::new(),
            meta: PageMeta {
                cursor: self.cursor(window).encode()?,
                more: false,
            },
            query: self.clone(),
            window,
        })
    }

    fn cursor(&self, window: Window) -> Cursor {
        Cursor::new(
            &self.table,
            self.filter_value(),
            self.sort.to_vec(),
            self.columns.as_ref().map(|c| c.to_vec()),
            window,
        )
    }

    /// Rebuild the query captured in a cursor token.
    fn restore(&self, token: &str) -> RelqResult<(Query, Window)> {
        let cursor = Cursor::decode(token)?;
        if cursor.table != *self.table {
            return Err(RelqError::InvalidCursor(format!(
                "cursor belongs to table '{}', not '{}'",
                cursor.table, self.table
            )));
        }

        let mut query = Query::new(self.schema.clone(), &self.table);
        if !FilterExpr::from_json(&cursor.filter)?.is_empty() {
            query = query.filter(cursor.filter);
        }
        query.sort = Arc::from(cursor.sort);
        query.columns = cursor.columns.map(Arc::from);
        Ok((query, cursor.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TableDef;
    use pretty_assertions::assert_eq;

    fn query() -> Query {
        let schema = Schema::new()
            .with_table(
                TableDef::new("teams")
                    .pk("xata_id", "text")
                    .column("name", "text")
                    .column("size", "int")
                    .link_to("owner", "users"),
            )
            .with_table(TableDef::new("users").pk("xata_id", "text").column("full_name", "text"));
        Query::new(Arc::new(schema), "teams")
    }

    #[test]
    fn test_branches_do_not_share_filters() {
        let base = query().select(["name"]).filter(json!({ "size": { "$gt": 3 } }));
        let left = base.filter(json!({ "name": "a" }));
        let right = base.any(vec![json!({ "name": "b" }), json!({ "name": "c" })]);

        assert_eq!(
            left.compile().unwrap().sql,
            r#"select "xata_id", "name" from "teams" where ("size" > $1 and "name" = $2)"#
        );
        assert_eq!(
            right.compile().unwrap().sql,
            r#"select "xata_id", "name" from "teams" where ("size" > $1 and ("name" = $2 or "name" = $3))"#
        );
        assert_eq!(
            base.compile().unwrap().sql,
            r#"select "xata_id", "name" from "teams" where "size" > $1"#
        );
    }

    #[test]
    fn test_compile_is_idempotent() {
        let q = query()
            .select(["name", "owner.full_name"])
            .filter(json!({ "owner": { "full_name": { "$startsWith": "J" } } }))
            .sort(Sort::desc("name"));
        assert_eq!(q.compile().unwrap(), q.compile().unwrap());
    }

    #[test]
    fn test_page_adds_pk_tiebreak_and_lookahead_row() {
        let q = query().select(["name"]).sort(Sort::asc("name"));
        let compiled = q.compile_page(&Window::start(40, 20)).unwrap();
        assert_eq!(
            compiled.sql,
            r#"select "xata_id", "name" from "teams" order by "name" asc, "xata_id" asc limit $1 offset $2"#
        );
        assert_eq!(compiled.params, vec![json!(21), json!(40)]);
    }

    #[test]
    fn test_end_window_inverts_sort() {
        let q = query().select(["name"]).sort(Sort::asc("name"));
        let compiled = q.compile_page(&Window::end(0, 5)).unwrap();
        assert_eq!(
            compiled.sql,
            r#"select "xata_id", "name" from "teams" order by "name" desc, "xata_id" desc limit $1"#
        );
        assert_eq!(compiled.params, vec![json!(5)]);
    }

    #[test]
    fn test_page_size_limits() {
        let q = query();
        assert!(matches!(
            q.compile_page(&Window::start(0, 0)),
            Err(RelqError::InvalidPagination(_))
        ));
        assert!(matches!(
            q.compile_page(&Window::start(0, 1001)),
            Err(RelqError::InvalidPagination(_))
        ));
        assert!(q.compile_page(&Window::start(49_001, 10)).is_ok());
    }

    #[test]
    fn test_empty_not_fails_at_compile() {
        let err = query().not(vec![]).compile().unwrap_err();
        assert!(matches!(err, RelqError::CombinatorArity { combinator: "$not" }));
    }

    #[test]
    fn test_filter_value_layers() {
        let q = query();
        assert_eq!(q.filter_value(), json!({}));
        let one = q.filter_column("name", json!("a"));
        assert_eq!(one.filter_value(), json!({ "name": "a" }));
        let two = one.filter(json!({ "size": 3 }));
        assert_eq!(two.filter_value(), json!({ "$all": [{ "name": "a" }, { "size": 3 }] }));
    }

    #[test]
    fn test_restore_rejects_other_table() {
        let q = query();
        let token = Cursor::new("users", json!({}), vec![], None, Window::start(0, 20))
            .encode()
            .unwrap();
        assert!(matches!(q.restore(&token), Err(RelqError::InvalidCursor(_))));
    }
}
