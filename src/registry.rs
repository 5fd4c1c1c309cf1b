//! Table registry.
//!
//! One [`Repository`] per table, built once from the schema and resolved by
//! name lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::RelqResult;
use crate::query::{Query, Sort};
use crate::schema::Schema;

/// Table name → repository handle.
#[derive(Debug, Clone)]
pub struct Registry {
    schema: Arc<Schema>,
    repositories: BTreeMap<String, Repository>,
}

impl Registry {
    pub fn new(schema: Arc<Schema>) -> Self {
        let repositories = schema
            .tables
            .iter()
            .map(|t| (t.name.clone(), Repository::new(schema.clone(), &t.name)))
            .collect();
        Self { schema, repositories }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Look up a table, suggesting a close name when unknown.
    pub fn table(&self, name: &str) -> RelqResult<&Repository> {
        self.schema.require_table(name)?;
        self.repositories
            .get(name)
            .ok_or_else(|| crate::error::RelqError::UnknownTable(name.to_string()))
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.repositories.keys().map(String::as_str)
    }
}

/// Entry point for queries over one table.
#[derive(Debug, Clone)]
pub struct Repository {
    schema: Arc<Schema>,
    table: Arc<str>,
}

impl Repository {
    fn new(schema: Arc<Schema>, table: &str) -> Self {
        Self {
            schema,
            table: Arc::from(table),
        }
    }

    pub fn name(&self) -> &str {
        &self.table
    }

    /// A fresh query selecting every column.
    pub fn query(&self) -> Query {
        Query::new(self.schema.clone(), &self.table)
    }

    pub fn select<I, S>(&self, columns: I) -> Query
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.query().select(columns)
    }

    pub fn filter(&self, filter: Value) -> Query {
        self.query().filter(filter)
    }

    pub fn sort(&self, sort: Sort) -> Query {
        self.query().sort(sort)
    }
}
