//! # relq
//!
//! Declarative table queries compiled to parameterized SQL.
//!
//! A query names a table, the column paths to fetch (following foreign-key
//! links with dotted paths), a JSON filter, a sort and a page window. relq
//! resolves it against a [`Schema`](schema::Schema) and emits one statement
//! in which linked rows are nested JSON produced by correlated subqueries.
//!
//! ## Quick Example
//!
//! ```rust
//! use std::sync::Arc;
//! use relq::prelude::*;
//! use serde_json::json;
//!
//! let schema = Schema::new()
//!     .with_table(TableDef::new("teams").pk("xata_id", "text").column("name", "text").link_to("owner", "users"))
//!     .with_table(TableDef::new("users").pk("xata_id", "text").column("full_name", "text"));
//! let registry = Registry::new(Arc::new(schema));
//!
//! let query = registry
//!     .table("teams")?
//!     .select(["name", "owner.full_name"])
//!     .filter(json!({ "name": { "$startsWith": "A" } }));
//!
//! let compiled = query.compile()?;
//! assert_eq!(
//!     compiled.sql,
//!     "select \"xata_id\", \"name\", (select to_json(obj) from (select \"xata_id\", \"full_name\" \
//!      from \"users\" where \"xata_id\" = \"teams\".\"owner\") as obj) as \"owner\" \
//!      from \"teams\" where \"name\" like $1"
//! );
//! assert_eq!(compiled.params, vec![json!("A%")]);
//! # Ok::<(), relq::error::RelqError>(())
//! ```
//!
//! ## Filter operators
//!
//! | Operator       | SQL                        |
//! |----------------|----------------------------|
//! | `$is`          | `=` (`is null` for null)   |
//! | `$isNot`       | `!=`                       |
//! | `$gt` … `$le`  | `>` `>=` `<` `<=`          |
//! | `$contains`    | `like '%v%'`               |
//! | `$startsWith`  | `like 'v%'`                |
//! | `$endsWith`    | `like '%v'`                |
//! | `$pattern`     | `like` with `*` / `?` glob |
//! | `$exists`      | `is not null`              |
//! | `$all` `$any` `$not` `$none` | `and` `or` `not (… and …)` `not (… or …)` |

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod pagination;
pub mod path;
pub mod query;
pub mod registry;
pub mod schema;
pub mod selection;
pub mod transpiler;

pub mod prelude {
    pub use crate::config::RelqConfig;
    pub use crate::engine::{PgTransport, Row, Transport};
    pub use crate::error::*;
    pub use crate::pagination::{Page, PageMeta, PageRequest, RecordStream, Window};
    pub use crate::query::{Query, Sort, SortDirection};
    pub use crate::registry::{Registry, Repository};
    pub use crate::schema::{Schema, TableDef};
    pub use crate::transpiler::CompiledQuery;
}

pub use path::ColumnPath;
pub use query::Query;
