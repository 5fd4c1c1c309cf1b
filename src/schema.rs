//! Schema definitions: tables, columns and foreign keys.
//!
//! Schemas are supplied by the schema provider before any compilation and are
//! never mutated by the compiler. They can be built in code or loaded from
//! JSON/TOML.
//!
//! # Example
//! ```
//! use relq::schema::Schema;
//!
//! let json = r#"{
//!     "tables": [{
//!         "name": "users",
//!         "columns": [
//!             { "name": "xata_id", "type": "text", "primary_key": true },
//!             { "name": "email", "type": "varchar" }
//!         ]
//!     }]
//! }"#;
//!
//! let schema = Schema::from_json(json).unwrap();
//! assert_eq!(schema.table("users").unwrap().primary_key(), "xata_id");
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strsim::levenshtein;

use crate::error::{RelqError, RelqResult};

/// Primary key name used when a table does not flag one.
pub const DEFAULT_PRIMARY_KEY: &str = "xata_id";

/// Column types that compare against a client-supplied string without a cast.
const TEXT_TYPES: &[&str] = &[
    "text",
    "varchar",
    "character varying",
    "char",
    "character",
    "bpchar",
    "citext",
    "name",
    "string",
    "email",
    "link",
];

/// Database schema definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableDef>,
}

/// Table definition with columns and outgoing foreign keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    /// Keyed by constraint name.
    #[serde(default, alias = "foreignKeys")]
    pub foreign_keys: BTreeMap<String, ForeignKey>,
}

/// Column definition with type information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", alias = "typ")]
    pub typ: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(alias = "referencedTable")]
    pub referenced_table: String,
    #[serde(alias = "referencedColumns")]
    pub referenced_columns: Vec<String>,
    #[serde(default, alias = "onDelete")]
    pub on_delete: OnDelete,
}

/// Referential action taken when the referenced row is deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnDelete {
    #[default]
    #[serde(rename = "NO ACTION")]
    NoAction,
    #[serde(rename = "RESTRICT")]
    Restrict,
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "SET NULL")]
    SetNull,
    #[serde(rename = "SET DEFAULT")]
    SetDefault,
}

/// A resolved single-column link from one table to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link<'a> {
    /// Link name as seen by queries (the local column).
    pub name: &'a str,
    pub local_column: &'a str,
    pub target_table: &'a str,
    pub target_column: &'a str,
}

impl Schema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self { tables: Vec::new() }
    }

    /// Add a table to the schema.
    pub fn add_table(&mut self, table: TableDef) {
        self.tables.push(table);
    }

    /// Builder: add a table.
    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.push(table);
        self
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Look up a table, failing with a suggestion when it is unknown.
    pub fn require_table(&self, name: &str) -> RelqResult<&TableDef> {
        self.table(name).ok_or_else(|| {
            let names: Vec<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
            match did_you_mean(name, &names) {
                Some(sugg) => RelqError::UnknownTable(format!("'{}'. Did you mean '{}'?", name, sugg)),
                None => RelqError::UnknownTable(format!("'{}'", name)),
            }
        })
    }

    /// Load schema from JSON string.
    pub fn from_json(json: &str) -> RelqResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load schema from TOML string.
    ///
    /// ```toml
    /// [[tables]]
    /// name = "teams"
    /// columns = [{ name = "name", type = "text" }]
    ///
    /// [tables.foreign_keys.fk_owner]
    /// name = "fk_owner"
    /// columns = ["owner"]
    /// referenced_table = "users"
    /// referenced_columns = ["xata_id"]
    /// ```
    pub fn from_toml(input: &str) -> RelqResult<Self> {
        Ok(toml::from_str(input)?)
    }

    /// Load schema from file path (`.toml` is TOML, anything else JSON).
    pub fn from_file(path: &Path) -> RelqResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let schema = if path.extension().map(|e| e == "toml").unwrap_or(false) {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };
        tracing::info!("Loaded {} table schemas from {}", schema.tables.len(), path.display());
        Ok(schema)
    }
}

impl TableDef {
    /// Create a new table definition.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            foreign_keys: BTreeMap::new(),
        }
    }

    /// Builder: add a simple column.
    pub fn column(mut self, name: &str, typ: &str) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            typ: typ.to_string(),
            nullable: true,
            primary_key: false,
        });
        self
    }

    /// Builder: add a primary key column.
    pub fn pk(mut self, name: &str, typ: &str) -> Self {
        self.columns.push(ColumnDef {
            name: name.to_string(),
            typ: typ.to_string(),
            nullable: false,
            primary_key: true,
        });
        self
    }

    /// Builder: add a link column plus its single-column foreign key.
    pub fn link_to(mut self, column: &str, target_table: &str) -> Self {
        self.columns.push(ColumnDef {
            name: column.to_string(),
            typ: "link".to_string(),
            nullable: true,
            primary_key: false,
        });
        let name = format!("{}_{}_fkey", self.name, column);
        self.foreign_keys.insert(
            name.clone(),
            ForeignKey {
                name,
                columns: vec![column.to_string()],
                referenced_table: target_table.to_string(),
                referenced_columns: vec![DEFAULT_PRIMARY_KEY.to_string()],
                on_delete: OnDelete::SetNull,
            },
        );
        self
    }

    /// Builder: add a foreign key as-is.
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.insert(fk.name.clone(), fk);
        self
    }

    /// Name of the primary key column.
    pub fn primary_key(&self) -> &str {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .unwrap_or(DEFAULT_PRIMARY_KEY)
    }

    /// Tables without declared columns are not validated column-wise.
    pub fn is_open(&self) -> bool {
        self.columns.is_empty()
    }

    /// Look up a column definition.
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check a column name, suggesting a close match when unknown.
    pub fn validate_column(&self, column: &str) -> Result<(), String> {
        if self.is_open() || column == "*" || column == self.primary_key() {
            return Ok(());
        }
        if self.column_def(column).is_some() || self.link(column).is_some() {
            return Ok(());
        }
        let names: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        match did_you_mean(column, &names) {
            Some(sugg) => Err(format!(
                "column '{}' not found in table '{}'. Did you mean '{}'?",
                column, self.name, sugg
            )),
            None => Err(format!("column '{}' not found in table '{}'", column, self.name)),
        }
    }

    /// Whether a string value can be compared to the column without a cast.
    ///
    /// Unknown columns are assumed comparable.
    pub fn is_text_comparable(&self, column: &str) -> bool {
        match self.column_def(column) {
            Some(def) => is_text_type(&def.typ),
            None => true,
        }
    }

    /// Resolve a link by local column name, or by constraint name.
    pub fn link(&self, name: &str) -> Option<Link<'_>> {
        let by_column = self
            .foreign_keys
            .values()
            .find(|fk| fk.columns.len() == 1 && fk.columns[0] == name);
        let fk = by_column.or_else(|| self.foreign_keys.get(name))?;
        fk.as_link()
    }

    /// Names of all links on this table.
    pub fn link_names(&self) -> Vec<&str> {
        self.foreign_keys
            .values()
            .filter_map(|fk| fk.as_link().map(|l| l.name))
            .collect()
    }

    /// Suggest a link name close to `name`.
    pub fn suggest_link(&self, name: &str) -> Option<String> {
        did_you_mean(name, &self.link_names())
    }
}

impl ForeignKey {
    /// Composite keys do not form links.
    pub fn as_link(&self) -> Option<Link<'_>> {
        match (self.columns.as_slice(), self.referenced_columns.as_slice()) {
            ([local], [remote]) => Some(Link {
                name: local,
                local_column: local,
                target_table: &self.referenced_table,
                target_column: remote,
            }),
            _ => None,
        }
    }
}

fn is_text_type(typ: &str) -> bool {
    let lower = typ.trim().to_lowercase();
    let base = lower.split('(').next().unwrap_or("").trim();
    TEXT_TYPES.contains(&base)
}

/// Find the best match with Levenshtein distance under a length-based threshold.
pub(crate) fn did_you_mean(input: &str, candidates: &[&str]) -> Option<String> {
    let mut best_match = None;
    let mut min_dist = usize::MAX;

    for cand in candidates {
        let dist = levenshtein(input, cand);

        let threshold = match input.len() {
            0..=2 => 0,
            3..=5 => 2,
            _ => 3,
        };

        if dist <= threshold && dist < min_dist {
            min_dist = dist;
            best_match = Some(cand.to_string());
        }
    }

    best_match
}

#[cfg(test)]
mod tests {
    use super::*;

    fn teams_schema() -> Schema {
        Schema::new()
            .with_table(
                TableDef::new("teams")
                    .pk("xata_id", "text")
                    .column("name", "text")
                    .link_to("owner", "users"),
            )
            .with_table(
                TableDef::new("users")
                    .pk("xata_id", "text")
                    .column("full_name", "text")
                    .column("age", "int"),
            )
    }

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "tables": [{
                "name": "teams",
                "columns": [
                    { "name": "xata_id", "type": "text", "primary_key": true },
                    { "name": "owner", "type": "text" }
                ],
                "foreignKeys": {
                    "fk_owner": {
                        "name": "fk_owner",
                        "columns": ["owner"],
                        "referencedTable": "users",
                        "referencedColumns": ["xata_id"],
                        "onDelete": "CASCADE"
                    }
                }
            }]
        }"#;

        let schema = Schema::from_json(json).unwrap();
        let teams = schema.table("teams").unwrap();
        assert_eq!(teams.columns.len(), 2);
        assert_eq!(teams.foreign_keys["fk_owner"].on_delete, OnDelete::Cascade);
        let link = teams.link("owner").unwrap();
        assert_eq!(link.target_table, "users");
        assert_eq!(link.target_column, "xata_id");
        assert_eq!(teams.link("fk_owner"), Some(link));
    }

    #[test]
    fn test_schema_from_toml() {
        let input = r#"
            [[tables]]
            name = "teams"
            columns = [{ name = "name", type = "text" }]

            [tables.foreign_keys.fk_owner]
            name = "fk_owner"
            columns = ["owner"]
            referenced_table = "users"
            referenced_columns = ["xata_id"]
            on_delete = "SET NULL"
        "#;
        let schema = Schema::from_toml(input).unwrap();
        let fk = &schema.table("teams").unwrap().foreign_keys["fk_owner"];
        assert_eq!(fk.on_delete, OnDelete::SetNull);
    }

    #[test]
    fn test_composite_key_is_not_a_link() {
        let table = TableDef::new("memberships").foreign_key(ForeignKey {
            name: "fk_pair".to_string(),
            columns: vec!["team".to_string(), "user".to_string()],
            referenced_table: "pairs".to_string(),
            referenced_columns: vec!["a".to_string(), "b".to_string()],
            on_delete: OnDelete::NoAction,
        });
        assert!(table.link("team").is_none());
        assert!(table.link("fk_pair").is_none());
    }

    #[test]
    fn test_primary_key_default() {
        let table = TableDef::new("open");
        assert_eq!(table.primary_key(), DEFAULT_PRIMARY_KEY);
        assert!(table.is_open());
        assert!(table.validate_column("anything").is_ok());
    }

    #[test]
    fn test_did_you_mean() {
        let schema = teams_schema();
        let err = schema.require_table("temas").unwrap_err();
        assert!(err.to_string().contains("Did you mean 'teams'?"));

        let users = schema.table("users").unwrap();
        let err = users.validate_column("ful_name").unwrap_err();
        assert!(err.contains("Did you mean 'full_name'?"));
    }

    #[test]
    fn test_text_comparable() {
        let schema = teams_schema();
        let users = schema.table("users").unwrap();
        assert!(users.is_text_comparable("full_name"));
        assert!(!users.is_text_comparable("age"));
        assert!(users.is_text_comparable("not_declared"));
        assert!(is_text_type("VARCHAR(255)"));
    }
}
