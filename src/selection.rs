//! Column selection resolution.
//!
//! Turns a flat list of column paths into a [`SelectionTree`] that separates a
//! table's own columns from the sub-selections of its links.

use crate::error::{RelqError, RelqResult};
use crate::path::{ColumnPath, Terminal};
use crate::schema::Schema;

/// Resolved, deduplicated selection for one table.
///
/// Both `regular` and `links` keep the order in which entries first appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionTree {
    pub regular: Vec<String>,
    pub links: Vec<(String, SelectionTree)>,
}

impl SelectionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(&self, name: &str) -> Option<&SelectionTree> {
        self.links.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn has_wildcard(&self) -> bool {
        self.regular.iter().any(|c| c == "*")
    }

    fn add_regular(&mut self, column: &str) {
        if !self.regular.iter().any(|c| c == column) {
            self.regular.push(column.to_string());
        }
    }

    fn link_mut(&mut self, name: &str) -> &mut SelectionTree {
        let idx = match self.links.iter().position(|(n, _)| n == name) {
            Some(idx) => idx,
            None => {
                self.links.push((name.to_string(), SelectionTree::new()));
                self.links.len() - 1
            }
        };
        &mut self.links[idx].1
    }
}

/// Resolve column path strings against `table`.
///
/// An empty list selects `*`.
pub fn resolve_columns<S: AsRef<str>>(
    schema: &Schema,
    table: &str,
    columns: &[S],
) -> RelqResult<SelectionTree> {
    let paths = columns
        .iter()
        .map(|c| ColumnPath::parse(c.as_ref()))
        .collect::<RelqResult<Vec<_>>>()?;
    resolve_paths(schema, table, &paths)
}

/// Resolve already-parsed column paths against `table`.
pub fn resolve_paths(schema: &Schema, table: &str, paths: &[ColumnPath]) -> RelqResult<SelectionTree> {
    schema.require_table(table)?;

    let mut tree = SelectionTree::new();
    if paths.is_empty() {
        tree.add_regular("*");
        return Ok(tree);
    }

    'paths: for path in paths {
        let mut current_table = table;
        let mut hops = Vec::with_capacity(path.links.len());

        for hop in &path.links {
            let def = schema.require_table(current_table)?;
            let link = match def.link(hop) {
                Some(link) => link,
                None => {
                    let message = match def.suggest_link(hop) {
                        Some(sugg) => format!("no link named '{}'. Did you mean '{}'?", hop, sugg),
                        None => format!("no link named '{}' on table '{}'", hop, current_table),
                    };
                    return Err(RelqError::resolution(table, path.to_string(), message));
                }
            };
            if schema.table(link.target_table).is_none() {
                tracing::debug!(
                    "Skipping '{}': link '{}' targets unknown table '{}'",
                    path,
                    hop,
                    link.target_table
                );
                continue 'paths;
            }
            // Links are addressed by column name, whichever alias was used.
            hops.push(link.name);
            current_table = link.target_table;
        }

        if let Terminal::Column(name) = &path.terminal {
            let def = schema.require_table(current_table)?;
            def.validate_column(name)
                .map_err(|message| RelqError::resolution(table, path.to_string(), message))?;
        }

        let mut node = &mut tree;
        for hop in hops {
            node = node.link_mut(hop);
        }
        match &path.terminal {
            Terminal::Wildcard => node.add_regular("*"),
            Terminal::Column(name) => node.add_regular(name),
        }
    }

    Ok(tree)
}
