//! SELECT SQL generation.
//!
//! Linked rows are materialized as nested JSON through correlated scalar
//! subqueries; no `JOIN` is ever emitted:
//!
//! ```text
//! select "xata_id", "name",
//!        (select to_json(obj) from (select … from "users"
//!              where "xata_id" = "teams"."owner") as obj) as "owner"
//! from "teams"
//! ```
//!
//! A link back to the table it starts from gets its own alias so the
//! correlation still refers to the outer row.

use serde_json::Value;

use super::{CompiledQuery, SqlFragment, quote_identifier};
use crate::error::{RelqError, RelqResult};
use crate::filter::CompiledFilter;
use crate::query::{Sort, SortDirection};
use crate::schema::{Schema, TableDef};
use crate::selection::SelectionTree;

/// Row window appended as `limit`/`offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub limit: u64,
    pub offset: u64,
}

/// Everything the emitter needs for one statement.
#[derive(Debug, Clone, Copy)]
pub struct SelectRequest<'a> {
    pub table: &'a str,
    pub selection: &'a SelectionTree,
    pub filter: &'a CompiledFilter,
    pub sort: &'a [Sort],
    pub limit: Option<Limit>,
}

/// `"<target>" = "<parent>"."<local>"` inside a link subquery.
///
/// `parent` is the name the enclosing level is visible under: its table
/// name, or its alias when it is aliased.
#[derive(Debug, Clone, Copy)]
struct Correlation<'a> {
    target_column: &'a str,
    parent: &'a str,
    local_column: &'a str,
}

/// Generate the SELECT statement for `req`.
pub fn build_select(schema: &Schema, req: &SelectRequest<'_>) -> RelqResult<CompiledQuery> {
    let def = schema.require_table(req.table)?;

    let emitted = |column: &str| {
        req.selection.link(column).is_some() || filtered_links(req.filter).any(|(n, _)| n == column)
    };
    for sort in req.sort {
        if sort.direction == SortDirection::Random {
            continue;
        }
        def.validate_column(&sort.column)
            .map_err(|message| RelqError::resolution(req.table, sort.column.as_str(), message))?;
        // An emitted link is a json output column; json has no ordering.
        if emitted(&sort.column) {
            return Err(RelqError::resolution(
                req.table,
                sort.column.as_str(),
                "cannot sort on a link that is selected or filtered",
            ));
        }
    }

    // Once wrapped, ordering can only see output columns.
    let wrapped = filtered_links(req.filter).next().is_some();
    let extra: Vec<&str> = if wrapped {
        req.sort
            .iter()
            .filter(|s| s.direction != SortDirection::Random)
            .map(|s| s.column.as_str())
            .collect()
    } else {
        Vec::new()
    };

    let mut stmt = emit_level(schema, def, req.selection, req.filter, None, None, &extra)?;

    if !req.sort.is_empty() {
        let terms: Vec<String> = req.sort.iter().map(order_term).collect();
        stmt.push_sql(" order by ");
        stmt.push_sql(terms.join(", "));
    }

    if let Some(limit) = req.limit {
        stmt.push_sql(" limit ");
        stmt.push_param(Value::from(limit.limit));
        if limit.offset > 0 {
            stmt.push_sql(" offset ");
            stmt.push_param(Value::from(limit.offset));
        }
    }

    let compiled = stmt.render();
    tracing::debug!(table = req.table, params = compiled.params.len(), "compiled: {}", compiled.sql);
    Ok(compiled)
}

fn order_term(sort: &Sort) -> String {
    match sort.direction {
        SortDirection::Asc => format!("{} asc", quote_identifier(&sort.column)),
        SortDirection::Desc => format!("{} desc", quote_identifier(&sort.column)),
        SortDirection::Random => "random()".to_string(),
    }
}

/// Links whose filter actually constrains something.
fn filtered_links(filter: &CompiledFilter) -> impl Iterator<Item = (&str, &CompiledFilter)> {
    filter
        .links
        .iter()
        .filter(|(_, f)| !f.is_empty())
        .map(|(n, f)| (n.as_str(), f))
}

/// Emit one nesting level: own columns, link subqueries, predicate, and the
/// `"tmp"` wraps for filtered links.
fn emit_level(
    schema: &Schema,
    def: &TableDef,
    tree: &SelectionTree,
    filter: &CompiledFilter,
    correlation: Option<Correlation<'_>>,
    alias: Option<&str>,
    extra: &[&str],
) -> RelqResult<SqlFragment> {
    let visible = alias.unwrap_or(&def.name);
    let filter_only = SelectionTree::new();
    let mut links: Vec<(&str, &SelectionTree)> = tree
        .links
        .iter()
        .map(|(name, sub)| (name.as_str(), sub))
        .collect();
    for (name, _) in filtered_links(filter) {
        if !links.iter().any(|(n, _)| *n == name) {
            links.push((name, &filter_only));
        }
    }

    let mut select = SqlFragment::sql("select ");
    let columns = own_columns(def, tree, &links, extra);
    select.push_sql(columns.join(", "));

    for (name, sub) in &links {
        let link = def.link(name).ok_or_else(|| {
            RelqError::resolution(&def.name, *name, "link not found")
        })?;
        let target = schema.require_table(link.target_table)?;
        let child_filter = filter.link(name).filter(|f| !f.is_empty());
        let empty = CompiledFilter::default();
        let inner_alias = (target.name == visible).then(|| self_link_alias(name, visible));

        let inner = emit_level(
            schema,
            target,
            sub,
            child_filter.unwrap_or(&empty),
            Some(Correlation {
                target_column: link.target_column,
                parent: visible,
                local_column: link.local_column,
            }),
            inner_alias.as_deref(),
            &[],
        )?;

        select.push_sql(", ");
        let mut column = inner.wrap("(select to_json(obj) from (", ") as obj");
        if child_filter.is_some() {
            column.push_sql(" where obj is not null");
        }
        column.push_sql(format!(") as {}", quote_identifier(name)));
        select.append(column);
    }

    select.push_sql(format!(" from {}", quote_identifier(&def.name)));
    if let Some(alias) = alias {
        select.push_sql(format!(" as {}", quote_identifier(alias)));
    }

    let mut conditions = Vec::new();
    if let Some(corr) = correlation {
        conditions.push(SqlFragment::sql(format!(
            "{} = {}.{}",
            quote_identifier(corr.target_column),
            quote_identifier(corr.parent),
            quote_identifier(corr.local_column)
        )));
    }
    if let Some(predicate) = &filter.predicate {
        conditions.push(predicate.clone());
    }
    if !conditions.is_empty() {
        select.push_sql(" where ");
        select.append(SqlFragment::join(conditions, " and "));
    }

    let mut stmt = select;
    for (name, _) in filtered_links(filter) {
        stmt = stmt.wrap(
            "select * from (",
            &format!(
                ") as \"tmp\" where \"tmp\".{} is not null",
                quote_identifier(name)
            ),
        );
    }
    Ok(stmt)
}

/// Alias for a link whose target is the enclosing relation.
fn self_link_alias(link: &str, enclosing: &str) -> String {
    if link == enclosing {
        format!("{}_link", link)
    } else {
        link.to_string()
    }
}

/// Primary key first, then the selection in order; `*` expands to declared
/// columns. Columns shadowed by an emitted link are dropped.
fn own_columns(
    def: &TableDef,
    tree: &SelectionTree,
    links: &[(&str, &SelectionTree)],
    extra: &[&str],
) -> Vec<String> {
    let is_link = |name: &str| links.iter().any(|(n, _)| *n == name);
    let literal_star = def.is_open() && tree.has_wildcard();

    let mut out: Vec<String> = Vec::new();
    let mut push = |column: String| {
        if !out.contains(&column) {
            out.push(column);
        }
    };

    if !literal_star {
        push(quote_identifier(def.primary_key()));
    }

    let requested = tree.regular.iter().map(String::as_str).chain(extra.iter().copied());
    for name in requested {
        if name == "*" {
            if def.is_open() {
                push("*".to_string());
            } else {
                for col in def.columns.iter().filter(|c| !is_link(&c.name)) {
                    push(quote_identifier(&col.name));
                }
            }
        } else if !is_link(name) {
            push(quote_identifier(name));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterExpr, compile_filter};
    use crate::schema::TableDef;
    use crate::selection::resolve_columns;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Schema {
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
                    .link_to("pet", "pets"),
            )
            .with_table(TableDef::new("pets").pk("xata_id", "text").column("name", "text"))
    }

    fn build(columns: &[&str], filter: Value, sort: &[Sort], limit: Option<Limit>) -> CompiledQuery {
        let schema = schema();
        let selection = resolve_columns(&schema, "teams", columns).unwrap();
        let expr = FilterExpr::from_json(&filter).unwrap();
        let filter = compile_filter(&schema, "teams", &expr).unwrap();
        build_select(
            &schema,
            &SelectRequest {
                table: "teams",
                selection: &selection,
                filter: &filter,
                sort,
                limit,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_plain_select() {
        let q = build(&["name"], json!({}), &[], None);
        assert_eq!(q.sql, r#"select "xata_id", "name" from "teams""#);
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_wildcard_expands_declared_columns() {
        let q = build(&["*"], json!({}), &[], None);
        assert_eq!(q.sql, r#"select "xata_id", "name", "owner" from "teams""#);
    }

    #[test]
    fn test_link_replaces_its_column() {
        let q = build(&["*", "owner.full_name"], json!({}), &[], None);
        assert_eq!(
            q.sql,
            concat!(
                r#"select "xata_id", "name", "#,
                r#"(select to_json(obj) from (select "xata_id", "full_name" from "users" "#,
                r#"where "xata_id" = "teams"."owner") as obj) as "owner" from "teams""#
            )
        );
    }

    #[test]
    fn test_sort_and_limit() {
        let sort = [Sort::desc("name")];
        let q = build(&["name"], json!({ "name": "a" }), &sort, Some(Limit { limit: 10, offset: 20 }));
        assert_eq!(
            q.sql,
            r#"select "xata_id", "name" from "teams" where "name" = $1 order by "name" desc limit $2 offset $3"#
        );
        assert_eq!(q.params, vec![json!("a"), json!(10), json!(20)]);
    }

    #[test]
    fn test_zero_offset_is_omitted() {
        let q = build(&["name"], json!({}), &[], Some(Limit { limit: 5, offset: 0 }));
        assert_eq!(q.sql, r#"select "xata_id", "name" from "teams" limit $1"#);
    }

    #[test]
    fn test_wrapped_sort_column_is_selected() {
        let sort = [Sort::asc("name")];
        let q = build(&["xata_id"], json!({ "owner": { "full_name": "x" } }), &sort, None);
        assert!(q.sql.starts_with(r#"select * from (select "xata_id", "name", (select to_json(obj)"#));
        assert!(q.sql.ends_with(r#"as "tmp" where "tmp"."owner" is not null order by "name" asc"#));
    }

    #[test]
    fn test_sort_on_emitted_link_is_rejected() {
        let schema = schema();
        let sort = [Sort::asc("owner")];
        let compile = |columns: &[&str], filter: Value| {
            let selection = resolve_columns(&schema, "teams", columns).unwrap();
            let filter = compile_filter(&schema, "teams", &FilterExpr::from_json(&filter).unwrap()).unwrap();
            build_select(
                &schema,
                &SelectRequest {
                    table: "teams",
                    selection: &selection,
                    filter: &filter,
                    sort: &sort,
                    limit: None,
                },
            )
        };

        let selected = compile(&["name", "owner.full_name"], json!({}));
        assert!(matches!(selected, Err(RelqError::SchemaResolution { .. })));
        let filtered = compile(&["name"], json!({ "owner.full_name": "x" }));
        assert!(matches!(filtered, Err(RelqError::SchemaResolution { .. })));

        let plain = compile(&["name", "owner"], json!({})).unwrap();
        assert_eq!(
            plain.sql,
            r#"select "xata_id", "name", "owner" from "teams" order by "owner" asc"#
        );
    }

    #[test]
    fn test_self_link_aliases_inner_table() {
        let schema = Schema::new().with_table(
            TableDef::new("teams")
                .pk("xata_id", "text")
                .column("name", "text")
                .link_to("parent", "teams"),
        );
        let selection = resolve_columns(&schema, "teams", &["name", "parent.name", "parent.parent.name"]).unwrap();
        let q = build_select(
            &schema,
            &SelectRequest {
                table: "teams",
                selection: &selection,
                filter: &CompiledFilter::default(),
                sort: &[],
                limit: None,
            },
        )
        .unwrap();

        assert_eq!(
            q.sql,
            concat!(
                r#"select "xata_id", "name", (select to_json(obj) from (select "xata_id", "name", "#,
                r#"(select to_json(obj) from (select "xata_id", "name" from "teams" "#,
                r#"where "xata_id" = "parent"."parent") as obj) as "parent" "#,
                r#"from "teams" as "parent" where "xata_id" = "teams"."parent") as obj) as "parent" "#,
                r#"from "teams""#
            )
        );
    }

    #[test]
    fn test_self_link_named_after_its_table() {
        let schema = Schema::new().with_table(
            TableDef::new("teams")
                .pk("xata_id", "text")
                .column("name", "text")
                .link_to("teams", "teams"),
        );
        let selection = resolve_columns(&schema, "teams", &["teams.name"]).unwrap();
        let q = build_select(
            &schema,
            &SelectRequest {
                table: "teams",
                selection: &selection,
                filter: &CompiledFilter::default(),
                sort: &[],
                limit: None,
            },
        )
        .unwrap();
        assert!(
            q.sql.contains(r#"from "teams" as "teams_link" where "xata_id" = "teams"."teams""#),
            "{}",
            q.sql
        );
    }

    #[test]
    fn test_open_table_uses_literal_star() {
        let schema = Schema::new().with_table(TableDef::new("logs"));
        let selection = resolve_columns(&schema, "logs", &["*"]).unwrap();
        let q = build_select(
            &schema,
            &SelectRequest {
                table: "logs",
                selection: &selection,
                filter: &CompiledFilter::default(),
                sort: &[],
                limit: None,
            },
        )
        .unwrap();
        assert_eq!(q.sql, r#"select * from "logs""#);
    }

    #[test]
    fn test_unknown_sort_column() {
        let schema = schema();
        let selection = resolve_columns(&schema, "teams", &["name"]).unwrap();
        let err = build_select(
            &schema,
            &SelectRequest {
                table: "teams",
                selection: &selection,
                filter: &CompiledFilter::default(),
                sort: &[Sort::asc("nam")],
                limit: None,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RelqError::SchemaResolution { .. }));
    }
}
