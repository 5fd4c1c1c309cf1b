//! Filter compilation.
//!
//! A [`FilterExpr`] becomes a predicate fragment for its own table plus one
//! compiled child per filtered link. Link filters are never joined here; the
//! emitter embeds them in the link's correlated subquery.

use serde_json::Value;

use super::ast::{ColumnPredicate, Comparison, FilterExpr};
use crate::error::{RelqError, RelqResult};
use crate::schema::{Schema, TableDef};
use crate::transpiler::{SqlFragment, quote_identifier};

/// Output of the filter compiler for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    /// Predicate on the table's own columns, `None` when unconstrained.
    pub predicate: Option<SqlFragment>,
    /// Child filters keyed by link name, in order of first appearance.
    pub links: Vec<(String, CompiledFilter)>,
}

impl CompiledFilter {
    /// True when neither this level nor any linked level constrains rows.
    pub fn is_empty(&self) -> bool {
        self.predicate.is_none() && self.links.iter().all(|(_, f)| f.is_empty())
    }

    pub fn link(&self, name: &str) -> Option<&CompiledFilter> {
        self.links.iter().find(|(n, _)| n == name).map(|(_, f)| f)
    }
}

/// Compile `expr` against `table`.
pub fn compile_filter(schema: &Schema, table: &str, expr: &FilterExpr) -> RelqResult<CompiledFilter> {
    let def = schema.require_table(table)?;

    let mut links: Vec<(String, Vec<&FilterExpr>)> = Vec::new();
    let predicate = compile_conjunctive(schema, def, expr, &mut links)?;

    let mut compiled_links = Vec::with_capacity(links.len());
    for (name, exprs) in links {
        let target = def
            .link(&name)
            .map(|l| l.target_table)
            .ok_or_else(|| RelqError::resolution(table, name.as_str(), "link not found"))?;
        if schema.table(target).is_none() {
            return Err(RelqError::resolution(
                table,
                name.as_str(),
                format!("link targets unknown table '{}'", target),
            ));
        }
        let child = match exprs.as_slice() {
            [single] => (*single).clone(),
            many => FilterExpr::All(many.iter().map(|e| (*e).clone()).collect()),
        };
        compiled_links.push((name, compile_filter(schema, target, &child)?));
    }

    Ok(CompiledFilter {
        predicate,
        links: compiled_links,
    })
}

/// Compile a node in conjunctive position, hoisting link filters.
fn compile_conjunctive<'e>(
    schema: &Schema,
    def: &TableDef,
    expr: &'e FilterExpr,
    links: &mut Vec<(String, Vec<&'e FilterExpr>)>,
) -> RelqResult<Option<SqlFragment>> {
    match expr {
        FilterExpr::All(children) => {
            let mut preds = Vec::new();
            for child in children {
                if let Some(pred) = compile_conjunctive(schema, def, child, links)? {
                    preds.push(pred);
                }
            }
            Ok(combine(preds, " and "))
        }
        FilterExpr::Link { link, filter } => {
            let resolved = match def.link(link) {
                Some(l) => l.name.to_string(),
                None => {
                    let message = match def.suggest_link(link) {
                        Some(sugg) => format!("no link named '{}'. Did you mean '{}'?", link, sugg),
                        None => format!("no link named '{}'", link),
                    };
                    return Err(RelqError::resolution(&def.name, link.as_str(), message));
                }
            };
            let filter: &'e FilterExpr = filter;
            match links.iter_mut().find(|(n, _)| *n == resolved) {
                Some((_, exprs)) => exprs.push(filter),
                None => links.push((resolved, vec![filter])),
            }
            Ok(None)
        }
        other => compile_predicate(def, other),
    }
}

/// Compile a node that must stay on the current table.
fn compile_predicate(def: &TableDef, expr: &FilterExpr) -> RelqResult<Option<SqlFragment>> {
    match expr {
        FilterExpr::All(children) => Ok(combine(compile_each(def, children)?, " and ")),
        FilterExpr::Any(children) => Ok(combine(compile_each(def, children)?, " or ")),
        FilterExpr::Not(children) => negate("$not", compile_each(def, children)?, " and "),
        FilterExpr::None(children) => negate("$none", compile_each(def, children)?, " or "),
        FilterExpr::Exists { column, exists } => {
            check_column(def, column)?;
            Ok(Some(null_check(&quote_identifier(column), *exists)))
        }
        FilterExpr::Column { column, predicate } => {
            check_column(def, column)?;
            compile_column(def, column, predicate)
        }
        FilterExpr::Link { link, .. } => Err(RelqError::filter(format!(
            "filter on link '{}' is only allowed at the top level or inside $all",
            link
        ))),
    }
}

fn compile_each(def: &TableDef, children: &[FilterExpr]) -> RelqResult<Vec<SqlFragment>> {
    let mut preds = Vec::with_capacity(children.len());
    for child in children {
        if let Some(pred) = compile_predicate(def, child)? {
            preds.push(pred);
        }
    }
    Ok(preds)
}

fn compile_column(def: &TableDef, column: &str, predicate: &ColumnPredicate) -> RelqResult<Option<SqlFragment>> {
    match predicate {
        ColumnPredicate::Compare { op, value } => Ok(Some(compare(def, column, *op, value)?)),
        ColumnPredicate::Pattern { op, value } => {
            let mut frag = SqlFragment::sql(format!("{} like ", column_ref(def, column, true)));
            frag.push_param(Value::String(op.like_pattern(value)));
            Ok(Some(frag))
        }
        ColumnPredicate::Exists(exists) => Ok(Some(null_check(&quote_identifier(column), *exists))),
        ColumnPredicate::All(children) => Ok(combine(compile_column_each(def, column, children)?, " and ")),
        ColumnPredicate::Any(children) => Ok(combine(compile_column_each(def, column, children)?, " or ")),
        ColumnPredicate::Not(children) => negate("$not", compile_column_each(def, column, children)?, " and "),
        ColumnPredicate::None(children) => negate("$none", compile_column_each(def, column, children)?, " or "),
    }
}

fn compile_column_each(
    def: &TableDef,
    column: &str,
    children: &[ColumnPredicate],
) -> RelqResult<Vec<SqlFragment>> {
    let mut preds = Vec::with_capacity(children.len());
    for child in children {
        if let Some(pred) = compile_column(def, column, child)? {
            preds.push(pred);
        }
    }
    Ok(preds)
}

fn compare(def: &TableDef, column: &str, op: Comparison, value: &Value) -> RelqResult<SqlFragment> {
    if value.is_null() {
        return match op {
            Comparison::Is => Ok(null_check(&quote_identifier(column), false)),
            Comparison::IsNot => Ok(null_check(&quote_identifier(column), true)),
            _ => Err(RelqError::filter(format!(
                "'{}' cannot be compared with null using {}",
                column,
                op.sql()
            ))),
        };
    }
    let equality = matches!(op, Comparison::Is | Comparison::IsNot);
    let col = column_ref(def, column, equality && value.is_string());
    let mut frag = SqlFragment::sql(format!("{} {} ", col, op.sql()));
    match range_cast(def, column, value) {
        Some(typ) if !equality => {
            frag.push_sql("CAST (");
            frag.push_param(value.clone());
            frag.push_sql(format!(" AS {})", typ));
        }
        _ => frag.push_param(value.clone()),
    }
    Ok(frag)
}

/// Declared type to cast a string operand to when ordering a non-text column.
fn range_cast<'a>(def: &'a TableDef, column: &str, value: &Value) -> Option<&'a str> {
    if !value.is_string() || def.is_text_comparable(column) {
        return None;
    }
    let typ = def.column_def(column)?.typ.as_str();
    let plain = typ
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '(' | ')' | ','));
    plain.then_some(typ)
}

/// Columns whose type does not compare against a string get cast to text.
fn column_ref(def: &TableDef, column: &str, string_operand: bool) -> String {
    let quoted = quote_identifier(column);
    if string_operand && !def.is_text_comparable(column) {
        format!("CAST ({} AS text)", quoted)
    } else {
        quoted
    }
}

fn null_check(column_sql: &str, exists: bool) -> SqlFragment {
    if exists {
        SqlFragment::sql(format!("{} is not null", column_sql))
    } else {
        SqlFragment::sql(format!("{} is null", column_sql))
    }
}

fn check_column(def: &TableDef, column: &str) -> RelqResult<()> {
    def.validate_column(column)
        .map_err(|message| RelqError::resolution(&def.name, column, message))
}

/// One predicate stays bare, several are parenthesized.
fn combine(mut preds: Vec<SqlFragment>, joiner: &str) -> Option<SqlFragment> {
    match preds.len() {
        0 => None,
        1 => preds.pop(),
        _ => Some(SqlFragment::join(preds, joiner).wrap("(", ")")),
    }
}

fn negate(combinator: &'static str, preds: Vec<SqlFragment>, joiner: &str) -> RelqResult<Option<SqlFragment>> {
    if preds.is_empty() {
        return Err(RelqError::CombinatorArity { combinator });
    }
    Ok(Some(SqlFragment::join(preds, joiner).wrap("not (", ")")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Schema {
        Schema::new()
            .with_table(
                TableDef::new("teams")
                    .pk("xata_id", "text")
                    .column("name", "text")
                    .column("size", "int")
                    .column("founded", "timestamptz")
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

    fn compile(filter: Value) -> RelqResult<CompiledFilter> {
        let expr = FilterExpr::from_json(&filter)?;
        compile_filter(&schema(), "teams", &expr)
    }

    fn predicate(filter: Value) -> (String, Vec<Value>) {
        let compiled = compile(filter).unwrap();
        let rendered = compiled.predicate.unwrap_or_default().render();
        (rendered.sql, rendered.params)
    }

    #[test]
    fn test_literal_equality() {
        let (sql, params) = predicate(json!({ "name": "a" }));
        assert_eq!(sql, r#""name" = $1"#);
        assert_eq!(params, vec![json!("a")]);
    }

    #[test]
    fn test_string_against_non_text_column_is_cast() {
        let (sql, _) = predicate(json!({ "founded": "2020-01-01" }));
        assert_eq!(sql, r#"CAST ("founded" AS text) = $1"#);

        let (sql, _) = predicate(json!({ "size": 3 }));
        assert_eq!(sql, r#""size" = $1"#);
    }

    #[test]
    fn test_string_range_on_non_text_column_casts_operand() {
        let (sql, params) = predicate(json!({ "founded": { "$gt": "2020-01-01" } }));
        assert_eq!(sql, r#""founded" > CAST ($1 AS timestamptz)"#);
        assert_eq!(params, vec![json!("2020-01-01")]);

        let (sql, _) = predicate(json!({ "size": { "$le": 10 } }));
        assert_eq!(sql, r#""size" <= $1"#);
        let (sql, _) = predicate(json!({ "name": { "$lt": "m" } }));
        assert_eq!(sql, r#""name" < $1"#);
    }

    #[test]
    fn test_operators_combine_with_and() {
        let (sql, params) = predicate(json!({ "size": { "$ge": 1, "$lt": 10 } }));
        assert_eq!(sql, r#"("size" >= $1 and "size" < $2)"#);
        assert_eq!(params, vec![json!(1), json!(10)]);
    }

    #[test]
    fn test_null_comparisons() {
        let (sql, params) = predicate(json!({ "name": { "$is": null } }));
        assert_eq!(sql, r#""name" is null"#);
        assert!(params.is_empty());

        let (sql, _) = predicate(json!({ "$notExists": "name" }));
        assert_eq!(sql, r#""name" is null"#);
        let (sql, _) = predicate(json!({ "name": { "$exists": true } }));
        assert_eq!(sql, r#""name" is not null"#);
    }

    #[test]
    fn test_patterns() {
        let (sql, params) = predicate(json!({ "name": { "$contains": "ab" } }));
        assert_eq!(sql, r#""name" like $1"#);
        assert_eq!(params, vec![json!("%ab%")]);
    }

    #[test]
    fn test_combinators() {
        let (sql, _) = predicate(json!({ "$any": [{ "name": "a" }, { "name": "b" }] }));
        assert_eq!(sql, r#"("name" = $1 or "name" = $2)"#);

        let (sql, _) = predicate(json!({ "$not": { "name": "a", "size": 1 } }));
        assert_eq!(sql, r#"not ("name" = $1 and "size" = $2)"#);

        let (sql, _) = predicate(json!({ "$none": [{ "name": "a" }, { "name": "b" }] }));
        assert_eq!(sql, r#"not ("name" = $1 or "name" = $2)"#);
    }

    #[test]
    fn test_all_object_and_array_forms_match() {
        let a = predicate(json!({ "$all": { "name": "a", "size": 2 } }));
        let b = predicate(json!({ "$all": [{ "name": "a" }, { "size": 2 }] }));
        assert_eq!(a, b);
        assert_eq!(a.0, r#"("name" = $1 and "size" = $2)"#);
    }

    #[test]
    fn test_empty_filter_has_no_predicate() {
        assert!(compile(json!({})).unwrap().is_empty());
        assert!(compile(json!({ "$all": [] })).unwrap().is_empty());
    }

    #[test]
    fn test_vacuous_link_filter_is_empty() {
        let compiled = compile(json!({ "owner": { "pet": { "name": {} } } })).unwrap();
        assert!(compiled.is_empty());

        let compiled = compile(json!({ "owner": { "pet": { "name": "rex" } } })).unwrap();
        assert!(!compiled.is_empty());
    }

    #[test]
    fn test_link_filters_are_hoisted() {
        let compiled = compile(json!({
            "name": "a",
            "owner": { "full_name": { "$not": "John Doe" }, "pet.name": "rex" }
        }))
        .unwrap();

        let (sql, _) = {
            let r = compiled.predicate.clone().unwrap().render();
            (r.sql, r.params)
        };
        assert_eq!(sql, r#""name" = $1"#);

        let owner = compiled.link("owner").unwrap();
        let owner_sql = owner.predicate.clone().unwrap().render().sql;
        assert_eq!(owner_sql, r#"not ("full_name" = $1)"#);
        let pet = owner.link("pet").unwrap();
        assert_eq!(pet.predicate.clone().unwrap().render().sql, r#""name" = $1"#);
    }

    #[test]
    fn test_repeated_link_filters_merge() {
        let compiled = compile(json!({
            "$all": [{ "owner": { "full_name": "a" } }, { "owner.full_name": { "$isNot": "b" } }]
        }))
        .unwrap();
        assert_eq!(compiled.links.len(), 1);
        let sql = compiled.links[0].1.predicate.clone().unwrap().render().sql;
        assert_eq!(sql, r#"("full_name" = $1 and "full_name" != $2)"#);
    }

    #[test]
    fn test_link_inside_any_is_rejected() {
        let err = compile(json!({ "$any": [{ "owner": { "full_name": "a" } }, { "name": "b" }] }))
            .unwrap_err();
        assert!(matches!(err, RelqError::InvalidFilter(_)));
    }

    #[test]
    fn test_unknown_link_and_column() {
        let err = compile(json!({ "ownr": { "full_name": "a" } })).unwrap_err();
        assert!(err.to_string().contains("Did you mean 'owner'?"));

        let err = compile(json!({ "nmae": "a" })).unwrap_err();
        assert!(matches!(err, RelqError::SchemaResolution { .. }));
    }
}
