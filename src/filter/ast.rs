//! Typed filter expressions parsed from the JSON wire format.

use serde_json::{Map, Value};

use crate::error::{RelqError, RelqResult};

/// Label used in errors raised outside any column.
const ROOT: &str = "<root>";

/// A filter node over one table.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    All(Vec<FilterExpr>),
    Any(Vec<FilterExpr>),
    Not(Vec<FilterExpr>),
    None(Vec<FilterExpr>),
    Column {
        column: String,
        predicate: ColumnPredicate,
    },
    Exists {
        column: String,
        exists: bool,
    },
    /// Filter evaluated against the table behind `link`.
    Link {
        link: String,
        filter: Box<FilterExpr>,
    },
}

/// Predicate on a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnPredicate {
    Compare { op: Comparison, value: Value },
    Pattern { op: PatternOp, value: String },
    Exists(bool),
    All(Vec<ColumnPredicate>),
    Any(Vec<ColumnPredicate>),
    Not(Vec<ColumnPredicate>),
    None(Vec<ColumnPredicate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Is,
    IsNot,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOp {
    Contains,
    StartsWith,
    EndsWith,
    Pattern,
}

impl Comparison {
    pub fn sql(&self) -> &'static str {
        match self {
            Comparison::Is => "=",
            Comparison::IsNot => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$is" => Some(Comparison::Is),
            "$isNot" => Some(Comparison::IsNot),
            "$gt" => Some(Comparison::Gt),
            "$ge" => Some(Comparison::Ge),
            "$lt" => Some(Comparison::Lt),
            "$le" => Some(Comparison::Le),
            _ => None,
        }
    }
}

impl PatternOp {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "$contains" => Some(PatternOp::Contains),
            "$startsWith" => Some(PatternOp::StartsWith),
            "$endsWith" => Some(PatternOp::EndsWith),
            "$pattern" => Some(PatternOp::Pattern),
            _ => None,
        }
    }

    /// Turn the user value into a `like` pattern.
    pub fn like_pattern(&self, value: &str) -> String {
        match self {
            PatternOp::Contains => format!("%{}%", escape_like(value)),
            PatternOp::StartsWith => format!("{}%", escape_like(value)),
            PatternOp::EndsWith => format!("%{}", escape_like(value)),
            PatternOp::Pattern => glob_to_like(value),
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `*` matches any run, `?` a single character.
fn glob_to_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '*' => out.push('%'),
            '?' => out.push('_'),
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

impl FilterExpr {
    /// Parse the JSON filter format.
    ///
    /// ```
    /// use relq::filter::FilterExpr;
    /// use serde_json::json;
    ///
    /// let a = FilterExpr::from_json(&json!({ "$all": { "a": 1, "b": 2 } })).unwrap();
    /// let b = FilterExpr::from_json(&json!({ "$all": [{ "a": 1 }, { "b": 2 }] })).unwrap();
    /// assert_eq!(a, b);
    /// ```
    pub fn from_json(value: &Value) -> RelqResult<Self> {
        parse_node(value)
    }

    /// True when the expression contributes nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            FilterExpr::All(children) | FilterExpr::Any(children) => {
                children.iter().all(FilterExpr::is_empty)
            }
            _ => false,
        }
    }
}

fn parse_node(value: &Value) -> RelqResult<FilterExpr> {
    match value {
        Value::Object(map) => parse_object(map),
        other => Err(RelqError::filter(format!(
            "filter node must be an object, got {}",
            other
        ))),
    }
}

/// A node with several keys is an implicit `$all`.
fn parse_object(map: &Map<String, Value>) -> RelqResult<FilterExpr> {
    let mut children = map
        .iter()
        .map(|(k, v)| parse_entry(k, v))
        .collect::<RelqResult<Vec<_>>>()?;
    if children.len() == 1 {
        Ok(children.remove(0))
    } else {
        Ok(FilterExpr::All(children))
    }
}

fn parse_entry(key: &str, value: &Value) -> RelqResult<FilterExpr> {
    match key {
        "$all" => Ok(FilterExpr::All(parse_children(key, value)?)),
        "$any" => Ok(FilterExpr::Any(parse_children(key, value)?)),
        "$not" => Ok(FilterExpr::Not(non_empty("$not", parse_children(key, value)?)?)),
        "$none" => Ok(FilterExpr::None(non_empty("$none", parse_children(key, value)?)?)),
        "$exists" | "$notExists" => match value {
            Value::String(column) => Ok(FilterExpr::Exists {
                column: column.clone(),
                exists: key == "$exists",
            }),
            other => Err(RelqError::filter(format!(
                "{} expects a column name, got {}",
                key, other
            ))),
        },
        k if k.starts_with('$') => Err(RelqError::operator(ROOT, k)),
        k if k.contains('.') => {
            let (link, rest) = k.split_once('.').unwrap_or((k, ""));
            if link.is_empty() || rest.is_empty() {
                return Err(RelqError::filter(format!("invalid filter key '{}'", k)));
            }
            Ok(FilterExpr::Link {
                link: link.to_string(),
                filter: Box::new(parse_entry(rest, value)?),
            })
        }
        k => match value {
            Value::Object(map) if map.keys().any(|inner| !inner.starts_with('$')) => {
                Ok(FilterExpr::Link {
                    link: k.to_string(),
                    filter: Box::new(parse_object(map)?),
                })
            }
            _ => Ok(FilterExpr::Column {
                column: k.to_string(),
                predicate: parse_column_value(k, value)?,
            }),
        },
    }
}

/// Combinator operands: an array of nodes, or an object split into
/// single-key nodes.
fn parse_children(key: &str, value: &Value) -> RelqResult<Vec<FilterExpr>> {
    match value {
        Value::Array(items) => items.iter().map(parse_node).collect(),
        Value::Object(map) => map.iter().map(|(k, v)| parse_entry(k, v)).collect(),
        other => Err(RelqError::filter(format!(
            "{} expects an array or object, got {}",
            key, other
        ))),
    }
}

fn non_empty<T>(combinator: &'static str, children: Vec<T>) -> RelqResult<Vec<T>> {
    if children.is_empty() {
        Err(RelqError::CombinatorArity { combinator })
    } else {
        Ok(children)
    }
}

fn parse_column_value(column: &str, value: &Value) -> RelqResult<ColumnPredicate> {
    match value {
        Value::Object(map) => {
            let mut preds = map
                .iter()
                .map(|(k, v)| parse_column_op(column, k, v))
                .collect::<RelqResult<Vec<_>>>()?;
            if preds.len() == 1 {
                Ok(preds.remove(0))
            } else {
                Ok(ColumnPredicate::All(preds))
            }
        }
        // A list of values matches any of them.
        Value::Array(items) => Ok(ColumnPredicate::Any(
            items
                .iter()
                .map(|item| parse_column_value(column, item))
                .collect::<RelqResult<Vec<_>>>()?,
        )),
        scalar => Ok(ColumnPredicate::Compare {
            op: Comparison::Is,
            value: scalar.clone(),
        }),
    }
}

fn parse_column_op(column: &str, key: &str, value: &Value) -> RelqResult<ColumnPredicate> {
    if let Some(op) = Comparison::from_key(key) {
        if value.is_object() || value.is_array() {
            return Err(RelqError::filter(format!(
                "{} on '{}' expects a scalar value, got {}",
                key, column, value
            )));
        }
        return Ok(ColumnPredicate::Compare {
            op,
            value: value.clone(),
        });
    }
    if let Some(op) = PatternOp::from_key(key) {
        return match value {
            Value::String(s) => Ok(ColumnPredicate::Pattern { op, value: s.clone() }),
            other => Err(RelqError::filter(format!(
                "{} on '{}' expects a string, got {}",
                key, column, other
            ))),
        };
    }
    match key {
        "$exists" | "$notExists" => match value {
            Value::Bool(b) => Ok(ColumnPredicate::Exists(if key == "$exists" { *b } else { !*b })),
            other => Err(RelqError::filter(format!(
                "{} on '{}' expects a boolean, got {}",
                key, column, other
            ))),
        },
        "$all" => Ok(ColumnPredicate::All(parse_column_children(column, value)?)),
        "$any" => Ok(ColumnPredicate::Any(parse_column_children(column, value)?)),
        "$not" => Ok(ColumnPredicate::Not(non_empty(
            "$not",
            parse_column_children(column, value)?,
        )?)),
        "$none" => Ok(ColumnPredicate::None(non_empty(
            "$none",
            parse_column_children(column, value)?,
        )?)),
        other => Err(RelqError::operator(column, other)),
    }
}

fn parse_column_children(column: &str, value: &Value) -> RelqResult<Vec<ColumnPredicate>> {
    match value {
        Value::Array(items) => items.iter().map(|v| parse_column_value(column, v)).collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| parse_column_op(column, k, v))
            .collect(),
        scalar => Ok(vec![parse_column_value(column, scalar)?]),
    }
}
