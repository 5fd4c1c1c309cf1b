//! SQL transpiler.
//!
//! Fragments are assembled bottom-up with deferred placeholders; numbering
//! happens once, when the finished statement is rendered, so `$1, $2, …`
//! always follow left-to-right order in the final text.

pub mod select;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use select::{Limit, SelectRequest, build_select};

/// A finished statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

impl std::fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Context for parameterized query rendering.
#[derive(Debug, Default)]
pub struct ParamContext {
    /// Current parameter index (1-based, `$1`, `$2`, …)
    pub index: usize,
    /// Collected parameter values in order
    pub params: Vec<Value>,
}

impl ParamContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value and return the placeholder for it.
    pub fn add_param(&mut self, value: Value) -> String {
        self.index += 1;
        self.params.push(value);
        placeholder(self.index)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Sql(String),
    Param(Value),
}

/// SQL text interleaved with not-yet-numbered parameter values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragment {
    parts: Vec<Part>,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sql(text: impl Into<String>) -> Self {
        let mut frag = Self::new();
        frag.push_sql(text);
        frag
    }

    pub fn push_sql(&mut self, text: impl Into<String>) {
        let text = text.into();
        if let Some(Part::Sql(last)) = self.parts.last_mut() {
            last.push_str(&text);
        } else {
            self.parts.push(Part::Sql(text));
        }
    }

    pub fn push_param(&mut self, value: Value) {
        self.parts.push(Part::Param(value));
    }

    pub fn append(&mut self, other: SqlFragment) {
        for part in other.parts {
            match part {
                Part::Sql(text) => self.push_sql(text),
                Part::Param(value) => self.push_param(value),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Join fragments with a separator.
    pub fn join(fragments: Vec<SqlFragment>, separator: &str) -> SqlFragment {
        let mut out = SqlFragment::new();
        for (i, frag) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.push_sql(separator);
            }
            out.append(frag);
        }
        out
    }

    /// `prefix` + self + `suffix`.
    pub fn wrap(self, prefix: &str, suffix: &str) -> SqlFragment {
        let mut out = SqlFragment::sql(prefix);
        out.append(self);
        out.push_sql(suffix);
        out
    }

    /// Number the parameters left to right and produce the final statement.
    pub fn render(self) -> CompiledQuery {
        let mut ctx = ParamContext::new();
        let mut sql = String::new();
        for part in self.parts {
            match part {
                Part::Sql(text) => sql.push_str(&text),
                Part::Param(value) => sql.push_str(&ctx.add_param(value)),
            }
        }
        CompiledQuery { sql, params: ctx.params }
    }
}

/// Postgres positional placeholder.
pub fn placeholder(index: usize) -> String {
    format!("${}", index)
}

/// Always double-quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("name"), "\"name\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_render_numbers_left_to_right() {
        let mut inner = SqlFragment::sql("\"b\" = ");
        inner.push_param(json!(2));

        let mut frag = SqlFragment::sql("\"a\" = ");
        frag.push_param(json!(1));
        frag.push_sql(" and ");
        frag.append(inner.wrap("(", ")"));

        let compiled = frag.render();
        assert_eq!(compiled.sql, "\"a\" = $1 and (\"b\" = $2)");
        assert_eq!(compiled.params, vec![json!(1), json!(2)]);
    }
}
