//! Filter expressions: JSON wire format → typed tree → SQL predicate.

pub mod ast;
pub mod compile;

pub use ast::{ColumnPredicate, Comparison, FilterExpr, PatternOp};
pub use compile::{CompiledFilter, compile_filter};
