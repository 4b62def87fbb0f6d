//! Closed expression language for template counts and conversion tables.
//!
//! Expressions are parsed once into an [`Expr`] tree and evaluated against a
//! [`Scope`] of already-decoded values. Only literals, variables, list
//! literals, indexing, arithmetic, comparisons, boolean connectives and a
//! handful of pure builtins (`len`, `abs`, `min`, `max`, `int`, `float`) are
//! understood; nothing in a template string can reach outside the scope.
//!
//! # Examples
//! ```
//! use xlread_core::Value;
//! use xlread_core::expr::{Expr, Scope};
//!
//! let expr = Expr::parse("entry_length - 12").unwrap();
//! let length = Value::Int(40);
//! let mut scope = Scope::new();
//! scope.bind("entry_length", &length);
//! assert_eq!(expr.evaluate(&scope).unwrap(), Value::Int(28));
//! ```

pub mod error;
pub mod eval;
pub mod parser;

pub use error::ExprError;
pub use eval::Scope;
pub use parser::{BinaryOp, CompareOp, Expr, UnaryOp};
