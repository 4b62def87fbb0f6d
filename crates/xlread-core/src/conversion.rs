//! Conversion side-tables: conditional lookup trees keyed by header values.
//!
//! Each top-level entry is a tree. An object's keys are boolean expressions;
//! the first one that evaluates to exactly `True` selects its child. A string
//! leaf is an expression giving the result; an array leaf is a list of
//! fragments joined into one expression.

use serde_json::Value as Json;

use crate::Value;
use crate::error::DecodeError;
use crate::expr::{Expr, Scope};

#[derive(Debug, Clone, PartialEq)]
pub enum LookupNode {
    Branches(Vec<Branch>),
    Leaf { source: String, expr: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub condition: String,
    pub test: Expr,
    pub node: LookupNode,
}

/// Parsed `conversion.json`.
///
/// # Examples
/// ```
/// use serde_json::json;
/// use xlread_core::expr::Scope;
/// use xlread_core::{ConversionTable, Value};
///
/// let table = ConversionTable::from_json(&json!({
///     "headbox_name": { "headbox_type == 1": "'EEG32'", "True": "'unknown'" }
/// }))
/// .unwrap();
/// let headbox = Value::Int(1);
/// let mut scope = Scope::new();
/// scope.bind("headbox_type", &headbox);
/// assert_eq!(
///     table.evaluate("headbox_name", &scope).unwrap(),
///     Value::Text("EEG32".to_string())
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionTable {
    entries: Vec<(String, LookupNode)>,
}

impl ConversionTable {
    pub fn from_json(document: &Json) -> Result<Self, DecodeError> {
        let object = document.as_object().ok_or_else(|| {
            DecodeError::invalid_template("<conversion>", "expected a JSON object")
        })?;
        let entries = object
            .iter()
            .map(|(name, value)| parse_node(name, value).map(|node| (name.clone(), node)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.node(name).is_some()
    }

    fn node(&self, name: &str) -> Option<&LookupNode> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == name)
            .map(|(_, node)| node)
    }

    /// Walk entry `name` down to a leaf and evaluate it.
    ///
    /// # Errors
    /// `UnmatchedTreeBranch` when no condition at some level is true,
    /// `ConversionExpression` when a condition or leaf fails to evaluate.
    pub fn evaluate(&self, name: &str, scope: &Scope<'_>) -> Result<Value, DecodeError> {
        let mut node = self.node(name).ok_or_else(|| {
            DecodeError::invalid_template(name, "no such conversion entry")
        })?;
        let failed = |source| DecodeError::ConversionExpression {
            entry: name.to_string(),
            source,
        };
        loop {
            match node {
                LookupNode::Leaf { expr, .. } => return expr.evaluate(scope).map_err(failed),
                LookupNode::Branches(branches) => {
                    let mut selected = None;
                    for branch in branches {
                        if branch.test.evaluate(scope).map_err(failed)? == Value::Bool(true) {
                            selected = Some(&branch.node);
                            break;
                        }
                    }
                    node = selected.ok_or_else(|| DecodeError::UnmatchedTreeBranch {
                        entry: name.to_string(),
                        conditions: branches
                            .iter()
                            .map(|branch| branch.condition.clone())
                            .collect(),
                    })?;
                }
            }
        }
    }
}

fn parse_node(entry: &str, value: &Json) -> Result<LookupNode, DecodeError> {
    let compile = |source: &str| {
        Expr::parse(source).map_err(|source| DecodeError::ConversionExpression {
            entry: entry.to_string(),
            source,
        })
    };
    match value {
        Json::String(source) => Ok(LookupNode::Leaf {
            source: source.clone(),
            expr: compile(source)?,
        }),
        Json::Array(parts) => {
            let source = parts
                .iter()
                .map(|part| {
                    part.as_str().ok_or_else(|| {
                        DecodeError::invalid_template(entry, "list leaves must hold strings")
                    })
                })
                .collect::<Result<String, _>>()?;
            Ok(LookupNode::Leaf {
                expr: compile(&source)?,
                source,
            })
        }
        Json::Object(branches) => {
            let branches = branches
                .iter()
                .map(|(condition, child)| {
                    Ok(Branch {
                        condition: condition.clone(),
                        test: compile(condition)?,
                        node: parse_node(entry, child)?,
                    })
                })
                .collect::<Result<Vec<_>, DecodeError>>()?;
            Ok(LookupNode::Branches(branches))
        }
        other => Err(DecodeError::invalid_template(
            entry,
            format!("expected an object, string or list of strings, got {other}"),
        )),
    }
}
