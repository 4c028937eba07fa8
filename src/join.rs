//! Join operators between two resolved datasets.
//!
//! Matching is driven through the path navigator: every left row
//! synthesises a `[k=v & …]` predicate that is evaluated against the
//! right array in find-first mode for the *-one operators and
//! collect-all mode for the *-many operators.

use crate::error::EngineError;
use crate::functions::FunctionRegistry;
use crate::ops;
use crate::path;
use crate::scanner;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinOperator {
    /// `>=<` left rows merged with the first matching right row;
    /// unmatched rows are dropped.
    InnerJoinOne,
    /// `<=<` left rows, merged when a right match exists.
    LeftJoinOne,
    /// `>=>` mirror of left-one.
    RightJoinOne,
    /// `<=<<` left rows augmented with all matching right rows under a
    /// named array field.
    LeftJoinMany,
    /// `>>=>` mirror of left-many.
    RightJoinMany,
}

impl JoinOperator {
    pub(crate) fn from_symbol(symbol: &str) -> Option<JoinOperator> {
        match symbol {
            ">=<" => Some(JoinOperator::InnerJoinOne),
            "<=<" => Some(JoinOperator::LeftJoinOne),
            ">=>" => Some(JoinOperator::RightJoinOne),
            "<=<<" => Some(JoinOperator::LeftJoinMany),
            ">>=>" => Some(JoinOperator::RightJoinMany),
            _ => None,
        }
    }
}

/// Derives the embedding field name for a *-many join from the last path
/// element of the opposite query.
pub(crate) fn last_element_name(query: &str) -> Result<String, EngineError> {
    let steps = scanner::decompose_path_steps(query);
    let last = steps.last().copied().unwrap_or("");
    let base = match scanner::match_filter_step(last) {
        Some((base, _, _)) => base,
        None => last,
    };
    if scanner::match_function_call(base).is_some() || !scanner::is_identifier(base) {
        return Err(EngineError::InvalidArgument(format!(
            "cannot derive array name from '{query}'"
        )));
    }
    Ok(base.to_string())
}

pub(crate) fn check_element_name(name: &str) -> Result<(), EngineError> {
    if scanner::is_identifier(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidArgument(format!("invalid array name '{name}'")))
    }
}

/// Joins two container nodes. Right-sided operators and the
/// object-inner-one case normalise by swapping sides first. Returns
/// nothing only when the construction is impossible for every row shape.
#[allow(clippy::too_many_arguments)]
pub(crate) fn join_nodes(
    mut left: Value,
    mut left_keys: Vec<String>,
    left_array_name: Option<String>,
    mut operator: JoinOperator,
    mut right: Value,
    mut right_keys: Vec<String>,
    right_array_name: Option<String>,
    functions: &FunctionRegistry,
) -> Option<Value> {
    let swap = matches!(operator, JoinOperator::RightJoinOne | JoinOperator::RightJoinMany)
        || (operator == JoinOperator::InnerJoinOne && !left.is_object() && right.is_object());
    let array_name = if swap {
        std::mem::swap(&mut left, &mut right);
        std::mem::swap(&mut left_keys, &mut right_keys);
        operator = match operator {
            JoinOperator::RightJoinOne => JoinOperator::LeftJoinOne,
            JoinOperator::RightJoinMany => JoinOperator::LeftJoinMany,
            other => other,
        };
        left_array_name
    } else {
        right_array_name
    };
    let right_array = match right {
        Value::Array(_) => right,
        other => Value::Array(vec![other]),
    };
    if left.is_object() {
        return join_to_object(
            &left,
            &left_keys,
            operator,
            &right_array,
            &right_keys,
            array_name.as_deref(),
            functions,
        );
    }
    let rows = match left {
        Value::Array(rows) => rows,
        _ => Vec::new(),
    };
    let mut joined = Vec::new();
    for row in rows {
        if row.is_object()
            && let Some(node) = join_to_object(
                &row,
                &left_keys,
                operator,
                &right_array,
                &right_keys,
                array_name.as_deref(),
                functions,
            )
        {
            joined.push(node);
        }
    }
    Some(Value::Array(joined))
}

/// Joins one left object against the right array. Returns nothing when a
/// key misses or, for inner-one, when no right row matches.
fn join_to_object(
    left: &Value,
    left_keys: &[String],
    operator: JoinOperator,
    right_array: &Value,
    right_keys: &[String],
    array_name: Option<&str>,
    functions: &FunctionRegistry,
) -> Option<Value> {
    let mut conditions = Vec::with_capacity(left_keys.len());
    for (left_key, right_key) in left_keys.iter().zip(right_keys) {
        let left_value = path::navigate(left, left_key, functions)?;
        if !ops::is_value_node(&left_value) {
            return None;
        }
        let rendered = match left_value.as_str() {
            Some(text) => scanner::quote(text),
            None => ops::as_text(&left_value),
        };
        conditions.push(format!("{right_key}={rendered}"));
    }
    let predicate = conditions.join(" & ");
    if operator == JoinOperator::LeftJoinMany {
        let matched = path::navigate(right_array, &format!("[{predicate}]*"), functions)?;
        let mut joined = left.as_object()?.clone();
        joined.insert(array_name?.to_string(), matched);
        return Some(Value::Object(joined));
    }
    match path::navigate(right_array, &format!("[{predicate}]"), functions) {
        Some(Value::Object(right_object)) => {
            let mut joined = left.as_object()?.clone();
            for (key, value) in right_object {
                joined.insert(key, value);
            }
            Some(Value::Object(joined))
        }
        _ if operator == JoinOperator::InnerJoinOne => None,
        _ => Some(left.clone()),
    }
}
