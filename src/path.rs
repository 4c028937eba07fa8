//! Path navigation over JSON values: dotted name steps, array filters
//! with three output modes, and function steps.

use crate::functions::FunctionRegistry;
use crate::ops;
use crate::scanner;
use crate::stack::{ElementResolver, LogicalOpStack};
use log::debug;
use serde_json::Value;

/// Output shape of an array filter step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FilterMode {
    /// Yield the first matching element.
    FindFirst,
    /// Yield all matching elements inside one array.
    CollectAll,
    /// Yield all matching elements and let every remaining step map
    /// across them as separate branches.
    DivertAll,
}

impl FilterMode {
    fn from_symbol(symbol: char) -> Option<FilterMode> {
        match symbol {
            ' ' => Some(FilterMode::FindFirst),
            '*' => Some(FilterMode::CollectAll),
            '@' => Some(FilterMode::DivertAll),
            _ => None,
        }
    }
}

/// Walks `node` along a dotted path. An empty path yields the node
/// itself; any step that cannot be applied ends the walk with nothing.
pub(crate) fn navigate(node: &Value, path: &str, functions: &FunctionRegistry) -> Option<Value> {
    let steps = scanner::decompose_path_steps(path);
    if steps.is_empty() {
        return Some(node.clone());
    }
    let mut current = node.clone();
    let mut diverted = false;
    for step in steps {
        if diverted {
            let Value::Array(elements) = &current else {
                return None;
            };
            let branched: Vec<Value> = elements
                .iter()
                .filter_map(|element| apply_step(element, step, functions).map(|(v, _)| v))
                .collect();
            current = Value::Array(branched);
        } else {
            let (next, divert) = apply_step(&current, step, functions)?;
            current = next;
            diverted = divert;
        }
    }
    Some(current)
}

fn apply_step(node: &Value, step: &str, functions: &FunctionRegistry) -> Option<(Value, bool)> {
    if step.is_empty() {
        return None;
    }
    if let Some((base, filter, mode_symbol)) = scanner::match_filter_step(step) {
        let mode = FilterMode::from_symbol(mode_symbol)?;
        let target = if base.is_empty() {
            node.clone()
        } else if let Some((name, args)) = scanner::match_function_call(base) {
            apply_function(node, name, args, functions)?
        } else {
            fetch_name(node, base)?
        };
        let filtered = apply_filter(&target, filter, mode, functions)?;
        return Some((filtered, mode == FilterMode::DivertAll));
    }
    if let Some((name, args)) = scanner::match_function_call(step) {
        return apply_function(node, name, args, functions).map(|v| (v, false));
    }
    fetch_name(node, step).map(|v| (v, false))
}

/// Name step: object key lookup, or a map across array elements with
/// misses omitted.
fn fetch_name(node: &Value, name: &str) -> Option<Value> {
    match node {
        Value::Object(map) => map.get(name).cloned(),
        Value::Array(elements) => {
            let collected: Vec<Value> = elements
                .iter()
                .filter_map(|element| element.get(name).cloned())
                .collect();
            Some(Value::Array(collected))
        }
        _ => None,
    }
}

fn apply_function(
    node: &Value,
    name: &str,
    args: &str,
    functions: &FunctionRegistry,
) -> Option<Value> {
    match functions.get(name) {
        Some(function) => function(node, args, functions),
        None => {
            debug!("unknown function '{name}' in path step");
            None
        }
    }
}

fn apply_filter(
    target: &Value,
    filter: &str,
    mode: FilterMode,
    functions: &FunctionRegistry,
) -> Option<Value> {
    let elements: Vec<&Value> = match target {
        Value::Array(elements) => elements.iter().collect(),
        Value::Object(_) => vec![target],
        _ => return None,
    };
    let filter = filter.trim();
    if let Ok(index) = filter.parse::<i64>() {
        let at = if index < 0 { index + elements.len() as i64 } else { index };
        if at < 0 {
            return None;
        }
        return elements.get(at as usize).map(|e| (*e).clone());
    }
    match mode {
        FilterMode::FindFirst => {
            for (index, element) in elements.iter().enumerate() {
                if predicate_holds(element, index, filter, functions) {
                    return Some((*element).clone());
                }
            }
            None
        }
        FilterMode::CollectAll | FilterMode::DivertAll => {
            let mut matched = Vec::new();
            for (index, element) in elements.iter().enumerate() {
                if predicate_holds(element, index, filter, functions) {
                    matched.push((*element).clone());
                }
            }
            Some(Value::Array(matched))
        }
    }
}

/// Evaluates a filter predicate with the element as the context node and
/// `#` bound to its index. A predicate that fails to evaluate is false.
fn predicate_holds(element: &Value, index: usize, filter: &str, functions: &FunctionRegistry) -> bool {
    let mut resolver = ElementResolver::new(element, index, functions);
    match LogicalOpStack::evaluate(filter, &mut resolver) {
        Ok(result) => ops::as_bool(result.as_ref()),
        Err(e) => {
            debug!("filter predicate '{filter}' failed: {e}");
            false
        }
    }
}

/// Handles the `'literal'.path` operand form: a quoted text literal
/// navigated like a one-value dataset. Returns `None` when the
/// expression does not have that shape.
pub(crate) fn literal_prefix_query(
    expression: &str,
    functions: &FunctionRegistry,
) -> Option<Option<Value>> {
    let bytes = expression.as_bytes();
    if bytes.first() != Some(&b'\'') {
        return None;
    }
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            break;
        }
        i += 1;
    }
    let literal = scanner::parse_literal(expression.get(..=i)?)?;
    let rest = &expression[i + 1..];
    let path = rest.strip_prefix('.')?;
    Some(navigate(&literal, path, functions))
}
