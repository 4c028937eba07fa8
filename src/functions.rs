//! The registry and built-in catalog of query functions.
//!
//! Each function is a small pure transform invoked as a path step:
//! `(current node, raw argument text, registry) -> value`. Arguments are
//! decomposed by the scanner; each argument is a literal or a path
//! evaluated against the current node. String and numeric transforms map
//! element-wise over arrays; aggregate transforms consume the array whole.

use crate::ops;
use crate::path;
use crate::scanner;
use serde_json::Value;

/// The signature of a query function.
pub type QueryFunction = fn(&Value, &str, &FunctionRegistry) -> Option<Value>;

/// A registry of query functions, looked up case-insensitively.
pub struct FunctionRegistry {
    functions: std::collections::HashMap<String, QueryFunction>,
}

impl FunctionRegistry {
    /// Creates a new, empty function registry.
    pub fn new() -> Self {
        Self { functions: std::collections::HashMap::new() }
    }

    /// Registers a function under a case-insensitive name.
    pub fn register(&mut self, name: &str, function: QueryFunction) {
        self.functions.insert(name.to_lowercase(), function);
    }

    pub fn get(&self, name: &str) -> Option<&QueryFunction> {
        self.functions.get(&name.to_lowercase())
    }
}

// --- Argument helpers ---

fn eval_param(node: &Value, param: &str, functions: &FunctionRegistry) -> Option<Value> {
    scanner::parse_literal(param).or_else(|| path::navigate(node, param, functions))
}

fn param_text(node: &Value, param: &str, functions: &FunctionRegistry) -> Option<String> {
    eval_param(node, param, functions).map(|v| ops::as_text(&v))
}

fn param_int(node: &Value, param: &str, functions: &FunctionRegistry) -> Option<i64> {
    eval_param(node, param, functions)
        .as_ref()
        .and_then(ops::to_double)
        .map(|d| d as i64)
}

fn args(params: &str) -> Vec<&str> {
    scanner::decompose_arguments(params)
}

/// Applies a text transform to a string node, or element-wise over an
/// array with non-text elements omitted.
fn apply_textual(node: &Value, f: impl Fn(&str) -> Value) -> Option<Value> {
    match node {
        Value::String(s) => Some(f(s)),
        Value::Array(elements) => Some(Value::Array(
            elements.iter().filter_map(|e| e.as_str().map(&f)).collect(),
        )),
        _ => None,
    }
}

/// Applies a transform to any value node, or element-wise over an array
/// with container elements omitted.
fn apply_value(node: &Value, f: impl Fn(&Value) -> Option<Value>) -> Option<Value> {
    match node {
        Value::Array(elements) => Some(Value::Array(
            elements.iter().filter(|e| ops::is_value_node(e)).filter_map(&f).collect(),
        )),
        v if ops::is_value_node(v) => f(v),
        _ => None,
    }
}

fn apply_numeric(node: &Value, f: impl Fn(f64) -> f64) -> Option<Value> {
    apply_value(node, |v| ops::to_double(v).map(&f).and_then(number_value))
}

fn number_value(value: f64) -> Option<Value> {
    if !value.is_finite() {
        return None;
    }
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        return Some(Value::from(value as i64));
    }
    Some(Value::from(value))
}

// --- String transforms ---

fn func_upper_case(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_textual(node, |s| s.to_uppercase().into())
}

fn func_lower_case(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_textual(node, |s| s.to_lowercase().into())
}

fn func_capitalize(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_textual(node, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => format!("{}{}", first.to_uppercase(), chars.as_str()).into(),
            None => "".into(),
        }
    })
}

fn func_uncapitalize(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_textual(node, |s| {
        let mut chars = s.chars();
        match chars.next() {
            Some(first) => format!("{}{}", first.to_lowercase(), chars.as_str()).into(),
            None => "".into(),
        }
    })
}

fn func_trim(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_textual(node, |s| s.trim().into())
}

fn func_strip_start(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let chars = args(params)
        .first()
        .and_then(|p| param_text(node, p, functions))
        .unwrap_or_default();
    apply_textual(node, |s| {
        if chars.is_empty() {
            s.trim_start().into()
        } else {
            s.trim_start_matches(|c| chars.contains(c)).into()
        }
    })
}

fn func_strip_end(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let chars = args(params)
        .first()
        .and_then(|p| param_text(node, p, functions))
        .unwrap_or_default();
    apply_textual(node, |s| {
        if chars.is_empty() {
            s.trim_end().into()
        } else {
            s.trim_end_matches(|c| chars.contains(c)).into()
        }
    })
}

fn func_abbreviate(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let arguments = args(params);
    let (offset, max_width) = match arguments.as_slice() {
        [width] => (0, param_int(node, width, functions)?),
        [offset, width] => (
            param_int(node, offset, functions)?.max(0) as usize,
            param_int(node, width, functions)?,
        ),
        _ => return None,
    };
    if max_width < 4 {
        return None;
    }
    let max_width = max_width as usize;
    apply_textual(node, |s| {
        let total = s.chars().count();
        if total <= max_width && offset == 0 {
            return s.into();
        }
        if offset == 0 {
            let kept: String = s.chars().take(max_width - 3).collect();
            return format!("{kept}...").into();
        }
        let kept: String = s.chars().skip(offset).take(max_width.saturating_sub(6)).collect();
        format!("...{kept}...").into()
    })
}

fn func_substr(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let arguments = args(params);
    let start = arguments.first().and_then(|p| param_int(node, p, functions)).unwrap_or(0);
    let end = arguments.get(1).and_then(|p| param_int(node, p, functions));
    apply_textual(node, |s| {
        let total = s.chars().count() as i64;
        let from = if start < 0 { (total + start).max(0) } else { start.min(total) };
        let to = match end {
            Some(e) if e < 0 => (total + e).max(from),
            Some(e) => e.clamp(from, total),
            None => total,
        };
        s.chars().skip(from as usize).take((to - from) as usize).collect::<String>().into()
    })
}

fn keep_part(node: &Value, params: &str, functions: &FunctionRegistry, last: bool, after: bool) -> Option<Value> {
    let find = param_text(node, args(params).first()?, functions)?;
    apply_textual(node, |s| {
        if find.is_empty() {
            return s.into();
        }
        let at = if last { s.rfind(&find) } else { s.find(&find) };
        match at {
            Some(at) if after => s[at + find.len()..].into(),
            Some(at) => s[..at].into(),
            None => "".into(),
        }
    })
}

fn func_keep_before(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    keep_part(node, params, f, false, false)
}

fn func_keep_before_last(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    keep_part(node, params, f, true, false)
}

fn func_keep_after(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    keep_part(node, params, f, false, true)
}

fn func_keep_after_last(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    keep_part(node, params, f, true, true)
}

fn func_remove_start(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let find = param_text(node, args(params).first()?, functions)?;
    apply_textual(node, |s| s.strip_prefix(&find).unwrap_or(s).into())
}

fn func_remove_end(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let find = param_text(node, args(params).first()?, functions)?;
    apply_textual(node, |s| s.strip_suffix(&find).unwrap_or(s).into())
}

fn func_prepend_if_missing(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let prefix = param_text(node, args(params).first()?, functions)?;
    apply_textual(node, |s| {
        if s.starts_with(&prefix) { s.into() } else { format!("{prefix}{s}").into() }
    })
}

fn func_append_if_missing(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let suffix = param_text(node, args(params).first()?, functions)?;
    apply_textual(node, |s| {
        if s.ends_with(&suffix) { s.into() } else { format!("{s}{suffix}").into() }
    })
}

fn func_repeat(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let times = param_int(node, args(params).first()?, functions)?.max(0) as usize;
    apply_value(node, |v| Some(ops::as_text(v).repeat(times).into()))
}

fn func_replace(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let arguments = args(params);
    let find = param_text(node, arguments.first()?, functions)?;
    let to = param_text(node, arguments.get(1)?, functions)?;
    let max = arguments.get(2).and_then(|p| param_int(node, p, functions)).unwrap_or(-1);
    apply_textual(node, |s| {
        if find.is_empty() {
            return s.into();
        }
        if max < 0 {
            s.replace(&find, &to).into()
        } else {
            s.replacen(&find, &to, max as usize).into()
        }
    })
}

fn func_split(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let separator = args(params).first().and_then(|p| param_text(node, p, functions));
    match node {
        Value::String(s) => {
            let pieces: Vec<Value> = match &separator {
                Some(sep) if !sep.is_empty() => {
                    s.split(sep.as_str()).map(|p| Value::from(p)).collect()
                }
                _ => s.split_whitespace().map(Value::from).collect(),
            };
            Some(Value::Array(pieces))
        }
        _ => None,
    }
}

fn func_concat(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let arguments = args(params);
    if arguments.is_empty() {
        return None;
    }
    let concat_one = |element: &Value| -> Option<Value> {
        let mut out = String::new();
        for argument in &arguments {
            match scanner::parse_literal(argument) {
                Some(v) => out.push_str(&ops::as_text(&v)),
                None => {
                    let value = path::navigate(element, argument, functions)?;
                    if !ops::is_value_node(&value) {
                        return None;
                    }
                    out.push_str(&ops::as_text(&value));
                }
            }
        }
        Some(out.into())
    };
    match node {
        Value::Array(elements) => {
            Some(Value::Array(elements.iter().filter_map(concat_one).collect()))
        }
        other => concat_one(other),
    }
}

fn func_length(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_value(node, |v| Some(Value::from(ops::as_text(v).chars().count())))
}

fn pad(node: &Value, params: &str, functions: &FunctionRegistry, left: bool, both: bool) -> Option<Value> {
    let arguments = args(params);
    let width = param_int(node, arguments.first()?, functions)?.max(0) as usize;
    let padding = arguments
        .get(1)
        .and_then(|p| param_text(node, p, functions))
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| " ".to_string());
    apply_value(node, |v| {
        let text = ops::as_text(v);
        let missing = width.saturating_sub(text.chars().count());
        if missing == 0 {
            return Some(text.into());
        }
        let fill = |count: usize| -> String {
            padding.chars().cycle().take(count).collect()
        };
        let padded = if both {
            let before = missing / 2;
            format!("{}{}{}", fill(before), text, fill(missing - before))
        } else if left {
            format!("{}{}", fill(missing), text)
        } else {
            format!("{}{}", text, fill(missing))
        };
        Some(padded.into())
    })
}

fn func_left_pad(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    pad(node, params, f, true, false)
}

fn func_right_pad(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    pad(node, params, f, false, false)
}

fn func_center(node: &Value, params: &str, f: &FunctionRegistry) -> Option<Value> {
    pad(node, params, f, false, true)
}

fn func_reverse(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    match node {
        Value::String(s) => Some(s.chars().rev().collect::<String>().into()),
        Value::Array(elements) => {
            Some(Value::Array(elements.iter().rev().cloned().collect()))
        }
        _ => None,
    }
}

// --- Container transforms ---

fn func_size(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    match node {
        Value::Array(elements) => Some(Value::from(elements.len())),
        Value::Object(map) => Some(Value::from(map.len())),
        _ => Some(Value::from(0)),
    }
}

fn func_first(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    node.as_array().and_then(|a| a.first().cloned())
}

fn func_last(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    node.as_array().and_then(|a| a.last().cloned())
}

fn func_join(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let separator = args(params)
        .first()
        .and_then(|p| param_text(node, p, functions))
        .unwrap_or_default();
    let elements = node.as_array()?;
    let pieces: Vec<String> = elements
        .iter()
        .filter(|e| ops::is_value_node(e))
        .map(ops::as_text)
        .collect();
    Some(pieces.join(&separator).into())
}

fn func_distinct(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    let elements = node.as_array()?;
    let mut seen: Vec<Value> = Vec::new();
    for element in elements {
        if !seen.contains(element) {
            seen.push(element.clone());
        }
    }
    Some(Value::Array(seen))
}

fn func_sort(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    let mut elements = node.as_array()?.clone();
    if elements.iter().all(|e| ops::to_double(e).is_some()) {
        elements.sort_by(|a, b| {
            let a = ops::to_double(a).unwrap_or(f64::NAN);
            let b = ops::to_double(b).unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
        });
    } else {
        elements.sort_by_key(|e| ops::as_text(e));
    }
    Some(Value::Array(elements))
}

fn numeric_elements(node: &Value) -> Option<Vec<f64>> {
    let values: Vec<f64> = node.as_array()?.iter().filter_map(ops::to_double).collect();
    if values.is_empty() { None } else { Some(values) }
}

fn func_sum(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    numeric_elements(node).and_then(|v| number_value(v.iter().sum()))
}

fn func_avg(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    numeric_elements(node).and_then(|v| number_value(v.iter().sum::<f64>() / v.len() as f64))
}

fn func_min(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    numeric_elements(node).and_then(|v| number_value(v.into_iter().fold(f64::INFINITY, f64::min)))
}

fn func_max(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    numeric_elements(node)
        .and_then(|v| number_value(v.into_iter().fold(f64::NEG_INFINITY, f64::max)))
}

// --- Numeric transforms ---

fn func_abs(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_numeric(node, f64::abs)
}

fn func_ceil(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_numeric(node, f64::ceil)
}

fn func_floor(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_numeric(node, f64::floor)
}

fn func_round(node: &Value, params: &str, functions: &FunctionRegistry) -> Option<Value> {
    let precision = args(params)
        .first()
        .and_then(|p| param_int(node, p, functions))
        .unwrap_or(0);
    let factor = 10f64.powi(precision as i32);
    apply_numeric(node, move |v| (v * factor).round() / factor)
}

fn func_to_number(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_value(node, |v| ops::to_double(v).and_then(number_value))
}

fn func_to_text(node: &Value, _params: &str, _f: &FunctionRegistry) -> Option<Value> {
    apply_value(node, |v| Some(ops::as_text(v).into()))
}

impl Default for FunctionRegistry {
    /// A registry populated with every built-in transform.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register("upperCase", func_upper_case);
        registry.register("lowerCase", func_lower_case);
        registry.register("capitalize", func_capitalize);
        registry.register("uncapitalize", func_uncapitalize);
        registry.register("trim", func_trim);
        registry.register("stripStart", func_strip_start);
        registry.register("stripEnd", func_strip_end);
        registry.register("abbreviate", func_abbreviate);
        registry.register("substr", func_substr);
        registry.register("keepBefore", func_keep_before);
        registry.register("keepBeforeLast", func_keep_before_last);
        registry.register("keepAfter", func_keep_after);
        registry.register("keepAfterLast", func_keep_after_last);
        registry.register("removeStart", func_remove_start);
        registry.register("removeEnd", func_remove_end);
        registry.register("prependIfMissing", func_prepend_if_missing);
        registry.register("appendIfMissing", func_append_if_missing);
        registry.register("repeat", func_repeat);
        registry.register("replace", func_replace);
        registry.register("split", func_split);
        registry.register("concat", func_concat);
        registry.register("length", func_length);
        registry.register("leftPad", func_left_pad);
        registry.register("rightPad", func_right_pad);
        registry.register("center", func_center);
        registry.register("reverse", func_reverse);
        registry.register("size", func_size);
        registry.register("first", func_first);
        registry.register("last", func_last);
        registry.register("join", func_join);
        registry.register("distinct", func_distinct);
        registry.register("sort", func_sort);
        registry.register("sum", func_sum);
        registry.register("avg", func_avg);
        registry.register("min", func_min);
        registry.register("max", func_max);
        registry.register("abs", func_abs);
        registry.register("ceil", func_ceil);
        registry.register("floor", func_floor);
        registry.register("round", func_round);
        registry.register("toNumber", func_to_number);
        registry.register("toText", func_to_text);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(data: &Value, path: &str) -> Option<Value> {
        crate::path::navigate(data, path, &FunctionRegistry::default())
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let registry = FunctionRegistry::default();
        assert!(registry.get("UPPERCASE").is_some());
        assert!(registry.get("uppercase").is_some());
        assert!(registry.get("nothing").is_none());
    }

    #[test]
    fn test_string_transforms() {
        let data = json!({ "s": "  hello world  ", "name": "anna" });
        assert_eq!(call(&data, "s.trim().upperCase()"), Some(json!("HELLO WORLD")));
        assert_eq!(call(&data, "name.capitalize()"), Some(json!("Anna")));
        assert_eq!(call(&data, "name.substr(1, 3)"), Some(json!("nn")));
        assert_eq!(call(&data, "name.substr(-2)"), Some(json!("na")));
        assert_eq!(call(&data, "name.repeat(2)"), Some(json!("annaanna")));
        assert_eq!(call(&data, "name.leftPad(6, '.')"), Some(json!("..anna")));
        assert_eq!(call(&data, "name.length()"), Some(json!(4)));
    }

    #[test]
    fn test_keep_and_remove() {
        let data = json!({ "path": "a/b/c.txt" });
        assert_eq!(call(&data, "path.keepBefore('/')"), Some(json!("a")));
        assert_eq!(call(&data, "path.keepAfterLast('/')"), Some(json!("c.txt")));
        assert_eq!(call(&data, "path.keepAfter('x')"), Some(json!("")));
        assert_eq!(call(&data, "path.removeEnd('.txt')"), Some(json!("a/b/c")));
        assert_eq!(call(&data, "path.appendIfMissing('!')"), Some(json!("a/b/c.txt!")));
    }

    #[test]
    fn test_replace_and_split() {
        let data = json!({ "csv": "a,b,a" });
        assert_eq!(call(&data, "csv.replace('a', 'x')"), Some(json!("x,b,x")));
        assert_eq!(call(&data, "csv.replace('a', 'x', 1)"), Some(json!("x,b,a")));
        assert_eq!(call(&data, "csv.split(',')"), Some(json!(["a", "b", "a"])));
    }

    #[test]
    fn test_concat() {
        let data = json!({ "a": "x", "n": 7 });
        assert_eq!(call(&data, "concat(a, '-', n)"), Some(json!("x-7")));
        assert_eq!(call(&data, "concat(a, missing)"), None);
        let rows = json!([{ "id": 1 }, { "id": 2 }]);
        assert_eq!(call(&rows, "concat('#', id)"), Some(json!(["#1", "#2"])));
    }

    #[test]
    fn test_string_transforms_map_over_arrays() {
        let data = json!({ "words": ["one", "two"] });
        assert_eq!(call(&data, "words.upperCase()"), Some(json!(["ONE", "TWO"])));
    }

    #[test]
    fn test_aggregates() {
        let data = json!({ "ns": [3, "5", 1], "names": ["b", "a"] });
        assert_eq!(call(&data, "ns.sum()"), Some(json!(9)));
        assert_eq!(call(&data, "ns.avg()"), Some(json!(3)));
        assert_eq!(call(&data, "ns.min()"), Some(json!(1)));
        assert_eq!(call(&data, "ns.max()"), Some(json!(5)));
        assert_eq!(call(&data, "ns.size()"), Some(json!(3)));
        assert_eq!(call(&data, "ns.first()"), Some(json!(3)));
        assert_eq!(call(&data, "ns.last()"), Some(json!(1)));
        assert_eq!(call(&data, "names.sort()"), Some(json!(["a", "b"])));
        assert_eq!(call(&data, "names.join('/')"), Some(json!("a/b")));
        assert_eq!(call(&data, "ns.sort()"), Some(json!([1, 3, "5"])));
    }

    #[test]
    fn test_distinct_and_reverse() {
        let data = json!({ "xs": [1, 2, 1, 3] });
        assert_eq!(call(&data, "xs.distinct()"), Some(json!([1, 2, 3])));
        assert_eq!(call(&data, "xs.reverse()"), Some(json!([3, 1, 2, 1])));
    }

    #[test]
    fn test_numeric_transforms() {
        let data = json!({ "x": -2.6 });
        assert_eq!(call(&data, "x.abs()"), Some(json!(2.6)));
        assert_eq!(call(&data, "x.floor()"), Some(json!(-3)));
        assert_eq!(call(&data, "x.ceil()"), Some(json!(-2)));
        assert_eq!(call(&data, "x.round()"), Some(json!(-3)));
        assert_eq!(call(&data, "x.round(1)"), Some(json!(-2.6)));
        assert_eq!(call(&data, "x.toText()"), Some(json!("-2.6")));
    }

    #[test]
    fn test_abbreviate() {
        let data = json!({ "s": "abcdefghij" });
        assert_eq!(call(&data, "s.abbreviate(7)"), Some(json!("abcd...")));
        assert_eq!(call(&data, "s.abbreviate(20)"), Some(json!("abcdefghij")));
    }
}
