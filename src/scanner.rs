//! Token and pattern matching for the query mini-language.
//!
//! Queries are split into structural pieces before evaluation: ternary
//! steps, operator-separated conditions, path steps, function calls and
//! their arguments, dataset/DB-query/join patterns, and XML tag runs.
//! Splitting is enclosure-aware: single-quoted text (with `''` escaping a
//! quote) and the three bracket pairs never leak separators.

use crate::error::EngineError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{is_not, tag, take_while},
    character::complete::{alpha1, char, digit0, digit1, one_of},
    combinator::{map, opt, recognize},
    multi::fold_many0,
    sequence::{delimited, pair, preceded},
};
use serde_json::Value;

/// Characters that may start or continue an operator run.
const OP_CHARS: &[u8] = b"=!<>&|+-*/%";

/// Operator symbols in longest-prefix-wins order. Join symbols are listed
/// so that a run such as `<=<<` lexes as one token instead of `<=` + `<<`.
const OPERATOR_SYMBOLS: [&str; 18] = [
    "<=<<", ">>=>", ">=<", ">=>", ">=", "<=<", "<=", "!=", "=", "<", ">", "&", "|", "+", "-",
    "*", "/", "%",
];

// --- Enclosure tracking ---

/// Tracks quote and bracket state while walking a query byte-by-byte.
#[derive(Default)]
struct Nesting {
    depth: u32,
    quoted: bool,
    skip: bool,
}

impl Nesting {
    /// Feeds one byte and reports whether it sits at the top level, i.e.
    /// outside quotes and outside every bracket pair. Opening brackets at
    /// depth zero report as top-level before the descent.
    fn step(&mut self, b: u8, next: Option<u8>) -> bool {
        if self.skip {
            self.skip = false;
            return false;
        }
        if self.quoted {
            if b == b'\'' {
                if next == Some(b'\'') {
                    self.skip = true;
                } else {
                    self.quoted = false;
                }
            }
            return false;
        }
        match b {
            b'\'' => {
                self.quoted = true;
                false
            }
            b'(' | b'[' | b'{' => {
                self.depth += 1;
                self.depth == 1
            }
            b')' | b']' | b'}' => {
                self.depth = self.depth.saturating_sub(1);
                self.depth == 0
            }
            _ => self.depth == 0,
        }
    }
}

/// Finds the first top-level occurrence of `target`.
pub(crate) fn find_top_level(input: &str, target: u8) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut nest = Nesting::default();
    for i in 0..bytes.len() {
        let top = nest.step(bytes[i], bytes.get(i + 1).copied());
        if top && bytes[i] == target {
            return Some(i);
        }
    }
    None
}

/// Given the index of an opening bracket, finds its matching closer.
pub(crate) fn matching_close(input: &str, open_at: usize) -> Option<usize> {
    let bytes = input.as_bytes();
    let closer = match bytes.get(open_at)? {
        b'(' => b')',
        b'[' => b']',
        b'{' => b'}',
        _ => return None,
    };
    let mut nest = Nesting::default();
    for i in open_at..bytes.len() {
        let top = nest.step(bytes[i], bytes.get(i + 1).copied());
        if top && bytes[i] == closer && i > open_at {
            return Some(i);
        }
    }
    None
}

/// Splits on a top-level separator byte. Always yields at least one piece.
pub(crate) fn split_top_level(input: &str, sep: u8) -> Vec<&str> {
    let bytes = input.as_bytes();
    let mut nest = Nesting::default();
    let mut out = Vec::new();
    let mut start = 0;
    for i in 0..bytes.len() {
        let top = nest.step(bytes[i], bytes.get(i + 1).copied());
        if top && bytes[i] == sep {
            out.push(&input[start..i]);
            start = i + 1;
        }
    }
    out.push(&input[start..]);
    out
}

// --- Ternary and condition decomposition ---

/// One step of a ternary chain: `statement` with an optional `? ifTrue`.
#[derive(Debug, PartialEq)]
pub(crate) struct TernaryStep {
    pub statement: String,
    pub if_true: Option<String>,
}

/// Splits `a ? b : c ? d : e` into `[(a,b), (c,d), (e,-)]`. Steps are
/// separated by top-level `:`; within a step the first top-level `?`
/// separates the condition from its if-true expression.
pub(crate) fn decompose_ternary_steps(query: &str) -> Vec<TernaryStep> {
    split_top_level(query, b':')
        .into_iter()
        .map(|segment| match find_top_level(segment, b'?') {
            Some(at) => TernaryStep {
                statement: segment[..at].trim().to_string(),
                if_true: Some(segment[at + 1..].trim().to_string()),
            },
            None => TernaryStep { statement: segment.trim().to_string(), if_true: None },
        })
        .collect()
}

/// An operand together with the operator symbol that precedes it. The
/// first condition of a statement carries an empty symbol.
#[derive(Debug, PartialEq)]
pub(crate) struct Condition {
    pub symbol: String,
    pub expression: String,
}

/// Lexes a statement into operator/operand pairs. `!` and a numeric sign
/// are consumed as part of the following operand; operator runs resolve
/// by longest known prefix so `a<=<<b` and `a<=b` both lex correctly.
pub(crate) fn decompose_conditions(statement: &str) -> Result<Vec<Condition>, EngineError> {
    let bytes = statement.as_bytes();
    let mut out = Vec::new();
    let mut symbol = String::new();
    let mut i = 0;
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let start = i;
        while i < bytes.len() && bytes[i] == b'!' {
            i += 1;
        }
        if i < bytes.len()
            && bytes[i] == b'-'
            && bytes.get(i + 1).is_some_and(|b| b.is_ascii_digit())
        {
            i += 1;
        }
        let mut nest = Nesting::default();
        while i < bytes.len() {
            let top = nest.step(bytes[i], bytes.get(i + 1).copied());
            if top && OP_CHARS.contains(&bytes[i]) {
                break;
            }
            i += 1;
        }
        let expression = statement[start..i].trim();
        if expression.is_empty() {
            return Err(EngineError::InvalidQuery(
                statement.to_string(),
                "missing operand".to_string(),
            ));
        }
        out.push(Condition {
            symbol: std::mem::take(&mut symbol),
            expression: expression.to_string(),
        });
        if i >= bytes.len() {
            break;
        }
        let run_start = i;
        while i < bytes.len() && OP_CHARS.contains(&bytes[i]) {
            i += 1;
        }
        let run = &statement[run_start..i];
        let op = OPERATOR_SYMBOLS
            .iter()
            .find(|s| run.starts_with(**s))
            .ok_or_else(|| {
                EngineError::InvalidQuery(
                    statement.to_string(),
                    format!("unknown operator '{run}'"),
                )
            })?;
        symbol = op.to_string();
        i = run_start + op.len();
    }
    Ok(out)
}

// --- Path pieces ---

/// Splits a navigation path into its top-level `.`-separated steps.
pub(crate) fn decompose_path_steps(path: &str) -> Vec<&str> {
    if path.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(path, b'.').into_iter().map(str::trim).collect()
}

/// Splits a function argument list on top-level commas. An all-blank
/// parameter string yields no arguments.
pub(crate) fn decompose_arguments(params: &str) -> Vec<&str> {
    if params.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(params, b',').into_iter().map(str::trim).collect()
}

/// Matches `name(args)` where the closing parenthesis ends the step.
pub(crate) fn match_function_call(step: &str) -> Option<(&str, &str)> {
    let open = find_top_level(step, b'(')?;
    let close = matching_close(step, open)?;
    if close != step.len() - 1 {
        return None;
    }
    let name = step[..open].trim();
    if !is_identifier(name) {
        return None;
    }
    Some((name, &step[open + 1..close]))
}

/// Matches `base[filter]` with an optional trailing mode symbol. The base
/// may be empty (filter applies to the current node). Returns the base,
/// the filter text, and the mode character (space for find-first).
pub(crate) fn match_filter_step(step: &str) -> Option<(&str, &str, char)> {
    let open = find_top_level(step, b'[')?;
    let close = matching_close(step, open)?;
    let mode = match &step[close + 1..] {
        "" => ' ',
        "*" => '*',
        "@" => '@',
        _ => return None,
    };
    Some((step[..open].trim(), &step[open + 1..close], mode))
}

/// Matches `name.path` (or `name[filter]…`) where `name` is a plain
/// identifier naming a dataset and the remainder navigates inside it.
pub(crate) fn match_dataset_query(expression: &str) -> Option<(&str, &str)> {
    let (rest, name) = identifier(expression).ok()?;
    if rest.is_empty() {
        return None;
    }
    let path = match rest.as_bytes()[0] {
        b'.' => &rest[1..],
        b'[' => rest,
        _ => return None,
    };
    Some((name, path.trim()))
}

/// Matches the DB-query shape: optional collection name, `?`, then a
/// `{…}` payload, or `[{…}]` for find-many. Returns the collection name
/// (possibly empty), the one-or-many suffix (`?` or `[]`), and the payload.
pub(crate) fn match_db_query(query: &str) -> Option<(&str, &str, &str)> {
    let query = query.trim();
    let at = find_top_level(query, b'?')?;
    let collection = query[..at].trim();
    if !collection.is_empty() && !is_collection_name(collection) {
        return None;
    }
    let rest = query[at + 1..].trim();
    if rest.starts_with('{') && matching_close(rest, 0) == Some(rest.len() - 1) {
        return Some((collection, "?", rest));
    }
    if rest.starts_with('[') && matching_close(rest, 0) == Some(rest.len() - 1) {
        let inner = rest[1..rest.len() - 1].trim();
        if inner.starts_with('{') && matching_close(inner, 0) == Some(inner.len() - 1) {
            return Some((collection, "[]", inner));
        }
    }
    None
}

/// Matches a join side `query{k1,k2,…}`: the key list is the last
/// top-level braced group and must close the expression.
pub(crate) fn match_join_operation(expression: &str) -> Option<(&str, &str)> {
    let expression = expression.trim();
    let open = find_top_level(expression, b'{')?;
    let close = matching_close(expression, open)?;
    if close != expression.len() - 1 || open == 0 {
        return None;
    }
    Some((expression[..open].trim(), &expression[open + 1..close]))
}

/// Strips one level of parentheses when they enclose the whole expression.
pub(crate) fn strip_parentheses(expression: &str) -> Option<&str> {
    let expression = expression.trim();
    if expression.starts_with('(') && matching_close(expression, 0) == Some(expression.len() - 1)
    {
        Some(expression[1..expression.len() - 1].trim())
    } else {
        None
    }
}

// --- XML tag carving ---

/// Splits placeholder text into `<…>` tag runs and residue text. Tag
/// tokens keep their angle brackets; an unterminated `<` counts as text.
pub(crate) fn separate_xml_tags(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => match rest.find('>') {
                Some(gt) => {
                    out.push(&rest[..=gt]);
                    rest = &rest[gt + 1..];
                }
                None => {
                    out.push(rest);
                    break;
                }
            },
            Some(lt) => {
                out.push(&rest[..lt]);
                rest = &rest[lt..];
            }
            None => {
                out.push(rest);
                break;
            }
        }
    }
    out
}

// --- Literals and identifiers ---

fn null_literal(input: &str) -> IResult<&str, Value> {
    map(tag("null"), |_| Value::Null).parse(input)
}

fn boolean_literal(input: &str) -> IResult<&str, Value> {
    alt((
        map(tag("true"), |_| Value::Bool(true)),
        map(tag("false"), |_| Value::Bool(false)),
    ))
    .parse(input)
}

fn number_literal(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize((
        opt(one_of("+-")),
        digit1,
        opt(preceded(char('.'), digit0)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)?;
    let value = if let Ok(i) = text.parse::<i64>() {
        Value::from(i)
    } else {
        match text.parse::<f64>() {
            Ok(f) if f.is_finite() => Value::from(f),
            _ => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Float,
                )));
            }
        }
    };
    Ok((rest, value))
}

fn string_literal(input: &str) -> IResult<&str, Value> {
    map(
        delimited(
            char('\''),
            fold_many0(
                alt((map(tag("''"), |_| "'"), is_not("'"))),
                String::new,
                |mut acc, piece| {
                    acc.push_str(piece);
                    acc
                },
            ),
            char('\''),
        ),
        Value::String,
    )
    .parse(input)
}

fn literal(input: &str) -> IResult<&str, Value> {
    alt((null_literal, boolean_literal, number_literal, string_literal)).parse(input)
}

/// Parses a whole expression as a literal value, or reports that it is
/// not one. `null`, `true`/`false`, numbers, and `'quoted'` text with
/// `''` escaping a quote.
pub(crate) fn parse_literal(expression: &str) -> Option<Value> {
    match literal(expression.trim()) {
        Ok(("", value)) => Some(value),
        _ => None,
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        take_while(|c: char| c.is_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

pub(crate) fn is_identifier(text: &str) -> bool {
    matches!(identifier(text), Ok(("", _)))
}

fn is_collection_name(text: &str) -> bool {
    fn parser(input: &str) -> IResult<&str, &str> {
        recognize(pair(
            alt((alpha1, tag("_"))),
            take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
        ))
        .parse(input)
    }
    matches!(parser(text), Ok(("", _)))
}

/// Single-quotes a value for use inside a synthesised filter predicate,
/// doubling any embedded quote.
pub(crate) fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Shortens a string to at most `max` characters, ending with `...`.
pub(crate) fn abbreviate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ternary_decomposition() {
        let steps = decompose_ternary_steps("a ? b : c ? d : e");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0], TernaryStep {
            statement: "a".into(),
            if_true: Some("b".into())
        });
        assert_eq!(steps[1], TernaryStep {
            statement: "c".into(),
            if_true: Some("d".into())
        });
        assert_eq!(steps[2], TernaryStep { statement: "e".into(), if_true: None });
    }

    #[test]
    fn test_ternary_respects_quotes_and_brackets() {
        let steps = decompose_ternary_steps("x[a?1:2] ? 'y:z'");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].statement, "x[a?1:2]");
        assert_eq!(steps[0].if_true.as_deref(), Some("'y:z'"));
    }

    #[test]
    fn test_elvis_keeps_empty_if_true() {
        let steps = decompose_ternary_steps("a ?: b");
        assert_eq!(steps[0].if_true.as_deref(), Some(""));
        assert_eq!(steps[1].statement, "b");
    }

    #[test]
    fn test_condition_decomposition() {
        let conditions = decompose_conditions("a.b>=3 & c='x|y' | !d").unwrap();
        let pairs: Vec<(&str, &str)> = conditions
            .iter()
            .map(|c| (c.symbol.as_str(), c.expression.as_str()))
            .collect();
        assert_eq!(pairs, vec![("", "a.b"), (">=", "3"), ("&", "c"), ("=", "'x|y'"), ("|", "!d")]);
    }

    #[test]
    fn test_condition_negative_number_and_join_symbols() {
        let conditions = decompose_conditions("n > -1").unwrap();
        assert_eq!(conditions[1].expression, "-1");
        let join = decompose_conditions("L{id} >=< R{id}").unwrap();
        assert_eq!(join[1].symbol, ">=<");
        let many = decompose_conditions("L{id} <=<< things{fk}").unwrap();
        assert_eq!(many[1].symbol, "<=<<");
    }

    #[test]
    fn test_condition_missing_operand_is_an_error() {
        assert!(decompose_conditions("a &").is_err());
        assert!(decompose_conditions("").is_err());
    }

    #[test]
    fn test_path_steps() {
        assert_eq!(
            decompose_path_steps("items[price > 1.5].name"),
            vec!["items[price > 1.5]", "name"]
        );
        assert_eq!(decompose_path_steps("concat(a, '.', b)"), vec!["concat(a, '.', b)"]);
    }

    #[test]
    fn test_function_and_filter_matching() {
        assert_eq!(match_function_call("upperCase()"), Some(("upperCase", "")));
        assert_eq!(match_function_call("substr(1, 3)"), Some(("substr", "1, 3")));
        assert_eq!(match_function_call("name"), None);
        assert_eq!(match_filter_step("items[id=3]*"), Some(("items", "id=3", '*')));
        assert_eq!(match_filter_step("[0]"), Some(("", "0", ' ')));
        assert_eq!(match_filter_step("items[a]@"), Some(("items", "a", '@')));
    }

    #[test]
    fn test_dataset_query_matching() {
        assert_eq!(match_dataset_query("order.items[0].id"), Some(("order", "items[0].id")));
        assert_eq!(match_dataset_query("orders[0].id"), Some(("orders", "[0].id")));
        assert_eq!(match_dataset_query("plain"), None);
        assert_eq!(match_dataset_query("'text'.length()"), None);
    }

    #[test]
    fn test_db_query_matching() {
        assert_eq!(
            match_db_query("stores ? {\"code\": 1}"),
            Some(("stores", "?", "{\"code\": 1}"))
        );
        assert_eq!(
            match_db_query("stores ? [{\"code\": 1}]"),
            Some(("stores", "[]", "{\"code\": 1}"))
        );
        assert_eq!(match_db_query("? {\"a\":1}"), Some(("", "?", "{\"a\":1}")));
        assert_eq!(match_db_query("a ? b"), None);
        assert_eq!(match_db_query("amount > 3 ? 'x'"), None);
    }

    #[test]
    fn test_join_operation_matching() {
        assert_eq!(match_join_operation("L{id}"), Some(("L", "id")));
        assert_eq!(
            match_join_operation("order.items{a, b}"),
            Some(("order.items", "a, b"))
        );
        assert_eq!(match_join_operation("L"), None);
    }

    #[test]
    fn test_xml_tag_separation() {
        let tokens = separate_xml_tags("<w:t>amount &gt; 1</w:t>");
        assert_eq!(tokens, vec!["<w:t>", "amount &gt; 1", "</w:t>"]);
        assert_eq!(separate_xml_tags("no tags"), vec!["no tags"]);
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_literal("null"), Some(json!(null)));
        assert_eq!(parse_literal("true"), Some(json!(true)));
        assert_eq!(parse_literal("-12"), Some(json!(-12)));
        assert_eq!(parse_literal("3.5"), Some(json!(3.5)));
        assert_eq!(parse_literal("'it''s'"), Some(json!("it's")));
        assert_eq!(parse_literal("''"), Some(json!("")));
        assert_eq!(parse_literal("nullify"), None);
        assert_eq!(parse_literal("1x"), None);
        assert_eq!(parse_literal("name"), None);
    }

    #[test]
    fn test_abbreviate() {
        assert_eq!(abbreviate("short", 20), "short");
        assert_eq!(abbreviate("abcdefghijklmnopqrstuvwxyz", 10), "abcdefg...");
    }
}
