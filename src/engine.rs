//! The merge engine: a dataset registry, the placeholder substitution
//! pass, and the callback-driven resolution driver.

use crate::error::{EngineError, NoValuePresent};
use crate::functions::FunctionRegistry;
use crate::join::{self, JoinOperator};
use crate::ops;
use crate::progress::ResolverProgress;
use crate::scanner;
use crate::stack::{Datasets, DatasetResolver, LogicalOpStack};
use log::debug;
use quick_xml::escape::unescape;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

/// Maps an unknown dataset name to a query that defines it, or `None`
/// when the dictionary has no definition for the name.
pub type DictionaryFinder = dyn Fn(&str) -> Option<String>;

/// Resolves a DB-query: receives the collection name (with its `?` or
/// `[]` suffix) and the opaque payload, and returns the dataset.
pub type DataFinder = dyn Fn(&str, &str) -> Option<Value>;

/// A JSON template-merge engine over a registry of named datasets.
///
/// The registry is tri-state: a name can be absent (unknown), present
/// with a value, or present-but-empty, which marks the name as known
/// unresolvable for the rest of the merge.
pub struct Engine {
    datasets: Datasets,
    functions: FunctionRegistry,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an engine with an empty dataset registry.
    pub fn new() -> Self {
        Self { datasets: Datasets::new(), functions: FunctionRegistry::default() }
    }

    /// Creates an engine whose datasets are the fields of an object node.
    pub fn from_value(node: Value) -> Result<Self, EngineError> {
        let Value::Object(fields) = node else {
            return Err(EngineError::InvalidArgument(
                "argument is not an object node".to_string(),
            ));
        };
        let mut engine = Self::new();
        for (name, value) in fields {
            engine.datasets.insert(name, Some(value));
        }
        Ok(engine)
    }

    /// Creates an engine from a JSON string that deserializes to an
    /// object node.
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    /// Creates an engine from a text-valued dataset mapping.
    pub fn from_text_map(mapping: HashMap<String, String>) -> Self {
        let mut engine = Self::new();
        for (name, value) in mapping {
            engine.datasets.insert(name, Some(Value::String(value)));
        }
        engine
    }

    /// Creates an engine from an integer-valued dataset mapping.
    pub fn from_int_map(mapping: HashMap<String, i64>) -> Self {
        let mut engine = Self::new();
        for (name, value) in mapping {
            engine.datasets.insert(name, Some(Value::from(value)));
        }
        engine
    }

    /// Stores a dataset, replacing any previous entry of the same name.
    pub fn put_dataset(&mut self, name: impl Into<String>, node: Value) -> &mut Self {
        self.datasets.insert(name.into(), Some(node));
        self
    }

    pub fn datasets(&self) -> &HashMap<String, Option<Value>> {
        &self.datasets
    }

    /// Access to the function registry, e.g. to register custom
    /// transforms before merging.
    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    // --- Placeholder merging ---

    /// Merges every `{{query}}` placeholder in the template against the
    /// stored datasets, with no on-demand resolution: an unknown name is
    /// immediately poisoned. Unresolvable placeholders fail the merge
    /// with the partially merged text, each rewritten as `**query**`.
    pub fn fill_in_placeholder(&mut self, template: &str) -> Result<String, NoValuePresent> {
        if template.trim().is_empty() {
            return Ok(template.to_string());
        }
        let mut progress = ResolverProgress::new();
        self.fill_with_resolver(template, &|_| None, &|_, _| None, false, &mut progress)
    }

    /// XML-aware variant of [`fill_in_placeholder`](Self::fill_in_placeholder):
    /// markup inside a placeholder is re-emitted as template text and the
    /// remainder is XML-unescaped before parsing. Useful for merging
    /// docx-style XML templates where `{{` and `}}` may be split by tags.
    pub fn fill_in_xml_placeholder(&mut self, template: &str) -> Result<String, NoValuePresent> {
        if template.trim().is_empty() {
            return Ok(template.to_string());
        }
        let mut progress = ResolverProgress::new();
        self.fill_with_resolver(template, &|_| None, &|_, _| None, true, &mut progress)
    }

    /// Merges a template with the help of on-demand dataset resolution:
    /// unknown names are defined by `dictionary_finder` queries, which
    /// may in turn be DB-queries answered by `data_finder`, join
    /// operations, or plain queries over already-stored datasets.
    pub fn fill_in_placeholder_with_resolver(
        &mut self,
        template: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> Result<String, NoValuePresent> {
        if template.trim().is_empty() {
            return Ok(template.to_string());
        }
        let result =
            self.fill_with_resolver(template, dictionary_finder, data_finder, false, progress);
        if progress.is_auto_mark_end() {
            progress.mark_end();
        }
        result
    }

    /// XML-aware variant of
    /// [`fill_in_placeholder_with_resolver`](Self::fill_in_placeholder_with_resolver).
    pub fn fill_in_xml_placeholder_with_resolver(
        &mut self,
        template: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> Result<String, NoValuePresent> {
        if template.trim().is_empty() {
            return Ok(template.to_string());
        }
        let result =
            self.fill_with_resolver(template, dictionary_finder, data_finder, true, progress);
        if progress.is_auto_mark_end() {
            progress.mark_end();
        }
        result
    }

    // --- Query evaluation ---

    /// Evaluates a query: a chain of ternary steps, each a statement with
    /// an optional if-true expression. The first step whose statement is
    /// truthy wins; an empty if-true (`a ?: b`) keeps the statement value
    /// unless it is empty text.
    pub fn evaluate_query(&mut self, query: &str) -> Result<Option<Value>, EngineError> {
        let mut last_if_true: Option<String> = None;
        for step in scanner::decompose_ternary_steps(query) {
            let node = self.evaluate_statement(&step.statement)?;
            let Some(if_true) = step.if_true else {
                return Ok(node);
            };
            if let Some(node) = node {
                if if_true.is_empty() {
                    if !matches!(&node, Value::String(s) if s.is_empty()) {
                        return Ok(Some(node));
                    }
                } else if ops::as_bool(Some(&node))
                    && let Some(result) = self.evaluate_statement(&if_true)?
                {
                    return Ok(Some(result));
                }
            }
            last_if_true = Some(if_true);
        }
        match last_if_true {
            Some(if_true) if !if_true.is_empty() => Ok(Some(Value::String(String::new()))),
            _ => Ok(None),
        }
    }

    /// Evaluates one statement: a literal, or a run of operands joined by
    /// logical/relational/arithmetic operators.
    pub fn evaluate_statement(&mut self, statement: &str) -> Result<Option<Value>, EngineError> {
        if let Some(value) = scanner::parse_literal(statement) {
            return Ok(Some(value));
        }
        let mut resolver = DatasetResolver::new(&mut self.datasets, &self.functions);
        LogicalOpStack::evaluate(statement, &mut resolver)
    }

    /// Evaluates a query, resolving unknown datasets on demand through
    /// the finder callbacks. Returns the final node, or nothing when the
    /// query is terminally unresolvable.
    pub fn evaluate_query_with_resolver(
        &mut self,
        query: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> Option<Value> {
        let node = self.resolve_query_loop(query, dictionary_finder, data_finder, progress);
        progress.add_query_result(node.as_ref());
        node
    }

    // --- Single substitution pass ---

    /// One full placeholder pass, recursing until the output is free of
    /// placeholders. The opener is the last `{{` of a brace run; the
    /// closer is the first `}}`. Failed queries are rewritten as
    /// `**query**` and poisoned under the query text; unresolved dataset
    /// references are reinserted verbatim for the next round.
    fn fill_loop(&mut self, template: &str, xml: bool) -> Result<String, NoValuePresent> {
        let bytes = template.as_bytes();
        let last = bytes.len().saturating_sub(1);
        let mut out = String::new();
        let mut offset = 0usize;
        let mut placeholder_at: Option<usize> = None;
        let mut text_added = false;
        let mut unresolved_datasets: Vec<String> = Vec::new();
        let mut unresolved_placeholders: BTreeSet<String> = BTreeSet::new();
        let mut i = 0usize;
        while i < last {
            if bytes[i] == b'{' {
                if bytes[i + 1] == b'{' {
                    i += 1;
                    while i < last && bytes[i + 1] == b'{' {
                        i += 1;
                    }
                    placeholder_at = Some(i - 1);
                    out.push_str(&template[offset..i - 1]);
                    offset = i - 1;
                }
            } else if let Some(start) = placeholder_at
                && bytes[i] == b'}'
                && bytes[i + 1] == b'}'
            {
                let raw = &template[start + 2..i];
                let query = if xml {
                    let mut rebuilt = String::new();
                    for token in scanner::separate_xml_tags(raw) {
                        if token.starts_with('<') {
                            out.push_str(token);
                        } else {
                            rebuilt.push_str(token);
                        }
                    }
                    match unescape(&rebuilt) {
                        Ok(unescaped) => unescaped.into_owned(),
                        Err(_) => rebuilt,
                    }
                } else {
                    raw.to_string()
                };
                let query = query.trim().to_string();
                match self.evaluate_query(&query) {
                    Ok(Some(node)) if ops::is_value_node(&node) => {
                        out.push_str(&ops::as_text(&node));
                        // Remember even when the text form is empty.
                        text_added = true;
                    }
                    Ok(Some(node)) if node.is_array() => {
                        out.push_str(&node.to_string());
                    }
                    Ok(_) => {
                        unresolved_placeholders.insert(query.clone());
                        self.datasets.insert(query.clone(), None);
                        out.push_str("**");
                        out.push_str(&query);
                        out.push_str("**");
                    }
                    Err(EngineError::UnresolvedDataset(name)) => {
                        if !unresolved_datasets.contains(&name) {
                            unresolved_datasets.push(name);
                        }
                        out.push_str("{{");
                        out.push_str(&query);
                        out.push_str("}}");
                    }
                    Err(e) => {
                        debug!("placeholder query '{query}' failed: {e}");
                        unresolved_placeholders.insert(query.clone());
                        self.datasets.insert(query.clone(), None);
                        out.push_str("**");
                        out.push_str(&query);
                        out.push_str("**");
                    }
                }
                placeholder_at = None;
                i += 1;
                offset = i + 1;
            }
            i += 1;
        }
        if out.is_empty() && !text_added {
            return Ok(template.to_string());
        }
        match placeholder_at {
            Some(start) => {
                unresolved_placeholders.insert(format!(
                    "Lack of closing tag: {}",
                    scanner::abbreviate(&template[start..], 20)
                ));
                out.push_str("**");
                out.push_str(&template[start + 2..]);
            }
            None => out.push_str(&template[offset..]),
        }
        if !unresolved_datasets.is_empty() || !unresolved_placeholders.is_empty() {
            return Err(NoValuePresent::new(unresolved_datasets, unresolved_placeholders, out));
        }
        self.fill_loop(&out, xml)
    }

    // --- Resolution driver ---

    /// The fixpoint loop: run a substitution pass, feed every reported
    /// unknown name through the dictionary, dispatch DB-queries and
    /// joins, batch-evaluate plain named queries, and repeat. A
    /// repeating suffix in the name history marks the name unresolvable.
    fn fill_with_resolver(
        &mut self,
        template: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        xml: bool,
        progress: &mut ResolverProgress,
    ) -> Result<String, NoValuePresent> {
        let mut template = template.to_string();
        let mut unresolvable: BTreeSet<String> = BTreeSet::new();
        let mut unresolved_names: Vec<String> = Vec::new();
        let mut history: Vec<String> = Vec::new();
        loop {
            let pending = if unresolved_names.is_empty() {
                match self.fill_loop(&template, xml) {
                    Ok(merged) => {
                        template = merged;
                        break;
                    }
                    Err(failure) => {
                        unresolvable.extend(failure.placeholders);
                        template = failure.content;
                        failure.dataset_names
                    }
                }
            } else {
                std::mem::take(&mut unresolved_names)
            };
            let mut named_queries: Vec<(String, String)> = Vec::new();
            for name in pending {
                history.push(name.clone());
                if repeating_suffix(&history) {
                    unresolvable.insert(name.clone());
                    self.datasets.insert(name, None);
                    continue;
                }
                let Some(find_query) = dictionary_finder(&name) else {
                    self.datasets.insert(name, None);
                    continue;
                };
                match self.fill_loop(&find_query, false) {
                    Ok(find_query) => {
                        if !self.build_dataset(
                            &name,
                            &find_query,
                            dictionary_finder,
                            data_finder,
                            progress,
                        ) {
                            unresolved_names.retain(|n| n != &name);
                            named_queries.push((name, find_query));
                        }
                    }
                    Err(failure) => {
                        if failure.placeholders.is_empty() {
                            for dataset in failure.dataset_names {
                                if !named_queries.iter().any(|(n, _)| *n == dataset)
                                    && !unresolved_names.contains(&dataset)
                                {
                                    unresolved_names.push(dataset);
                                }
                            }
                        } else {
                            unresolvable.extend(failure.placeholders);
                            unresolvable.insert(name.clone());
                            self.datasets.insert(name, None);
                        }
                    }
                }
            }
            if !named_queries.is_empty() {
                let summary: Vec<String> =
                    named_queries.iter().map(|(n, q)| format!("{n}={q}")).collect();
                progress.add_step(format!("Resolving {{{}}}", summary.join(", ")));
                for (name, find_query) in named_queries {
                    match self.evaluate_query(&find_query) {
                        Ok(Some(node)) => {
                            progress.add_resolved_node(&name, Some(&node));
                            unresolved_names.retain(|n| n != &name);
                            self.datasets.insert(name, Some(node));
                        }
                        Ok(None) => {
                            unresolvable.insert(name.clone());
                            self.datasets.insert(name, None);
                        }
                        Err(EngineError::UnresolvedDataset(dataset)) => {
                            if !unresolved_names.contains(&dataset) {
                                unresolved_names.push(dataset);
                            }
                        }
                        Err(e) => {
                            debug!("named query for '{name}' failed: {e}");
                            unresolvable.insert(name.clone());
                            self.datasets.insert(name, None);
                        }
                    }
                }
            }
            progress.next_round();
        }
        if !unresolvable.is_empty() {
            progress.add_step(format!(
                "Unresolvable placeholders {:?}",
                unresolvable.iter().collect::<Vec<_>>()
            ));
            return Err(NoValuePresent::new(Vec::new(), unresolvable, template));
        }
        Ok(template)
    }

    /// The query counterpart of the driver: evaluate, and on an unknown
    /// name consult the dictionary, build the dataset (DB-query or join)
    /// or recurse into the defining query, then retry.
    fn resolve_query_loop(
        &mut self,
        query: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> Option<Value> {
        loop {
            match self.evaluate_query(query) {
                Ok(node) => return node,
                Err(EngineError::UnresolvedDataset(name)) => {
                    let mut node: Option<Value> = None;
                    if let Some(find_query) = dictionary_finder(&name)
                        && let Ok(find_query) = self.fill_with_resolver(
                            &find_query,
                            dictionary_finder,
                            data_finder,
                            false,
                            progress,
                        )
                    {
                        if self.build_dataset(
                            &name,
                            &find_query,
                            dictionary_finder,
                            data_finder,
                            progress,
                        ) {
                            progress.next_round();
                            continue;
                        }
                        progress.add_resolving_from(&name, &find_query);
                        node = self.resolve_query_loop(
                            &find_query,
                            dictionary_finder,
                            data_finder,
                            progress,
                        );
                    }
                    progress.add_resolved_node(&name, node.as_ref());
                    self.datasets.insert(name, node);
                }
                Err(e) => {
                    debug!("query '{query}' failed: {e}");
                    return None;
                }
            }
            progress.next_round();
        }
    }

    /// Builds a dataset from a dictionary query when it is a DB-query or
    /// a join operation; plain queries are left to the named-query batch.
    /// A failed join still claims the name, poisoning it.
    fn build_dataset(
        &mut self,
        name: &str,
        query: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> bool {
        let dataset: Option<Value>;
        if let Some((collection, suffix, payload)) = scanner::match_db_query(query) {
            progress.add_resolving_from(name, query);
            let collection =
                format!("{}{}", if collection.is_empty() { name } else { collection }, suffix);
            dataset = data_finder(&collection, payload);
        } else {
            match self.join_datasets(name, query, dictionary_finder, data_finder, progress) {
                Ok(None) => return false,
                Ok(joined) => dataset = joined,
                Err(e) => {
                    progress.add_step(format!("Join operation failed - {e}"));
                    dataset = None;
                }
            }
        }
        progress.add_resolved_dataset(name, dataset.as_ref());
        self.datasets.insert(name.to_string(), dataset);
        true
    }

    /// Recognises and executes a join query. `Ok(None)` means the query
    /// is not a join at all; an error means it is a malformed or
    /// unresolvable join.
    fn join_datasets(
        &mut self,
        name: &str,
        query: &str,
        dictionary_finder: &DictionaryFinder,
        data_finder: &DataFinder,
        progress: &mut ResolverProgress,
    ) -> Result<Option<Value>, EngineError> {
        let Ok(conditions) = scanner::decompose_conditions(query) else {
            return Ok(None);
        };
        if conditions.len() < 2 {
            return Ok(None);
        }
        let Some((left_query, left_key_list)) =
            scanner::match_join_operation(&conditions[0].expression)
        else {
            return Ok(None);
        };
        let Some(operator) = JoinOperator::from_symbol(&conditions[1].symbol) else {
            return Ok(None);
        };
        progress.add_resolving_from(name, query);
        if conditions.len() > 2 {
            return Err(EngineError::InvalidArgument("too many arguments".to_string()));
        }
        let (right_query, right_key_list) =
            scanner::match_join_operation(&conditions[1].expression).unwrap_or(("", ""));
        let mut left_keys: Vec<String> =
            left_key_list.split(',').map(|k| k.trim().to_string()).collect();
        let mut right_keys: Vec<String> = if right_key_list.is_empty() {
            Vec::new()
        } else {
            right_key_list.split(',').map(|k| k.trim().to_string()).collect()
        };
        if left_keys.iter().any(|k| k.is_empty())
            || right_keys.is_empty()
            || right_keys.iter().any(|k| k.is_empty())
        {
            return Err(EngineError::InvalidArgument("missing join key".to_string()));
        }
        if left_keys.len() != right_keys.len() {
            return Err(EngineError::InvalidArgument("mismatch key count".to_string()));
        }
        let left_node = self
            .resolve_query_loop(left_query, dictionary_finder, data_finder, progress)
            .ok_or_else(|| {
                EngineError::InvalidArgument("unresolvable left side".to_string())
            })?;
        if ops::is_value_node(&left_node) {
            return Err(EngineError::InvalidArgument(
                "left side is not a container node".to_string(),
            ));
        }
        let right_node = self
            .resolve_query_loop(right_query, dictionary_finder, data_finder, progress)
            .ok_or_else(|| {
                EngineError::InvalidArgument("unresolvable right side".to_string())
            })?;
        if ops::is_value_node(&right_node) {
            return Err(EngineError::InvalidArgument(
                "right side is not a container node".to_string(),
            ));
        }
        let mut left_array_name = split_array_name(&mut left_keys[0]);
        let mut right_array_name = split_array_name(&mut right_keys[0]);
        match operator {
            JoinOperator::LeftJoinMany => {
                right_array_name = Some(match right_array_name {
                    None => join::last_element_name(right_query)?,
                    Some(given) => {
                        join::check_element_name(&given)?;
                        given
                    }
                });
            }
            JoinOperator::RightJoinMany => {
                left_array_name = Some(match left_array_name {
                    None => join::last_element_name(left_query)?,
                    Some(given) => {
                        join::check_element_name(&given)?;
                        given
                    }
                });
            }
            _ => {}
        }
        join::join_nodes(
            left_node,
            left_keys,
            left_array_name,
            operator,
            right_node,
            right_keys,
            right_array_name,
            &self.functions,
        )
        .map(Some)
        .ok_or_else(|| EngineError::InvalidArgument("invalid data".to_string()))
    }
}

/// Splits an `arrayField:` prefix off the first key of a join side.
fn split_array_name(key: &mut String) -> Option<String> {
    let at = key.find(':')?;
    let name = key[..at].trim().to_string();
    *key = key[at + 1..].trim().to_string();
    Some(name)
}

/// Detects a repeating suffix in the resolution history: the most recent
/// earlier occurrence of the newest name, no earlier than half the
/// history, must head a block that element-wise equals the newest block.
fn repeating_suffix(history: &[String]) -> bool {
    let len = history.len();
    if len < 2 {
        return false;
    }
    let name = &history[len - 1];
    let half = (len / 2) as isize;
    let top = (len - 2) as isize;
    let mut j = top;
    while j >= half {
        if history[j as usize] == *name {
            let mut i = top;
            let mut k = j - 1;
            while i >= j && k >= 0 {
                if history[k as usize] != history[i as usize] {
                    break;
                }
                i -= 1;
                k -= 1;
            }
            return i < j;
        }
        j -= 1;
    }
    false
}
