//! Append-only progress log for the resolution driver.

use log::debug;
use serde_json::Value;

/// Controls how resolved nodes are rendered into progress steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    /// Render value nodes only; containers show as element counts.
    #[default]
    ShowValueNodeOnly,
    /// Additionally render full object content.
    ShowUpToObjectNode,
    /// Additionally render full array content.
    ShowUpToArrayNode,
}

/// A diagnostic trail of resolution steps plus a round counter.
/// Non-semantic: the driver works identically with a default instance.
pub struct ResolverProgress {
    debug_level: DebugLevel,
    auto_mark_end: bool,
    round: u32,
    steps: Vec<String>,
}

impl Default for ResolverProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverProgress {
    pub fn new() -> Self {
        Self {
            debug_level: DebugLevel::default(),
            auto_mark_end: true,
            round: 1,
            steps: Vec::new(),
        }
    }

    /// Starts the trail with a subject line, outside any round.
    pub fn with_subject(subject: &str) -> Self {
        let mut progress = Self::new();
        progress.steps.push(subject.to_string());
        progress
    }

    pub fn debug_level(mut self, level: DebugLevel) -> Self {
        self.debug_level = level;
        self
    }

    /// When set (the default), the merge entry points append a terminal
    /// `End` step on return.
    pub fn auto_mark_end(mut self, auto: bool) -> Self {
        self.auto_mark_end = auto;
        self
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn mark_end(&mut self) {
        self.add_step("End".to_string());
    }

    pub(crate) fn is_auto_mark_end(&self) -> bool {
        self.auto_mark_end
    }

    pub(crate) fn next_round(&mut self) {
        self.round += 1;
    }

    pub(crate) fn add_resolving_from(&mut self, name: &str, query: &str) {
        self.add_step(format!("Resolving {name} from {query}"));
    }

    pub(crate) fn add_resolved_node(&mut self, name: &str, node: Option<&Value>) {
        match node {
            None => self.add_step(format!("Unresolvable {name}")),
            Some(node) => {
                let rendered = self.resolved_value(node);
                self.add_step(format!("Resolved {name} = {rendered}"));
            }
        }
    }

    pub(crate) fn add_resolved_dataset(&mut self, name: &str, dataset: Option<&Value>) {
        match dataset {
            None => self.add_step(format!("Unresolvable {name}")),
            Some(node) => {
                let rendered = simplify_resolved_value(node);
                self.add_step(format!("Resolved {name} = {rendered}"));
            }
        }
    }

    pub(crate) fn add_query_result(&mut self, node: Option<&Value>) {
        let rendered = match node {
            None => "null".to_string(),
            Some(node) => self.resolved_value(node),
        };
        self.add_step(format!("Query result = {rendered}"));
    }

    pub(crate) fn add_step(&mut self, step: String) {
        let entry = format!("Round {} : {}", self.round, step);
        debug!(target: "jmerge::resolver", "{entry}");
        self.steps.push(entry);
    }

    fn resolved_value(&self, node: &Value) -> String {
        match self.debug_level {
            DebugLevel::ShowUpToArrayNode if node.is_array() || node.is_object() => {
                node.to_string()
            }
            DebugLevel::ShowUpToObjectNode if node.is_object() => node.to_string(),
            _ => simplify_resolved_value(node),
        }
    }
}

fn simplify_resolved_value(node: &Value) -> String {
    match node {
        Value::Object(map) => format!("Object with {} elements", map.len()),
        Value::Array(elements) => format!("Array with {} elements", elements.len()),
        other => other.to_string(),
    }
}
