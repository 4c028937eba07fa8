//! Error taxonomy for query evaluation and template merging.
use std::collections::BTreeSet;
use thiserror::Error;

/// Faults raised while evaluating a single query against the dataset registry.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A query referenced a dataset that is neither stored nor poisoned.
    /// Recoverable: the resolution driver feeds the name to the dictionary
    /// finder and retries the pass.
    #[error("unresolved dataset '{0}'")]
    UnresolvedDataset(String),

    /// The query text is structurally broken (dangling operator, empty
    /// operand, unknown operator symbol).
    #[error("invalid query '{0}': {1}")]
    InvalidQuery(String, String),

    /// Malformed input outside the query language itself: bad join key
    /// lists, non-object constructor argument, invalid element names.
    #[error("{0}")]
    InvalidArgument(String),

    #[error("json parse error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e.to_string())
    }
}

/// Terminal failure of a merge: one or more placeholders could not be
/// resolved after the resolver callbacks were exhausted.
///
/// `content` carries the best-effort merged text, with every unresolvable
/// placeholder rewritten as `**query**`.
#[derive(Error, Debug, Clone)]
#[error("unable to resolve placeholders {placeholders:?}, datasets {dataset_names:?}")]
pub struct NoValuePresent {
    /// Dataset names still unknown, in the order they were first reported.
    pub dataset_names: Vec<String>,
    /// Queries that evaluated to nothing or failed to parse.
    pub placeholders: BTreeSet<String>,
    /// The partially merged template text.
    pub content: String,
}

impl NoValuePresent {
    pub(crate) fn new(
        dataset_names: Vec<String>,
        placeholders: BTreeSet<String>,
        content: String,
    ) -> Self {
        Self { dataset_names, placeholders, content }
    }
}
