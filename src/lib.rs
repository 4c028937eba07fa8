//! # jmerge
//!
//! A JSON-oriented query and template-merge engine. Given named JSON
//! datasets and a text template containing `{{query}}` placeholders, the
//! engine resolves every placeholder against the datasets and returns the
//! merged text. A callback-driven resolver lets missing datasets be
//! fetched on demand from dictionaries or external data sources, with
//! multi-round re-evaluation and infinite-loop detection.
//!
//! ## Module Structure
//!
//! - `engine`: the dataset registry, placeholder passes, and resolver
//! - `scanner`: token/pattern matching for the query mini-language
//! - `stack` / `ops`: the logical operator stack and comparison rules
//! - `path`: path navigation with array filters and function steps
//! - `functions`: the registry of built-in query transforms
//! - `join`: the five join operators between datasets
//! - `progress`: the resolver's diagnostic trail
//!
//! ## Usage
//!
//! ```
//! use jmerge::Engine;
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! engine.put_dataset("order", json!({ "id": 7, "customer": "ACME" }));
//! let merged = engine
//!     .fill_in_placeholder("Order {{order.id}} for {{order.customer}}")
//!     .unwrap();
//! assert_eq!(merged, "Order 7 for ACME");
//! ```

mod engine;
mod error;
mod functions;
mod join;
mod ops;
mod path;
mod progress;
mod scanner;
mod stack;

// --- Public API ---
pub use engine::{DataFinder, DictionaryFinder, Engine};
pub use error::{EngineError, NoValuePresent};
pub use functions::{FunctionRegistry, QueryFunction};
pub use progress::{DebugLevel, ResolverProgress};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_simple_template() {
        let mut engine = Engine::new();
        engine.put_dataset("a", json!("Hi"));
        assert_eq!(engine.fill_in_placeholder("{{a}} world").unwrap(), "Hi world");
    }

    #[test]
    fn test_merge_ternary() {
        let mut engine = Engine::new();
        engine.put_dataset("n", json!(3));
        assert_eq!(engine.fill_in_placeholder("{{n>0 ? 'pos' : 'neg'}}").unwrap(), "pos");
    }

    #[test]
    fn test_evaluate_query() {
        let mut engine = Engine::from_value(json!({ "store": { "items": [1, 2, 3] } })).unwrap();
        assert_eq!(engine.evaluate_query("store.items.sum()").unwrap(), Some(json!(6)));
    }

    #[test]
    fn test_unresolved_query_reports_name() {
        let mut engine = Engine::new();
        match engine.evaluate_query("ghost.id") {
            Err(EngineError::UnresolvedDataset(name)) => assert_eq!(name, "ghost"),
            other => panic!("expected unresolved dataset, got {other:?}"),
        }
    }
}
