//! Query evaluation against a stored registry.

mod common;

use common::{TestResult, engine_with_shop};
use jmerge::{Engine, EngineError};
use serde_json::json;

#[test]
fn test_literals() -> TestResult {
    let mut engine = Engine::new();
    assert_eq!(engine.evaluate_query("null")?, Some(json!(null)));
    assert_eq!(engine.evaluate_query("true")?, Some(json!(true)));
    assert_eq!(engine.evaluate_query("-7")?, Some(json!(-7)));
    assert_eq!(engine.evaluate_query("+7")?, Some(json!(7)));
    assert_eq!(engine.evaluate_query("2.5e2")?, Some(json!(250.0)));
    assert_eq!(engine.evaluate_query("'text'")?, Some(json!("text")));
    Ok(())
}

#[test]
fn test_paths_and_filters() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.evaluate_query("shop.name")?, Some(json!("corner shop")));
    assert_eq!(engine.evaluate_query("orders[1].customer")?, Some(json!("Tin Ltd")));
    assert_eq!(engine.evaluate_query("orders[-1].id")?, Some(json!(2)));
    assert_eq!(
        engine.evaluate_query("orders[total > 20].customer")?,
        Some(json!("Tin Ltd"))
    );
    assert_eq!(
        engine.evaluate_query("lines[orderId = 1]*.sku")?,
        Some(json!(["A1", "B2"]))
    );
    assert_eq!(engine.evaluate_query("orders.customer")?, Some(json!(["ACME", "Tin Ltd"])));
    assert_eq!(engine.evaluate_query("shop.missing")?, None);
    Ok(())
}

#[test]
fn test_multi_key_filter_predicates() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(
        engine.evaluate_query("lines[orderId = 1 & qty > 1].sku")?,
        Some(json!("A1"))
    );
    assert_eq!(engine.evaluate_query("lines[orderId = 9 & qty > 1]")?, None);
    Ok(())
}

#[test]
fn test_functions_in_queries() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.evaluate_query("shop.name.upperCase()")?, Some(json!("CORNER SHOP")));
    assert_eq!(engine.evaluate_query("lines.qty.sum()")?, Some(json!(8)));
    assert_eq!(
        engine.evaluate_query("orders.customer.join(', ')")?,
        Some(json!("ACME, Tin Ltd"))
    );
    assert_eq!(
        engine.evaluate_query("shop.concat(name, ' is open: ', open)")?,
        Some(json!("corner shop is open: true"))
    );
    Ok(())
}

#[test]
fn test_operator_precedence_and_logic() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.evaluate_query("1 + 2 * 3")?, Some(json!(7)));
    assert_eq!(engine.evaluate_query("(1 + 2) * 3")?, Some(json!(9)));
    assert_eq!(engine.evaluate_query("10 % 4 = 2")?, Some(json!(true)));
    assert_eq!(
        engine.evaluate_query("shop.open & orders.size() > 1")?,
        Some(json!(true))
    );
    assert_eq!(engine.evaluate_query("!shop.open | 1 > 2")?, Some(json!(false)));
    Ok(())
}

#[test]
fn test_relational_rules() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("s", json!("10"));
    // A lone text side coerces to number.
    assert_eq!(engine.evaluate_query("s > 9")?, Some(json!(true)));
    assert_eq!(engine.evaluate_query("9 < s")?, Some(json!(true)));
    assert_eq!(engine.evaluate_query("'b' > 'a'")?, Some(json!(true)));
    assert_eq!(engine.evaluate_query("null = null")?, Some(json!(true)));
    engine.put_dataset("xs", json!([1, 2, 2]));
    engine.put_dataset("ys", json!([2, 2, 1]));
    assert_eq!(engine.evaluate_query("xs = ys")?, Some(json!(true)));
    assert_eq!(engine.evaluate_query("xs != ys")?, Some(json!(false)));
    Ok(())
}

#[test]
fn test_arithmetic_coercion_failure_yields_nothing() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.evaluate_query("shop.name + 1")?, None);
    assert_eq!(engine.evaluate_query("orders[0].total * 2")?, Some(json!(25)));
    Ok(())
}

#[test]
fn test_dataset_query_caching_under_query_text() -> TestResult {
    let mut engine = engine_with_shop();
    engine.evaluate_query("shop.name")?;
    assert_eq!(engine.datasets().get("shop.name"), Some(&Some(json!("corner shop"))));
    engine.evaluate_query("shop.closed")?;
    assert_eq!(engine.datasets().get("shop.closed"), Some(&None));
    Ok(())
}

#[test]
fn test_unresolved_dataset_propagates_from_any_step() {
    let mut engine = engine_with_shop();
    match engine.evaluate_query("mystery.id ? 'a' : 'b'") {
        Err(EngineError::UnresolvedDataset(name)) => assert_eq!(name, "mystery"),
        other => panic!("expected unresolved dataset, got {other:?}"),
    }
}

#[test]
fn test_short_circuit_avoids_unresolved_branch() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.evaluate_query("1 > 2 & mystery.id")?, Some(json!(false)));
    assert_eq!(engine.evaluate_query("shop.open | mystery.id")?, Some(json!(true)));
    Ok(())
}

#[test]
fn test_quoted_literal_prefix_query() -> TestResult {
    let mut engine = Engine::new();
    assert_eq!(engine.evaluate_query("'hello'.upperCase()")?, Some(json!("HELLO")));
    assert_eq!(engine.evaluate_query("'a,b,c'.split(',').size()")?, Some(json!(3)));
    Ok(())
}

#[test]
fn test_divert_all_branches() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(
        engine.evaluate_query("lines[qty > 0]@.sku.lowerCase()")?,
        Some(json!(["a1", "b2", "c3"]))
    );
    Ok(())
}

#[test]
fn test_malformed_query_is_invalid() {
    let mut engine = engine_with_shop();
    assert!(matches!(
        engine.evaluate_query("shop.open &"),
        Err(EngineError::InvalidQuery(..))
    ));
}
