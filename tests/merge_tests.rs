//! Placeholder merging without on-demand resolution.

mod common;

use common::{TestResult, engine_with_shop};
use jmerge::Engine;
use serde_json::json;

#[test]
fn test_trivial_substitution() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("a", json!("Hi"));
    assert_eq!(engine.fill_in_placeholder("{{a}} world")?, "Hi world");
    Ok(())
}

#[test]
fn test_ternary_substitution() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("n", json!(3));
    assert_eq!(engine.fill_in_placeholder("{{n>0 ? 'pos' : 'neg'}}")?, "pos");
    engine.put_dataset("n", json!(-4));
    assert_eq!(engine.fill_in_placeholder("{{n>0 ? 'pos' : 'neg'}}")?, "neg");
    Ok(())
}

#[test]
fn test_ternary_chain_and_elvis() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("grade", json!(85));
    let template = "{{grade >= 90 ? 'A' : grade >= 80 ? 'B' : 'C'}}";
    assert_eq!(engine.fill_in_placeholder(template)?, "B");

    engine.put_dataset("name", json!(""));
    assert_eq!(engine.fill_in_placeholder("{{name ?: 'anonymous'}}")?, "anonymous");
    engine.put_dataset("name", json!("Bo"));
    assert_eq!(engine.fill_in_placeholder("{{name ?: 'anonymous'}}")?, "Bo");
    Ok(())
}

#[test]
fn test_trailing_if_true_merges_to_empty_text() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("n", json!(3));
    assert_eq!(engine.fill_in_placeholder("[{{n > 5 ? 'big'}}]")?, "[]");
    Ok(())
}

#[test]
fn test_no_placeholder_shortcut_returns_template_exactly() -> TestResult {
    let mut engine = engine_with_shop();
    for template in ["plain text", "", "  ", "single { brace }", "almost {x}"] {
        assert_eq!(engine.fill_in_placeholder(template)?, template);
    }
    Ok(())
}

#[test]
fn test_merge_is_idempotent() -> TestResult {
    let mut engine = engine_with_shop();
    let template = "{{shop.name}} has {{orders.size()}} orders";
    let merged = engine.fill_in_placeholder(template)?;
    assert_eq!(merged, "corner shop has 2 orders");
    assert_eq!(engine.fill_in_placeholder(&merged)?, merged);
    Ok(())
}

#[test]
fn test_array_values_serialize_as_json() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("list", json!([1, 2, 3]));
    assert_eq!(engine.fill_in_placeholder("ids: {{list}}")?, "ids: [1,2,3]");
    Ok(())
}

#[test]
fn test_null_value_merges_as_word_null() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("gone", json!(null));
    assert_eq!(engine.fill_in_placeholder("[{{gone}}]")?, "[null]");
    Ok(())
}

#[test]
fn test_unresolvable_with_poisoning() {
    let mut engine = Engine::new();
    let failure = engine.fill_in_placeholder("[{{x}}][{{x}}]").unwrap_err();
    assert_eq!(failure.content, "[**x**][**x**]");
    assert!(failure.placeholders.contains("x"));
    assert!(failure.dataset_names.is_empty());
    // The name is poisoned for the rest of the merge.
    assert_eq!(engine.datasets().get("x"), Some(&None));
    assert_eq!(engine.evaluate_query("x").unwrap(), None);
}

#[test]
fn test_object_placeholder_is_unresolvable() {
    let mut engine = engine_with_shop();
    let failure = engine.fill_in_placeholder("{{shop}}").unwrap_err();
    assert_eq!(failure.content, "**shop**");
    assert!(failure.placeholders.contains("shop"));
}

#[test]
fn test_failure_preserves_resolved_parts() {
    let mut engine = engine_with_shop();
    let failure = engine.fill_in_placeholder("{{shop.name}} / {{missing}}").unwrap_err();
    assert_eq!(failure.content, "corner shop / **missing**");
    assert!(!failure.content.contains("{{"));
}

#[test]
fn test_missing_closing_tag() {
    let mut engine = engine_with_shop();
    let failure = engine.fill_in_placeholder("Hello {{shop.name").unwrap_err();
    assert_eq!(failure.content, "Hello **shop.name");
    assert!(
        failure
            .placeholders
            .iter()
            .any(|p| p.starts_with("Lack of closing tag: ")),
        "got {:?}",
        failure.placeholders
    );
}

#[test]
fn test_consecutive_braces_collapse() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("a", json!("X"));
    assert_eq!(engine.fill_in_placeholder("{{{a}}")?, "{X");
    assert_eq!(engine.fill_in_placeholder("{{{{a}}")?, "{{X");
    Ok(())
}

#[test]
fn test_nested_placeholder_values_are_merged_again() -> TestResult {
    let mut engine = Engine::new();
    engine.put_dataset("outer", json!("{{inner}}!"));
    engine.put_dataset("inner", json!("deep"));
    assert_eq!(engine.fill_in_placeholder("{{outer}}")?, "deep!");
    Ok(())
}

#[test]
fn test_xml_placeholder_extracts_tags_and_unescapes() -> TestResult {
    let mut engine = engine_with_shop();
    let template = "<p>{{<w:r>orders[0].total &gt; 10 ? 'big' : 'small'</w:r>}}</p>";
    let merged = engine.fill_in_xml_placeholder(template)?;
    assert_eq!(merged, "<p><w:r></w:r>big</p>");
    Ok(())
}

#[test]
fn test_xml_placeholder_without_markup_behaves_plainly() -> TestResult {
    let mut engine = engine_with_shop();
    assert_eq!(engine.fill_in_xml_placeholder("{{shop.name}}")?, "corner shop");
    Ok(())
}

#[test]
fn test_quoted_literal_with_doubled_quote() -> TestResult {
    let mut engine = Engine::new();
    assert_eq!(engine.fill_in_placeholder("{{'it''s fine'}}")?, "it's fine");
    Ok(())
}
