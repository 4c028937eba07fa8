use serde_json::{Value, json};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A small shop: one object dataset plus two relational-style tables.
pub fn shop() -> Value {
    json!({
        "shop": { "name": "corner shop", "open": true },
        "orders": [
            { "id": 1, "customer": "ACME", "total": 12.5 },
            { "id": 2, "customer": "Tin Ltd", "total": 31.0 }
        ],
        "lines": [
            { "orderId": 1, "sku": "A1", "qty": 2 },
            { "orderId": 1, "sku": "B2", "qty": 1 },
            { "orderId": 2, "sku": "C3", "qty": 5 }
        ]
    })
}

pub fn engine_with_shop() -> jmerge::Engine {
    jmerge::Engine::from_value(shop()).expect("shop fixture is an object")
}
