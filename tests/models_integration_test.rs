//! Integration tests for the order data model
//!
//! These tests exercise validation, conversion and serialization of order
//! payloads through the public API only.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};

use order_pipeline::mock_data::MockDataGenerator;
use order_pipeline::models::{
    round_money, validate, LineItem, Order, OrderStatus, ValidationErrorKind, REQUIRED_FIELDS,
};

/// Helper to create a valid order payload
fn valid_payload() -> Map<String, Value> {
    let value = json!({
        "order_id": "ORD-20250110-00001",
        "customer_id": "CUST-00042",
        "customer_name": "Mary Smith",
        "customer_email": "mary.smith.42@example.com",
        "items": [
            {"item_id": "ITEM-001", "name": "Classic Burger", "quantity": 2, "price": 8.99, "subtotal": 17.98},
            {"item_id": "ITEM-011", "name": "Coke", "quantity": 1, "price": 2.49, "subtotal": 2.49}
        ],
        "total_amount": 20.47,
        "status": "pending",
        "created_at": "2025-01-10T12:00:00Z"
    });

    match value {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

#[test]
fn test_valid_payload_converts() {
    let payload = valid_payload();
    assert!(validate(&payload).is_ok());

    let order = Order::from_payload(&payload).expect("Should convert a valid payload");

    assert_eq!(order.order_id, "ORD-20250110-00001");
    assert_eq!(order.items.len(), 2);
    assert_eq!(order.total_amount, Decimal::new(2047, 2));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(
        order.created_at,
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    );
}

#[test]
fn test_missing_fields_are_all_named_in_order() {
    let mut payload = valid_payload();
    payload.remove("customer_email");
    payload.remove("status");
    payload.remove("order_id");

    let err = validate(&payload).unwrap_err();

    assert!(matches!(err.kind, ValidationErrorKind::MissingFields(_)));
    assert_eq!(err.missing(), ["order_id", "customer_email", "status"]);
}

#[test]
fn test_empty_object_misses_every_field() {
    let err = validate(&Map::new()).unwrap_err();
    assert_eq!(err.missing().len(), REQUIRED_FIELDS.len());
}

#[test]
fn test_empty_items_rejected() {
    let mut payload = valid_payload();
    payload.insert("items".to_string(), json!([]));

    let err = validate(&payload).unwrap_err();
    assert_eq!(err.reason(), "empty_items");

    payload.insert("items".to_string(), json!("burger"));
    assert_eq!(validate(&payload).unwrap_err().reason(), "empty_items");
}

#[test]
fn test_non_positive_total_rejected() {
    for total in [json!(0), json!(-5.5), json!("20.47"), Value::Null] {
        let mut payload = valid_payload();
        payload.insert("total_amount".to_string(), total.clone());

        let err = validate(&payload).unwrap_err();
        assert_eq!(err.reason(), "non_positive_total", "total {}", total);
    }
}

#[test]
fn test_validation_is_total_over_wrong_types() {
    let replacements = [
        json!(null),
        json!(true),
        json!(42),
        json!("x"),
        json!([]),
        json!({}),
    ];

    for field in REQUIRED_FIELDS {
        for replacement in &replacements {
            let mut payload = valid_payload();
            payload.insert(field.to_string(), replacement.clone());

            // Must never panic; a wrong type either fails validation or conversion
            if validate(&payload).is_ok() {
                let _ = Order::from_payload(&payload);
            }
        }
    }
}

#[test]
fn test_inconsistent_total_rejected_on_conversion() {
    let mut payload = valid_payload();
    payload.insert("total_amount".to_string(), json!(25.00));

    assert!(validate(&payload).is_ok());
    let err = Order::from_payload(&payload).unwrap_err();
    assert!(matches!(err.kind, ValidationErrorKind::InconsistentAmount));
}

#[test]
fn test_bad_order_id_rejected_on_conversion() {
    let mut payload = valid_payload();
    payload.insert("order_id".to_string(), json!("order-1"));

    let err = Order::from_payload(&payload).unwrap_err();
    assert!(matches!(err.kind, ValidationErrorKind::InvalidOrderId));
}

#[test]
fn test_unknown_status_rejected_on_conversion() {
    let mut payload = valid_payload();
    payload.insert("status".to_string(), json!("shipped"));

    let err = Order::from_payload(&payload).unwrap_err();
    assert!(matches!(err.kind, ValidationErrorKind::InvalidStatus));
}

#[test]
fn test_money_is_rounded_half_away_from_zero() {
    assert_eq!(round_money(Decimal::new(1005, 3)), Decimal::new(101, 2));
    assert_eq!(round_money(Decimal::new(-1005, 3)), Decimal::new(-101, 2));

    let item = LineItem::new("ITEM-X", "Dime", 3, Decimal::new(10, 2));
    assert_eq!(item.subtotal.to_string(), "0.30");
}

#[test]
fn test_wire_format() {
    let order = Order::from_payload(&valid_payload()).unwrap();
    let value: Value = serde_json::from_slice(&order.to_json_bytes().unwrap()).unwrap();

    assert_eq!(value["status"], "pending");
    assert_eq!(value["total_amount"], json!(20.47));
    assert_eq!(value["items"][0]["price"], json!(8.99));
    assert_eq!(value["items"][0]["subtotal"], json!(17.98));
    assert_eq!(order.partition_key(), "CUST-00042".as_bytes());
}

#[test]
fn test_generated_orders_hold_monetary_invariant() {
    let mut generator = MockDataGenerator::new(2024);

    for _ in 0..500 {
        let order = generator.generate_order();
        let sum: Decimal = order.items.iter().map(|i| i.subtotal).sum();

        assert_eq!(order.total_amount, round_money(sum));
        for item in &order.items {
            assert_eq!(
                item.subtotal,
                round_money(item.unit_price * Decimal::from(item.quantity))
            );
        }

        let value = serde_json::to_value(&order).unwrap();
        let payload = value.as_object().unwrap();
        assert!(validate(payload).is_ok());
        assert_eq!(Order::from_payload(payload).unwrap(), order);
    }
}
