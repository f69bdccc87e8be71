//! Order domain model
//!
//! [`Order`] is the strongly-typed record that travels from the generator,
//! through the log, into the store. All money is [`Decimal`]; it is written to
//! JSON as its decimal text and read back exactly via
//! [`parse_decimal`](super::validation::parse_decimal).

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

use super::error::{ValidationError, ValidationErrorKind, ValidationResult};
use super::validation::{
    is_valid_order_id, parse_decimal, require_positive_decimal, require_string,
    validate_timestamp_field,
};

/// Round a monetary amount to cents, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Write an amount as a JSON number carrying its exact decimal digits
fn serialize_money<S: Serializer>(amount: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    RawValue::from_string(amount.normalize().to_string())
        .map_err(serde::ser::Error::custom)?
        .serialize(serializer)
}

/// Sum of line subtotals, `None` if it overflows
fn sum_subtotals(items: &[LineItem]) -> Option<Decimal> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |total, item| total.checked_add(item.subtotal))
}

/// Lifecycle status of an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl OrderStatus {
    /// Parse a status from its wire representation
    pub fn parse(s: &str) -> ValidationResult<Self> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            _ => Err(ValidationError::with_context(
                ValidationErrorKind::InvalidStatus,
                "status",
                format!("Unknown order status: {}", s),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of an order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub name: String,
    pub quantity: u32,
    #[serde(rename = "price", serialize_with = "serialize_money")]
    pub unit_price: Decimal,
    #[serde(serialize_with = "serialize_money")]
    pub subtotal: Decimal,
}

impl LineItem {
    /// Build a line item, deriving the subtotal from quantity and price
    ///
    /// For trusted, bounded inputs such as the menu; panics if
    /// `unit_price * quantity` overflows [`Decimal`]. Untrusted input goes
    /// through [`LineItem::from_value`].
    pub fn new(
        item_id: impl Into<String>,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            item_id: Some(item_id.into()),
            name: name.into(),
            quantity,
            unit_price,
            subtotal: round_money(unit_price * Decimal::from(quantity)),
        }
    }

    /// Parse the line item at position `index` of an `items` array
    pub fn from_value(value: &Value, index: usize) -> ValidationResult<Self> {
        let field = format!("items[{}]", index);
        let raw = value.as_object().ok_or_else(|| {
            ValidationError::with_context(
                ValidationErrorKind::InvalidField,
                field.clone(),
                "line item must be an object",
            )
        })?;

        let name = require_string(raw, "name").map_err(|e| nest(e, &field))?;
        let item_id = match raw.get("item_id") {
            None | Some(Value::Null) => None,
            Some(_) => Some(require_string(raw, "item_id").map_err(|e| nest(e, &field))?),
        };

        let quantity = raw
            .get("quantity")
            .and_then(Value::as_u64)
            .filter(|q| *q > 0)
            .and_then(|q| u32::try_from(q).ok())
            .ok_or_else(|| {
                ValidationError::with_context(
                    ValidationErrorKind::InvalidField,
                    format!("{}.quantity", field),
                    "quantity must be a positive integer",
                )
            })?;

        let price_key = if raw.contains_key("price") {
            "price"
        } else {
            "unit_price"
        };
        let unit_price = require_positive_decimal(raw, price_key).map_err(|e| nest(e, &field))?;
        let expected = unit_price
            .checked_mul(Decimal::from(quantity))
            .map(round_money)
            .ok_or_else(|| {
                ValidationError::with_context(
                    ValidationErrorKind::InvalidField,
                    format!("{}.{}", field, price_key),
                    format!("{} x {} is out of range", quantity, unit_price),
                )
            })?;

        let subtotal = match raw.get("subtotal") {
            None | Some(Value::Null) => expected,
            Some(value) => {
                let given = parse_decimal(value).ok_or_else(|| {
                    ValidationError::with_context(
                        ValidationErrorKind::InvalidField,
                        format!("{}.subtotal", field),
                        "subtotal must be a number",
                    )
                })?;
                if given != expected {
                    return Err(ValidationError::with_context(
                        ValidationErrorKind::InconsistentAmount,
                        format!("{}.subtotal", field),
                        format!("expected {} for {} x {}, got {}", expected, quantity, unit_price, given),
                    ));
                }
                expected
            },
        };

        Ok(Self {
            item_id,
            name,
            quantity,
            unit_price,
            subtotal,
        })
    }
}

fn nest(mut error: ValidationError, parent: &str) -> ValidationError {
    error.field = format!("{}.{}", parent, error.field);
    error
}

/// An order event, immutable once constructed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    pub order_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_email: String,
    pub items: Vec<LineItem>,
    #[serde(serialize_with = "serialize_money")]
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Build a new pending order, deriving the total from the items
    ///
    /// Panics if the subtotals overflow [`Decimal`] when summed; items built
    /// with [`LineItem::new`] from menu prices never do.
    pub fn new(
        order_id: impl Into<String>,
        customer_id: impl Into<String>,
        customer_name: impl Into<String>,
        customer_email: impl Into<String>,
        items: Vec<LineItem>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total_amount = round_money(items.iter().map(|item| item.subtotal).sum());

        Self {
            order_id: order_id.into(),
            customer_id: customer_id.into(),
            customer_name: customer_name.into(),
            customer_email: customer_email.into(),
            items,
            total_amount,
            status: OrderStatus::Pending,
            created_at,
        }
    }

    /// Convert a validated payload into an order
    ///
    /// Callers run [`validate`](super::validation::validate) first; this
    /// performs the typed conversion and checks the monetary invariants.
    pub fn from_payload(raw: &Map<String, Value>) -> ValidationResult<Self> {
        let order_id = require_string(raw, "order_id")?;
        if !is_valid_order_id(&order_id) {
            return Err(ValidationError::with_context(
                ValidationErrorKind::InvalidOrderId,
                "order_id",
                format!("'{}' does not match ORD-<yyyymmdd>-<sequence>", order_id),
            ));
        }

        let customer_id = require_string(raw, "customer_id")?;
        let customer_name = require_string(raw, "customer_name")?;
        let customer_email = require_string(raw, "customer_email")?;

        let items = match raw.get("items") {
            Some(Value::Array(values)) if !values.is_empty() => values
                .iter()
                .enumerate()
                .map(|(index, value)| LineItem::from_value(value, index))
                .collect::<ValidationResult<Vec<_>>>()?,
            _ => {
                return Err(ValidationError::new(
                    ValidationErrorKind::EmptyItems,
                    "items",
                ))
            },
        };

        let total_amount = require_positive_decimal(raw, "total_amount")?;
        let expected_total = sum_subtotals(&items).map(round_money).ok_or_else(|| {
            ValidationError::with_context(
                ValidationErrorKind::InconsistentAmount,
                "total_amount",
                "sum of item subtotals is out of range",
            )
        })?;
        if total_amount != expected_total {
            return Err(ValidationError::with_context(
                ValidationErrorKind::InconsistentAmount,
                "total_amount",
                format!("expected {}, got {}", expected_total, total_amount),
            ));
        }

        let status = OrderStatus::parse(&require_string(raw, "status")?)?;
        let created_at =
            validate_timestamp_field(&require_string(raw, "created_at")?, "created_at")?;

        Ok(Self {
            order_id,
            customer_id,
            customer_name,
            customer_email,
            items,
            total_amount: expected_total,
            status,
            created_at,
        })
    }

    /// Serialize to the JSON wire format
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Partition key: the customer id bytes
    pub fn partition_key(&self) -> &[u8] {
        self.customer_id.as_bytes()
    }

    /// Number of line items
    pub fn item_count(&self) -> usize {
        self.items.len()
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Order {} - {} - ${}",
            self.order_id, self.customer_id, self.total_amount
        )
    }
}

/// An order as persisted, with the store-assigned write time
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    pub order: Order,
    pub processed_at: DateTime<Utc>,
}

impl StoredOrder {
    /// Time between order creation and the store write
    pub fn pipeline_latency(&self) -> chrono::Duration {
        self.processed_at - self.order.created_at
    }
}

/// Builder for creating test orders
#[cfg(test)]
pub struct OrderBuilder {
    order_id: String,
    customer_id: String,
    items: Vec<LineItem>,
}

#[cfg(test)]
impl OrderBuilder {
    pub fn new() -> Self {
        Self {
            order_id: "ORD-20250110-00001".to_string(),
            customer_id: "CUST-00001".to_string(),
            items: vec![LineItem::new("ITEM-001", "Classic Burger", 2, Decimal::new(899, 2))],
        }
    }

    pub fn order_id(mut self, order_id: &str) -> Self {
        self.order_id = order_id.to_string();
        self
    }

    pub fn customer_id(mut self, customer_id: &str) -> Self {
        self.customer_id = customer_id.to_string();
        self
    }

    pub fn item(mut self, name: &str, quantity: u32, price: Decimal) -> Self {
        let id = format!("ITEM-{:03}", self.items.len() + 1);
        self.items.push(LineItem::new(id, name, quantity, price));
        self
    }

    pub fn build(self) -> Order {
        Order::new(
            self.order_id,
            self.customer_id,
            "Ada Lovelace",
            "ada.lovelace.1@example.com",
            self.items,
            Utc::now(),
        )
    }
}
