//! Seeded mock order generator
//!
//! A fixed pool of 100 customers and a 20-item menu; every order picks one
//! customer and 1 to 5 distinct menu items with quantities of 1 to 3. The
//! same seed always yields the same sequence of customers and line items.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::kafka::producer_loop::OrderSource;
use crate::models::{LineItem, Order};

pub const NUM_CUSTOMERS: usize = 100;

const FIRST_NAMES: [&str; 20] = [
    "James", "Mary", "Robert", "Patricia", "John", "Jennifer", "Michael", "Linda", "David",
    "Elizabeth", "William", "Barbara", "Richard", "Susan", "Joseph", "Jessica", "Thomas", "Sarah",
    "Daniel", "Karen",
];

const LAST_NAMES: [&str; 20] = [
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez", "Hernandez", "Lopez", "Gonzalez", "Wilson", "Anderson", "Thomas", "Taylor",
    "Moore", "Jackson", "Martin",
];

/// (name, price in cents)
const MENU: [(&str, i64); 20] = [
    ("Classic Burger", 899),
    ("Cheeseburger", 999),
    ("Bacon Burger", 1099),
    ("Veggie Burger", 849),
    ("French Fries", 349),
    ("Onion Rings", 449),
    ("Sweet Potato Fries", 499),
    ("Coleslaw", 299),
    ("Caesar Salad", 699),
    ("Garden Salad", 599),
    ("Coke", 249),
    ("Sprite", 249),
    ("Iced Tea", 299),
    ("Lemonade", 299),
    ("Milkshake", 499),
    ("Apple Pie", 399),
    ("Ice Cream Sundae", 449),
    ("Brownie", 349),
    ("Chicken Nuggets", 599),
    ("Chicken Sandwich", 799),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub customer_id: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuItem {
    pub item_id: String,
    pub name: String,
    pub price: Decimal,
}

/// Generates reproducible mock orders
pub struct MockDataGenerator {
    rng: StdRng,
    customers: Vec<Customer>,
    menu: Vec<MenuItem>,
    sequence: u64,
}

impl MockDataGenerator {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);

        let customers = (1..=NUM_CUSTOMERS)
            .map(|i| {
                let first = FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())];
                let last = LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())];
                let name = format!("{} {}", first, last);
                let email = format!("{}.{}@example.com", name.to_lowercase().replace(' ', "."), i);
                Customer {
                    customer_id: format!("CUST-{:05}", i),
                    name,
                    email,
                }
            })
            .collect();

        let menu = MENU
            .iter()
            .enumerate()
            .map(|(i, (name, cents))| MenuItem {
                item_id: format!("ITEM-{:03}", i + 1),
                name: name.to_string(),
                price: Decimal::new(*cents, 2),
            })
            .collect();

        Self {
            rng,
            customers,
            menu,
            sequence: 0,
        }
    }

    pub fn customers(&self) -> &[Customer] {
        &self.customers
    }

    pub fn menu(&self) -> &[MenuItem] {
        &self.menu
    }

    /// Orders generated so far
    pub fn generated(&self) -> u64 {
        self.sequence
    }

    /// Next order id for the date of `now`
    fn next_order_id(&mut self, now: DateTime<Utc>) -> String {
        self.sequence += 1;
        format!("ORD-{}-{:05}", now.format("%Y%m%d"), self.sequence)
    }

    /// Generate one pending order created at `now`
    pub fn generate_order_at(&mut self, now: DateTime<Utc>) -> Order {
        let customer = self.customers[self.rng.gen_range(0..self.customers.len())].clone();

        let item_count = self.rng.gen_range(1..=5);
        let picked: Vec<MenuItem> = self
            .menu
            .choose_multiple(&mut self.rng, item_count)
            .cloned()
            .collect();

        let items = picked
            .into_iter()
            .map(|item| {
                let quantity = self.rng.gen_range(1..=3);
                LineItem::new(item.item_id, item.name, quantity, item.price)
            })
            .collect();

        let order_id = self.next_order_id(now);
        Order::new(
            order_id,
            customer.customer_id,
            customer.name,
            customer.email,
            items,
            now,
        )
    }

    /// Generate one pending order created now
    pub fn generate_order(&mut self) -> Order {
        self.generate_order_at(Utc::now())
    }
}

impl OrderSource for MockDataGenerator {
    fn next_order(&mut self) -> Option<Order> {
        Some(self.generate_order())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{is_valid_order_id, round_money, OrderStatus};
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_customer_pool() {
        let generator = MockDataGenerator::new(42);
        let customers = generator.customers();

        assert_eq!(customers.len(), 100);
        assert_eq!(customers[0].customer_id, "CUST-00001");
        assert_eq!(customers[99].customer_id, "CUST-00100");
        assert!(customers[4].email.ends_with(".5@example.com"));
        assert!(!customers[4].email.contains(' '));
    }

    #[test]
    fn test_menu() {
        let generator = MockDataGenerator::new(42);
        let menu = generator.menu();

        assert_eq!(menu.len(), 20);
        assert_eq!(menu[0].item_id, "ITEM-001");
        assert_eq!(menu[0].name, "Classic Burger");
        assert_eq!(menu[0].price, Decimal::new(899, 2));
        assert_eq!(menu[19].name, "Chicken Sandwich");
    }

    #[test]
    fn test_orders_are_well_formed() {
        let mut generator = MockDataGenerator::new(7);

        for n in 1..=200u64 {
            let order = generator.generate_order_at(fixed_now());

            assert_eq!(order.order_id, format!("ORD-20250110-{:05}", n));
            assert!(is_valid_order_id(&order.order_id));
            assert_eq!(order.status, OrderStatus::Pending);
            assert!((1..=5).contains(&order.items.len()));

            let mut names: Vec<&str> = order.items.iter().map(|i| i.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), order.items.len(), "items must be distinct");

            for item in &order.items {
                assert!((1..=3).contains(&item.quantity));
                assert_eq!(item.subtotal, round_money(item.unit_price * Decimal::from(item.quantity)));
            }

            let sum: Decimal = order.items.iter().map(|i| i.subtotal).sum();
            assert_eq!(order.total_amount, round_money(sum));
            assert!(order.total_amount > Decimal::ZERO);
        }
    }

    #[test]
    fn test_same_seed_same_orders() {
        let mut a = MockDataGenerator::new(42);
        let mut b = MockDataGenerator::new(42);

        for _ in 0..20 {
            assert_eq!(a.generate_order_at(fixed_now()), b.generate_order_at(fixed_now()));
        }
    }

    #[test]
    fn test_generated_orders_pass_validation() {
        let mut generator = MockDataGenerator::new(1);
        let order = generator.generate_order();

        let value = serde_json::to_value(&order).unwrap();
        let payload = value.as_object().unwrap();
        assert!(crate::models::validate(payload).is_ok());
        assert_eq!(Order::from_payload(payload).unwrap().total_amount, order.total_amount);
    }
}
