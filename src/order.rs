//! Order records and the synthetic order generator.
//!
//! Wire format is a flat JSON object. The field names (`order_id`, `user`,
//! `item`, `quantity`) are shared with every other reader of the topic and must
//! not change.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::producer::Correlated;

/// Largest quantity a generated order can carry. The smallest is 1.
pub const MAX_QUANTITY: u32 = 10;

const DEFAULT_USERS: &[&str] = &["bughowi", "alice", "bob", "charlie", "diana"];
const DEFAULT_ITEMS: &[&str] = &[
    "mie gacoan",
    "mushroom pizza",
    "nasi goreng",
    "chicken katsu",
    "ramen bowl",
    "beef burger",
    "pad thai",
    "sushi roll",
];

/// A single order event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// UUIDv7, so ids sort by creation time.
    pub order_id: String,
    pub user: String,
    pub item: String,
    pub quantity: u32,
}

impl Order {
    /// Serialize to the wire payload.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Parse a wire payload.
    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

impl Correlated for Order {
    fn correlation_id(&self) -> &str {
        &self.order_id
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "order {}: {} (qty: {}) for {}",
            self.order_id, self.item, self.quantity, self.user
        )
    }
}

/// Errors building a catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog needs at least one user")]
    NoUsers,
    #[error("catalog needs at least one item")]
    NoItems,
}

/// Users and items orders are drawn from. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    users: Vec<String>,
    items: Vec<String>,
}

impl Catalog {
    pub fn new(users: Vec<String>, items: Vec<String>) -> Result<Self, CatalogError> {
        if users.is_empty() {
            return Err(CatalogError::NoUsers);
        }
        if items.is_empty() {
            return Err(CatalogError::NoItems);
        }
        Ok(Self { users, items })
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    pub fn items(&self) -> &[String] {
        &self.items
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            users: DEFAULT_USERS.iter().map(|u| u.to_string()).collect(),
            items: DEFAULT_ITEMS.iter().map(|i| i.to_string()).collect(),
        }
    }
}

/// Draws random orders from a catalog.
///
/// The RNG is injected so tests can seed it.
pub struct OrderGenerator<R> {
    catalog: Catalog,
    rng: R,
}

impl<R: Rng> OrderGenerator<R> {
    pub fn new(catalog: Catalog, rng: R) -> Self {
        Self { catalog, rng }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Produce the next order. Never fails.
    pub fn next_order(&mut self) -> Order {
        let user = self.rng.random_range(0..self.catalog.users.len());
        let item = self.rng.random_range(0..self.catalog.items.len());

        Order {
            order_id: Uuid::now_v7().to_string(),
            user: self.catalog.users[user].clone(),
            item: self.catalog.items[item].clone(),
            quantity: self.rng.random_range(1..=MAX_QUANTITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn seeded() -> OrderGenerator<StdRng> {
        OrderGenerator::new(Catalog::default(), StdRng::seed_from_u64(7))
    }

    #[test]
    fn test_generated_orders_in_range_and_unique() {
        let mut generator = seeded();
        let mut ids = HashSet::new();

        for _ in 0..500 {
            let order = generator.next_order();
            assert!((1..=MAX_QUANTITY).contains(&order.quantity));
            assert!(generator.catalog().users().contains(&order.user));
            assert!(generator.catalog().items().contains(&order.item));
            assert!(ids.insert(order.order_id));
        }
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let mut generator = seeded();
        let first = generator.next_order();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = generator.next_order();

        let first = Uuid::parse_str(&first.order_id).unwrap();
        let second = Uuid::parse_str(&second.order_id).unwrap();
        assert_eq!(first.get_version_num(), 7);
        assert!(first < second);
    }

    #[test]
    fn test_seeded_generators_agree_on_choices() {
        let mut a = seeded();
        let mut b = seeded();
        for _ in 0..20 {
            let (x, y) = (a.next_order(), b.next_order());
            assert_eq!((x.user, x.item, x.quantity), (y.user, y.item, y.quantity));
        }
    }

    #[test]
    fn test_single_entry_catalog() {
        let catalog = Catalog::new(vec!["alice".to_string()], vec!["ramen bowl".to_string()])
            .unwrap();
        let mut generator = OrderGenerator::new(catalog, StdRng::seed_from_u64(1));
        let order = generator.next_order();
        assert_eq!(order.user, "alice");
        assert_eq!(order.item, "ramen bowl");
    }

    #[test]
    fn test_catalog_rejects_empty_lists() {
        assert_eq!(
            Catalog::new(vec![], vec!["pad thai".to_string()]),
            Err(CatalogError::NoUsers)
        );
        assert_eq!(
            Catalog::new(vec!["bob".to_string()], vec![]),
            Err(CatalogError::NoItems)
        );
    }

    #[test]
    fn test_wire_round_trip() {
        let order = Order {
            order_id: "X".to_string(),
            user: "alice".to_string(),
            item: "ramen bowl".to_string(),
            quantity: 3,
        };
        let payload = order.encode().unwrap();
        assert_eq!(Order::decode(&payload).unwrap(), order);
    }

    #[test]
    fn test_wire_field_names() {
        let payload = br#"{"order_id":"X","user":"alice","item":"ramen bowl","quantity":3}"#;
        let order = Order::decode(payload).unwrap();
        assert_eq!(order.order_id, "X");
        assert_eq!(order.quantity, 3);

        let value: serde_json::Value = serde_json::from_slice(&order.encode().unwrap()).unwrap();
        let mut keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        keys.sort_unstable();
        assert_eq!(keys, ["item", "order_id", "quantity", "user"]);
    }

    #[test]
    fn test_display() {
        let order = Order {
            order_id: "X".to_string(),
            user: "alice".to_string(),
            item: "ramen bowl".to_string(),
            quantity: 3,
        };
        assert_eq!(order.to_string(), "order X: ramen bowl (qty: 3) for alice");
    }
}
