//! Test utilities shared by unit tests.

use crate::order::Order;
use crate::producer::PublishRequest;

/// A fixed order with the given id.
pub fn make_order(order_id: &str) -> Order {
    Order {
        order_id: order_id.to_string(),
        user: "alice".to_string(),
        item: "ramen bowl".to_string(),
        quantity: 3,
    }
}

/// An encoded publish request for `make_order(order_id)`.
pub fn make_request(topic: &str, order_id: &str) -> PublishRequest<Order> {
    let order = make_order(order_id);
    PublishRequest {
        topic: topic.to_string(),
        key: None,
        payload: order.encode().expect("order encodes"),
        metadata: order,
    }
}
