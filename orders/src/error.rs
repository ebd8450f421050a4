use crate::{OrderKind, OrderStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("invalid order status transition: {from} -> {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },

    #[error("order {id} is a {actual} order, expected {expected}")]
    WrongKind {
        id: String,
        expected: OrderKind,
        actual: OrderKind,
    },

    #[error("invalid order id: {0}")]
    InvalidOrderId(String),

    #[error("order amount must be positive")]
    ZeroAmount,
}
