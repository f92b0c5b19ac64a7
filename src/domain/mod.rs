//! Entities, value objects and ports of the payment-to-enrollment engine.
//!
//! Everything in here is synchronous and free of I/O except the port traits,
//! which the infrastructure layer implements.

pub mod commission;
pub mod course;
pub mod earnings;
pub mod enrollment;
pub mod events;
pub mod installment;
pub mod money;
pub mod payment;
pub mod ports;
