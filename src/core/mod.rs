//! Dispatch core: routing, cost accounting, and budget enforcement

pub mod budget;
pub mod cost;
pub mod errors;
pub mod interfaces;
pub mod pricing;
pub mod router;
pub mod usage;
