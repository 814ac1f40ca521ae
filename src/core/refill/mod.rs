//! Refill flow: container tare, product fill and pricing.

pub mod driver;
pub mod machine;
pub mod session;
pub mod stability;

pub use driver::RefillHandle;
pub use machine::{
    RefillError, RefillEvent, RefillMachine, RefillSnapshot, RefillStep, ResetCause,
};
pub use session::{Checkout, Product, RefillSession, total_price};
pub use stability::{StabilityFilter, StabilityWindow};
