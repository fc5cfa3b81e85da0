//! Data Transfer Objects (DTOs) for API requests and responses

pub mod account;
pub mod availability;
pub mod billing;
pub mod common;
pub mod gift;
pub mod session;

pub use account::*;
pub use availability::*;
pub use billing::*;
pub use common::*;
pub use gift::*;
pub use session::*;
