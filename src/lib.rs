// Public API for integration tests and potential library usage

pub mod admission;
pub mod codes;
pub mod error;
pub mod http;
pub mod identity;
pub mod service;
pub mod store;
pub mod tally;
pub mod types;
