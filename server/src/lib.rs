//! Checkout settlement and promotion admission for the deals marketplace.

pub mod api;
pub mod approval;
pub mod config;
pub mod error;
pub mod identity;
pub mod processor;
pub mod promotion;
pub mod routing;
pub mod settlement;
pub mod state;
pub mod stock;
pub mod store;

#[cfg(test)]
mod test_support;

pub use api::router;
pub use state::{AppState, OnboardingUrls};
