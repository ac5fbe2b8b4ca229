//! HTTP request handlers

pub mod health;
pub mod inference;
pub mod metrics;
pub mod species;
