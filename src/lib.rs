// Core infrastructure modules
pub mod config;
pub mod core;

// Application modules
pub mod account;
pub mod models;
pub mod schema;
pub mod services;

// Shared fixtures for unit and integration tests
pub mod test_utils;
