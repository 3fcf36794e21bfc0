// Library for the binary and integration tests

pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod monitor;
pub mod platform;
pub mod pool;
pub mod render;
pub mod transport;
