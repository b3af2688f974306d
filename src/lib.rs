// Library crate exposing modules for integration tests

pub mod blob;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod protocol;
pub mod repository;
pub mod schedule;
pub mod util;
pub mod worker;
