//! Infrastructure adapters: Postgres repositories, HTTP middleware, telemetry.

pub mod db;
pub mod error;
pub mod http;
pub mod telemetry;

pub use error::InfraError;
