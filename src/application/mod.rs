//! Application services layer scaffolding.

pub mod repos;
