//! Common library for the Joy Kunga workspace
//!
//! This crate provides the MongoDB connectivity and error handling shared by
//! the session store and anything else that talks to the same deployment.

pub mod database;
pub mod error;

/// Example usage of the database module
///
/// ```rust,no_run
/// use common::database::{DatabaseConfig, health_check, init_client};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = DatabaseConfig::from_env()?;
///     let client = init_client(&config).await?;
///     let is_healthy = health_check(&client).await?;
///     println!("Database health check: {}", is_healthy);
///     Ok(())
/// }
/// ```
pub fn example_usage() {}
