//! Database module for handling MongoDB connections
//!
//! This module provides client configuration, bootstrap and health checks
//! for the MongoDB deployment that backs the session store.

use crate::error::{DatabaseError, DatabaseResult};
use mongodb::{
    Client, Collection,
    bson::{Document, doc},
    options::ClientOptions,
};
use std::{env, time::Duration};
use tracing::{error, info};

/// Database configuration struct
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// MongoDB connection URI
    pub uri: String,
    /// Name of the database holding the session collection
    pub database: String,
    /// Name of the session collection
    pub collection: String,
    /// Connection and server selection timeout in seconds
    pub connect_timeout: u64,
}

impl DatabaseConfig {
    /// Create a new DatabaseConfig from environment variables
    ///
    /// # Environment Variables
    /// - `MONGODB_URI`: MongoDB connection URI (default: "mongodb://localhost:27017")
    /// - `MONGODB_DATABASE`: Database name (default: "joy_kunga")
    /// - `MONGODB_SESSION_COLLECTION`: Session collection name (default: "sessions")
    /// - `MONGODB_CONNECT_TIMEOUT`: Connection timeout in seconds (default: 30)
    pub fn from_env() -> DatabaseResult<Self> {
        let uri = env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let database = env::var("MONGODB_DATABASE").unwrap_or_else(|_| "joy_kunga".to_string());

        let collection =
            env::var("MONGODB_SESSION_COLLECTION").unwrap_or_else(|_| "sessions".to_string());

        let connect_timeout = env::var("MONGODB_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        if database.is_empty() || collection.is_empty() {
            return Err(DatabaseError::Configuration(
                "database and collection names must not be empty".to_string(),
            ));
        }

        Ok(Self {
            uri,
            database,
            collection,
            connect_timeout,
        })
    }
}

/// Initialize a MongoDB client
///
/// The driver connects lazily, so a successful return does not mean the
/// server is reachable. Use [`health_check`] for that.
pub async fn init_client(config: &DatabaseConfig) -> DatabaseResult<Client> {
    info!("Initializing MongoDB client");

    let mut options = ClientOptions::parse(&config.uri)
        .await
        .map_err(|e| DatabaseError::Configuration(format!("Invalid MongoDB URI: {}", e)))?;

    let timeout = Duration::from_secs(config.connect_timeout);
    options.connect_timeout = Some(timeout);
    options.server_selection_timeout = Some(timeout);

    let client = Client::with_options(options).map_err(DatabaseError::Connection)?;

    info!("MongoDB client initialized for database: {}", config.database);
    Ok(client)
}

/// Get the session collection described by the configuration
pub fn session_collection(client: &Client, config: &DatabaseConfig) -> Collection<Document> {
    client
        .database(&config.database)
        .collection::<Document>(&config.collection)
}

/// Check database connectivity
///
/// # Returns
/// * `DatabaseResult<bool>` - True if the server answered the ping, false otherwise
pub async fn health_check(client: &Client) -> DatabaseResult<bool> {
    match client.database("admin").run_command(doc! { "ping": 1 }).await {
        Ok(_) => {
            info!("Database health check successful");
            Ok(true)
        }
        Err(e) => {
            error!("Database health check failed: {}", e);
            Ok(false)
        }
    }
}
