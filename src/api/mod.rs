//! API Module
//!
//! HTTP handlers and routing for the cache server REST API.
//!
//! # Endpoints
//! - `PUT /set` - Store a key-value pair
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key
//! - `POST /clear` - Remove every entry
//! - `GET /size` - Current entry count
//! - `POST /snapshot` - Write a backup snapshot
//! - `GET /metrics` - Detailed engine metrics
//! - `GET /hot-shards` - Shards with anomalous load
//! - `GET /health` - Health check, including degraded status

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
