//! HTTP surface for a castrec recording server
//!
//! Serves a liveness probe and read-only access to the recordings
//! directory the signaling server writes into.
//!
//! - `GET /ping` - liveness probe, answers `PONG`
//! - `GET /recordings` - JSON array of recording file names
//! - `GET /recordings/:filename` - raw recording bytes
//!
//! # Usage
//!
//! ```ignore
//! use castrec_http::HttpServer;
//!
//! let server = HttpServer::new("0.0.0.0:9000".to_string(), "./recordings");
//! server.serve_with_shutdown(async { /* wait for ctrl-c */ }).await?;
//! ```

pub mod error;
pub mod server;

pub use error::{Error, Result};
pub use server::HttpServer;
