//! WebSocket signaling transport

pub mod handler;
pub mod server;

pub use handler::handle_connection;
pub use server::{WebSocketServerHandle, WebSocketSignalingServer};
