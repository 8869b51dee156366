//! WebSocket adapter over the connection pool

mod handler;
mod message;

pub use handler::{ws_handler, WsQuery, USER_ID_HEADER};
pub use message::{ClientMessage, ServerMessage};
