mod client;
mod conn;
mod pollster;
mod reply_listener;
mod server;

pub use client::{ClientStatus, ResilientClient, ACK_TIMEOUT, HANDSHAKE_RETRY_INTERVAL, MAX_IDLE_TIME};
pub use conn::Conn;
pub use pollster::Pollster;
pub use reply_listener::ReplyListener;
pub use server::{Handler, ResilientServer};
