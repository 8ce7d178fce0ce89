//! IPC Server (C8): length-framed JSON request/response over a Unix socket
//! (POSIX) or a localhost TCP port (Windows).

pub mod frame;
pub mod pool;
mod server;

pub use pool::{Connection, SubscriptionPool};
pub use server::serve;
