//! Admin protocol subsystem.
//!
//! # Data Flow
//! ```text
//! caller ──request(Command)──▶ AdminClient ──mpsc──▶ connection task ──▶ TCP socket
//!                                   ▲                       │
//!                                   └──────oneshot◀─────────┘ codec.rs (frame + body parse)
//! ```
//!
//! # Design Decisions
//! - One client per daemon, owning its socket exclusively
//! - Request-then-response only; the daemon has no correlation ids
//! - Lenient body parsing: undecodable bodies surface as text, not errors

pub mod client;
pub mod codec;
pub mod command;
pub mod error;

use std::future::Future;

pub use client::{AdminClient, AdminClientConfig, ConnectionState, SecretSource};
pub use codec::{Response, ResponseBody};
pub use command::Command;
pub use error::{AdminError, AdminResult};

/// Anything that executes admin commands one at a time.
pub trait AdminChannel: Send + Sync {
    fn request(&self, command: Command) -> impl Future<Output = AdminResult<Response>> + Send;
}

impl AdminChannel for AdminClient {
    async fn request(&self, command: Command) -> AdminResult<Response> {
        AdminClient::request(self, command).await
    }
}
