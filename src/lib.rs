//! salttun - userspace UDP VPN tunnel
//!
//! Relays packets between a TUN/TAP device and a UDP socket, passing each
//! one through a pluggable protocol.
//!
//! # Features
//!
//! - Salty protocol: rotating ephemeral keys with forward secrecy, replay
//!   protection and loss-tolerant key confirmation
//! - Legacy `raw`, `nacl0` and `nacltai` protocols
//! - Floating remote endpoint that follows the peer's source address
//! - Layered configuration from `-c` pairs, a `KEY=VALUE` file and the
//!   environment
//!
//! # Usage
//!
//! ```no_run
//! use salttun::config::MapSource;
//! use salttun::protocol::{Context, ProtocolKind};
//!
//! # fn main() -> salttun::Result<()> {
//! let source = MapSource::new()
//!     .with("PROTOCOL", "salty")
//!     .with("PUBLIC_KEY", "22".repeat(32))
//!     .with("PRIVATE_KEY", "11".repeat(32));
//!
//! let mut ctx = Context::new();
//! let protocol = ProtocolKind::select(&source)?.build(&source, &mut ctx)?;
//! assert_eq!(protocol.name(), "salty");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod tunnel;

pub use error::{Result, SaltTunError};
pub use protocol::{Context, Outcome, Protocol, ProtocolKind};
pub use session::Session;
