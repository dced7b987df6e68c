//! Headless browser control over the remote debugging protocol.
//!
//! - [`port`] reserves a free local debugging port behind a marker file.
//! - [`channel`] correlates protocol commands with their responses.
//! - [`session`] launches one renderer process, connects to it, and tears
//!   it down again.
//! - [`executable`] locates and probes the renderer binary.

pub mod channel;
pub mod error;
pub mod executable;
pub mod port;
pub mod session;

pub use channel::CommandChannel;
pub use error::BrowserError;
pub use port::{PortAllocator, PortReservation};
pub use session::{BrowserSession, LaunchOptions};
