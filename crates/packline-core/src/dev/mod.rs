//! Development session.
//!
//! - [`session`] - server state machine, publication slot, notification channel
//! - [`queue`] - coalescing rebuild queue
//! - [`driver`] - runs builds, publishes them and broadcasts changes
//! - [`hmr`] - classifies a rebuild into hot replacement or reload
//! - [`client`] - browser runtime for the notification channel
//!
//! HTTP serving and file watching live in the CLI; this module has no
//! network code.

pub mod client;
pub mod driver;
pub mod hmr;
pub mod queue;
pub mod session;

pub use driver::DevDriver;
pub use hmr::{classify, Notification};
pub use queue::RebuildQueue;
pub use session::{DevSession, Publication, Published, ServerState};
