//! ptysync core: keeps a local terminal view in step with a remote pty
//!
//! Provides offset-tracked terminal sessions that reconcile full reloads
//! with pushed incremental output, a reconnecting websocket transport, and
//! packet framing for structured streams. Native hosts use the C FFI.

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod packet;
pub mod sync;
pub mod terminal;
pub mod transport;
