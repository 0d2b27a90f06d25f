//! sqlw runtime - execution contexts, correlation, and the session registry
//!
//! This crate hosts everything between a caller and the SQLite engine:
//!
//! - **Transport**: whole JSON messages over in-process channels or
//!   length-prefixed stdio pipes
//! - **Connection**: request/response correlation by request id, events,
//!   timeouts and cancellation
//! - **Execution context**: the engine side of a session, answering every
//!   command in arrival order
//! - **Launcher**: running a context on its own thread or in a child process
//! - **Registry**: at most one live session per name
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Registry   │  name -> SessionHandle
//! └──────┬───────┘
//!        │
//! ┌──────▼───────┐        ┌──────────────────┐
//! │ SessionHandle│        │ ExecutionContext │  thread or process
//! │  Connection  │◄──────►│  rusqlite        │
//! └──────────────┘  Trans └──────────────────┘
//! ```

pub mod connection;
pub mod context;
pub mod error;
pub mod launcher;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transport;

pub use connection::Connection;
pub use context::ExecutionContext;
pub use error::{Error, Result};
pub use launcher::{LaunchMode, WORKER_SUBCOMMAND, Worker, serve_stdio};
pub use registry::Registry;
pub use session::{Created, Imported, SessionHandle, SessionState};
pub use storage::{
	DB_EXTENSION, DB_EXTENSION_ALIASES, DirectoryProbe, DurableStore, StorageBackend, StorageProbe,
	TransientProbe, validate_name,
};
pub use transport::{
	PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
	TransportReceiver, channel_pair,
};
pub use tokio_util::sync::CancellationToken;
