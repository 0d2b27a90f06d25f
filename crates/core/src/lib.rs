//! sqlw: multiplexed SQLite sessions over isolated execution contexts
//!
//! Every named session runs its own SQLite engine in an isolated execution
//! context (a dedicated thread, or optionally a child process). The
//! controller never touches the engine: queries, statements, imports,
//! exports and teardown are commands sent over the session's channel and
//! answered asynchronously.
//!
//! # Example
//!
//! ```ignore
//! use sqlw::{Sessions, SessionsConfig};
//!
//! #[tokio::main]
//! async fn main() -> sqlw::Result<()> {
//!     let sessions = Sessions::new(SessionsConfig::default().with_storage_root("data"));
//!
//!     sessions.create_db("main").await?;
//!     sessions
//!         .execute_query("main", "CREATE TABLE t (id INTEGER, name TEXT)")
//!         .await?;
//!     sessions
//!         .execute_statement("main", "INSERT INTO t VALUES (?, ?)", vec![1.into(), "a".into()])
//!         .await?;
//!
//!     let records = sessions
//!         .execute_statement("main", "SELECT id, name FROM t", vec![])
//!         .await?;
//!     assert_eq!(records[0].get("name").and_then(|v| v.as_str()), Some("a"));
//!
//!     let snapshot = sessions.export("main").await?;
//!     sessions.upload_db("copy.sqlite3", snapshot).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Guarantees
//!
//! - At most one live session per name; a second create is rejected.
//! - Commands to one session run one at a time, in the order they were sent.
//! - Every call settles: with a reply, a typed error, a timeout, or a
//!   channel error if the context went away.

pub mod config;
pub mod publish;
pub mod sessions;

pub use config::{DEFAULT_BROADCAST_CAPACITY, SessionsConfig};
pub use publish::{BroadcastHub, DOWNLOAD_TOPIC, SnapshotMessage, SnapshotPublisher};
pub use sessions::{DEFAULT_SESSION, Sessions, parse_upload_name};

pub use sqlw_protocol::{
	Backend, Command, ErrorKind, Event, Record, Reply, SNAPSHOT_MIME_TYPE, Snapshot, SqlValue,
};
pub use sqlw_runtime::{
	CancellationToken, Created, DirectoryProbe, Error, Imported, LaunchMode, Result,
	SessionHandle, SessionState, StorageBackend, StorageProbe, TransientProbe,
};
