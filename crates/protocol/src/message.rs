//! Message envelopes exchanged over a session channel.
//!
//! # Message Flow
//!
//! 1. Controller sends a [`Request`] carrying a fresh `id` and a [`Command`]
//! 2. Context executes the command and answers with a [`Response`] echoing the `id`
//! 3. Context may also emit [`Event`]s at any time; they carry no `id`
//!
//! Exactly one of [`Response::result`] and [`Response::error`] is set.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{Backend, Command};
use crate::snapshot::Snapshot;
use crate::value::{Record, SqlValue};

/// Command envelope sent to a context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	/// Unique (per channel) request id, echoed by the response.
	pub id: u32,
	pub command: Command,
}

/// Successful outcome of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Reply {
	/// Database opened; `message` says which backend was chosen.
	Created { message: String, backend: Backend },
	/// Value-only rows of `executeQuery`, in step order.
	QueryResult { rows: Vec<Vec<SqlValue>> },
	/// Column-tagged records of `prepareStatement`, in step order.
	StatementResult { records: Vec<Record> },
	/// Snapshot imported and opened as the current database.
	Imported { message: String, size: u64 },
	/// Full image of the current database.
	SnapshotBlob {
		#[serde(rename = "bytes")]
		snapshot: Snapshot,
	},
	/// Database handle closed (or there was none).
	Closed,
	/// Context told to exit. Acknowledged by the controller itself, since
	/// contexts never answer `terminate`.
	Terminated,
}

impl Reply {
	/// Wire tag of this reply, for diagnostics.
	pub fn kind(&self) -> &'static str {
		match self {
			Reply::Created { .. } => "created",
			Reply::QueryResult { .. } => "queryResult",
			Reply::StatementResult { .. } => "statementResult",
			Reply::Imported { .. } => "imported",
			Reply::SnapshotBlob { .. } => "snapshotBlob",
			Reply::Closed => "closed",
			Reply::Terminated => "terminated",
		}
	}
}

/// Classification of a failure reported by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
	/// Durable storage was required but the context runs on the transient backend.
	StorageUnsupported,
	/// Uploaded image was empty or not a database.
	ImportError,
	/// A constraint (unique, foreign key, check, ...) failed.
	EngineConstraintViolation,
	/// The engine ran out of memory while exporting.
	OutOfMemoryOnExport,
	/// The command needs an open database and none is open.
	NoDatabase,
	/// Any other engine failure (syntax errors, bind mismatches, I/O).
	Engine,
	/// The request itself could not be understood.
	Protocol,
}

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKind::StorageUnsupported => "StorageUnsupported",
			ErrorKind::ImportError => "ImportError",
			ErrorKind::EngineConstraintViolation => "EngineConstraintViolation",
			ErrorKind::OutOfMemoryOnExport => "OutOfMemoryOnExport",
			ErrorKind::NoDatabase => "NoDatabase",
			ErrorKind::Engine => "Engine",
			ErrorKind::Protocol => "Protocol",
		}
	}
}

impl std::fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Typed failure of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	pub kind: ErrorKind,
	pub message: String,
}

impl ErrorPayload {
	pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}
}

/// Answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	/// Request id this response correlates to.
	pub id: u32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Reply>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
}

impl Response {
	pub fn ok(id: u32, reply: Reply) -> Self {
		Self {
			id,
			result: Some(reply),
			error: None,
		}
	}

	pub fn err(id: u32, error: ErrorPayload) -> Self {
		Self {
			id,
			result: None,
			error: Some(error),
		}
	}

	/// Folds the envelope back into a `Result`.
	pub fn into_result(self) -> Result<Reply, ErrorPayload> {
		match (self.result, self.error) {
			(_, Some(error)) => Err(error),
			(Some(reply), None) => Ok(reply),
			(None, None) => Err(ErrorPayload::new(
				ErrorKind::Protocol,
				"response carries neither result nor error",
			)),
		}
	}
}

/// Unsolicited notification from a context, routed by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Event {
	/// The context finished its work loop and is going away.
	Terminated { name: String },
}

/// Discriminated union of messages read by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Response message (has `id` field)
	Response(Response),
	/// Event message (has `event` field)
	Event(Event),
	/// Unknown message type (forward-compatible catch-all)
	Unknown(Value),
}
