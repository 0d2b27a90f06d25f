//! Commands sent from the controller to an execution context.

use serde::{Deserialize, Serialize};

use crate::snapshot::Snapshot;
use crate::value::SqlValue;

/// A request for work inside an execution context.
///
/// Serialized with an `action` tag matching the command names of the
/// protocol (`createDB`, `executeQuery`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Command {
	/// Open (or create) the database named after the session.
	#[serde(rename = "createDB")]
	CreateDb { name: String },
	/// Run one or more statements without parameters, returning value-only rows.
	ExecuteQuery { sql: String },
	/// Prepare a single statement, bind `values` positionally and return
	/// column-tagged records.
	PrepareStatement {
		sql: String,
		#[serde(default)]
		values: Vec<SqlValue>,
	},
	/// Import a full database image into durable storage under `name` and
	/// switch the context to it.
	#[serde(rename = "uploadDB")]
	UploadDb {
		name: String,
		#[serde(rename = "bytes")]
		snapshot: Snapshot,
	},
	/// Export the open database as a full image.
	#[serde(rename = "downloadDB")]
	DownloadDb,
	/// Close the open database handle, if any.
	#[serde(rename = "closeDB")]
	CloseDb,
	/// Tear the context down. Never answered.
	Terminate,
}

impl Command {
	/// Wire name of this command.
	pub fn action(&self) -> &'static str {
		match self {
			Command::CreateDb { .. } => "createDB",
			Command::ExecuteQuery { .. } => "executeQuery",
			Command::PrepareStatement { .. } => "prepareStatement",
			Command::UploadDb { .. } => "uploadDB",
			Command::DownloadDb => "downloadDB",
			Command::CloseDb => "closeDB",
			Command::Terminate => "terminate",
		}
	}

	/// Whether the context answers this command.
	pub fn expects_reply(&self) -> bool {
		!matches!(self, Command::Terminate)
	}
}

/// Storage backend chosen for a context when it was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
	/// Database files persist under a storage root.
	Durable,
	/// In-memory database, gone when the context stops.
	Transient,
}

impl Backend {
	pub fn is_durable(self) -> bool {
		matches!(self, Backend::Durable)
	}
}
