//! Structured output envelope for all CLI commands.
//!
//! Every command produces a result envelope on stdout:
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "ok": true,
//!   "command": "query",
//!   "data": { ... },
//!   "timings": { "durationMs": 12 }
//! }
//! ```
//!
//! On failure:
//!
//! ```json
//! {
//!   "ok": false,
//!   "command": "query",
//!   "error": {
//!     "code": "CONSTRAINT_VIOLATION",
//!     "message": "EngineConstraintViolation: UNIQUE constraint failed: t.id"
//!   }
//! }
//! ```


use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sqlw::{Backend, Record, SqlValue};

/// Current schema version for command output.
///
/// Increment this when making breaking changes to the output structure.
pub const SCHEMA_VERSION: u32 = 1;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// TOON output (default, token-efficient for LLMs)
	#[default]
	Toon,
	/// JSON output
	Json,
	/// Newline-delimited JSON (streaming)
	Ndjson,
	/// Human-readable text
	Text,
}

impl std::fmt::Display for OutputFormat {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			OutputFormat::Toon => write!(f, "toon"),
			OutputFormat::Json => write!(f, "json"),
			OutputFormat::Ndjson => write!(f, "ndjson"),
			OutputFormat::Text => write!(f, "text"),
		}
	}
}

/// The result envelope returned by all commands.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub schema_version: Option<u32>,

	pub ok: bool,

	/// Command name (e.g., "query", "import")
	pub command: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub inputs: Option<CommandInputs>,

	/// Command-specific result data (only present on success)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,

	/// Error information (only present on failure)
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub timings: Option<Timings>,
}

/// Inputs that were used for the command (for traceability)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CommandInputs {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub session: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub sql: Option<String>,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub path: Option<PathBuf>,

	#[serde(flatten, skip_serializing_if = "Option::is_none")]
	pub extra: Option<serde_json::Value>,
}

/// Error information for failed commands
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
	pub code: ErrorCode,

	pub message: String,

	#[serde(skip_serializing_if = "Option::is_none")]
	pub details: Option<serde_json::Value>,
}

/// Standardized error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	/// Session name is already taken
	AlreadyExists,
	/// No session with that name
	NoSession,
	/// Session name cannot be used as a file name
	InvalidName,
	/// Uploaded file is not `.sqlite` or `.sqlite3`
	UnsupportedExtension,
	/// Upload needs durable storage
	StorageUnsupported,
	/// Uploaded image is empty or not a database
	ImportError,
	/// A constraint failed
	ConstraintViolation,
	/// Engine ran out of memory during export
	OutOfMemory,
	/// No database is open in the session
	NoDatabase,
	/// Any other engine failure
	EngineError,
	/// Session is closing or gone
	SessionUnavailable,
	/// Transport or protocol failure between controller and context
	ChannelError,
	/// Operation timed out
	Timeout,
	/// Call was cancelled
	Cancelled,
	/// Execution context failed to start
	LaunchFailed,
	/// Invalid input provided
	InvalidInput,
	/// File I/O error
	IoError,
	/// Unknown/internal error
	InternalError,
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let code = match self {
			ErrorCode::AlreadyExists => "ALREADY_EXISTS",
			ErrorCode::NoSession => "NO_SESSION",
			ErrorCode::InvalidName => "INVALID_NAME",
			ErrorCode::UnsupportedExtension => "UNSUPPORTED_EXTENSION",
			ErrorCode::StorageUnsupported => "STORAGE_UNSUPPORTED",
			ErrorCode::ImportError => "IMPORT_ERROR",
			ErrorCode::ConstraintViolation => "CONSTRAINT_VIOLATION",
			ErrorCode::OutOfMemory => "OUT_OF_MEMORY",
			ErrorCode::NoDatabase => "NO_DATABASE",
			ErrorCode::EngineError => "ENGINE_ERROR",
			ErrorCode::SessionUnavailable => "SESSION_UNAVAILABLE",
			ErrorCode::ChannelError => "CHANNEL_ERROR",
			ErrorCode::Timeout => "TIMEOUT",
			ErrorCode::Cancelled => "CANCELLED",
			ErrorCode::LaunchFailed => "LAUNCH_FAILED",
			ErrorCode::InvalidInput => "INVALID_INPUT",
			ErrorCode::IoError => "IO_ERROR",
			ErrorCode::InternalError => "INTERNAL_ERROR",
		};
		f.write_str(code)
	}
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timings {
	pub duration_ms: u64,
}

impl From<Duration> for Timings {
	fn from(duration: Duration) -> Self {
		Timings {
			duration_ms: duration.as_millis() as u64,
		}
	}
}

/// Data for `query`: value-only rows.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryData {
	pub session: String,
	pub backend: Backend,
	pub row_count: usize,
	pub rows: Vec<Vec<SqlValue>>,
}

/// Data for `statement`: column-tagged records.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementData {
	pub session: String,
	pub backend: Backend,
	pub row_count: usize,
	pub records: Vec<Record>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
	pub session: String,
	pub size_bytes: u64,
	pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
	pub session: String,
	pub path: PathBuf,
	pub mime_type: String,
	pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteData {
	pub session: String,
	pub existed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsData {
	pub storage_dir: Option<PathBuf>,
	pub sessions: Vec<String>,
}

/// Builder for constructing command results
pub struct ResultBuilder<T: Serialize> {
	schema_version: Option<u32>,
	command: String,
	inputs: Option<CommandInputs>,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Option<Instant>,
}

impl<T: Serialize> ResultBuilder<T> {
	/// Create a new result builder for the given command.
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			schema_version: Some(SCHEMA_VERSION),
			command: command.into(),
			inputs: None,
			data: None,
			error: None,
			start_time: Some(Instant::now()),
		}
	}

	pub fn inputs(mut self, inputs: CommandInputs) -> Self {
		self.inputs = Some(inputs);
		self
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
			details: None,
		});
		self
	}

	pub fn error_with(mut self, error: CommandError) -> Self {
		self.error = Some(error);
		self
	}

	pub fn build(self) -> CommandResult<T> {
		let ok = self.error.is_none() && self.data.is_some();
		let timings = self.start_time.map(|start| Timings::from(start.elapsed()));

		CommandResult {
			schema_version: self.schema_version,
			ok,
			command: self.command,
			inputs: self.inputs,
			data: self.data,
			error: self.error,
			timings,
		}
	}
}

/// Print a command result to stdout in the specified format
pub fn print_result<T: Serialize>(result: &CommandResult<T>, format: OutputFormat) {
	match format {
		OutputFormat::Toon => {
			if let Ok(json_value) = serde_json::to_value(result) {
				println!("{}", toon::encode(&json_value, None));
			}
		}
		OutputFormat::Json => {
			if let Ok(json) = serde_json::to_string_pretty(result) {
				println!("{json}");
			}
		}
		OutputFormat::Ndjson => {
			if let Ok(json) = serde_json::to_string(result) {
				println!("{json}");
			}
		}
		OutputFormat::Text => {
			print_result_text(result);
		}
	}
}

fn print_result_text<T: Serialize>(result: &CommandResult<T>) {
	let mut stdout = io::stdout().lock();

	if result.ok {
		if let Some(ref data) = result.data {
			if let Ok(json) = serde_json::to_string_pretty(data) {
				let _ = writeln!(stdout, "{json}");
			}
		}
	} else if let Some(ref error) = result.error {
		let _ = writeln!(stdout, "Error [{}]: {}", error.code, error.message);
	}
}

/// Print an error to stderr for humans.
pub fn print_error_stderr(error: &CommandError) {
	let mut stderr = io::stderr().lock();
	let _ = writeln!(stderr, "error[{}]: {}", error.code, error.message);
	if let Some(ref details) = error.details {
		if let Ok(json) = serde_json::to_string(details) {
			let _ = writeln!(stderr, "  details: {json}");
		}
	}
}
