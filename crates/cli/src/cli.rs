use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sqlw::DEFAULT_SESSION;

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "sqlw")]
#[command(about = "Named SQLite sessions, each in its own execution context")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format: toon (default), json, ndjson, or text
	#[arg(short = 'f', long, global = true, value_enum, default_value = "toon")]
	pub format: OutputFormat,

	/// Directory holding durable databases
	#[arg(
		long,
		global = true,
		value_name = "DIR",
		env = "SQLW_STORAGE_DIR",
		default_value = ".sqlw"
	)]
	pub storage_dir: PathBuf,

	/// Keep databases in memory only
	#[arg(long, global = true, env = "SQLW_TRANSIENT")]
	pub transient: bool,

	/// Upper bound for each call to a session, in milliseconds (0 waits forever)
	#[arg(
		long,
		global = true,
		value_name = "MS",
		env = "SQLW_TIMEOUT_MS",
		default_value_t = 30_000
	)]
	pub timeout_ms: u64,

	/// Run each session in a child process instead of a thread
	#[arg(long, global = true)]
	pub process: bool,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run SQL and print value-only rows
	#[command(alias = "q")]
	Query {
		#[arg(short, long, default_value = DEFAULT_SESSION)]
		session: String,

		/// One or more `;`-separated statements
		sql: String,
	},

	/// Prepare one statement, bind parameters and print column-tagged records
	#[command(alias = "stmt")]
	Statement {
		#[arg(short, long, default_value = DEFAULT_SESSION)]
		session: String,

		sql: String,

		/// Positional parameter as JSON (`1`, `"a"`, `null`); anything else binds as text
		#[arg(short, long = "param", value_name = "VALUE", action = clap::ArgAction::Append)]
		params: Vec<String>,
	},

	/// Import a `.sqlite` or `.sqlite3` file as the session named after it
	Import {
		file: PathBuf,

		/// Session to import into instead of the file's base name
		#[arg(long = "as", value_name = "NAME")]
		name: Option<String>,
	},

	/// Export a session's database image to a file
	Export {
		#[arg(short, long, default_value = DEFAULT_SESSION)]
		session: String,

		/// Output path (defaults to `<session>.sqlite3` in the current directory)
		output: Option<PathBuf>,
	},

	/// Delete a session's persisted database
	#[command(alias = "rm")]
	Delete {
		#[arg(short, long, default_value = DEFAULT_SESSION)]
		session: String,
	},

	/// List persisted databases
	#[command(alias = "ls")]
	Sessions,

	/// Serve one session over stdin/stdout
	#[command(hide = true)]
	Worker {
		#[arg(long)]
		session: String,

		#[arg(long, value_name = "DIR")]
		root: Option<PathBuf>,
	},
}

impl Commands {
	pub fn name(&self) -> &'static str {
		match self {
			Commands::Query { .. } => "query",
			Commands::Statement { .. } => "statement",
			Commands::Import { .. } => "import",
			Commands::Export { .. } => "export",
			Commands::Delete { .. } => "delete",
			Commands::Sessions => "sessions",
			Commands::Worker { .. } => "worker",
		}
	}
}

#[cfg(test)]
mod tests {
	use clap::CommandFactory;

	use super::*;

	#[test]
	fn test_cli_definition_is_valid() {
		Cli::command().debug_assert();
	}

	#[test]
	fn test_query_defaults() {
		let cli = Cli::try_parse_from(["sqlw", "query", "SELECT 1"]).unwrap();
		assert_eq!(cli.format, OutputFormat::Toon);
		assert!(!cli.process);
		match cli.command {
			Commands::Query { session, sql } => {
				assert_eq!(session, DEFAULT_SESSION);
				assert_eq!(sql, "SELECT 1");
			}
			other => panic!("unexpected command: {other:?}"),
		}
	}

	#[test]
	fn test_statement_params_accumulate() {
		let cli = Cli::try_parse_from([
			"sqlw", "-f", "json", "statement", "-s", "main", "SELECT ?, ?", "-p", "1", "--param",
			"x",
		])
		.unwrap();
		assert_eq!(cli.format, OutputFormat::Json);
		match cli.command {
			Commands::Statement {
				session, params, ..
			} => {
				assert_eq!(session, "main");
				assert_eq!(params, vec!["1", "x"]);
			}
			other => panic!("unexpected command: {other:?}"),
		}
	}

	#[test]
	fn test_worker_arguments() {
		let cli =
			Cli::try_parse_from(["sqlw", "worker", "--session", "w", "--root", "/tmp/db"]).unwrap();
		assert_eq!(cli.command.name(), "worker");
		match cli.command {
			Commands::Worker { session, root } => {
				assert_eq!(session, "w");
				assert_eq!(root, Some(PathBuf::from("/tmp/db")));
			}
			other => panic!("unexpected command: {other:?}"),
		}
	}
}
