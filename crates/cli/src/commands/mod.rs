mod delete;
mod query;
mod sessions;
mod transfer;
mod worker;

use std::time::Duration;

use sqlw::{LaunchMode, Sessions, SessionsConfig};

use crate::cli::{Cli, Commands};
use crate::error::Result;
use crate::output::OutputFormat;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let format = cli.format;

	// the worker talks frames on stdout and must not build a controller of its own
	if let Commands::Worker {
		ref session,
		ref root,
	} = cli.command
	{
		return worker::execute(session, root.clone()).await;
	}

	let config = build_config(&cli)?;
	tracing::debug!(?config, "Controller configuration");

	let sessions = Sessions::new(config.clone());
	let result = dispatch_command(cli.command, &sessions, &config, format).await;
	sessions.shutdown();
	result
}

async fn dispatch_command(
	command: Commands,
	sessions: &Sessions,
	config: &SessionsConfig,
	format: OutputFormat,
) -> Result<()> {
	match command {
		Commands::Query { session, sql } => query::execute(sessions, &session, &sql, format).await,
		Commands::Statement {
			session,
			sql,
			params,
		} => query::execute_statement(sessions, &session, &sql, &params, format).await,
		Commands::Import { file, name } => {
			transfer::import(sessions, &file, name.as_deref(), format).await
		}
		Commands::Export { session, output } => {
			transfer::export(sessions, config, &session, output, format).await
		}
		Commands::Delete { session } => delete::execute(sessions, config, &session, format).await,
		Commands::Sessions => sessions::execute(config, format),
		Commands::Worker { .. } => unreachable!("handled in dispatch"),
	}
}

/// Translates global flags into controller settings.
pub fn build_config(cli: &Cli) -> Result<SessionsConfig> {
	let call_timeout = match cli.timeout_ms {
		0 => None,
		ms => Some(Duration::from_millis(ms)),
	};

	let mut config = SessionsConfig::default().with_call_timeout(call_timeout);

	config = if cli.transient {
		config.transient()
	} else {
		config.with_storage_root(&cli.storage_dir)
	};

	if cli.process {
		config = config.with_launch_mode(LaunchMode::current_exe()?);
	}

	Ok(config)
}

#[cfg(test)]
mod tests {
	use clap::Parser;

	use super::*;

	#[test]
	fn test_build_config_from_flags() {
		let cli = Cli::try_parse_from([
			"sqlw",
			"--storage-dir",
			"/tmp/sqlw-test",
			"--timeout-ms",
			"0",
			"sessions",
		])
		.unwrap();
		let config = build_config(&cli).unwrap();
		assert_eq!(
			config.storage_root.as_deref(),
			Some(std::path::Path::new("/tmp/sqlw-test"))
		);
		assert_eq!(config.call_timeout, None);
		assert_eq!(config.launch_mode, LaunchMode::Thread);
	}

	#[test]
	fn test_transient_flag_drops_storage_root() {
		let cli = Cli::try_parse_from(["sqlw", "--transient", "--timeout-ms", "500", "sessions"])
			.unwrap();
		let config = build_config(&cli).unwrap();
		assert!(config.storage_root.is_none());
		assert_eq!(config.call_timeout, Some(Duration::from_millis(500)));
	}

	#[test]
	fn test_process_flag_launches_current_exe() {
		let cli = Cli::try_parse_from(["sqlw", "--process", "sessions"]).unwrap();
		let config = build_config(&cli).unwrap();
		assert!(matches!(config.launch_mode, LaunchMode::Process { .. }));
	}
}
