use sqlw::{Created, Sessions, SqlValue};

use crate::error::Result;
use crate::output::{CommandInputs, OutputFormat, QueryData, ResultBuilder, StatementData, print_result};

pub async fn execute(sessions: &Sessions, session: &str, sql: &str, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("query");
	let Created { backend, .. } = sessions.create_db(session).await?;

	let rows = sessions.execute_query(session, sql).await?;
	tracing::info!(session = %session, rows = rows.len(), "Query finished");

	let result = builder
		.inputs(CommandInputs {
			session: Some(session.to_string()),
			sql: Some(sql.to_string()),
			..Default::default()
		})
		.data(QueryData {
			session: session.to_string(),
			backend,
			row_count: rows.len(),
			rows,
		})
		.build();
	print_result(&result, format);
	Ok(())
}

pub async fn execute_statement(
	sessions: &Sessions,
	session: &str,
	sql: &str,
	params: &[String],
	format: OutputFormat,
) -> Result<()> {
	let builder = ResultBuilder::new("statement");
	let values: Vec<SqlValue> = params.iter().map(|raw| parse_param(raw)).collect();
	let Created { backend, .. } = sessions.create_db(session).await?;

	let records = sessions
		.execute_statement(session, sql, values.clone())
		.await?;
	tracing::info!(session = %session, records = records.len(), "Statement finished");

	let result = builder
		.inputs(CommandInputs {
			session: Some(session.to_string()),
			sql: Some(sql.to_string()),
			extra: Some(serde_json::json!({ "params": values })),
			..Default::default()
		})
		.data(StatementData {
			session: session.to_string(),
			backend,
			row_count: records.len(),
			records,
		})
		.build();
	print_result(&result, format);
	Ok(())
}

/// Reads a parameter as a JSON value, binding it as text when it is not one.
pub fn parse_param(raw: &str) -> SqlValue {
	serde_json::from_str(raw).unwrap_or_else(|_| SqlValue::Text(raw.to_string()))
}
