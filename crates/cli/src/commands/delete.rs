use sqlw::{Sessions, SessionsConfig};

use crate::error::Result;
use crate::output::{CommandInputs, DeleteData, OutputFormat, ResultBuilder, print_result};

pub async fn execute(
	sessions: &Sessions,
	config: &SessionsConfig,
	session: &str,
	format: OutputFormat,
) -> Result<()> {
	let builder = ResultBuilder::new("delete");
	let existed = config
		.store()
		.is_some_and(|store| store.lookup(session).is_some());

	sessions.delete_and_destroy(session).await?;

	let result = builder
		.inputs(CommandInputs {
			session: Some(session.to_string()),
			..Default::default()
		})
		.data(DeleteData {
			session: session.to_string(),
			existed,
		})
		.build();
	print_result(&result, format);
	Ok(())
}
