use sqlw::SessionsConfig;

use crate::error::Result;
use crate::output::{OutputFormat, ResultBuilder, SessionsData, print_result};

pub fn execute(config: &SessionsConfig, format: OutputFormat) -> Result<()> {
	let builder = ResultBuilder::new("sessions");
	let sessions = match config.store() {
		Some(store) => store.list()?,
		None => Vec::new(),
	};

	let result = builder
		.data(SessionsData {
			storage_dir: config.storage_root.clone(),
			sessions,
		})
		.build();
	print_result(&result, format);
	Ok(())
}
