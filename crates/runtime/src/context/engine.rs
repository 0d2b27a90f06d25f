//! Thin wrapper over one rusqlite connection.
//!
//! Every method returns an [`ErrorPayload`] on failure so the context can put
//! it on the wire unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::fallible_iterator::FallibleIterator;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Batch, Connection, ErrorCode, params_from_iter};
use sqlw_protocol::{ErrorKind, ErrorPayload, Record, Snapshot, SqlValue};

/// Name of the scratch file `VACUUM INTO` writes an export to.
const EXPORT_FILE: &str = "export.sqlite3";

pub(crate) type EngineResult<T> = std::result::Result<T, ErrorPayload>;

/// One open database handle.
pub(crate) struct Database {
	conn: Connection,
	path: Option<PathBuf>,
}

impl Database {
	pub(crate) fn open_durable(path: &Path) -> EngineResult<Self> {
		let conn = Connection::open(path).map_err(classify)?;
		Ok(Self {
			conn,
			path: Some(path.to_path_buf()),
		})
	}

	pub(crate) fn open_transient() -> EngineResult<Self> {
		let conn = Connection::open_in_memory().map_err(classify)?;
		Ok(Self { conn, path: None })
	}

	/// Backing file, `None` for an in-memory database.
	pub(crate) fn path(&self) -> Option<&Path> {
		self.path.as_deref()
	}

	/// Runs every statement in `sql` and collects the rows they produce,
	/// values only.
	pub(crate) fn execute_query(&self, sql: &str) -> EngineResult<Vec<Vec<SqlValue>>> {
		let mut rows_out = Vec::new();
		let mut batch = Batch::new(&self.conn, sql);

		while let Some(mut stmt) = batch.next().map_err(classify)? {
			let width = stmt.column_count();
			let mut rows = stmt.query([]).map_err(classify)?;
			while let Some(row) = rows.next().map_err(classify)? {
				let mut values = Vec::with_capacity(width);
				for index in 0..width {
					values.push(from_value_ref(row.get_ref(index).map_err(classify)?));
				}
				rows_out.push(values);
			}
		}

		Ok(rows_out)
	}

	/// Prepares a single statement, binds `values` by position and steps it to
	/// completion, tagging every row with the statement's column names.
	pub(crate) fn prepare_statement(
		&self,
		sql: &str,
		values: &[SqlValue],
	) -> EngineResult<Vec<Record>> {
		let mut stmt = self.conn.prepare(sql).map_err(classify)?;
		let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

		let params = params_from_iter(values.iter().map(to_value));
		let mut rows = stmt.query(params).map_err(classify)?;

		let mut records = Vec::new();
		while let Some(row) = rows.next().map_err(classify)? {
			let mut values = Vec::with_capacity(columns.len());
			for index in 0..columns.len() {
				values.push(from_value_ref(row.get_ref(index).map_err(classify)?));
			}
			records.push(Record::zip(&columns, values));
		}

		Ok(records)
	}

	/// Writes a consistent copy of the database to a scratch file and reads
	/// it back.
	pub(crate) fn export(&self) -> EngineResult<Snapshot> {
		let scratch = tempfile::tempdir().map_err(|e| {
			ErrorPayload::new(ErrorKind::Engine, format!("Failed to create export directory: {e}"))
		})?;
		let target = scratch.path().join(EXPORT_FILE);
		let target_str = target.to_string_lossy().into_owned();

		self.conn
			.execute("VACUUM INTO ?1", [&target_str])
			.map_err(classify_export)?;

		let bytes = fs::read(&target).map_err(|e| match e.kind() {
			std::io::ErrorKind::OutOfMemory => {
				ErrorPayload::new(ErrorKind::OutOfMemoryOnExport, e.to_string())
			}
			_ => ErrorPayload::new(ErrorKind::Engine, format!("Failed to read export: {e}")),
		})?;

		Ok(Snapshot::new(bytes))
	}

	/// Checks that the file is a readable database.
	pub(crate) fn verify(&self) -> EngineResult<()> {
		self.conn
			.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
			.map(drop)
			.map_err(classify)
	}

	pub(crate) fn close(self) {
		if let Err((_, e)) = self.conn.close() {
			tracing::warn!("Database did not close cleanly: {}", e);
		}
	}
}

fn to_value(value: &SqlValue) -> Value {
	match value {
		SqlValue::Null => Value::Null,
		SqlValue::Integer(i) => Value::Integer(*i),
		SqlValue::Real(f) => Value::Real(*f),
		SqlValue::Text(s) => Value::Text(s.clone()),
		SqlValue::Blob(b) => Value::Blob(b.clone()),
	}
}

fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
	match value {
		ValueRef::Null => SqlValue::Null,
		ValueRef::Integer(i) => SqlValue::Integer(i),
		ValueRef::Real(f) => SqlValue::Real(f),
		ValueRef::Text(s) => SqlValue::Text(String::from_utf8_lossy(s).into_owned()),
		ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
	}
}

/// Maps an engine error onto the wire taxonomy.
pub(crate) fn classify(error: rusqlite::Error) -> ErrorPayload {
	let kind = match error.sqlite_error_code() {
		Some(ErrorCode::ConstraintViolation) => ErrorKind::EngineConstraintViolation,
		Some(ErrorCode::CannotOpen) => ErrorKind::NoDatabase,
		_ => ErrorKind::Engine,
	};
	ErrorPayload::new(kind, error.to_string())
}

fn classify_export(error: rusqlite::Error) -> ErrorPayload {
	match error.sqlite_error_code() {
		Some(ErrorCode::OutOfMemory) => {
			ErrorPayload::new(ErrorKind::OutOfMemoryOnExport, error.to_string())
		}
		_ => classify(error),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn seeded() -> Database {
		let db = Database::open_transient().unwrap();
		db.execute_query(
			"CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL, data BLOB);
			 INSERT INTO t VALUES (1, 'a', 1.5, x'0102');
			 INSERT INTO t VALUES (2, 'b', NULL, NULL);",
		)
		.unwrap();
		db
	}

	#[test]
	fn test_execute_query_returns_values_only() {
		let db = seeded();
		let rows = db.execute_query("SELECT id, name FROM t ORDER BY id").unwrap();
		assert_eq!(
			rows,
			vec![
				vec![SqlValue::Integer(1), SqlValue::Text("a".into())],
				vec![SqlValue::Integer(2), SqlValue::Text("b".into())],
			]
		);
	}

	#[test]
	fn test_execute_query_maps_every_storage_class() {
		let db = seeded();
		let rows = db
			.execute_query("SELECT id, name, score, data FROM t WHERE id = 1")
			.unwrap();
		assert_eq!(
			rows,
			vec![vec![
				SqlValue::Integer(1),
				SqlValue::Text("a".into()),
				SqlValue::Real(1.5),
				SqlValue::Blob(vec![1, 2]),
			]]
		);
	}

	#[test]
	fn test_execute_query_collects_rows_from_every_statement() {
		let db = seeded();
		let rows = db.execute_query("SELECT 1; SELECT 2;").unwrap();
		assert_eq!(rows, vec![vec![SqlValue::Integer(1)], vec![SqlValue::Integer(2)]]);
	}

	#[test]
	fn test_prepare_statement_zips_columns() {
		let db = seeded();
		let records = db
			.prepare_statement("SELECT id, name FROM t WHERE id >= ? ORDER BY id", &[SqlValue::Integer(1)])
			.unwrap();

		let json = serde_json::to_value(&records).unwrap();
		assert_eq!(
			json,
			serde_json::json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}])
		);
	}

	#[test]
	fn test_prepare_statement_binds_by_position() {
		let db = seeded();
		db.prepare_statement(
			"INSERT INTO t (id, name, data) VALUES (?, ?, ?)",
			&[SqlValue::Integer(3), "c".into(), SqlValue::Blob(vec![9])],
		)
		.unwrap();

		let records = db
			.prepare_statement("SELECT name, data FROM t WHERE id = ?", &[SqlValue::Integer(3)])
			.unwrap();
		assert_eq!(records.len(), 1);
		assert_eq!(records[0].get("name"), Some(&SqlValue::Text("c".into())));
		assert_eq!(records[0].get("data"), Some(&SqlValue::Blob(vec![9])));
	}

	#[test]
	fn test_statement_error_leaves_database_usable() {
		let db = seeded();
		let err = db.prepare_statement("SELECT nope FROM t", &[]).unwrap_err();
		assert_eq!(err.kind, ErrorKind::Engine);

		let err = db
			.prepare_statement("SELECT id FROM t WHERE id = ?", &[SqlValue::Integer(1), SqlValue::Integer(2)])
			.unwrap_err();
		assert_eq!(err.kind, ErrorKind::Engine);

		assert_eq!(db.execute_query("SELECT count(*) FROM t").unwrap().len(), 1);
	}

	#[test]
	fn test_constraint_violation_is_classified() {
		let db = seeded();
		let err = db
			.execute_query("INSERT INTO t (id, name) VALUES (1, 'dup')")
			.unwrap_err();
		assert_eq!(err.kind, ErrorKind::EngineConstraintViolation);
		assert!(err.message.contains("UNIQUE"), "{}", err.message);
	}

	#[test]
	fn test_export_produces_database_image() {
		let db = seeded();
		let snapshot = db.export().unwrap();
		assert!(snapshot.has_sqlite_header());

		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("copy.sqlite3");
		fs::write(&path, snapshot.as_bytes()).unwrap();

		let copy = Database::open_durable(&path).unwrap();
		copy.verify().unwrap();
		assert_eq!(
			copy.execute_query("SELECT id, name FROM t ORDER BY id").unwrap(),
			db.execute_query("SELECT id, name FROM t ORDER BY id").unwrap()
		);
	}

	#[test]
	fn test_open_missing_directory_is_no_database() {
		let dir = tempfile::tempdir().unwrap();
		let err = match Database::open_durable(&dir.path().join("missing/db.sqlite3")) {
			Ok(_) => panic!("expected open to fail"),
			Err(err) => err,
		};
		assert_eq!(err.kind, ErrorKind::NoDatabase);
	}

	#[test]
	fn test_verify_rejects_garbage() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("garbage.sqlite3");
		fs::write(&path, vec![0xAB; 4096]).unwrap();

		let db = Database::open_durable(&path).unwrap();
		assert!(db.verify().is_err());
	}
}
