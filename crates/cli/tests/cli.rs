//! End-to-end tests driving the `sqlw` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Value, json};

fn sqlw_binary() -> PathBuf {
	let mut path = std::env::current_exe().unwrap();
	path.pop();
	path.pop();
	path.push("sqlw");
	path
}

fn run(dir: &Path, args: &[&str]) -> (Value, String, bool) {
	let output = Command::new(sqlw_binary())
		.current_dir(dir)
		.env_remove("SQLW_STORAGE_DIR")
		.env_remove("SQLW_TRANSIENT")
		.env_remove("RUST_LOG")
		.arg("-f")
		.arg("json")
		.arg("--storage-dir")
		.arg(dir.join("store"))
		.args(args)
		.output()
		.expect("failed to execute sqlw");

	let stdout = String::from_utf8_lossy(&output.stdout).to_string();
	let stderr = String::from_utf8_lossy(&output.stderr).to_string();
	let parsed = serde_json::from_str::<Value>(&stdout).unwrap_or_else(|_| json!({ "raw": stdout }));
	(parsed, stderr, output.status.success())
}

fn seed(dir: &Path, session: &str) {
	let (json, stderr, ok) = run(
		dir,
		&[
			"query",
			"-s",
			session,
			"CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT); INSERT INTO t VALUES (1, 'a'), (2, 'b');",
		],
	);
	assert!(ok, "seed failed: {json} {stderr}");
}

#[test]
fn query_persists_between_invocations() {
	let dir = tempfile::tempdir().unwrap();
	seed(dir.path(), "main");

	let (json, _stderr, ok) = run(dir.path(), &["query", "-s", "main", "SELECT id, name FROM t ORDER BY id"]);
	assert!(ok);
	assert_eq!(json["ok"], true);
	assert_eq!(json["command"], "query");
	assert_eq!(json["data"]["backend"], "durable");
	assert_eq!(json["data"]["rows"], json!([[1, "a"], [2, "b"]]));
}

#[test]
fn statement_binds_params_and_tags_columns() {
	let dir = tempfile::tempdir().unwrap();
	seed(dir.path(), "default");

	let (json, _stderr, ok) = run(
		dir.path(),
		&["statement", "SELECT id, name FROM t WHERE name = ?", "-p", "b"],
	);
	assert!(ok);
	assert_eq!(json["data"]["records"], json!([{ "id": 2, "name": "b" }]));
	assert_eq!(json["inputs"]["params"], json!(["b"]));
}

#[test]
fn constraint_violation_is_reported_with_code() {
	let dir = tempfile::tempdir().unwrap();
	seed(dir.path(), "strict");

	let (json, stderr, ok) = run(
		dir.path(),
		&["statement", "-s", "strict", "INSERT INTO t VALUES (?, ?)", "-p", "1", "-p", "dup"],
	);
	assert!(!ok);
	assert_eq!(json["ok"], false);
	assert_eq!(json["command"], "statement");
	assert_eq!(json["error"]["code"], "CONSTRAINT_VIOLATION");
	assert!(stderr.contains("CONSTRAINT_VIOLATION"), "stderr: {stderr}");
}

#[test]
fn export_then_import_under_new_name() {
	let dir = tempfile::tempdir().unwrap();
	seed(dir.path(), "source");

	let out = dir.path().join("source.sqlite3");
	let (json, _stderr, ok) = run(dir.path(), &["export", "-s", "source", out.to_str().unwrap()]);
	assert!(ok, "{json}");
	assert_eq!(json["data"]["mimeType"], "application/vnd.sqlite3");
	assert!(std::fs::read(&out).unwrap().starts_with(b"SQLite format 3\0"));

	let (json, _stderr, ok) = run(dir.path(), &["import", out.to_str().unwrap(), "--as", "copy"]);
	assert!(ok, "{json}");
	assert_eq!(json["data"]["session"], "copy");

	let (json, _stderr, ok) = run(dir.path(), &["query", "-s", "copy", "SELECT count(*) FROM t"]);
	assert!(ok);
	assert_eq!(json["data"]["rows"], json!([[2]]));

	let (json, _stderr, ok) = run(dir.path(), &["sessions"]);
	assert!(ok);
	assert_eq!(json["data"]["sessions"], json!(["copy", "source"]));
}

#[test]
fn import_rejects_unknown_extension() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("notes.txt");
	std::fs::write(&file, b"SQLite format 3\0").unwrap();

	let (json, _stderr, ok) = run(dir.path(), &["import", file.to_str().unwrap()]);
	assert!(!ok);
	assert_eq!(json["error"]["code"], "UNSUPPORTED_EXTENSION");
}

#[test]
fn import_needs_durable_storage() {
	let dir = tempfile::tempdir().unwrap();
	let file = dir.path().join("mem.sqlite");
	std::fs::write(&file, b"SQLite format 3\0").unwrap();

	let (json, _stderr, ok) = run(dir.path(), &["--transient", "import", file.to_str().unwrap()]);
	assert!(!ok);
	assert_eq!(json["error"]["code"], "STORAGE_UNSUPPORTED");
}

#[test]
fn delete_removes_persisted_database() {
	let dir = tempfile::tempdir().unwrap();
	seed(dir.path(), "doomed");
	assert!(dir.path().join("store/doomed.sqlite3").is_file());

	let (json, _stderr, ok) = run(dir.path(), &["delete", "-s", "doomed"]);
	assert!(ok);
	assert_eq!(json["data"]["existed"], true);
	assert!(!dir.path().join("store/doomed.sqlite3").exists());

	let (json, _stderr, ok) = run(dir.path(), &["delete", "-s", "doomed"]);
	assert!(ok);
	assert_eq!(json["data"]["existed"], false);
}

#[test]
fn export_of_unknown_session_fails() {
	let dir = tempfile::tempdir().unwrap();
	let (json, _stderr, ok) = run(dir.path(), &["export", "-s", "missing"]);
	assert!(!ok);
	assert_eq!(json["error"]["code"], "NO_SESSION");
}

#[test]
fn process_workers_serve_queries() {
	let dir = tempfile::tempdir().unwrap();
	let (json, stderr, ok) = run(
		dir.path(),
		&["--process", "query", "-s", "proc", "CREATE TABLE x (v); INSERT INTO x VALUES (7);"],
	);
	assert!(ok, "{json} {stderr}");

	let (json, _stderr, ok) = run(dir.path(), &["--process", "query", "-s", "proc", "SELECT v FROM x"]);
	assert!(ok);
	assert_eq!(json["data"]["rows"], json!([[7]]));
}
