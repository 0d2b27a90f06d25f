use serde_json::json;
use sqlw_protocol::{Backend, Message, SqlValue};

use super::*;
use crate::storage::DurableStore;
use crate::transport::{Transport, channel_pair};

fn transient() -> ExecutionContext {
	ExecutionContext::new("mem", StorageBackend::Transient)
}

fn durable(root: &std::path::Path) -> ExecutionContext {
	ExecutionContext::new("disk", StorageBackend::Durable(DurableStore::new(root)))
}

fn run(context: &mut ExecutionContext, command: Command) -> std::result::Result<Reply, ErrorPayload> {
	context.handle(command).expect("command should be answered")
}

fn query(sql: &str) -> Command {
	Command::ExecuteQuery { sql: sql.to_string() }
}

fn create(name: &str) -> Command {
	Command::CreateDb {
		name: name.to_string(),
	}
}

#[test]
fn test_create_transient() {
	let mut context = transient();
	match run(&mut context, create("mem")).unwrap() {
		Reply::Created { message, backend } => {
			assert_eq!(backend, Backend::Transient);
			assert!(message.contains("transient"), "{message}");
		}
		other => panic!("unexpected reply: {other:?}"),
	}
	assert!(context.is_open());
}

#[test]
fn test_create_durable_writes_named_file() {
	let dir = tempfile::tempdir().unwrap();
	let mut context = durable(dir.path());

	let reply = run(&mut context, create("disk")).unwrap();
	assert!(matches!(
		reply,
		Reply::Created {
			backend: Backend::Durable,
			..
		}
	));

	run(&mut context, query("CREATE TABLE t (x)")).unwrap();
	assert!(dir.path().join("disk.sqlite3").is_file());
}

#[test]
fn test_commands_without_database_fail_with_no_database() {
	let mut context = transient();

	for command in [
		query("SELECT 1"),
		Command::PrepareStatement {
			sql: "SELECT 1".into(),
			values: vec![],
		},
		Command::DownloadDb,
	] {
		let err = run(&mut context, command).unwrap_err();
		assert_eq!(err.kind, ErrorKind::NoDatabase);
	}
}

#[test]
fn test_close_is_idempotent() {
	let mut context = transient();
	assert_eq!(run(&mut context, Command::CloseDb).unwrap(), Reply::Closed);

	run(&mut context, create("mem")).unwrap();
	assert_eq!(run(&mut context, Command::CloseDb).unwrap(), Reply::Closed);
	assert!(!context.is_open());
	assert_eq!(run(&mut context, Command::CloseDb).unwrap(), Reply::Closed);
}

#[test]
fn test_terminate_is_not_answered() {
	let mut context = transient();
	assert!(context.handle(Command::Terminate).is_none());
}

#[test]
fn test_prepare_statement_records() {
	let mut context = transient();
	run(&mut context, create("mem")).unwrap();
	run(
		&mut context,
		query("CREATE TABLE t (id INTEGER, name TEXT); INSERT INTO t VALUES (1, 'a'), (2, 'b');"),
	)
	.unwrap();

	let reply = run(
		&mut context,
		Command::PrepareStatement {
			sql: "SELECT id, name FROM t ORDER BY id".into(),
			values: vec![],
		},
	)
	.unwrap();

	let Reply::StatementResult { records } = reply else {
		panic!("unexpected reply: {reply:?}");
	};
	assert_eq!(
		serde_json::to_value(&records).unwrap(),
		json!([{"id": 1, "name": "a"}, {"id": 2, "name": "b"}])
	);
}

#[test]
fn test_upload_requires_durable_storage() {
	let mut context = transient();
	let err = run(
		&mut context,
		Command::UploadDb {
			name: "mem".into(),
			snapshot: Snapshot::new(b"SQLite format 3\0".to_vec()),
		},
	)
	.unwrap_err();
	assert_eq!(err.kind, ErrorKind::StorageUnsupported);
}

#[test]
fn test_upload_rejects_empty_and_foreign_images() {
	let dir = tempfile::tempdir().unwrap();
	let mut context = durable(dir.path());

	for bytes in [Vec::new(), b"definitely not a database".to_vec()] {
		let err = run(
			&mut context,
			Command::UploadDb {
				name: "disk".into(),
				snapshot: Snapshot::new(bytes),
			},
		)
		.unwrap_err();
		assert_eq!(err.kind, ErrorKind::ImportError);
	}
	assert!(!dir.path().join("disk.sqlite3").exists());
}

#[test]
fn test_download_then_upload_replaces_open_database() {
	let dir = tempfile::tempdir().unwrap();

	let mut source = transient();
	run(&mut source, create("mem")).unwrap();
	run(
		&mut source,
		query("CREATE TABLE t (v TEXT); INSERT INTO t VALUES ('from source');"),
	)
	.unwrap();
	let Reply::SnapshotBlob { snapshot } = run(&mut source, Command::DownloadDb).unwrap() else {
		panic!("expected snapshot");
	};
	assert!(snapshot.has_sqlite_header());

	let mut target = durable(dir.path());
	run(&mut target, create("disk")).unwrap();
	run(&mut target, query("CREATE TABLE other (x)")).unwrap();

	let size = snapshot.len() as u64;
	let reply = run(
		&mut target,
		Command::UploadDb {
			name: "disk".into(),
			snapshot,
		},
	)
	.unwrap();
	assert!(matches!(reply, Reply::Imported { size: s, .. } if s == size));

	let Reply::QueryResult { rows } = run(&mut target, query("SELECT v FROM t")).unwrap() else {
		panic!("expected rows");
	};
	assert_eq!(rows, vec![vec![SqlValue::Text("from source".into())]]);

	let err = run(&mut target, query("SELECT * FROM other")).unwrap_err();
	assert_eq!(err.kind, ErrorKind::Engine);
}

#[test]
fn test_rejected_upload_keeps_current_database() {
	let dir = tempfile::tempdir().unwrap();
	let mut context = durable(dir.path());
	run(&mut context, create("disk")).unwrap();
	run(&mut context, query("CREATE TABLE t (x); INSERT INTO t VALUES (42);")).unwrap();

	// right header, garbage pages
	let mut corrupt = b"SQLite format 3\0".to_vec();
	corrupt.extend(std::iter::repeat_n(0xAB, 4096));
	let err = run(
		&mut context,
		Command::UploadDb {
			name: "disk".into(),
			snapshot: Snapshot::new(corrupt),
		},
	)
	.unwrap_err();
	assert_eq!(err.kind, ErrorKind::ImportError);

	assert!(context.is_open());
	let Reply::QueryResult { rows } = run(&mut context, query("SELECT x FROM t")).unwrap() else {
		panic!("expected rows");
	};
	assert_eq!(rows, vec![vec![SqlValue::Integer(42)]]);

	let on_disk = std::fs::read(dir.path().join("disk.sqlite3")).unwrap();
	assert_ne!(on_disk[16], 0xAB);
	// the staged copy is gone
	let files: Vec<_> = std::fs::read_dir(dir.path())
		.unwrap()
		.map(|e| e.unwrap().file_name())
		.filter(|n| !n.to_string_lossy().starts_with("disk.sqlite3"))
		.collect();
	assert!(files.is_empty(), "{files:?}");
}

#[tokio::test]
async fn test_serve_answers_in_order() {
	let (controller, context_side) = channel_pair();
	let server = tokio::spawn(transient().serve(context_side));

	let TransportParts {
		mut sender,
		receiver,
		mut message_rx,
	} = controller;
	tokio::spawn(receiver.run());

	let commands = [
		create("mem"),
		query("CREATE TABLE t (x)"),
		query("INSERT INTO t VALUES (1)"),
		query("SELECT x FROM t"),
		Command::CloseDb,
	];
	for (id, command) in commands.into_iter().enumerate() {
		let request = Request {
			id: id as u32,
			command,
		};
		sender.send(serde_json::to_value(&request).unwrap()).await.unwrap();
	}

	let mut ids = Vec::new();
	let mut last = None;
	for _ in 0..5 {
		let Message::Response(response) =
			serde_json::from_value(message_rx.recv().await.unwrap()).unwrap()
		else {
			panic!("expected a response");
		};
		ids.push(response.id);
		last = Some(response);
		if ids.len() == 4 {
			let Some(Reply::QueryResult { rows }) = last.as_ref().and_then(|r| r.result.clone())
			else {
				panic!("expected rows");
			};
			assert_eq!(rows, vec![vec![SqlValue::Integer(1)]]);
		}
	}
	assert_eq!(ids, vec![0, 1, 2, 3, 4]);
	assert_eq!(last.and_then(|r| r.result), Some(Reply::Closed));

	drop(sender);
	drop(message_rx);
	server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_serve_reports_malformed_request() {
	let (controller, context_side) = channel_pair();
	tokio::spawn(transient().serve(context_side));

	let TransportParts {
		mut sender,
		receiver,
		mut message_rx,
	} = controller;
	tokio::spawn(receiver.run());

	sender
		.send(json!({"id": 9, "command": {"action": "dropEverything"}}))
		.await
		.unwrap();

	let response: Response = serde_json::from_value(message_rx.recv().await.unwrap()).unwrap();
	assert_eq!(response.id, 9);
	assert_eq!(response.error.map(|e| e.kind), Some(ErrorKind::Protocol));
}

#[tokio::test]
async fn test_serve_terminate_emits_event_and_exits() {
	let (controller, context_side) = channel_pair();
	let server = tokio::spawn(transient().serve(context_side));

	let TransportParts {
		mut sender,
		receiver,
		mut message_rx,
	} = controller;
	tokio::spawn(receiver.run());

	let request = Request {
		id: 0,
		command: Command::Terminate,
	};
	sender.send(serde_json::to_value(&request).unwrap()).await.unwrap();

	let event: Event = serde_json::from_value(message_rx.recv().await.unwrap()).unwrap();
	assert_eq!(
		event,
		Event::Terminated {
			name: "mem".to_string()
		}
	);
	server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_serve_over_pipe() {
	let (context_read, controller_write) = tokio::io::duplex(4096);
	let (controller_read, context_write) = tokio::io::duplex(4096);
	tokio::spawn(transient().serve_pipe(context_write, context_read));

	let (transport, message_rx) = PipeTransport::new(controller_write, controller_read);
	let TransportParts {
		mut sender,
		receiver,
		mut message_rx,
	} = transport.into_transport_parts(message_rx);
	tokio::spawn(receiver.run());

	let request = Request {
		id: 3,
		command: create("mem"),
	};
	sender.send(serde_json::to_value(&request).unwrap()).await.unwrap();

	let response: Response = serde_json::from_value(message_rx.recv().await.unwrap()).unwrap();
	assert_eq!(response.id, 3);
	assert!(matches!(response.result, Some(Reply::Created { .. })));
}
