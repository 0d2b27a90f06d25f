use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

async fn write_raw_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
	let json_bytes = serde_json::to_vec(message).unwrap();
	let length = json_bytes.len() as u32;
	writer.write_all(&length.to_le_bytes()).await.unwrap();
	writer.write_all(&json_bytes).await.unwrap();
	writer.flush().await.unwrap();
}

#[test]
fn test_length_prefix_encoding() {
	let length: u32 = 1234;
	let bytes = length.to_le_bytes();

	assert_eq!(bytes[0], (length & 0xFF) as u8);
	assert_eq!(bytes[1], ((length >> 8) & 0xFF) as u8);
	assert_eq!(bytes[2], ((length >> 16) & 0xFF) as u8);
	assert_eq!(bytes[3], ((length >> 24) & 0xFF) as u8);

	assert_eq!(u32::from_le_bytes(bytes), length);
}

#[tokio::test]
async fn test_send_message() {
	// transport writes into `to_peer`, the test reads the peer end
	let (mut peer_read, to_peer) = tokio::io::duplex(1024);
	let (from_peer, _peer_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(to_peer, from_peer);
	let (mut sender, _receiver) = transport.into_parts();

	let test_message = serde_json::json!({
		"id": 1,
		"command": {"action": "executeQuery", "sql": "select 1"}
	});

	sender.send(test_message.clone()).await.unwrap();

	let mut len_buf = [0u8; 4];
	peer_read.read_exact(&mut len_buf).await.unwrap();
	let length = u32::from_le_bytes(len_buf) as usize;

	let mut msg_buf = vec![0u8; length];
	peer_read.read_exact(&mut msg_buf).await.unwrap();

	let received: Value = serde_json::from_slice(&msg_buf).unwrap();
	assert_eq!(received, test_message);
}

#[tokio::test]
async fn test_multiple_messages_in_sequence() {
	let (_peer_read, to_peer) = tokio::io::duplex(4096);
	let (from_peer, mut peer_write) = tokio::io::duplex(4096);

	let (mut transport, mut rx) = PipeTransport::new(to_peer, from_peer);
	let read_task = tokio::spawn(async move { transport.run().await });

	let messages = vec![
		serde_json::json!({"id": 1, "result": {"type": "closed"}}),
		serde_json::json!({"id": 2, "result": {"type": "closed"}}),
		serde_json::json!({"event": "terminated", "name": "main"}),
	];

	for msg in &messages {
		write_raw_frame(&mut peer_write, msg).await;
	}

	for expected in &messages {
		let received = rx.recv().await.unwrap();
		assert_eq!(&received, expected);
	}

	drop(peer_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_large_message() {
	let (_peer_read, to_peer) = tokio::io::duplex(1024 * 1024);
	let (from_peer, mut peer_write) = tokio::io::duplex(1024 * 1024);

	let (mut transport, mut rx) = PipeTransport::new(to_peer, from_peer);
	let read_task = tokio::spawn(async move { transport.run().await });

	// snapshots routinely exceed a single pipe buffer
	let large_string = "x".repeat(100_000);
	let large_message = serde_json::json!({
		"id": 1,
		"result": {"type": "snapshotBlob", "bytes": large_string}
	});

	write_raw_frame(&mut peer_write, &large_message).await;

	let received = rx.recv().await.unwrap();
	assert_eq!(received, large_message);

	drop(peer_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_malformed_length_prefix() {
	let (_peer_read, to_peer) = tokio::io::duplex(1024);
	let (from_peer, mut peer_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(to_peer, from_peer);

	// two bytes instead of four, then end of stream
	peer_write.write_all(&[0x01, 0x02]).await.unwrap();
	peer_write.flush().await.unwrap();
	drop(peer_write);

	let result = transport.run().await;
	assert!(result.is_err());
	assert!(
		result
			.unwrap_err()
			.to_string()
			.contains("Failed to read length prefix")
	);
}

#[tokio::test]
async fn test_truncated_body_is_an_error() {
	let (_peer_read, to_peer) = tokio::io::duplex(1024);
	let (from_peer, mut peer_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(to_peer, from_peer);

	peer_write.write_all(&100u32.to_le_bytes()).await.unwrap();
	peer_write.write_all(b"{\"id\":").await.unwrap();
	drop(peer_write);

	let result = transport.run().await;
	assert!(matches!(result, Err(Error::TransportError(_))));
}

#[tokio::test]
async fn test_clean_end_of_stream() {
	let (_peer_read, to_peer) = tokio::io::duplex(1024);
	let (from_peer, peer_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(to_peer, from_peer);

	drop(peer_write);

	let read_task = tokio::spawn(async move { transport.run().await });
	let result = read_task.await.unwrap();
	assert!(result.is_ok());
}

#[tokio::test]
async fn test_invalid_json_frame_is_skipped() {
	let (_peer_read, to_peer) = tokio::io::duplex(1024);
	let (from_peer, mut peer_write) = tokio::io::duplex(1024);

	let (mut transport, mut rx) = PipeTransport::new(to_peer, from_peer);
	let read_task = tokio::spawn(async move { transport.run().await });

	let garbage = b"not json";
	peer_write
		.write_all(&(garbage.len() as u32).to_le_bytes())
		.await
		.unwrap();
	peer_write.write_all(garbage).await.unwrap();
	let message = serde_json::json!({"id": 7, "result": {"type": "closed"}});
	write_raw_frame(&mut peer_write, &message).await;

	assert_eq!(rx.recv().await.unwrap(), message);

	drop(peer_write);
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_channel_pair_delivers_both_ways() {
	let (controller, context) = channel_pair();
	let TransportParts {
		sender: mut controller_tx,
		receiver: controller_reader,
		message_rx: mut controller_rx,
	} = controller;
	let TransportParts {
		sender: mut context_tx,
		receiver: context_reader,
		message_rx: mut context_rx,
	} = context;

	tokio::spawn(controller_reader.run());
	tokio::spawn(context_reader.run());

	controller_tx
		.send(serde_json::json!({"id": 0}))
		.await
		.unwrap();
	assert_eq!(context_rx.recv().await.unwrap()["id"], 0);

	context_tx
		.send(serde_json::json!({"id": 0, "result": {"type": "closed"}}))
		.await
		.unwrap();
	assert_eq!(controller_rx.recv().await.unwrap()["result"]["type"], "closed");
}

#[tokio::test]
async fn test_channel_pair_reports_closed_peer() {
	let (controller, context) = channel_pair();
	let TransportParts {
		sender: mut controller_tx,
		..
	} = controller;
	drop(context);

	let result = controller_tx.send(serde_json::json!({"id": 1})).await;
	assert!(matches!(result, Err(Error::ChannelClosed)));
}
