//! Out-of-band delivery of exported snapshots.
//!
//! `download` does not hand its snapshot back to the caller; it publishes it
//! on the [`DOWNLOAD_TOPIC`] topic for whoever listens there.

use dashmap::DashMap;
use serde::Serialize;
use sqlw_protocol::{SNAPSHOT_MIME_TYPE, Snapshot};
use tokio::sync::broadcast;

/// Topic that exported snapshots are published on.
pub const DOWNLOAD_TOPIC: &str = "download_channel";

/// One exported database image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMessage {
	pub session: String,
	pub mime_type: &'static str,
	#[serde(rename = "bytes")]
	pub snapshot: Snapshot,
}

impl SnapshotMessage {
	pub fn new(session: impl Into<String>, snapshot: Snapshot) -> Self {
		Self {
			session: session.into(),
			mime_type: SNAPSHOT_MIME_TYPE,
			snapshot,
		}
	}

	/// Suggested file name for saving the image.
	pub fn file_name(&self) -> String {
		format!("{}.{}", self.session, sqlw_runtime::DB_EXTENSION)
	}
}

/// Sink for published snapshots. Publishing never fails the publisher.
pub trait SnapshotPublisher: Send + Sync {
	fn publish(&self, topic: &str, message: SnapshotMessage);
}

/// In-process topics backed by tokio broadcast channels.
pub struct BroadcastHub {
	topics: DashMap<String, broadcast::Sender<SnapshotMessage>>,
	capacity: usize,
}

impl BroadcastHub {
	pub fn new(capacity: usize) -> Self {
		Self {
			topics: DashMap::new(),
			capacity: capacity.max(1),
		}
	}

	fn sender(&self, topic: &str) -> broadcast::Sender<SnapshotMessage> {
		if let Some(sender) = self.topics.get(topic) {
			return sender.value().clone();
		}
		self.topics
			.entry(topic.to_string())
			.or_insert_with(|| broadcast::channel(self.capacity).0)
			.value()
			.clone()
	}

	/// Listens on `topic`, creating it if needed.
	pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<SnapshotMessage> {
		self.sender(topic).subscribe()
	}
}

impl SnapshotPublisher for BroadcastHub {
	fn publish(&self, topic: &str, message: SnapshotMessage) {
		let session = message.session.clone();
		let size = message.snapshot.len();
		match self.sender(topic).send(message) {
			Ok(listeners) => {
				tracing::debug!(topic, session = %session, size, listeners, "Snapshot published");
			}
			Err(_) => {
				tracing::debug!(topic, session = %session, size, "Snapshot published with no listeners");
			}
		}
	}
}
