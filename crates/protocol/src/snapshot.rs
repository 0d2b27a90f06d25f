//! Whole-database images moved across the context boundary.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Magic string every SQLite database file starts with.
pub const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";

/// MIME type attached to exported snapshots.
pub const SNAPSHOT_MIME_TYPE: &str = "application/vnd.sqlite3";

/// Raw byte image of a full database, serialized as a base64 string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Snapshot(Vec<u8>);

impl Snapshot {
	pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
		Self(bytes.into())
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the image starts with the SQLite file header.
	pub fn has_sqlite_header(&self) -> bool {
		self.0.starts_with(SQLITE_HEADER)
	}
}

impl From<Vec<u8>> for Snapshot {
	fn from(bytes: Vec<u8>) -> Self {
		Self(bytes)
	}
}

impl AsRef<[u8]> for Snapshot {
	fn as_ref(&self) -> &[u8] {
		&self.0
	}
}

impl fmt::Debug for Snapshot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Snapshot").field("len", &self.0.len()).finish()
	}
}

impl Serialize for Snapshot {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(&self.0))
	}
}

impl<'de> Deserialize<'de> for Snapshot {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let encoded: String = Deserialize::deserialize(deserializer)?;
		STANDARD
			.decode(encoded.as_bytes())
			.map(Snapshot)
			.map_err(serde::de::Error::custom)
	}
}
