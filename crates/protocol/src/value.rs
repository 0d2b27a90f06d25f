//! Scalar values and result records.
//!
//! A [`SqlValue`] maps onto JSON as follows:
//!
//! | SQLite storage class | JSON                        |
//! |----------------------|-----------------------------|
//! | NULL                 | `null`                      |
//! | INTEGER              | integral number             |
//! | REAL                 | number with a fraction part |
//! | TEXT                 | string                      |
//! | BLOB                 | `{"$blob": "<base64>"}`     |

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single scalar value bound to a statement or read from a cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ValueRepr", into = "ValueRepr")]
pub enum SqlValue {
	Null,
	Integer(i64),
	Real(f64),
	Text(String),
	Blob(Vec<u8>),
}

impl SqlValue {
	pub fn is_null(&self) -> bool {
		matches!(self, SqlValue::Null)
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			SqlValue::Integer(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			SqlValue::Real(f) => Some(*f),
			SqlValue::Integer(i) => Some(*i as f64),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			SqlValue::Text(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_bytes(&self) -> Option<&[u8]> {
		match self {
			SqlValue::Blob(b) => Some(b),
			_ => None,
		}
	}
}

impl From<i64> for SqlValue {
	fn from(value: i64) -> Self {
		SqlValue::Integer(value)
	}
}

impl From<f64> for SqlValue {
	fn from(value: f64) -> Self {
		SqlValue::Real(value)
	}
}

impl From<&str> for SqlValue {
	fn from(value: &str) -> Self {
		SqlValue::Text(value.to_string())
	}
}

impl From<String> for SqlValue {
	fn from(value: String) -> Self {
		SqlValue::Text(value)
	}
}

impl From<Vec<u8>> for SqlValue {
	fn from(value: Vec<u8>) -> Self {
		SqlValue::Blob(value)
	}
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
	fn from(value: Option<T>) -> Self {
		value.map(Into::into).unwrap_or(SqlValue::Null)
	}
}

impl fmt::Display for SqlValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SqlValue::Null => write!(f, "NULL"),
			SqlValue::Integer(i) => write!(f, "{i}"),
			SqlValue::Real(r) => write!(f, "{r}"),
			SqlValue::Text(s) => write!(f, "{s}"),
			SqlValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
		}
	}
}

/// JSON shape of a [`SqlValue`]. Integer is tried before Real so that
/// integral numbers keep their storage class. JSON has no infinities or NaN,
/// so non-finite reals travel as `{"$real": "inf" | "-inf" | "nan"}`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum ValueRepr {
	Null(()),
	Integer(i64),
	Real(f64),
	Text(String),
	Blob {
		#[serde(rename = "$blob")]
		blob: String,
	},
	NonFinite {
		#[serde(rename = "$real")]
		real: String,
	},
}

impl TryFrom<ValueRepr> for SqlValue {
	type Error = String;

	fn try_from(repr: ValueRepr) -> Result<Self, Self::Error> {
		Ok(match repr {
			ValueRepr::Null(()) => SqlValue::Null,
			ValueRepr::Integer(i) => SqlValue::Integer(i),
			ValueRepr::Real(r) => SqlValue::Real(r),
			ValueRepr::Text(s) => SqlValue::Text(s),
			ValueRepr::Blob { blob } => SqlValue::Blob(
				STANDARD
					.decode(blob.as_bytes())
					.map_err(|e| format!("invalid base64 blob: {e}"))?,
			),
			ValueRepr::NonFinite { real } => SqlValue::Real(match real.as_str() {
				"inf" => f64::INFINITY,
				"-inf" => f64::NEG_INFINITY,
				"nan" => f64::NAN,
				other => return Err(format!("invalid non-finite real: {other}")),
			}),
		})
	}
}

impl From<SqlValue> for ValueRepr {
	fn from(value: SqlValue) -> Self {
		match value {
			SqlValue::Null => ValueRepr::Null(()),
			SqlValue::Integer(i) => ValueRepr::Integer(i),
			SqlValue::Real(r) if r.is_finite() => ValueRepr::Real(r),
			SqlValue::Real(r) => ValueRepr::NonFinite {
				real: if r.is_nan() {
					"nan"
				} else if r.is_sign_positive() {
					"inf"
				} else {
					"-inf"
				}
				.to_string(),
			},
			SqlValue::Text(s) => ValueRepr::Text(s),
			SqlValue::Blob(b) => ValueRepr::Blob {
				blob: STANDARD.encode(b),
			},
		}
	}
}

/// One column-tagged result row.
///
/// Columns keep the order reported by the statement metadata, both in memory
/// and on the wire (serialized as a JSON object whose keys appear in that
/// order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
	fields: Vec<(String, SqlValue)>,
}

impl Record {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builds a record by zipping column names with one row of values.
	pub fn zip<I, V>(columns: &[String], values: I) -> Self
	where
		I: IntoIterator<Item = V>,
		V: Into<SqlValue>,
	{
		columns
			.iter()
			.cloned()
			.zip(values.into_iter().map(Into::into))
			.collect()
	}

	pub fn push(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
		self.fields.push((column.into(), value.into()));
	}

	/// First value stored under `column`.
	pub fn get(&self, column: &str) -> Option<&SqlValue> {
		self.fields
			.iter()
			.find(|(name, _)| name == column)
			.map(|(_, value)| value)
	}

	pub fn columns(&self) -> impl Iterator<Item = &str> {
		self.fields.iter().map(|(name, _)| name.as_str())
	}

	pub fn values(&self) -> impl Iterator<Item = &SqlValue> {
		self.fields.iter().map(|(_, value)| value)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
		self.fields.iter().map(|(name, value)| (name.as_str(), value))
	}

	pub fn len(&self) -> usize {
		self.fields.len()
	}

	pub fn is_empty(&self) -> bool {
		self.fields.is_empty()
	}
}

impl FromIterator<(String, SqlValue)> for Record {
	fn from_iter<T: IntoIterator<Item = (String, SqlValue)>>(iter: T) -> Self {
		Self {
			fields: iter.into_iter().collect(),
		}
	}
}

impl IntoIterator for Record {
	type Item = (String, SqlValue);
	type IntoIter = std::vec::IntoIter<(String, SqlValue)>;

	fn into_iter(self) -> Self::IntoIter {
		self.fields.into_iter()
	}
}

impl Serialize for Record {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut map = serializer.serialize_map(Some(self.fields.len()))?;
		for (column, value) in &self.fields {
			map.serialize_entry(column, value)?;
		}
		map.end()
	}
}

impl<'de> Deserialize<'de> for Record {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct RecordVisitor;

		impl<'de> Visitor<'de> for RecordVisitor {
			type Value = Record;

			fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str("an object of column values")
			}

			fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
				let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
				while let Some((column, value)) = access.next_entry::<String, SqlValue>()? {
					fields.push((column, value));
				}
				Ok(Record { fields })
			}
		}

		deserializer.deserialize_map(RecordVisitor)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_value_json_shapes() {
		assert_eq!(serde_json::to_value(SqlValue::Null).unwrap(), json!(null));
		assert_eq!(serde_json::to_value(SqlValue::Integer(7)).unwrap(), json!(7));
		assert_eq!(serde_json::to_value(SqlValue::Real(2.5)).unwrap(), json!(2.5));
		assert_eq!(
			serde_json::to_value(SqlValue::from("hi")).unwrap(),
			json!("hi")
		);
		assert_eq!(
			serde_json::to_value(SqlValue::Blob(b"abc".to_vec())).unwrap(),
			json!({"$blob": "YWJj"})
		);
	}

	#[test]
	fn test_integer_and_real_keep_storage_class() {
		let values: Vec<SqlValue> = serde_json::from_str("[1, 1.0, -3, 0.25]").unwrap();
		assert_eq!(
			values,
			vec![
				SqlValue::Integer(1),
				SqlValue::Real(1.0),
				SqlValue::Integer(-3),
				SqlValue::Real(0.25),
			]
		);
	}

	#[test]
	fn test_blob_survives_binary_content() {
		let bytes: Vec<u8> = (0..=255).collect();
		let json = serde_json::to_string(&SqlValue::Blob(bytes.clone())).unwrap();
		let back: SqlValue = serde_json::from_str(&json).unwrap();
		assert_eq!(back.as_bytes(), Some(bytes.as_slice()));
	}

	#[test]
	fn test_non_finite_reals_survive_the_wire() {
		assert_eq!(
			serde_json::to_value(SqlValue::Real(f64::INFINITY)).unwrap(),
			json!({"$real": "inf"})
		);
		for value in [f64::INFINITY, f64::NEG_INFINITY] {
			let json = serde_json::to_string(&SqlValue::Real(value)).unwrap();
			let back: SqlValue = serde_json::from_str(&json).unwrap();
			assert_eq!(back, SqlValue::Real(value));
		}

		let json = serde_json::to_string(&SqlValue::Real(f64::NAN)).unwrap();
		let back: SqlValue = serde_json::from_str(&json).unwrap();
		assert!(back.as_f64().is_some_and(f64::is_nan));

		assert!(serde_json::from_str::<SqlValue>(r#"{"$real": "huge"}"#).is_err());
	}

	#[test]
	fn test_invalid_blob_is_rejected() {
		let result = serde_json::from_str::<SqlValue>(r#"{"$blob": "!!not base64"}"#);
		assert!(result.is_err());
	}

	#[test]
	fn test_record_keeps_column_order_on_the_wire() {
		let record = Record::zip(
			&["zeta".to_string(), "alpha".to_string()],
			[SqlValue::Integer(1), SqlValue::from("a")],
		);
		let json = serde_json::to_string(&record).unwrap();
		assert_eq!(json, r#"{"zeta":1,"alpha":"a"}"#);

		let back: Record = serde_json::from_str(&json).unwrap();
		assert_eq!(back.columns().collect::<Vec<_>>(), vec!["zeta", "alpha"]);
		assert_eq!(back.get("alpha"), Some(&SqlValue::from("a")));
	}
}
