use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Tables owned by the row store. Both live in the configured layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    OccupancySample,
    DigestMessageRecord,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Table::OccupancySample => "occupancy_sample",
            Table::DigestMessageRecord => "digest_message_record",
        }
    }

    /// Column order used by the bulk loader.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::OccupancySample => &["ts", "online", "gym_name"],
            Table::DigestMessageRecord => &["datetime", "chat_message_id", "message"],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One reading of a gym's online counter.
///
/// `online` is `None` when the counter element was missing from the page.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct OccupancySample {
    pub ts: NaiveDateTime,
    pub online: Option<i32>,
    pub gym_name: String,
}

/// A message sent to the channel, addressable for later deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// What one digest cycle sent: the text message followed by the two images.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestMessageRecord {
    pub datetime: NaiveDateTime,
    pub chat_message_id: Vec<MessageRef>,
    pub message: String,
}

/// Raw row shape; `chat_message_id` arrives as `jsonb::text` and is only
/// trusted after [`decode_message_refs`].
#[derive(Debug, FromRow)]
pub(crate) struct DigestMessageRow {
    pub datetime: NaiveDateTime,
    pub chat_message_id: String,
    pub message: String,
}

impl TryFrom<DigestMessageRow> for DigestMessageRecord {
    type Error = serde_json::Error;

    fn try_from(r: DigestMessageRow) -> Result<Self, Self::Error> {
        Ok(Self {
            datetime: r.datetime,
            chat_message_id: decode_message_refs(&r.chat_message_id)?,
            message: r.message,
        })
    }
}

/// Encode refs for the `chat_message_id` column.
pub fn encode_message_refs(refs: &[MessageRef]) -> String {
    // Serializing plain integer structs cannot fail.
    serde_json::to_string(refs).unwrap_or_else(|_| "[]".to_owned())
}

/// Validated decode of the `chat_message_id` column.
pub fn decode_message_refs(raw: &str) -> Result<Vec<MessageRef>, serde_json::Error> {
    serde_json::from_str(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> Vec<MessageRef> {
        vec![
            MessageRef { chat_id: -1001, message_id: 10 },
            MessageRef { chat_id: -1001, message_id: 11 },
            MessageRef { chat_id: -1001, message_id: 12 },
        ]
    }

    #[test]
    fn three_refs_decode_in_send_order() {
        let encoded = encode_message_refs(&refs());
        let decoded = decode_message_refs(&encoded).unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded, refs());
    }

    #[test]
    fn decode_rejects_tuple_literal_text() {
        assert!(decode_message_refs("[(-1001, 10), (-1001, 11)]").is_err());
    }

    #[test]
    fn decode_rejects_missing_fields() {
        assert!(decode_message_refs(r#"[{"chat_id": 1}]"#).is_err());
    }

    #[test]
    fn row_with_corrupt_refs_fails_to_convert() {
        let row = DigestMessageRow {
            datetime: chrono::NaiveDate::from_ymd_opt(2024, 9, 20)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            chat_message_id: "not json".to_owned(),
            message: "m".to_owned(),
        };
        assert!(DigestMessageRecord::try_from(row).is_err());
    }

    #[test]
    fn columns_match_table() {
        assert_eq!(Table::OccupancySample.columns(), &["ts", "online", "gym_name"]);
        assert_eq!(Table::DigestMessageRecord.to_string(), "digest_message_record");
    }
}
