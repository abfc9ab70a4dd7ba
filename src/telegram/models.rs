use serde::{Deserialize, Serialize};

use super::TelegramError;
use crate::db::models::MessageRef;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Every Bot API reply: `{"ok": true, "result": ...}` or
/// `{"ok": false, "error_code": 400, "description": "..."}`.
#[derive(Debug, Deserialize)]
pub struct TelegramResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<i64>,
}

impl<T> TelegramResponse<T> {
    pub fn into_result(self, method: &'static str) -> Result<T, TelegramError> {
        if self.ok {
            self.result.ok_or(TelegramError::MissingResult { method })
        } else {
            Err(TelegramError::Api {
                method,
                code: self.error_code.unwrap_or(-1),
                description: self.description.unwrap_or_else(|| "(no description)".to_owned()),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

impl Message {
    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest<'a> {
    pub chat_id: i64,
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeleteMessageRequest {
    pub chat_id: i64,
    pub message_id: i64,
}

/// One entry of the `media` field of `sendMediaGroup`; `media` points at a
/// multipart part via `attach://<name>`.
#[derive(Debug, Serialize)]
pub struct InputMediaPhoto {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

impl InputMediaPhoto {
    pub fn attached(part_name: &str, caption: Option<String>) -> Self {
        Self {
            kind: "photo",
            media: format!("attach://{part_name}"),
            caption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_envelope_yields_result() {
        let raw = r#"{"ok":true,"result":{"message_id":42,"chat":{"id":-1001,"type":"channel"}}}"#;
        let msg = serde_json::from_str::<TelegramResponse<Message>>(raw)
            .unwrap()
            .into_result("sendMessage")
            .unwrap();
        assert_eq!(msg.message_ref(), MessageRef { chat_id: -1001, message_id: 42 });
    }

    #[test]
    fn error_envelope_carries_code_and_description() {
        let raw = r#"{"ok":false,"error_code":400,"description":"Bad Request: message to delete not found"}"#;
        let err = serde_json::from_str::<TelegramResponse<bool>>(raw)
            .unwrap()
            .into_result("deleteMessage")
            .unwrap_err();
        match err {
            TelegramError::Api { method, code, description } => {
                assert_eq!(method, "deleteMessage");
                assert_eq!(code, 400);
                assert!(description.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ok_without_result_is_an_error() {
        let raw = r#"{"ok":true}"#;
        let err = serde_json::from_str::<TelegramResponse<bool>>(raw)
            .unwrap()
            .into_result("deleteMessage")
            .unwrap_err();
        assert!(matches!(err, TelegramError::MissingResult { .. }));
    }

    #[test]
    fn media_entry_serializes_with_attach_reference() {
        let first = InputMediaPhoto::attached("photo0", Some("Загруженность".into()));
        let second = InputMediaPhoto::attached("photo1", None);
        let json = serde_json::to_value([first, second]).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                { "type": "photo", "media": "attach://photo0", "caption": "Загруженность" },
                { "type": "photo", "media": "attach://photo1" }
            ])
        );
    }
}
