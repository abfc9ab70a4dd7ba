pub mod models;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client,
};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{config::TelegramConfig, db::models::MessageRef, notify::Messenger};

use self::models::{
    DeleteMessageRequest, InputMediaPhoto, Message, SendMessageRequest, TelegramResponse,
};

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("{method} request failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned an unreadable body: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Telegram API error in {method}: code={code}, description={description}")]
    Api {
        method: &'static str,
        code: i64,
        description: String,
    },

    #[error("{method}: ok=true but result field is missing")]
    MissingResult { method: &'static str },
}

/// Bot API client for one bot token.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                http: Client::new(),
                base_url: config.base_url.trim_end_matches('/').to_owned(),
                token: config.token.clone(),
            }),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.inner.base_url, self.inner.token, method)
    }

    /// Reads the body whatever the status; the envelope says what went wrong.
    async fn decode<T: DeserializeOwned>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T, TelegramError> {
        let bytes = response
            .bytes()
            .await
            .map_err(|source| TelegramError::Http { method, source })?;
        serde_json::from_slice::<TelegramResponse<T>>(&bytes)
            .map_err(|source| TelegramError::Decode { method, source })?
            .into_result(method)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, TelegramError> {
        const METHOD: &str = "sendMessage";
        debug!(chat_id, "Sending text message");

        let response = self
            .inner
            .http
            .post(self.method_url(METHOD))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|source| TelegramError::Http { method: METHOD, source })?;

        Self::decode(METHOD, response).await
    }

    /// Sends PNG images as one album. Each image is `(bytes, caption)`.
    pub async fn send_media_group(
        &self,
        chat_id: i64,
        photos: Vec<(Vec<u8>, Option<String>)>,
    ) -> Result<Vec<Message>, TelegramError> {
        const METHOD: &str = "sendMediaGroup";
        debug!(chat_id, photos = photos.len(), "Sending media group");

        let form = MediaGroup::new(photos)
            .into_form(chat_id)
            .map_err(|source| TelegramError::Http { method: METHOD, source })?;

        let response = self
            .inner
            .http
            .post(self.method_url(METHOD))
            .multipart(form)
            .send()
            .await
            .map_err(|source| TelegramError::Http { method: METHOD, source })?;

        Self::decode(METHOD, response).await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<bool, TelegramError> {
        const METHOD: &str = "deleteMessage";
        debug!(chat_id, message_id, "Deleting message");

        let response = self
            .inner
            .http
            .post(self.method_url(METHOD))
            .json(&DeleteMessageRequest { chat_id, message_id })
            .send()
            .await
            .map_err(|source| TelegramError::Http { method: METHOD, source })?;

        Self::decode(METHOD, response).await
    }
}

/// An album split into its multipart files and the `media` field that
/// points at them by part name.
struct MediaGroup {
    media: String,
    files: Vec<(String, Vec<u8>)>,
}

impl MediaGroup {
    fn new(photos: Vec<(Vec<u8>, Option<String>)>) -> Self {
        let mut media = Vec::with_capacity(photos.len());
        let mut files = Vec::with_capacity(photos.len());

        for (i, (png, caption)) in photos.into_iter().enumerate() {
            let name = format!("photo{i}");
            media.push(InputMediaPhoto::attached(&name, caption));
            files.push((name, png));
        }

        // A list of plain structs always serializes.
        let media = serde_json::to_string(&media).unwrap_or_else(|_| "[]".to_owned());
        Self { media, files }
    }

    fn into_form(self, chat_id: i64) -> Result<Form, reqwest::Error> {
        let mut form = Form::new().text("chat_id", chat_id.to_string());
        for (name, png) in self.files {
            let part = Part::bytes(png)
                .file_name(format!("{name}.png"))
                .mime_str("image/png")?;
            form = form.part(name, part);
        }
        Ok(form.text("media", self.media))
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<MessageRef, TelegramError> {
        Ok(self.send_message(chat_id, text).await?.message_ref())
    }

    async fn send_photo_group(
        &self,
        chat_id: i64,
        photos: Vec<(Vec<u8>, Option<String>)>,
    ) -> Result<Vec<MessageRef>, TelegramError> {
        let sent = self.send_media_group(chat_id, photos).await?;
        Ok(sent.iter().map(Message::message_ref).collect())
    }

    async fn delete_message(&self, target: MessageRef) -> Result<(), TelegramError> {
        TelegramClient::delete_message(self, target.chat_id, target.message_id).await?;
        Ok(())
    }
}
