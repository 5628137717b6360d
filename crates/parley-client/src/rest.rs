use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use parley_types::api::{CreateConversationRequest, MarkReadRequest, MarkReadResponse, SendMessageRequest};
use parley_types::models::{Attachment, Conversation, Message};

use crate::error::ClientError;

/// The REST operations a chat session depends on.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError>;

    async fn create_conversation(
        &self,
        participant_ids: Vec<Uuid>,
        group_name: Option<String>,
    ) -> Result<Conversation, ClientError>;

    /// Oldest-first page of history, older than message `before` if given.
    async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, ClientError>;

    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ClientError>;

    async fn mark_read(&self, conversation_id: Uuid, message_ids: Vec<Uuid>) -> Result<(), ClientError>;
}

/// `ChatApi` over HTTP with a bearer token.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
    user_id: Uuid,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, user_id: Uuid) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.token))
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ClientError> {
        let resp = self.authed(req).send().await?;
        let resp = check_status(resp)?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn check_status(resp: Response) -> Result<Response, ClientError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED => Err(ClientError::Unauthorized),
        status if !status.is_success() => Err(ClientError::Status(status.as_u16())),
        _ => Ok(resp),
    }
}

#[async_trait]
impl ChatApi for RestClient {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.send(self.http.get(self.url("/conversations"))).await
    }

    async fn create_conversation(
        &self,
        participant_ids: Vec<Uuid>,
        group_name: Option<String>,
    ) -> Result<Conversation, ClientError> {
        let body = CreateConversationRequest {
            participant_ids,
            group_name,
        };
        self.send(self.http.post(self.url("/conversations")).json(&body))
            .await
    }

    async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: Option<u32>,
        before: Option<Uuid>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut query: Vec<(&str, String)> = Vec::new();
        if let Some(limit) = limit {
            query.push(("limit", limit.to_string()));
        }
        if let Some(before) = before {
            query.push(("beforeId", before.to_string()));
        }

        let req = self
            .http
            .get(self.url(&format!("/conversations/{conversation_id}/messages")))
            .query(&query);
        self.send(req).await
    }

    async fn send_message(
        &self,
        conversation_id: Uuid,
        content: String,
        attachments: Vec<Attachment>,
    ) -> Result<Message, ClientError> {
        let body = SendMessageRequest {
            content: Some(content),
            sender: Some(self.user_id),
            attachments,
        };
        let req = self
            .http
            .post(self.url(&format!("/conversations/{conversation_id}/messages")))
            .json(&body);
        self.send(req).await
    }

    async fn mark_read(&self, conversation_id: Uuid, message_ids: Vec<Uuid>) -> Result<(), ClientError> {
        let req = self
            .http
            .post(self.url(&format!("/conversations/{conversation_id}/messages/read")))
            .json(&MarkReadRequest { message_ids });
        let resp: MarkReadResponse = self.send(req).await?;
        if resp.success {
            Ok(())
        } else {
            Err(ClientError::Status(StatusCode::INTERNAL_SERVER_ERROR.as_u16()))
        }
    }
}
