//! HTTP client for the assistant platform.
//!
//! The two streaming endpoints return an [`EventStream`]: a spawned reader
//! task feeds the response body through the SSE decoder and forwards typed
//! events over an unbounded channel. Everything else is thin REST.

use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::{
    CancelTaskRequest, ChatMessage, ChatStreamRequest, EventKind, TasksStreamRequest,
};
use crate::sse::StreamDecoder;

/// Header carrying the caller-supplied trace id, echoed back in every task
/// event of the response stream.
pub const TRACE_HEADER: &str = "x-trace-id";

pub struct AssistantClient {
    base_url: String,
    http: reqwest::Client,
    api_key: String,
}

/// A live SSE response. Dropping the receiver stops the reader task the next
/// time it tries to forward an event; [`abort`](EventStream::abort) stops it
/// immediately.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventKind>,
    abort: tokio::task::AbortHandle,
}

impl EventStream {
    pub(crate) fn from_parts(
        rx: mpsc::UnboundedReceiver<EventKind>,
        abort: tokio::task::AbortHandle,
    ) -> Self {
        Self { rx, abort }
    }

    pub fn try_recv(&mut self) -> Result<EventKind, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    pub async fn recv(&mut self) -> Option<EventKind> {
        self.rx.recv().await
    }

    /// Stop reading the response body. Events already delivered stay applied;
    /// nothing is rolled back.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChatSummary {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub message_count: Option<usize>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct StoredChat {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Serialize)]
struct TruncateChatRequest {
    keep: usize,
}

#[derive(Serialize)]
struct ToggleToolRequest {
    enabled: bool,
}

impl AssistantClient {
    pub fn new(base_url: String, http: reqwest::Client, api_key: String) -> Self {
        Self {
            base_url,
            http,
            api_key,
        }
    }

    /// Open the chat stream for one turn.
    pub async fn chat_stream(
        &self,
        request: &ChatStreamRequest,
        trace_id: &str,
    ) -> Result<EventStream, String> {
        self.open_stream("/v1/chat/stream", request, trace_id).await
    }

    /// Open the progress stream for a batch of sub-tasks.
    pub async fn tasks_stream(
        &self,
        request: &TasksStreamRequest,
        trace_id: &str,
    ) -> Result<EventStream, String> {
        self.open_stream("/v1/tasks/stream", request, trace_id)
            .await
    }

    /// Request cancellation of one task. Fire-and-forget: the effect shows up
    /// later on the task stream as `status: failed, error: cancelled`.
    pub async fn cancel_task(&self, parent_chat_id: &str, task_id: &str) -> Result<(), String> {
        let body = CancelTaskRequest {
            parent_chat_id: parent_chat_id.to_string(),
            task_id: task_id.to_string(),
        };
        let response = self
            .request(reqwest::Method::POST, "/v1/tasks/cancel")
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("Failed to send cancel request: {}", e))?;
        self.check_status(response).await.map(|_| ())
    }

    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>, String> {
        self.get_json("/v1/chats").await
    }

    pub async fn get_chat(&self, id: &str) -> Result<StoredChat, String> {
        self.get_json(&format!("/v1/chats/{}", id)).await
    }

    pub async fn delete_chat(&self, id: &str) -> Result<(), String> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/v1/chats/{}", id))
            .send()
            .await
            .map_err(|e| format!("Failed to delete chat: {}", e))?;
        self.check_status(response).await.map(|_| ())
    }

    /// Drop every message after the first `keep` entries of a stored chat.
    pub async fn truncate_chat(&self, id: &str, keep: usize) -> Result<(), String> {
        let response = self
            .request(reqwest::Method::POST, &format!("/v1/chats/{}/truncate", id))
            .json(&TruncateChatRequest { keep })
            .send()
            .await
            .map_err(|e| format!("Failed to truncate chat: {}", e))?;
        self.check_status(response).await.map(|_| ())
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>, String> {
        self.get_json("/v1/agents").await
    }

    pub async fn list_mcp_tools(&self) -> Result<Vec<McpToolInfo>, String> {
        self.get_json("/v1/mcp/tools").await
    }

    pub async fn toggle_mcp_tool(&self, name: &str, enabled: bool) -> Result<(), String> {
        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/mcp/tools/{}/toggle", name),
            )
            .json(&ToggleToolRequest { enabled })
            .send()
            .await
            .map_err(|e| format!("Failed to toggle tool: {}", e))?;
        self.check_status(response).await.map(|_| ())
    }

    async fn open_stream<T: Serialize>(
        &self,
        path: &str,
        request: &T,
        trace_id: &str,
    ) -> Result<EventStream, String> {
        let response = self
            .request(reqwest::Method::POST, path)
            .header(TRACE_HEADER, trace_id)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("Failed to send request: {}", e))?;
        let response = self.check_status(response).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut decoder = StreamDecoder::new();
            while let Some(item) = stream.next().await {
                let chunk = match item {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        eprintln!("[CLIENT] Stream read failed: {}", e);
                        break;
                    }
                };
                for event in decoder.push(&chunk) {
                    if tx.send(event).is_err() {
                        // Receiver went away; stop reading.
                        return;
                    }
                }
            }
            decoder.finish();
        });

        Ok(EventStream::from_parts(rx, task.abort_handle()))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let mut builder = self.http.request(method, &url);
        if !self.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        }
        builder
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, String> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| format!("Failed to send request: {}", e))?;
        let response = self.check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| format!("Failed to decode response: {}", e))
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, String> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(format!("Server returned {}: {}", status, text))
    }
}
