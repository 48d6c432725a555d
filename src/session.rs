//! Per-session orchestration of in-flight streams.
//!
//! A [`ChatSession`] owns the transcript and at most one live generation
//! stream; submitting again while one is in flight aborts the old stream
//! first. A [`TaskSession`] does the same for one batch of sub-tasks. Both
//! drain their channel synchronously and fold events into state, so consumers
//! poll `drain_updates` from their render loop.

use tokio::sync::mpsc::error::TryRecvError;

use crate::client::{AssistantClient, EventStream};
use crate::conversation::Transcript;
use crate::protocol::{
    ChatMessage, ChatRole, ChatStreamRequest, EventKind, TaskSpec, TasksStreamRequest,
};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::tasks::{Task, TaskLifecycle};

/// What one drain pass observed on the chat stream.
#[derive(Clone, Debug)]
pub enum SessionUpdate {
    /// The open message changed; snapshot attached.
    Delta(ChatMessage),
    /// The server assigned a chat id; refresh the chat-history list.
    HistoryRefresh,
    /// An application error ended the turn's accumulation.
    Error(String),
    /// The stream closed; final frozen message attached.
    Done(ChatMessage),
}

pub struct ChatSession {
    pub transcript: Transcript,
    reconciler: Reconciler,
    stream: Option<EventStream>,
    ticker: Option<tokio::task::AbortHandle>,
    pub streaming: bool,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            transcript: Transcript::new(),
            reconciler: Reconciler::new(),
            stream: None,
            ticker: None,
            streaming: false,
        }
    }

    /// Submit one user turn. Any in-flight generation is cancelled first: at
    /// most one stream is ever active per session. Returns the trace id sent
    /// with the request.
    ///
    /// A transport failure (request rejected, non-OK status) returns `Err`
    /// and leaves the transcript untouched.
    pub async fn start_turn(
        &mut self,
        client: &AssistantClient,
        message: String,
        images: Option<Vec<String>>,
        agent_id: Option<String>,
        provider: &str,
        model: &str,
    ) -> Result<String, String> {
        self.cancel();

        let trace_id = uuid::Uuid::new_v4().to_string();
        let request = ChatStreamRequest {
            message: message.clone(),
            images: images.clone(),
            agent_id,
            chat_id: self.transcript.chat_id().map(str::to_string),
            provider: provider.to_string(),
            model: model.to_string(),
        };
        let stream = client.chat_stream(&request, &trace_id).await?;

        self.install_turn(message, images, stream);
        Ok(trace_id)
    }

    /// Wire an already-open stream into the session. Split out of
    /// [`start_turn`](Self::start_turn) so the drain path can be exercised
    /// without a server.
    pub(crate) fn install_turn(
        &mut self,
        message: String,
        images: Option<Vec<String>>,
        stream: EventStream,
    ) {
        let mut user = ChatMessage::new(ChatRole::User, message);
        user.images = images;
        user.context_id = self.transcript.chat_id().map(str::to_string);
        self.transcript.push(user);
        self.transcript
            .push(ChatMessage::new(ChatRole::Assistant, String::new()));

        self.reconciler.begin_turn();
        self.stream = Some(stream);
        self.streaming = true;
    }

    /// Register the elapsed-time ticker for the current turn; it is aborted
    /// when the turn ends or is cancelled.
    pub fn set_ticker(&mut self, ticker: tokio::task::AbortHandle) {
        if let Some(old) = self.ticker.replace(ticker) {
            old.abort();
        }
    }

    /// Abort the in-flight generation. Already-applied transcript state stays
    /// exactly as it is; the elapsed ticker is released.
    pub fn cancel(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
        self.release_ticker();
        self.streaming = false;
    }

    /// Drain every event currently queued on the stream, in arrival order,
    /// and fold each into the transcript.
    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        let mut events = Vec::new();
        let mut closed = false;
        match self.stream.as_mut() {
            Some(stream) => loop {
                match stream.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            },
            None => return Vec::new(),
        }

        let mut updates = Vec::new();
        for event in events {
            match self.reconciler.apply(&event, &mut self.transcript) {
                ReconcileOutcome::ChatIdAssigned => updates.push(SessionUpdate::HistoryRefresh),
                ReconcileOutcome::Updated => {
                    if let Some(msg) = self.transcript.last() {
                        updates.push(SessionUpdate::Delta(msg.clone()));
                    }
                }
                ReconcileOutcome::Errored => {
                    if let Some(msg) = self.transcript.last() {
                        let error = msg.error.clone().unwrap_or_default();
                        updates.push(SessionUpdate::Delta(msg.clone()));
                        updates.push(SessionUpdate::Error(error));
                    }
                }
                ReconcileOutcome::None => {}
            }
        }

        if closed {
            self.stream = None;
            self.streaming = false;
            self.release_ticker();
            if let Some(msg) = self.transcript.last_assistant_mut() {
                msg.done = true;
                updates.push(SessionUpdate::Done(msg.clone()));
            }
        }

        updates
    }

    fn release_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

/// What one drain pass observed on the tasks stream.
#[derive(Clone, Debug)]
pub enum TaskUpdate {
    /// One task's status changed; snapshot attached.
    Status(Task),
    /// The authoritative batch summary arrived; full snapshot attached.
    BatchDone(Vec<Task>),
    /// A terminal error record on the tasks stream.
    Error(String),
}

pub struct TaskSession {
    lifecycle: TaskLifecycle,
    stream: Option<EventStream>,
    pub streaming: bool,
}

impl TaskSession {
    /// Submit a batch of sub-tasks under a parent turn. Specs without an id
    /// are assigned one before submission so every later event correlates.
    pub async fn start(
        client: &AssistantClient,
        parent_chat_id: String,
        mut specs: Vec<TaskSpec>,
    ) -> Result<Self, String> {
        for spec in &mut specs {
            if spec.id.is_none() {
                spec.id = Some(uuid::Uuid::new_v4().to_string());
            }
        }

        let trace_id = uuid::Uuid::new_v4().to_string();
        let request = TasksStreamRequest {
            parent_chat_id: parent_chat_id.clone(),
            tasks: specs.clone(),
        };
        let stream = client.tasks_stream(&request, &trace_id).await?;

        Ok(Self::from_parts(
            TaskLifecycle::new(parent_chat_id, trace_id, &specs),
            stream,
        ))
    }

    pub(crate) fn from_parts(lifecycle: TaskLifecycle, stream: EventStream) -> Self {
        Self {
            lifecycle,
            stream: Some(stream),
            streaming: true,
        }
    }

    pub fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    /// Request cancellation of one task; the effect arrives later on the
    /// stream as `failed`/`cancelled`.
    pub async fn cancel_task(
        &self,
        client: &AssistantClient,
        task_id: &str,
    ) -> Result<(), String> {
        client
            .cancel_task(self.lifecycle.parent_chat_id(), task_id)
            .await
    }

    /// Stop consuming the stream; task state stays as-is.
    pub fn cancel_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
        self.streaming = false;
    }

    /// Drain queued task events in arrival order and fold them into the
    /// lifecycle map.
    pub fn drain_updates(&mut self) -> Vec<TaskUpdate> {
        let mut events = Vec::new();
        let mut closed = false;
        match self.stream.as_mut() {
            Some(stream) => loop {
                match stream.try_recv() {
                    Ok(event) => events.push(event),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            },
            None => return Vec::new(),
        }

        let mut updates = Vec::new();
        for event in events {
            match event {
                EventKind::TaskEvent {
                    task_id,
                    status,
                    error,
                    trace_id,
                } => {
                    let changed = self.lifecycle.apply_event(
                        &task_id,
                        status,
                        error.as_deref(),
                        trace_id.as_deref(),
                    );
                    if changed {
                        if let Some(task) = self.lifecycle.task(&task_id) {
                            updates.push(TaskUpdate::Status(task.clone()));
                        }
                    }
                }
                EventKind::TaskResult { result, trace_id } => {
                    self.lifecycle.apply_result(&result, trace_id.as_deref());
                    updates.push(TaskUpdate::BatchDone(self.lifecycle.snapshot()));
                }
                EventKind::StreamError(error) => updates.push(TaskUpdate::Error(error)),
                // Chat-shaped records have no business on the tasks stream.
                _ => {}
            }
        }

        if closed {
            self.stream = None;
            self.streaming = false;
        }

        updates
    }

    /// Run the client-side deadline watchdog, reporting any tasks it expired.
    pub fn enforce_deadlines(&mut self, now_ts: i64) -> Vec<TaskUpdate> {
        self.lifecycle
            .enforce_deadlines(now_ts)
            .into_iter()
            .filter_map(|id| self.lifecycle.task(&id).cloned())
            .map(TaskUpdate::Status)
            .collect()
    }
}
