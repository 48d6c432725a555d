//! Palaver: a streaming chat client for LLM-backed assistant platforms.
//!
//! The library covers the protocol side of the client: decoding the SSE
//! response streams, reconciling events into transcript state, tracking
//! sub-task lifecycles, and splitting reasoning traces out of message text.
//! Rendering is the embedder's problem; the bundled binary is a thin CLI.

pub mod client;
pub mod config;
pub mod conversation;
pub mod protocol;
pub mod providers;
pub mod reasoning_parser;
pub mod reconciler;
pub mod session;
pub mod sse;
pub mod tasks;

pub use client::{AssistantClient, EventStream};
pub use conversation::Transcript;
pub use protocol::{ChatMessage, ChatRole, Citation, EventKind, StreamEvent};
pub use reasoning_parser::{split_reasoning, ReasoningSplit};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use session::{ChatSession, SessionUpdate, TaskSession, TaskUpdate};
pub use sse::StreamDecoder;
pub use tasks::{Task, TaskLifecycle, TaskStatus};
