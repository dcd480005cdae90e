//! Per-request relay from the completion provider to a chat caller.
//!
//! The relay is the single consumer of the upstream increments and the single
//! producer into the caller's channel, so fragment order is preserved. Every
//! run ends with exactly one terminal event (`Done` or `Error`) unless the
//! caller went away first.

use crate::error::GatewayError;
use crate::models::{ChatRole, ChatTurn, StreamEvent};
use futures::{Stream, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Instruction turn placed ahead of every conversation.
pub const SYSTEM_PROMPT: &str = "You are the assistant of BlockStat Pro, a platform for \
forensic analysis of blockchain tokens. Be courteous and professional.

Conversation rules:
1. Keep the whole conversation in mind. Follow-up questions often refer to earlier turns \
(\"and +7 = ?\" after \"5+5=10\"); continue from where the user left off.
2. Refer back to earlier messages when it helps the answer.
3. Never dismiss what the user has written before.
4. Help users read token analyses, risk scores, holder concentration and wallet clusters, \
and explain blockchain security topics.
5. Keep answers concise but complete.";

/// Assemble the prompt sent upstream: the system turn, the caller's window
/// untouched, then the new user message.
pub fn build_prompt(history: Vec<ChatTurn>, message: &str) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + 2);
    turns.push(ChatTurn::new(ChatRole::System, SYSTEM_PROMPT));
    turns.extend(history);
    turns.push(ChatTurn::new(ChatRole::User, message));
    turns
}

/// Lifecycle of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Failed,
}

/// How a relay run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Upstream finished; `fragments` content events were forwarded.
    Completed { fragments: usize },
    /// Upstream failed; the caller received an in-band error event.
    Failed { message: String },
    /// The caller disconnected and the upstream was dropped.
    Cancelled { fragments: usize },
}

/// Forwards one upstream token stream to one caller.
#[derive(Debug)]
pub struct StreamRelay {
    idle_timeout: Option<Duration>,
    state: RelayState,
    forwarded: usize,
}

impl StreamRelay {
    /// Create an idle relay. `idle_timeout` bounds the wait for each increment.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            state: RelayState::Idle,
            forwarded: 0,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Drain `upstream` into `sink` until it ends, fails, or the sink closes.
    ///
    /// Empty increments are dropped. The upstream is dropped on return, which
    /// releases the provider connection.
    pub async fn run<S>(
        &mut self,
        mut upstream: S,
        sink: mpsc::Sender<StreamEvent>,
    ) -> RelayOutcome
    where
        S: Stream<Item = Result<String, GatewayError>> + Unpin,
    {
        self.state = RelayState::Streaming;
        let idle_timeout = self.idle_timeout;

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => None,
                next = next_increment(&mut upstream, idle_timeout) => Some(next),
            };

            let Some(next) = next else {
                return self.cancel();
            };

            match next {
                Ok(Some(Ok(text))) => {
                    if text.is_empty() {
                        continue;
                    }
                    debug!("Forwarding fragment of {} bytes", text.len());
                    if sink.send(StreamEvent::Content(text)).await.is_err() {
                        return self.cancel();
                    }
                    self.forwarded += 1;
                }
                Ok(Some(Err(e))) => {
                    warn!("Completion stream failed: {}", e);
                    return self.fail(e.public_message(), &sink).await;
                }
                Ok(None) => return self.complete(&sink).await,
                Err(_) => {
                    let seconds = idle_timeout.map(|d| d.as_secs_f64()).unwrap_or_default();
                    warn!("Completion stream idle for {:.1}s", seconds);
                    let message =
                        format!("Chatbot service stopped responding after {:.1}s", seconds);
                    return self.fail(message, &sink).await;
                }
            }
        }
    }

    async fn complete(&mut self, sink: &mpsc::Sender<StreamEvent>) -> RelayOutcome {
        if sink.send(StreamEvent::Done).await.is_err() {
            return self.cancel();
        }
        self.state = RelayState::Completed;
        info!("Chat stream completed with {} fragments", self.forwarded);
        RelayOutcome::Completed {
            fragments: self.forwarded,
        }
    }

    async fn fail(&mut self, message: String, sink: &mpsc::Sender<StreamEvent>) -> RelayOutcome {
        self.state = RelayState::Failed;
        if sink.send(StreamEvent::Error(message.clone())).await.is_err() {
            return self.cancel();
        }
        RelayOutcome::Failed { message }
    }

    fn cancel(&mut self) -> RelayOutcome {
        self.state = RelayState::Failed;
        info!(
            "Chat caller disconnected after {} fragments; dropping upstream",
            self.forwarded
        );
        RelayOutcome::Cancelled {
            fragments: self.forwarded,
        }
    }
}

/// Next upstream item, or `Err` when the idle timeout elapsed first.
async fn next_increment<S>(
    upstream: &mut S,
    idle_timeout: Option<Duration>,
) -> Result<Option<S::Item>, tokio::time::error::Elapsed>
where
    S: Stream + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, upstream.next()).await,
        None => Ok(upstream.next().await),
    }
}
