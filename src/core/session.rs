//! Per-turn orchestration.
//!
//! [`ChatSession::respond`] drives one user turn and returns a stream of
//! conversation states: every fragment from the model produces the prior
//! history plus the in-progress turn, so a front end only has to render
//! whatever it receives until the stream ends.

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::archive::Archive;
use crate::core::chat_stream::{CompletionSource, FragmentStream};
use crate::core::message::{Conversation, Turn};
use crate::core::profile::Profile;
use crate::core::window::WindowManager;

pub type ConversationStream = BoxStream<'static, Conversation>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Validating,
    PersistingSnapshot,
    Trimming,
    Streaming,
    PersistingTranscript,
    Error,
}

fn enter(phase: TurnPhase) {
    debug!(?phase, "turn phase");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn error_turn(history: &Conversation, message: String, description: &str) -> Conversation {
    enter(TurnPhase::Error);
    warn!(error = description, "turn failed");
    history.with_turn(Turn::new(message, format!("Error: {description}")))
}

pub struct ChatSession {
    profile: Arc<Profile>,
    window: WindowManager,
    source: Arc<dyn CompletionSource>,
    archive: Archive,
    // One turn at a time per session.
    turn_lock: Arc<Mutex<()>>,
}

impl ChatSession {
    pub fn new(
        profile: Profile,
        window: WindowManager,
        source: Arc<dyn CompletionSource>,
        archive: Archive,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            window,
            source,
            archive,
            turn_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    /// Process one user turn against `history`.
    ///
    /// Blank input yields `history` once and ends without touching disk.
    /// Otherwise the stream yields the trimmed history plus the growing turn
    /// after every fragment, then the final conversation once the transcript
    /// has been written (or failed to write).
    pub fn respond(&self, message: impl Into<String>, history: Conversation) -> ConversationStream {
        let message = message.into();
        let profile = Arc::clone(&self.profile);
        let window = self.window.clone();
        let source = Arc::clone(&self.source);
        let archive = self.archive.clone();
        let turn_lock = Arc::clone(&self.turn_lock);

        let stream = async_stream::stream! {
            let _turn = turn_lock.lock_owned().await;

            enter(TurnPhase::Validating);
            if message.trim().is_empty() {
                enter(TurnPhase::Idle);
                yield history;
                return;
            }

            enter(TurnPhase::PersistingSnapshot);
            if let Err(err) = archive.save_training_snapshot(&message, &profile) {
                warn!(error = %err, "failed to save training snapshot");
            }

            enter(TurnPhase::Trimming);
            let trimmed = window.trim(&history, window.limits().max_tokens / 2);

            enter(TurnPhase::Streaming);
            let started = panic::catch_unwind(AssertUnwindSafe(|| {
                source.stream_completion(&message, &trimmed, &profile)
            }));
            let fragments: FragmentStream = match started {
                Ok(Ok(fragments)) => fragments,
                Ok(Err(err)) => {
                    yield error_turn(&history, message, &err.to_string());
                    return;
                }
                Err(payload) => {
                    let description = panic_message(payload.as_ref());
                    yield error_turn(&history, message, &description);
                    return;
                }
            };

            let mut fragments = AssertUnwindSafe(fragments).catch_unwind();
            let mut bot_message = String::new();
            while let Some(fragment) = fragments.next().await {
                match fragment {
                    Ok(fragment) => {
                        bot_message.push_str(&fragment);
                        yield trimmed.with_turn(Turn::new(message.clone(), bot_message.clone()));
                    }
                    Err(payload) => {
                        let description = panic_message(payload.as_ref());
                        yield error_turn(&history, message, &description);
                        return;
                    }
                }
            }

            let full_conversation = trimmed.with_turn(Turn::new(message, bot_message));
            enter(TurnPhase::PersistingTranscript);
            if let Err(err) = archive.save_conversation(&full_conversation) {
                warn!(error = %err, "failed to save conversation");
            }

            enter(TurnPhase::Idle);
            yield full_conversation;
        };

        Box::pin(stream)
    }
}
