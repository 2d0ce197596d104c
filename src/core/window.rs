//! Context window management: history trimming and request assembly.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::ChatMessage;
use crate::core::message::{Conversation, Turn};
use crate::core::profile::Profile;
use crate::core::tokenizer::TokenCounter;

/// What to do with the newest user message when the budget is nearly spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NewMessagePolicy {
    /// Reserve room for the new message first and always send it.
    #[default]
    AlwaysInclude,
    /// Append the new message only if it still fits after history.
    DropWhenOverBudget,
}

impl NewMessagePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            NewMessagePolicy::AlwaysInclude => "always-include",
            NewMessagePolicy::DropWhenOverBudget => "drop-when-over-budget",
        }
    }
}

impl std::str::FromStr for NewMessagePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "always-include" => Ok(NewMessagePolicy::AlwaysInclude),
            "drop-when-over-budget" => Ok(NewMessagePolicy::DropWhenOverBudget),
            other => Err(format!(
                "invalid new message policy: {other} (expected always-include or drop-when-over-budget)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    /// Token ceiling for an outbound request.
    pub max_tokens: usize,
    /// Most recent turns considered when building a request.
    pub max_history_items: usize,
    pub new_message_policy: NewMessagePolicy,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            max_history_items: 20,
            new_message_policy: NewMessagePolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct WindowManager {
    counter: Arc<dyn TokenCounter>,
    limits: WindowLimits,
}

impl WindowManager {
    pub fn new(counter: Arc<dyn TokenCounter>, limits: WindowLimits) -> Self {
        Self { counter, limits }
    }

    pub fn limits(&self) -> WindowLimits {
        self.limits
    }

    pub fn counter(&self) -> &dyn TokenCounter {
        self.counter.as_ref()
    }

    fn turn_cost(&self, turn: &Turn) -> usize {
        self.counter.count_tokens(&turn.user) + self.counter.count_tokens(&turn.bot)
    }

    /// Keep the longest run of recent turns whose combined cost fits `max_tokens`.
    ///
    /// Walks from the newest turn backwards and stops at the first turn that
    /// would overflow; nothing older than that turn is kept even if it fits.
    pub fn trim(&self, conversation: &Conversation, max_tokens: usize) -> Conversation {
        let mut total = 0usize;
        let mut keep_from = conversation.len();

        for (idx, turn) in conversation.iter().enumerate().rev() {
            let cost = self.turn_cost(turn);
            if total + cost > max_tokens {
                break;
            }
            total += cost;
            keep_from = idx;
        }

        conversation[keep_from..].iter().cloned().collect()
    }

    pub fn system_prompt(profile: &Profile) -> String {
        format!(
            "你正在与{}对话:\n年龄: {}\n职业: {}\n兴趣: {}",
            profile.name,
            profile.age,
            profile.profession,
            profile.interests_display()
        )
    }

    /// Build the outbound message list: system prompt, bounded recent history,
    /// then the new user message according to the configured policy.
    pub fn prepare_messages(
        &self,
        conversation: &Conversation,
        profile: &Profile,
        new_message: &str,
    ) -> Vec<ChatMessage> {
        let limits = self.limits;
        let system = ChatMessage::system(Self::system_prompt(profile));
        let new_cost = self.counter.count_tokens(new_message);

        let mut tokens_used = self.counter.count_tokens(&system.content);
        if limits.new_message_policy == NewMessagePolicy::AlwaysInclude {
            tokens_used += new_cost;
        }

        let mut messages = vec![system];
        let window_start = conversation.len().saturating_sub(limits.max_history_items);

        for turn in &conversation[window_start..] {
            let cost = self.turn_cost(turn);
            if tokens_used + cost > limits.max_tokens {
                break;
            }
            messages.push(ChatMessage::user(turn.user.clone()));
            messages.push(ChatMessage::assistant(turn.bot.clone()));
            tokens_used += cost;
        }

        match limits.new_message_policy {
            NewMessagePolicy::AlwaysInclude => {
                messages.push(ChatMessage::user(new_message));
            }
            NewMessagePolicy::DropWhenOverBudget => {
                if tokens_used + new_cost < limits.max_tokens {
                    messages.push(ChatMessage::user(new_message));
                }
            }
        }

        messages
    }
}
