//! Line-oriented interactive chat loop

use std::error::Error;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::core::archive::load_transcript;
use crate::core::message::Conversation;
use crate::core::profile::Profile;
use crate::core::session::{ChatSession, ConversationStream};

const PROMPT: &str = "You> ";
const BOT_LABEL: &str = "Bot> ";

#[derive(Debug, PartialEq, Eq)]
pub enum ReplInput<'a> {
    Empty,
    Clear,
    Quit,
    Message(&'a str),
}

impl<'a> ReplInput<'a> {
    pub fn parse(line: &'a str) -> Self {
        match line.trim() {
            "" => ReplInput::Empty,
            "/clear" => ReplInput::Clear,
            "/quit" | "/exit" => ReplInput::Quit,
            _ => ReplInput::Message(line),
        }
    }
}

/// Tracks how much of the bot reply has been written to the terminal.
#[derive(Debug, Default)]
pub struct ReplyPrinter {
    shown: String,
}

impl ReplyPrinter {
    /// Text to print so the terminal catches up with `reply`.
    ///
    /// Replies normally only grow; if one is replaced (an error after a
    /// partial answer) the new text starts on a fresh line.
    pub fn advance(&mut self, reply: &str) -> String {
        let delta = match reply.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest.to_string(),
            None => format!("\n{reply}"),
        };
        self.shown = reply.to_string();
        delta
    }
}

/// Drive one turn's stream to the end, echoing the reply as it grows.
/// Returns the last conversation state.
pub async fn stream_reply<W>(
    mut states: ConversationStream,
    out: &mut W,
) -> Result<Option<Conversation>, Box<dyn Error>>
where
    W: AsyncWrite + Unpin,
{
    let mut printer = ReplyPrinter::default();
    let mut latest = None;
    while let Some(state) = states.next().await {
        if let Some(turn) = state.last() {
            let delta = printer.advance(&turn.bot);
            if !delta.is_empty() {
                out.write_all(delta.as_bytes()).await?;
                out.flush().await?;
            }
        }
        latest = Some(state);
    }
    Ok(latest)
}

fn profile_header(profile: &Profile) -> String {
    format!(
        "Chatting as {} ({}, {})\nInterests: {}\nType /clear to reset the history, /quit to leave.",
        profile.name,
        profile.age,
        profile.profession,
        profile.interests_display()
    )
}

pub async fn run_chat(session: &ChatSession, resume: Option<&str>) -> Result<(), Box<dyn Error>> {
    let mut history = match resume {
        Some(name) => {
            let base_name = name.strip_suffix(".json").unwrap_or(name);
            let dir = &session.archive().dirs().conversations;
            let conversation = load_transcript(dir, base_name)?;
            println!("Resumed {} turns from {base_name}", conversation.len());
            conversation
        }
        None => Conversation::new(),
    };

    println!("{}", profile_header(session.profile()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let message = match ReplInput::parse(&line) {
            ReplInput::Empty => continue,
            ReplInput::Quit => break,
            ReplInput::Clear => {
                history = Conversation::new();
                println!("History cleared.");
                continue;
            }
            ReplInput::Message(message) => message,
        };

        stdout.write_all(BOT_LABEL.as_bytes()).await?;
        let states = session.respond(message, history.clone());
        if let Some(latest) = stream_reply(states, &mut stdout).await? {
            history = latest;
        }
        stdout.write_all(b"\n").await?;
    }

    Ok(())
}
