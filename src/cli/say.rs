//! One-shot "say" command

use std::error::Error;

use crate::cli::chat::stream_reply;
use crate::core::message::Conversation;
use crate::core::session::ChatSession;

pub async fn run_say(session: &ChatSession, prompt: Vec<String>) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: deepchat say <prompt>");
        std::process::exit(1);
    }

    let mut stdout = tokio::io::stdout();
    let states = session.respond(prompt, Conversation::new());
    stream_reply(states, &mut stdout).await?;
    println!();

    Ok(())
}
