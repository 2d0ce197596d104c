//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments, sets up logging, and
//! wires the resolved settings into a [`ChatSession`] for the chat commands.

pub mod auth;
pub mod chat;
pub mod say;

#[cfg(test)]
mod tests;

use std::error::Error;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::core::archive::{Archive, DataDirs};
use crate::core::chat_stream::ChatStreamService;
use crate::core::config::{Config, Settings, SettingsOverrides};
use crate::core::keyring::{ApiKeyStore, API_KEY_ENV};
use crate::core::profile::ProfileStore;
use crate::core::session::ChatSession;
use crate::core::tokenizer::Cl100kEstimate;
use crate::core::window::WindowManager;

const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Parser)]
#[command(name = "deepchat")]
#[command(version)]
#[command(about = "A streaming terminal chat client for DeepSeek-compatible APIs")]
#[command(
    long_about = "deepchat sends your messages to a chat-completions endpoint and prints \
the reply as it streams in. Every turn is saved under the data directory: a training \
snapshot before the request and the full transcript afterwards.\n\n\
Authentication:\n\
  Use 'deepchat auth' to store an API key in your system keyring.\n\n\
Environment Variables:\n\
  DEEPSEEK_API_KEY  API key (takes precedence over the keyring)\n\
  RUST_LOG          Log filter (defaults to warn)\n\n\
Commands inside the chat:\n\
  /clear            Start over with an empty history\n\
  /quit             Leave the chat"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Model to request
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Path to the profile JSON file
    #[arg(long, global = true, value_name = "FILE")]
    pub profile: Option<PathBuf>,

    /// Directory for transcripts and training snapshots
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Write logs to the given file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            model: self.model.clone(),
            profile_path: self.profile.clone(),
            data_dir: self.data_dir.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the interactive chat (default)
    Chat {
        /// Continue from a saved transcript, e.g. conversation_20240101_120000
        #[arg(long, value_name = "NAME")]
        resume: Option<String>,
    },
    /// Send a single prompt and print the streamed reply
    Say {
        /// The prompt to send
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Store the API key in the system keyring
    Auth,
    /// Remove the API key from the system keyring
    Deauth,
    /// Set a configuration value, or show all values when none is given
    Set {
        /// Configuration key to set
        key: Option<String>,
        /// Value to set for the key
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Show the resolved configuration
    Config,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.log.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async_main(args))
}

fn init_logging(log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    result.map_err(|err| err as Box<dyn Error>)
}

async fn async_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::default_path()?,
    };
    let overrides = args.overrides();

    match args.command.unwrap_or(Commands::Chat { resume: None }) {
        Commands::Auth => auth::run_auth(&ApiKeyStore::new()),
        Commands::Deauth => auth::run_deauth(&ApiKeyStore::new()),
        Commands::Set { key, value } => {
            let mut config = Config::load_from_path(&config_path)?;
            match key {
                Some(key) if !value.is_empty() => {
                    let value = value.join(" ");
                    if let Err(message) = config.set_value(&key, &value) {
                        eprintln!("❌ {message}");
                        std::process::exit(1);
                    }
                    config.save_to_path(&config_path)?;
                    println!("✅ Set {key} to: {value}");
                }
                _ => config.print_all(&config.resolve(&overrides)),
            }
            Ok(())
        }
        Commands::Unset { key } => {
            let mut config = Config::load_from_path(&config_path)?;
            if let Err(message) = config.unset_value(&key) {
                eprintln!("❌ {message}");
                std::process::exit(1);
            }
            config.save_to_path(&config_path)?;
            println!("✅ Unset {key}");
            Ok(())
        }
        Commands::Config => {
            let config = Config::load_from_path(&config_path)?;
            config.print_all(&config.resolve(&overrides));
            Ok(())
        }
        Commands::Say { prompt } => {
            let settings = load_settings(&config_path, &overrides)?;
            let api_key = resolve_api_key(&ApiKeyStore::new())?;
            let session = build_session(&settings, api_key)?;
            say::run_say(&session, prompt).await
        }
        Commands::Chat { resume } => {
            let settings = load_settings(&config_path, &overrides)?;
            let api_key = resolve_api_key(&ApiKeyStore::new())?;
            let session = build_session(&settings, api_key)?;
            chat::run_chat(&session, resume.as_deref()).await
        }
    }
}

fn load_settings(
    config_path: &Path,
    overrides: &SettingsOverrides,
) -> Result<Settings, Box<dyn Error>> {
    let config = Config::load_from_path(config_path).inspect_err(|err| {
        error!(error = %err, "failed to load configuration");
    })?;
    Ok(config.resolve(overrides))
}

fn resolve_api_key(key_store: &ApiKeyStore) -> Result<String, Box<dyn Error>> {
    match key_store.resolve()? {
        Some((api_key, source)) => {
            debug!(?source, "using API key");
            Ok(api_key)
        }
        None => {
            error!("no API key configured");
            Err(format!(
                "No API key found. Set {API_KEY_ENV} or run 'deepchat auth' to store one."
            )
            .into())
        }
    }
}

/// Assemble the orchestrator from resolved settings.
///
/// Creates the default profile and the data directories when missing.
pub fn build_session(settings: &Settings, api_key: String) -> Result<ChatSession, Box<dyn Error>> {
    let profile = ProfileStore::new(&settings.profile_path)
        .load_profile()
        .inspect_err(|err| error!(error = %err, "failed to load profile"))?;
    let window = WindowManager::new(Arc::new(Cl100kEstimate), settings.window);
    let source = ChatStreamService::new(settings, api_key, window.clone())?;
    let archive = Archive::new(DataDirs::ensure(&settings.data_dir), settings.chunk_chars);

    Ok(ChatSession::new(profile, window, Arc::new(source), archive))
}
