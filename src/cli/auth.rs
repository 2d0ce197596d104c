//! Keyring management for the API key

use std::error::Error;
use std::io::{self, BufRead, Write};

use crate::core::keyring::ApiKeyStore;

pub fn run_auth(store: &ApiKeyStore) -> Result<(), Box<dyn Error>> {
    println!("🔐 deepchat authentication setup");
    print!("Enter your API key: ");
    io::stdout().flush()?;

    let key = read_key(io::stdin().lock())?;
    if let Err(err) = store.set_key(&key) {
        eprintln!("❌ Authentication failed: {err}");
        if err.is_recoverable() {
            eprintln!("The system keyring is unavailable; export DEEPSEEK_API_KEY instead.");
        }
        std::process::exit(1);
    }
    println!("✅ API key saved to the system keyring");
    Ok(())
}

pub fn run_deauth(store: &ApiKeyStore) -> Result<(), Box<dyn Error>> {
    if store.remove_key()? {
        println!("✅ Removed the stored API key");
    } else {
        println!("No API key was stored");
    }
    Ok(())
}

fn read_key<R: BufRead>(mut reader: R) -> Result<String, Box<dyn Error>> {
    let mut input = String::new();
    reader.read_line(&mut input)?;
    let key = input.trim();
    if key.is_empty() {
        return Err("API key cannot be empty".into());
    }
    Ok(key.to_string())
}
