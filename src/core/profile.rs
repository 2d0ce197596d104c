//! Persona record injected into every system prompt.
//!
//! The profile lives in a JSON file shaped as `{"my_profile": {...}}`. A
//! missing file is not an error: the default profile is written and returned
//! so a first run works without setup.

use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub age: i64,
    pub profession: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub memory: Vec<serde_json::Value>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: "用户".to_string(),
            age: 20,
            profession: "未设置".to_string(),
            interests: vec!["未设置".to_string()],
            memory: Vec::new(),
        }
    }
}

impl Profile {
    /// Interests joined the way the system prompt and the CLI header show them.
    pub fn interests_display(&self) -> String {
        self.interests.join(", ")
    }
}

#[derive(Serialize, Deserialize)]
struct ProfileFile {
    my_profile: Profile,
}

/// Errors that can occur when loading the profile.
#[derive(Debug)]
pub enum ProfileError {
    /// The profile file exists but could not be read.
    Read { path: PathBuf, source: io::Error },
    /// The profile file is not valid profile JSON.
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// The default profile could not be written on first run.
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileError::Read { path, source } => {
                write!(f, "Failed to read profile at {}: {}", path.display(), source)
            }
            ProfileError::Parse { path, source } => {
                write!(f, "Failed to parse profile at {}: {}", path.display(), source)
            }
            ProfileError::Write { path, source } => write!(
                f,
                "Failed to write default profile to {}: {}",
                path.display(),
                source
            ),
        }
    }
}

impl StdError for ProfileError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ProfileError::Read { source, .. } => Some(source),
            ProfileError::Parse { source, .. } => Some(source),
            ProfileError::Write { source, .. } => Some(source),
        }
    }
}

pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the profile, creating the default file when it does not exist.
    pub fn load_profile(&self) -> Result<Profile, ProfileError> {
        let result = self.load_or_create();
        if let Err(err) = &result {
            error!(error = %err, "profile unavailable");
        }
        result
    }

    fn load_or_create(&self) -> Result<Profile, ProfileError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(source) if source.kind() == io::ErrorKind::NotFound => {
                let profile = Profile::default();
                self.write_default(&profile)?;
                info!(path = %self.path.display(), "created default profile");
                return Ok(profile);
            }
            Err(source) => {
                return Err(ProfileError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let file: ProfileFile =
            serde_json::from_str(&contents).map_err(|source| ProfileError::Parse {
                path: self.path.clone(),
                source,
            })?;
        Ok(file.my_profile)
    }

    fn write_default(&self, profile: &Profile) -> Result<(), ProfileError> {
        let wrap = |source: io::Error| ProfileError::Write {
            path: self.path.clone(),
            source,
        };

        let parent = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(wrap)?;
        }

        let contents = serde_json::to_string_pretty(&ProfileFile {
            my_profile: profile.clone(),
        })
        .map_err(|err| wrap(io::Error::other(err)))?;

        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new_in("."),
        }
        .map_err(wrap)?;
        temp_file.write_all(contents.as_bytes()).map_err(wrap)?;
        temp_file.as_file_mut().sync_all().map_err(wrap)?;
        temp_file
            .persist(&self.path)
            .map_err(|err| wrap(err.error))?;
        Ok(())
    }
}
