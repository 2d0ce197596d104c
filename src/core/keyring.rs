use keyring::Entry;
use std::error::Error;
use std::fmt;
use tracing::debug;

const KEYRING_SERVICE: &str = "deepchat";
const KEYRING_USER: &str = "api-key";

/// Environment variable consulted before the keyring.
pub const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (a locked keychain, no secret service on the
/// bus). Permanent errors surface the underlying cause directly.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "keyring unavailable: {}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Where an API key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeySource {
    Environment,
    Keyring,
}

/// Stores the single API key used for the chat endpoint.
#[derive(Debug, Clone, Copy)]
pub struct ApiKeyStore {
    use_keyring: bool,
}

impl Default for ApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiKeyStore {
    pub fn new() -> Self {
        Self { use_keyring: true }
    }

    /// Construct a store that never touches the keyring (useful for tests)
    pub fn new_with_keyring(use_keyring: bool) -> Self {
        Self { use_keyring }
    }

    /// Look up the key: a non-blank environment variable wins over the keyring.
    pub fn resolve(&self) -> Result<Option<(String, ApiKeySource)>, KeyringAccessError> {
        self.resolve_with_env(std::env::var(API_KEY_ENV).ok())
    }

    fn resolve_with_env(
        &self,
        env_value: Option<String>,
    ) -> Result<Option<(String, ApiKeySource)>, KeyringAccessError> {
        if let Some(key) = env_value.filter(|value| !value.trim().is_empty()) {
            debug!("using API key from {API_KEY_ENV}");
            return Ok(Some((key.trim().to_string(), ApiKeySource::Environment)));
        }
        Ok(self
            .get_key()?
            .map(|key| (key, ApiKeySource::Keyring)))
    }

    pub fn get_key(&self) -> Result<Option<String>, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(None);
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        match entry.get_password() {
            Ok(key) => {
                debug!("using API key from keyring");
                Ok(Some(key))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(err) => Err(KeyringAccessError::from(err)),
        }
    }

    pub fn set_key(&self, key: &str) -> Result<(), KeyringAccessError> {
        if !self.use_keyring {
            return Ok(());
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        entry.set_password(key).map_err(KeyringAccessError::from)
    }

    /// Returns whether a stored key was actually removed.
    pub fn remove_key(&self) -> Result<bool, KeyringAccessError> {
        if !self.use_keyring {
            return Ok(false);
        }

        let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
        match entry.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(err) => Err(KeyringAccessError::from(err)),
        }
    }
}
