use thiserror::Error;
use tracing::{info, warn};

const SERVICE: &str = "autosync";

/// Install the platform credential store. Call once at startup, before any
/// keyring access.
pub fn init_keyring() {
    #[cfg(target_os = "macos")]
    {
        match apple_native_keyring_store::protected::Store::new() {
            Ok(store) => {
                keyring_core::set_default_store(store);
                info!("Keyring initialized (protected store)");
            }
            Err(e) => warn!("Failed to create protected keyring store: {e}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Keyring error: {0}")]
    Keyring(#[from] keyring_core::Error),
    #[error("Cannot modify keys in dev mode (set {0} in the environment instead)")]
    DevMode(&'static str),
}

/// Manages secrets (GitHub write credential, cached Google identity) with
/// lazy reads.
///
/// In dev mode, reads from environment variables.
/// In prod mode, reads from the OS keyring. Entries are namespaced by the
/// target repository so several sync targets can keep independent credentials.
///
/// `new()` does no I/O; keyring reads happen lazily in `get_*` methods.
#[derive(Clone, Debug)]
pub struct KeyService {
    dev_mode: bool,
    namespace: String,
}

impl KeyService {
    pub fn new(dev_mode: bool, namespace: impl Into<String>) -> Self {
        Self {
            dev_mode,
            namespace: namespace.into(),
        }
    }

    pub fn is_dev_mode(&self) -> bool {
        self.dev_mode
    }

    fn account(&self, base: &str) -> String {
        format!("{}:{}", base, self.namespace)
    }

    fn get(&self, env_var: &str, base: &str) -> Option<String> {
        if self.dev_mode {
            std::env::var(env_var).ok().filter(|k| !k.is_empty())
        } else {
            keyring_core::Entry::new(SERVICE, &self.account(base))
                .ok()
                .and_then(|e| e.get_password().ok())
                .filter(|k| !k.is_empty())
        }
    }

    /// Errors in dev mode: env vars set here would not outlive the process.
    fn set(&self, env_var: &'static str, base: &str, value: &str) -> Result<(), KeyError> {
        if self.dev_mode {
            return Err(KeyError::DevMode(env_var));
        }
        keyring_core::Entry::new(SERVICE, &self.account(base))?.set_password(value)?;
        Ok(())
    }

    fn delete(&self, env_var: &'static str, base: &str) -> Result<(), KeyError> {
        if self.dev_mode {
            return Err(KeyError::DevMode(env_var));
        }
        match keyring_core::Entry::new(SERVICE, &self.account(base))?.delete_credential() {
            Ok(()) => {
                info!("Deleted {} from keyring", base);
                Ok(())
            }
            Err(keyring_core::Error::NoEntry) => {
                warn!("Tried to delete {} but none was stored", base);
                Ok(())
            }
            Err(e) => Err(KeyError::Keyring(e)),
        }
    }

    /// Read the GitHub personal access token used for writes.
    ///
    /// Dev mode: reads `AUTOSYNC_GITHUB_PAT`.
    /// Prod mode: reads from the OS keyring.
    pub fn get_github_token(&self) -> Option<String> {
        self.get("AUTOSYNC_GITHUB_PAT", "github_pat")
    }

    pub fn set_github_token(&self, value: &str) -> Result<(), KeyError> {
        self.set("AUTOSYNC_GITHUB_PAT", "github_pat", value)?;
        info!("GitHub token saved");
        Ok(())
    }

    pub fn delete_github_token(&self) -> Result<(), KeyError> {
        self.delete("AUTOSYNC_GITHUB_PAT", "github_pat")
    }

    /// Read the serialized cached identity (JSON). None if never signed in.
    ///
    /// Dev mode: reads `AUTOSYNC_IDENTITY`.
    pub fn get_identity_json(&self) -> Option<String> {
        self.get("AUTOSYNC_IDENTITY", "google_identity")
    }

    pub fn set_identity_json(&self, json: &str) -> Result<(), KeyError> {
        self.set("AUTOSYNC_IDENTITY", "google_identity", json)
    }

    pub fn delete_identity(&self) -> Result<(), KeyError> {
        self.delete("AUTOSYNC_IDENTITY", "google_identity")
    }
}
