//! API keys in the system keychain
//!
//! One keychain entry per provider under the `fixloop` service. Environment
//! variables always win; the keychain is the fallback for people who do not
//! want keys in their shell profile.

use keyring::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

const KEYRING_SERVICE: &str = "fixloop";

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("FIXLOOP_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn entry(provider: &str) -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, provider)
}

/// Warn about keychain errors only once per session
fn warn_keychain_error_once(provider: &str, err: &keyring::Error) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    warn!(
        "Couldn't access system keychain for {}: {}. Set the provider's API key environment variable instead.",
        provider, err
    );
}

/// Stored key for `provider`, `None` when absent or the keychain is unavailable.
pub fn get_api_key(provider: &str) -> Option<String> {
    if keyring_disabled() {
        return None;
    }
    let result = entry(provider).and_then(|e| e.get_password());
    match result {
        Ok(key) if !key.trim().is_empty() => Some(key),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(err) => {
            warn_keychain_error_once(provider, &err);
            None
        }
    }
}

/// Store `key` for `provider`, verifying it reads back.
pub fn set_api_key(provider: &str, key: &str) -> Result<(), String> {
    if keyring_disabled() {
        return Err("System keychain is disabled (FIXLOOP_DISABLE_KEYRING)".to_string());
    }
    let entry = entry(provider).map_err(|e| e.to_string())?;
    entry
        .set_password(key)
        .map_err(|e| format!("Failed to store API key in system keychain: {}", e))?;

    match entry.get_password() {
        Ok(stored) if stored == key => Ok(()),
        Ok(_) => Err("API key verification failed: stored key doesn't match".to_string()),
        Err(err) => Err(format!(
            "API key verification failed: couldn't read back from keychain ({})",
            err
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyring_disabled_under_test() {
        assert!(get_api_key("openai").is_none());
        assert!(set_api_key("openai", "sk-test").is_err());
    }
}
