use std::collections::HashMap;
use std::env;
use std::fmt;

use crate::providers::KNOWN_PROVIDERS;

/// Per-invocation provider secrets, keyed by provider id.
///
/// Never persisted. `Debug` output lists provider ids only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials {
    secrets: HashMap<String, String>,
}

impl ProviderCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Blank secrets are ignored.
    pub fn with(mut self, provider: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(provider, secret);
        self
    }

    pub fn insert(&mut self, provider: impl Into<String>, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return;
        }
        self.secrets
            .insert(provider.into().to_lowercase(), secret.trim().to_string());
    }

    pub fn get(&self, provider: &str) -> Option<&str> {
        self.secrets
            .get(&provider.to_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.get(provider).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn provider_ids(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    /// Overlay `other` on top of `self`; entries in `other` win.
    pub fn merged(mut self, other: ProviderCredentials) -> Self {
        self.secrets.extend(other.secrets);
        self
    }

    /// Read `<PROVIDER>_API_KEY` for every known provider, e.g.
    /// `TWOCAPTCHA_API_KEY`, `CAPSOLVER_API_KEY`.
    pub fn from_env() -> Self {
        let mut credentials = Self::new();
        for provider in KNOWN_PROVIDERS {
            if let Ok(secret) = env::var(env_key(provider)) {
                credentials.insert(*provider, secret);
            }
        }
        credentials
    }

    /// Parse a single `provider=secret` pair as given on the command line.
    pub fn parse_pair(pair: &str) -> std::result::Result<(String, String), String> {
        let (provider, secret) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected provider=key, got '{pair}'"))?;
        let provider = provider.trim();
        let secret = secret.trim();
        if provider.is_empty() || secret.is_empty() {
            return Err(format!("Expected provider=key, got '{pair}'"));
        }
        Ok((provider.to_lowercase(), secret.to_string()))
    }
}

fn env_key(provider: &str) -> String {
    let stem: String = provider
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase();
    // Env var names cannot start with a digit: "2captcha" -> "TWOCAPTCHA"
    let stem = match stem.strip_prefix('2') {
        Some(rest) => format!("TWO{rest}"),
        None => stem,
    };
    format!("{stem}_API_KEY")
}

impl FromIterator<(String, String)> for ProviderCredentials {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut credentials = Self::new();
        for (provider, secret) in iter {
            credentials.insert(provider, secret);
        }
        credentials
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&str> = self.provider_ids().collect();
        ids.sort_unstable();
        f.debug_struct("ProviderCredentials")
            .field("providers", &ids)
            .finish()
    }
}
