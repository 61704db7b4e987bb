//! Credential providers injected into the poller and the resolver.
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::config::Config;

/// Source of the viewer's bearer token. `None` means "signed out".
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Option<String>;
}

fn non_blank(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(non_blank(&token.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticToken {
    fn credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Token that can be swapped at runtime (sign in / sign out).
#[derive(Debug, Clone, Default)]
pub struct SharedToken(Arc<RwLock<Option<String>>>);

impl SharedToken {
    pub fn sign_in(&self, token: impl Into<String>) {
        let token = non_blank(&token.into());
        match self.0.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    pub fn sign_out(&self) {
        match self.0.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
    }
}

impl CredentialProvider for SharedToken {
    fn credential(&self) -> Option<String> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvToken {
    fn credential(&self) -> Option<String> {
        std::env::var(&self.var).ok().and_then(|v| non_blank(&v))
    }
}

/// Token stored in a file; re-read on every call so a fresh login is picked up.
#[derive(Debug, Clone)]
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for TokenFile {
    fn credential(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(content) => non_blank(&content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!(?err, path = %self.path.display(), "failed to read token file");
                None
            }
        }
    }
}

/// First provider that yields a token wins.
#[derive(Default)]
pub struct FirstOf(Vec<Arc<dyn CredentialProvider>>);

impl FirstOf {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self(providers)
    }
}

impl CredentialProvider for FirstOf {
    fn credential(&self) -> Option<String> {
        self.0.iter().find_map(|p| p.credential())
    }
}

/// Env var first, then token file, as configured.
pub fn from_config(cfg: &Config) -> Arc<dyn CredentialProvider> {
    let mut providers: Vec<Arc<dyn CredentialProvider>> = Vec::new();
    if let Some(var) = &cfg.auth.token_env {
        providers.push(Arc::new(EnvToken::new(var.clone())));
    }
    if let Some(file) = &cfg.auth.token_file {
        providers.push(Arc::new(TokenFile::new(file)));
    }
    Arc::new(FirstOf::new(providers))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn blank_tokens_count_as_absent() {
        assert_eq!(StaticToken::new("   ").credential(), None);
        assert_eq!(StaticToken::new(" abc \n").credential().as_deref(), Some("abc"));
    }

    #[test]
    fn shared_token_sign_in_and_out() {
        let token = SharedToken::default();
        assert_eq!(token.credential(), None);
        token.sign_in("t-1");
        assert_eq!(token.clone().credential().as_deref(), Some("t-1"));
        token.sign_out();
        assert_eq!(token.credential(), None);
    }

    #[test]
    fn token_file_is_reread() {
        let td = tempdir().unwrap();
        let path = td.path().join("token");
        let provider = TokenFile::new(&path);
        assert_eq!(provider.credential(), None);

        fs::write(&path, "first\n").unwrap();
        assert_eq!(provider.credential().as_deref(), Some("first"));
        fs::write(&path, "second").unwrap();
        assert_eq!(provider.credential().as_deref(), Some("second"));
        fs::write(&path, "").unwrap();
        assert_eq!(provider.credential(), None);
    }

    #[test]
    fn first_of_falls_through() {
        let chain = FirstOf::new(vec![
            Arc::new(StaticToken::anonymous()),
            Arc::new(StaticToken::new("fallback")),
        ]);
        assert_eq!(chain.credential().as_deref(), Some("fallback"));
        assert_eq!(FirstOf::default().credential(), None);
    }
}
