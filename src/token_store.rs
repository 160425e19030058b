//! Persisted bearer-token identity store. Loaded once at startup, mutated
//! only through admin endpoints, rewritten to disk on every mutation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenIdentity {
    pub id: String,
    pub client_name: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    tokens: Vec<TokenIdentity>,
}

pub struct TokenStore {
    path: PathBuf,
    tokens: RwLock<HashMap<String, TokenIdentity>>,
}

impl TokenStore {
    /// Load the token file under `path`. Corruption is fatal: the process
    /// must refuse to start rather than silently regenerating tokens. A
    /// missing admin token after a successful load is repaired by minting one.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let tokens = if path.exists() {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read token store {}", path.display()))?;
            let file: TokenFile = serde_json::from_str(&raw)
                .with_context(|| format!("token store {} is corrupted", path.display()))?;
            file.tokens
                .into_iter()
                .map(|t| (t.id.clone(), t))
                .collect::<HashMap<_, _>>()
        } else {
            HashMap::new()
        };

        let store = Self {
            path,
            tokens: RwLock::new(tokens),
        };

        if !store.has_admin().await {
            let (token, _identity) = store.create("admin".to_string(), true).await?;
            println!("Admin Token: {token}");
        }

        Ok(store)
    }

    async fn has_admin(&self) -> bool {
        self.tokens.read().await.values().any(|t| t.is_admin)
    }

    pub async fn validate(&self, token: &str) -> Option<TokenIdentity> {
        self.tokens.read().await.get(token).cloned()
    }

    /// Generates an opaque random token (256 bits of entropy, hex-encoded)
    /// and registers the identity under it.
    pub async fn create(&self, client_name: String, is_admin: bool) -> Result<(String, TokenIdentity)> {
        let token = generate_token();
        let identity = TokenIdentity {
            id: token.clone(),
            client_name,
            is_admin,
            created_at: Utc::now(),
        };

        {
            let mut guard = self.tokens.write().await;
            guard.insert(token.clone(), identity.clone());
        }
        self.persist().await?;

        Ok((token, identity))
    }

    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut guard = self.tokens.write().await;
            guard.remove(id).is_some()
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Vec<TokenIdentity> {
        self.tokens.read().await.values().cloned().collect()
    }

    async fn persist(&self) -> Result<()> {
        let tokens: Vec<TokenIdentity> = self.tokens.read().await.values().cloned().collect();
        let file = TokenFile { tokens };
        let serialized = serde_json::to_string_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-temp-then-rename keeps the file from truncating on crash.
        let tmp_path = tmp_path_for(&self.path);
        tokio::fs::write(&tmp_path, serialized).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let file_name = tmp
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "tokens.json.tmp".to_string());
    tmp.set_file_name(file_name);
    tmp
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn bootstraps_admin_token_on_first_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        let tokens = store.list().await;
        assert_eq!(tokens.len(), 1);
        assert!(tokens[0].is_admin);
        assert!(tokens[0].id.len() >= 32);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn reloading_preserves_tokens_without_minting_a_second_admin() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = TokenStore::load(path.clone()).await.unwrap();
        let (client_token, _) = store.create("alice".to_string(), false).await.unwrap();
        drop(store);

        let reloaded = TokenStore::load(path).await.unwrap();
        let tokens = reloaded.list().await;
        assert_eq!(tokens.len(), 2);
        assert!(reloaded.validate(&client_token).await.is_some());
        assert_eq!(tokens.iter().filter(|t| t.is_admin).count(), 1);
    }

    #[tokio::test]
    async fn corrupted_file_refuses_to_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        assert!(TokenStore::load(path).await.is_err());
    }

    #[tokio::test]
    async fn revoke_removes_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = TokenStore::load(path).await.unwrap();
        let (token, identity) = store.create("bob".to_string(), false).await.unwrap();

        assert!(store.revoke(&identity.id).await.unwrap());
        assert!(store.validate(&token).await.is_none());
    }
}
