//! A best-effort disk cache around a provider, keyed by a seed.
//!
//! Identical requests under the same seed replay the stored completion instead of
//! calling the model again. Read or write failures are logged and never fail the
//! completion.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::base::{Provider, Usage};
use super::utils::{messages_to_openai_spec, tools_to_openai_spec};
use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    message: Message,
    usage: Usage,
}

pub struct CachedProvider {
    inner: Arc<dyn Provider>,
    dir: PathBuf,
}

impl CachedProvider {
    pub fn new<P: Into<PathBuf>>(inner: Arc<dyn Provider>, root: P, seed: u64) -> Self {
        Self {
            inner,
            dir: root.into().join(seed.to_string()),
        }
    }

    fn key(&self, system: &str, messages: &[Message], tools: &[Tool]) -> Result<String> {
        // Wire format, so message timestamps do not change the key
        let request = json!({
            "model": self.inner.model(),
            "system": system,
            "messages": messages_to_openai_spec(messages),
            "tools": tools_to_openai_spec(tools)?,
        });
        let digest = Sha256::digest(serde_json::to_vec(&request)?);
        Ok(format!("{:x}", digest))
    }

    async fn read(&self, key: &str) -> Option<CacheEntry> {
        let path = self.dir.join(format!("{}.json", key));
        let bytes = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    async fn write(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.json", key));
        tokio::fs::write(path, serde_json::to_vec(entry)?).await?;
        Ok(())
    }
}

#[async_trait]
impl Provider for CachedProvider {
    fn model(&self) -> &str {
        self.inner.model()
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
    ) -> Result<(Message, Usage)> {
        let key = self.key(system, messages, tools)?;

        if let Some(entry) = self.read(&key).await {
            debug!(key = %key, "cache hit");
            let mut message = entry.message;
            message.created = Utc::now().timestamp();
            return Ok((message, entry.usage));
        }

        let (message, usage) = self.inner.complete(system, messages, tools).await?;
        let entry = CacheEntry { message, usage };
        if let Err(e) = self.write(&key, &entry).await {
            warn!(error = %e, "failed to write cache entry");
        }
        Ok((entry.message, entry.usage))
    }
}
