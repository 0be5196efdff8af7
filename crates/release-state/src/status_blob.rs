//! Release bindings persisted in a status side-channel.
//!
//! The whole binding table is one JSON document stored wherever the
//! `StatusChannel` points (for example the output text of the job's check
//! run on the head commit):
//!
//! ```json
//! { "org/fleet": { "abc123:4423422": { "id": 149241, "finalized": false } } }
//! ```
//!
//! Every write is a read-modify-write of the full document.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::storage_traits::*;

/// Text payload that survives between invocations.
#[async_trait]
pub trait StatusChannel: Send + Sync {
    /// Current payload, `None` when nothing was written yet.
    async fn read(&self) -> StorageResult<Option<String>>;

    /// Replace the payload.
    async fn write(&self, text: String) -> StorageResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct BlobEntry {
    id: ReleaseId,
    finalized: bool,
}

/// fleet -> slot -> entry
type Blob = BTreeMap<String, BTreeMap<String, BlobEntry>>;

/// `ReleaseStore` over a `StatusChannel`.
pub struct StatusBlobStore<C: StatusChannel> {
    channel: C,
}

impl<C: StatusChannel> StatusBlobStore<C> {
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    async fn load(&self) -> StorageResult<Blob> {
        match self.channel.read().await? {
            Some(text) if !text.trim().is_empty() => {
                debug!(payload = %text, "found existing release bindings");
                Ok(serde_json::from_str(&text)?)
            }
            _ => {
                debug!("no existing release bindings");
                Ok(Blob::new())
            }
        }
    }

    async fn save(&self, blob: &Blob) -> StorageResult<()> {
        let text = serde_json::to_string(blob)?;
        debug!(payload = %text, "saving release bindings");
        self.channel.write(text).await
    }
}

#[async_trait]
impl<C: StatusChannel> ReleaseStore for StatusBlobStore<C> {
    async fn find(&self, key: &ReleaseKey) -> StorageResult<Option<StoredRelease>> {
        let blob = self.load().await?;
        Ok(blob
            .get(&key.fleet)
            .and_then(|slots| slots.get(&key.slot()))
            .map(|entry| StoredRelease {
                id: entry.id,
                is_final: entry.finalized,
            }))
    }

    async fn record(&self, key: &ReleaseKey, release: StoredRelease) -> StorageResult<()> {
        let mut blob = self.load().await?;
        let entry = BlobEntry {
            id: release.id,
            finalized: release.is_final,
        };
        let slots = blob.entry(key.fleet.clone()).or_default();
        if slots.get(&key.slot()) == Some(&entry) {
            debug!(key = %key, "binding already recorded");
            return Ok(());
        }
        slots.insert(key.slot(), entry);
        self.save(&blob).await
    }

    async fn mark_finalized(&self, id: ReleaseId) -> StorageResult<()> {
        let mut blob = self.load().await?;
        let mut changed = false;
        for entry in blob.values_mut().flat_map(|slots| slots.values_mut()) {
            if entry.id == id && !entry.finalized {
                entry.finalized = true;
                changed = true;
            }
        }
        if changed {
            self.save(&blob).await?;
        }
        Ok(())
    }
}
