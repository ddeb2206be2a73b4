//! Session construction and the store client shared by transfer workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::download::DownloadSession;
use crate::error::{DedupError, DedupResult, StoreError};
use crate::hash::{DedupId, HashType};
use crate::retention::KeepUntil;
use crate::store::ContentStore;
use crate::upload::UploadSession;

/// Cloneable handle to a content store.
///
/// Every call is raced against the caller's cancellation token and, when
/// configured, bounded by a per-call timeout.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn ContentStore>,
    call_timeout: Option<Duration>,
}

impl StoreClient {
    /// Wrap a store
    pub fn new(store: Arc<dyn ContentStore>, call_timeout: Option<Duration>) -> Self {
        Self {
            store,
            call_timeout,
        }
    }

    /// The wrapped store
    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// See [`ContentStore::exists`]
    pub async fn exists(&self, id: DedupId, cancel: &CancellationToken) -> DedupResult<bool> {
        self.call("exists", cancel, self.store.exists(id)).await
    }

    /// See [`ContentStore::put`]
    pub async fn put(
        &self,
        id: DedupId,
        blob: Bytes,
        keep_until: KeepUntil,
        cancel: &CancellationToken,
    ) -> DedupResult<()> {
        self.call("put", cancel, self.store.put(id, blob, keep_until))
            .await
    }

    /// See [`ContentStore::get`]
    pub async fn get(&self, id: DedupId, cancel: &CancellationToken) -> DedupResult<Bytes> {
        self.call("get", cancel, self.store.get(id)).await
    }

    /// See [`ContentStore::keep_until`]
    pub async fn keep_until(
        &self,
        id: DedupId,
        keep_until: KeepUntil,
        cancel: &CancellationToken,
    ) -> DedupResult<()> {
        self.call("keep_until", cancel, self.store.keep_until(id, keep_until))
            .await
    }

    /// Extend the retention of `id` if the store holds it.
    ///
    /// Returns `false` when the blob is absent, including when it was collected
    /// after an earlier existence check.
    pub async fn retain_existing(
        &self,
        id: DedupId,
        keep_until: KeepUntil,
        cancel: &CancellationToken,
    ) -> DedupResult<bool> {
        if !self.exists(id, cancel).await? {
            return Ok(false);
        }
        match self.keep_until(id, keep_until, cancel).await {
            Ok(()) => Ok(true),
            Err(DedupError::Store(StoreError::NotFound(_))) => {
                debug!(%id, "blob collected after existence check");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// See [`ContentStore::preferred_hash_type`]
    pub async fn preferred_hash_type(&self, cancel: &CancellationToken) -> DedupResult<HashType> {
        self.call("preferred_hash_type", cancel, self.store.preferred_hash_type())
            .await
    }

    async fn call<T, F>(&self, op: &'static str, cancel: &CancellationToken, fut: F) -> DedupResult<T>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let bounded = async {
            match self.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(StoreError::Timeout {
                        op,
                        timeout_ms: limit.as_millis() as u64,
                    }),
                },
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DedupError::Cancelled),
            result = bounded => result.map_err(DedupError::from),
        }
    }
}

/// Builds upload and download sessions over one store.
///
/// The dedup hash type is resolved once, when the factory connects, from the
/// configured override or else from the store's preference. Every session the
/// factory creates carries that value.
pub struct SessionFactory {
    client: StoreClient,
    config: SessionConfig,
    hash_type: HashType,
}

impl SessionFactory {
    /// Resolve the hash type and prepare to build sessions
    pub async fn connect(
        store: Arc<dyn ContentStore>,
        config: SessionConfig,
        cancel: &CancellationToken,
    ) -> DedupResult<Self> {
        let client = StoreClient::new(store, config.call_timeout);
        let hash_type = match config.hash_type {
            Some(forced) => {
                debug!(hash_type = %forced, "using configured hash type");
                forced
            }
            None => client.preferred_hash_type(cancel).await?,
        };
        info!(hash_type = %hash_type, "dedup session factory ready");
        Ok(Self {
            client,
            config,
            hash_type,
        })
    }

    /// Resolved hash type
    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// Active configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// New upload session
    pub fn create_upload_session(&self) -> UploadSession {
        UploadSession::new(self.client.clone(), self.config.clone(), self.hash_type)
    }

    /// New download session
    pub fn create_download_session(&self) -> DownloadSession {
        DownloadSession::new(self.client.clone(), self.config.clone())
    }
}
