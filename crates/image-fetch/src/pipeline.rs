//! Per-request fetch pipeline
//!
//! ```text
//! load ─► cache lookup ─┬─ hit ──► decode ─────────────────────────────┐
//!                       └─ miss ─► download ─► decode ─► cache write ──┴─► deliver
//! ```
//!
//! Every step observes the request's cancellation token. A cancelled,
//! failed or undecodable request ends without invoking the callback; the
//! caller gets no other signal. A cache write that has already started is
//! allowed to finish after cancellation.

use crate::codec::{ImageCodec, JpegCodec};
use crate::delivery::DeliveryContext;
use crate::error::{CodecError, FetchError, PipelineError};
use crate::fetcher::{Fetcher, HttpFetcher};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ttl_blob_store::CacheStore;

const DELIVERY_THREAD_NAME: &str = "image-delivery";

/// Cancels one in-flight `load`.
///
/// Dropping the handle does not cancel the request.
pub struct LoadHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl LoadHandle {
    /// Stop the remaining steps; the callback will not be invoked unless it
    /// is already running
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the request has stopped, whatever the reason
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

/// Why a request ended without delivery
enum Abort {
    Cancelled,
    Download(FetchError),
    Codec(CodecError),
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Abort::Cancelled => write!(f, "cancelled"),
            Abort::Download(err) => write!(f, "download failed: {}", err),
            Abort::Codec(err) => write!(f, "{}", err),
        }
    }
}

struct Inner<C: ImageCodec> {
    store: Arc<CacheStore>,
    ttl: Duration,
    fetcher: Arc<dyn Fetcher>,
    codec: Arc<C>,
    delivery: DeliveryContext,
}

/// Loads images by identifier through the disk cache
pub struct FetchPipeline<C: ImageCodec = JpegCodec> {
    inner: Arc<Inner<C>>,
    runtime: Handle,
}

impl<C: ImageCodec> Clone for FetchPipeline<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

impl FetchPipeline<JpegCodec> {
    /// Start building a pipeline over `store` whose entries stay fresh for `ttl`
    pub fn builder(store: Arc<CacheStore>, ttl: Duration) -> FetchPipelineBuilder<JpegCodec> {
        FetchPipelineBuilder {
            store,
            ttl,
            fetcher: None,
            codec: JpegCodec::new(),
            delivery: None,
            runtime: None,
        }
    }
}

impl<C: ImageCodec> FetchPipeline<C> {
    /// Load `identifier` and hand the decoded image to `callback` on the
    /// delivery thread. Callable from any thread.
    pub fn load<F>(&self, identifier: impl Into<String>, callback: F) -> LoadHandle
    where
        F: FnOnce(C::Image) + Send + 'static,
    {
        let identifier = identifier.into();
        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let task_token = token.clone();

        let task = self.runtime.spawn(async move {
            let outcome = inner.execute(&identifier, &task_token).await;
            match outcome {
                Ok(image) => {
                    if inner.delivery.deliver(task_token, callback, image).await {
                        debug!(identifier = %identifier, "Image delivered");
                    } else {
                        debug!(identifier = %identifier, "Delivery skipped");
                    }
                }
                Err(Abort::Cancelled) => {
                    debug!(identifier = %identifier, "Load cancelled");
                }
                Err(reason) => {
                    warn!(identifier = %identifier, reason = %reason, "Load aborted");
                }
            }
        });

        LoadHandle { token, task }
    }
}

impl<C: ImageCodec> Inner<C> {
    async fn execute(
        &self,
        identifier: &str,
        token: &CancellationToken,
    ) -> Result<C::Image, Abort> {
        let key = CacheStore::cache_key(identifier);

        let cached = step(token, self.store.get(&key, self.ttl)).await?;

        if let Some(bytes) = cached {
            debug!(identifier = %identifier, key = %key, "Serving from cache");
            // a corrupt entry stays put and keeps failing until purged
            return self.decode(bytes, token).await;
        }

        let bytes = step(token, self.fetcher.fetch(identifier))
            .await?
            .map_err(Abort::Download)?;
        let image = self.decode(bytes, token).await?;

        if token.is_cancelled() {
            return Err(Abort::Cancelled);
        }
        self.write_back(&key, image).await
    }

    /// Decode on the blocking pool
    async fn decode(&self, bytes: Vec<u8>, token: &CancellationToken) -> Result<C::Image, Abort> {
        let codec = self.codec.clone();
        let decoded = step(
            token,
            tokio::task::spawn_blocking(move || codec.decode(&bytes)),
        )
        .await?;

        match decoded {
            Ok(result) => result.map_err(Abort::Codec),
            Err(e) => Err(Abort::Codec(CodecError::Decode(e.to_string()))),
        }
    }

    /// Encode and store the image. Not raced against cancellation; encode
    /// and write failures only cost a future cache miss.
    async fn write_back(&self, key: &str, image: C::Image) -> Result<C::Image, Abort> {
        let codec = self.codec.clone();
        let encoded = tokio::task::spawn_blocking(move || {
            let encoded = codec.encode(&image);
            (image, encoded)
        })
        .await;

        match encoded {
            Ok((image, Ok(bytes))) => {
                self.store.put(key, &bytes).await;
                Ok(image)
            }
            Ok((image, Err(e))) => {
                warn!(key = %key, error = %e, "Skipping cache write");
                Ok(image)
            }
            // the image went down with the encode task
            Err(e) => Err(Abort::Codec(CodecError::Encode(e.to_string()))),
        }
    }
}

/// Run `fut` unless `token` fires first
async fn step<T>(token: &CancellationToken, fut: impl Future<Output = T>) -> Result<T, Abort> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Abort::Cancelled),
        out = fut => Ok(out),
    }
}

pub struct FetchPipelineBuilder<C: ImageCodec> {
    store: Arc<CacheStore>,
    ttl: Duration,
    fetcher: Option<Arc<dyn Fetcher>>,
    codec: C,
    delivery: Option<DeliveryContext>,
    runtime: Option<Handle>,
}

impl<C: ImageCodec> FetchPipelineBuilder<C> {
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn codec<D: ImageCodec>(self, codec: D) -> FetchPipelineBuilder<D> {
        FetchPipelineBuilder {
            store: self.store,
            ttl: self.ttl,
            fetcher: self.fetcher,
            codec,
            delivery: self.delivery,
            runtime: self.runtime,
        }
    }

    /// Deliver callbacks on an existing context instead of a new thread
    pub fn delivery(mut self, delivery: DeliveryContext) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Runtime the pipeline tasks are spawned on
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<FetchPipeline<C>, PipelineError> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| PipelineError::NoRuntime)?,
        };

        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new()?),
        };

        let delivery = match self.delivery {
            Some(delivery) => delivery,
            None => DeliveryContext::spawn(DELIVERY_THREAD_NAME)?,
        };

        Ok(FetchPipeline {
            inner: Arc::new(Inner {
                store: self.store,
                ttl: self.ttl,
                fetcher,
                codec: Arc::new(self.codec),
                delivery,
            }),
            runtime,
        })
    }
}
