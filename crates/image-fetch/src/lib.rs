//! Cancellable image loading backed by a TTL disk cache
//!
//! A [`FetchPipeline`] resolves an identifier to a decoded image: fresh
//! cache entries are decoded directly, everything else is downloaded,
//! decoded, re-encoded into the cache, and then handed to the caller's
//! callback on a single [`DeliveryContext`] thread.
//!
//! ```ignore
//! let store = Arc::new(CacheStore::new("/var/cache/images")?);
//! let pipeline = FetchPipeline::builder(store, Duration::from_secs(300)).build()?;
//!
//! let handle = pipeline.load("https://example.com/1.jpg", |image| {
//!     println!("{}x{}", image.width(), image.height());
//! });
//! handle.cancel();
//! ```

mod codec;
mod delivery;
mod error;
mod fetcher;
mod pipeline;

pub use codec::{ImageCodec, JpegCodec};
pub use delivery::DeliveryContext;
pub use error::{CodecError, FetchError, PipelineError};
pub use fetcher::{Fetcher, HttpFetcher};
pub use pipeline::{FetchPipeline, FetchPipelineBuilder, LoadHandle};

pub use image::DynamicImage;
