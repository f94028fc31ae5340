//! Core types for the gallery loader

use purge_scheduler::JobRecord;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder in [`GalleryConfig::image_url_template`] replaced by the image number
pub const URL_PLACEHOLDER: &str = "{}";

/// Configuration for the gallery loader
#[derive(Debug, Clone)]
pub struct GalleryConfig {
    pub cache_dir: PathBuf,
    pub cache_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub job_table_path: PathBuf,
    pub image_url_template: String,
}

impl GalleryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// URL of gallery image `number`
    pub fn image_url(&self, number: u32) -> String {
        self.image_url_template
            .replace(URL_PLACEHOLDER, &number.to_string())
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/images"),
            cache_ttl_secs: 5 * 60,
            cleanup_interval_secs: 15 * 60,
            job_table_path: PathBuf::from("./cache/jobs.json"),
            image_url_template: "https://daa.iict.ch/images/{}.jpg".to_string(),
        }
    }
}

/// Output of the `jobs` command
#[derive(Debug, Serialize)]
pub struct JobListing {
    pub table_path: PathBuf,
    pub jobs: Vec<JobRecord>,
}
