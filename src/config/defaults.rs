//! Default values for configuration

/// Default site origin; empty means every absolute link is treated as external
pub fn default_base_url() -> String {
    std::env::var("QUARRY_BASE_URL").unwrap_or_default()
}

/// Default storage origin for re-hosted images
pub fn default_storage_url() -> String {
    std::env::var("QUARRY_STORAGE_URL").unwrap_or_default()
}

/// Remote image download is opt-in
pub fn default_remote_download() -> bool {
    false
}

/// Default directory (relative to the base dir) for downloaded images
pub fn default_upload_dir() -> String {
    "uploads".to_string()
}

/// Default public path prefix for downloaded images
pub fn default_public_prefix() -> String {
    "/uploads".to_string()
}

/// Default download timeout in seconds
pub fn default_download_timeout() -> u64 {
    30
}

/// Default user agent for image downloads
pub fn default_download_user_agent() -> String {
    format!("quarry/{}", env!("CARGO_PKG_VERSION"))
}

/// Default maximum image size (10 MiB)
pub fn default_download_max_bytes() -> usize {
    10 * 1024 * 1024
}

/// Default number of propagation workers
pub fn default_propagation_workers() -> usize {
    2
}

/// Default capacity of the propagation event channel
pub fn default_events_capacity() -> usize {
    256
}

/// Default page size for material listings
pub fn default_page_size() -> u32 {
    20
}
