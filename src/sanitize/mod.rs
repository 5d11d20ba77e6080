//! Content sanitizer for material bodies
//!
//! Normalizes a submitted HTML fragment before it is stored:
//! - isolated `&nbsp;` entities become plain spaces
//! - absolute links to the site itself become relative
//! - external images are optionally downloaded and re-hosted
//! - external anchors are unwrapped or marked `rel="nofollow"`
//!
//! Work happens in three phases. A read-only pass over the parsed fragment
//! classifies resources and records a [`RewritePlan`]; external images are then
//! downloaded (the parsed tree is not held across the await); finally the plan
//! is rendered against a fresh parse of the same source.

mod fetch;

pub use fetch::*;

use crate::config::{Config, OutlinkPolicy};
use crate::markup::{self, Rewrite, RewritePlan};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// Image downloads in flight per sanitized fragment
const MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Site-dependent settings the sanitizer applies
#[derive(Debug, Clone, Default)]
pub struct SanitizePolicy {
    /// Site base URL; stripped from content and used as the same-origin host
    pub base_url: String,
    /// Origin that already serves re-hosted images
    pub storage_url: String,
    /// Download external images
    pub remote_download: bool,
    /// Treatment of external anchors
    pub outlinks: OutlinkPolicy,
}

impl SanitizePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.site.base_url.clone(),
            storage_url: config.site.storage_url.clone(),
            remote_download: config.content.remote_download,
            outlinks: config.content.outlinks,
        }
    }

    /// host[:port] of the base URL, empty when unset or unparsable
    fn base_host(&self) -> String {
        authority(&self.base_url).unwrap_or_default()
    }
}

/// An image scheduled for download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalImage {
    pub ordinal: usize,
    pub src: String,
    pub alt: String,
}

/// Result of the classification pass
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Edits that need no I/O (link treatment)
    pub plan: RewritePlan,
    /// External images eligible for download
    pub images: Vec<ExternalImage>,
}

/// host[:port] of an absolute or protocol-relative URL
fn authority(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = if raw.starts_with("//") {
        Url::parse(&format!("http:{}", raw)).ok()?
    } else {
        Url::parse(raw).ok()?
    };
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Whether `raw` points at a host other than `base_host`
pub fn is_external(raw: &str, base_host: &str) -> bool {
    match authority(raw) {
        Some(host) => !host.is_empty() && host != base_host,
        None => false,
    }
}

/// Pre-parse normalization: single `&nbsp;` to space, self links to relative.
///
/// The base URL is only stripped where it ends at a path or attribute
/// boundary, so `https://example.com.evil.net` is left alone.
pub fn normalize(raw: &str, base_url: &str) -> String {
    let collapsed = markup::collapse_single_nbsp(raw);
    let base = base_url.trim_end_matches('/');
    if base.is_empty() {
        return collapsed;
    }

    let mut out = String::with_capacity(collapsed.len());
    let mut last = 0;
    for (start, _) in collapsed.match_indices(base) {
        let end = start + base.len();
        let bounded = matches!(
            collapsed[end..].chars().next(),
            None | Some('/' | '"' | '\'' | '?' | '#')
        );
        if bounded {
            out.push_str(&collapsed[last..start]);
            last = end;
        }
    }
    out.push_str(&collapsed[last..]);
    out
}

/// Read-only pass: decide what happens to every image and anchor
pub fn classify(source: &str, policy: &SanitizePolicy) -> Classification {
    let base_host = policy.base_host();
    let fragment = markup::parse(source);
    let mut result = Classification::default();

    for (ordinal, element) in markup::ordered_elements(&fragment) {
        let el = element.value();
        match el.name() {
            "img" if policy.remote_download => {
                let Some(src) = el.attr("src") else { continue };
                let on_storage =
                    !policy.storage_url.is_empty() && src.starts_with(&policy.storage_url);
                if is_external(src, &base_host) && !on_storage {
                    result.images.push(ExternalImage {
                        ordinal,
                        src: src.to_string(),
                        alt: el.attr("alt").unwrap_or_default().to_string(),
                    });
                }
            }
            "a" => {
                let Some(href) = el.attr("href") else { continue };
                if !is_external(href, &base_host) {
                    continue;
                }
                let rewrite = match policy.outlinks {
                    OutlinkPolicy::Strip => Rewrite::Unwrap,
                    OutlinkPolicy::Nofollow => Rewrite::SetAttr {
                        name: "rel".to_string(),
                        value: "nofollow".to_string(),
                    },
                };
                result.plan.push(ordinal, rewrite);
            }
            _ => {}
        }
    }

    result
}

/// Applies the content policy to submitted material bodies
#[derive(Clone)]
pub struct Sanitizer {
    policy: SanitizePolicy,
    fetcher: Option<Arc<dyn ImageFetcher>>,
}

impl Sanitizer {
    pub fn new(policy: SanitizePolicy, fetcher: Option<Arc<dyn ImageFetcher>>) -> Self {
        Self { policy, fetcher }
    }

    pub fn policy(&self) -> &SanitizePolicy {
        &self.policy
    }

    /// Sanitize a fragment and return the inner body markup.
    ///
    /// Download failures keep the original `src`; they never fail the call.
    pub async fn sanitize(&self, raw: &str) -> String {
        let source = normalize(raw, &self.policy.base_url);
        let Classification { mut plan, images } = classify(&source, &self.policy);

        if let Some(fetcher) = &self.fetcher {
            let downloads: Vec<_> = stream::iter(images.iter().map(|image| {
                let fetcher = Arc::clone(fetcher);
                async move {
                    let outcome = fetcher.download_remote_image(&image.src, &image.alt).await;
                    (image, outcome)
                }
            }))
            .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
            .collect()
            .await;

            for (image, outcome) in downloads {
                match outcome {
                    Ok(local) => {
                        debug!(src = %image.src, %local, "Re-hosted remote image");
                        plan.push(
                            image.ordinal,
                            Rewrite::SetAttr {
                                name: "src".to_string(),
                                value: local,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(src = %image.src, error = %e, "Remote image download failed, keeping original src");
                    }
                }
            }
        } else if !images.is_empty() {
            debug!(
                count = images.len(),
                "Remote download enabled but no fetcher configured"
            );
        }

        markup::render(&source, &plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubFetcher {
        fail_for: Option<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubFetcher {
        fn new(fail_for: Option<&str>) -> Self {
            Self {
                fail_for: fail_for.map(str::to_string),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ImageFetcher for StubFetcher {
        async fn download_remote_image(&self, url: &str, alt: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((url.to_string(), alt.to_string()));
            if self.fail_for.as_deref() == Some(url) {
                return Err(Error::ImageDownload("boom".to_string()));
            }
            let name = url.rsplit('/').next().unwrap_or("x");
            Ok(format!("/uploads/202601/{}", name))
        }
    }

    #[derive(Default)]
    struct SlowFetcher {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ImageFetcher for SlowFetcher {
        async fn download_remote_image(&self, url: &str, _alt: &str) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let name = url.rsplit('/').next().unwrap_or("x");
            Ok(format!("/uploads/202601/{}", name))
        }
    }

    fn policy(outlinks: OutlinkPolicy, remote_download: bool) -> SanitizePolicy {
        SanitizePolicy {
            base_url: "https://example.com".to_string(),
            storage_url: "https://cdn.example.com".to_string(),
            remote_download,
            outlinks,
        }
    }

    #[test]
    fn test_is_external() {
        assert!(is_external("http://other.example/x", "example.com"));
        assert!(is_external("//other.example/x", "example.com"));
        assert!(!is_external("https://example.com/x", "example.com"));
        assert!(!is_external("/relative", "example.com"));
        assert!(!is_external("mailto:someone@example.com", "example.com"));
        assert!(is_external("http://example.com:8080/x", "example.com"));
    }

    #[tokio::test]
    async fn test_external_anchor_unwrapped_when_filtering() {
        let sanitizer = Sanitizer::new(policy(OutlinkPolicy::Strip, false), None);
        let out = sanitizer
            .sanitize(r#"<p>Read <a href="http://other.example/x">this guide</a> now</p>"#)
            .await;
        assert_eq!(out, "<p>Read this guide now</p>");
    }

    #[tokio::test]
    async fn test_external_anchor_marked_nofollow_when_not_filtering() {
        let sanitizer = Sanitizer::new(policy(OutlinkPolicy::Nofollow, false), None);
        let out = sanitizer
            .sanitize(r#"<p><a href="http://other.example/x">this guide</a></p>"#)
            .await;
        assert_eq!(
            out,
            r#"<p><a href="http://other.example/x" rel="nofollow">this guide</a></p>"#
        );
    }

    #[tokio::test]
    async fn test_same_origin_anchor_untouched_and_self_links_relative() {
        let sanitizer = Sanitizer::new(policy(OutlinkPolicy::Strip, false), None);
        let out = sanitizer
            .sanitize(r#"<a href="https://example.com/about">About</a> <a href="/faq">FAQ</a>"#)
            .await;
        assert_eq!(out, r#"<a href="/about">About</a> <a href="/faq">FAQ</a>"#);
    }

    #[test]
    fn test_normalize_strips_base_only_at_boundaries() {
        let base = "https://example.com/";
        assert_eq!(
            normalize(r#"<a href="https://example.com/about">a</a>"#, base),
            r#"<a href="/about">a</a>"#
        );
        assert_eq!(
            normalize(r#"<a href="https://example.com">home</a>"#, base),
            r#"<a href="">home</a>"#
        );
        let lookalike = r#"<a href="https://example.com.evil.net/x">x</a>"#;
        assert_eq!(normalize(lookalike, base), lookalike);
    }

    #[tokio::test]
    async fn test_lookalike_host_is_still_external() {
        let sanitizer = Sanitizer::new(policy(OutlinkPolicy::Strip, false), None);
        let out = sanitizer
            .sanitize(r#"<p><a href="https://example.com.evil.net/x">deal</a></p>"#)
            .await;
        assert_eq!(out, "<p>deal</p>");
    }

    #[tokio::test]
    async fn test_single_nbsp_collapsed() {
        let sanitizer = Sanitizer::new(policy(OutlinkPolicy::Nofollow, false), None);
        let out = sanitizer.sanitize("<p>a&nbsp;b&nbsp;&nbsp;c</p>").await;
        assert_eq!(out, "<p>a b&nbsp;&nbsp;c</p>");
    }

    #[tokio::test]
    async fn test_external_images_rehosted() {
        let fetcher = Arc::new(StubFetcher::new(None));
        let sanitizer = Sanitizer::new(
            policy(OutlinkPolicy::Nofollow, true),
            Some(fetcher.clone() as Arc<dyn ImageFetcher>),
        );
        let out = sanitizer
            .sanitize(concat!(
                r#"<img alt="chart" src="http://img.other.example/a.png">"#,
                r#"<img src="https://cdn.example.com/b.png">"#,
                r#"<img src="/c.png">"#
            ))
            .await;
        assert_eq!(
            out,
            concat!(
                r#"<img alt="chart" src="/uploads/202601/a.png">"#,
                r#"<img src="https://cdn.example.com/b.png">"#,
                r#"<img src="/c.png">"#
            )
        );
        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![(
                "http://img.other.example/a.png".to_string(),
                "chart".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_failed_download_keeps_src() {
        let fetcher = Arc::new(StubFetcher::new(Some("http://img.other.example/bad.png")));
        let sanitizer = Sanitizer::new(
            policy(OutlinkPolicy::Nofollow, true),
            Some(fetcher as Arc<dyn ImageFetcher>),
        );
        let out = sanitizer
            .sanitize(r#"<img src="http://img.other.example/bad.png"><img src="http://img.other.example/ok.png">"#)
            .await;
        assert_eq!(
            out,
            r#"<img src="http://img.other.example/bad.png"><img src="/uploads/202601/ok.png">"#
        );
    }

    #[tokio::test]
    async fn test_download_disabled_leaves_images() {
        let fetcher = Arc::new(StubFetcher::new(None));
        let sanitizer = Sanitizer::new(
            policy(OutlinkPolicy::Nofollow, false),
            Some(fetcher.clone() as Arc<dyn ImageFetcher>),
        );
        let html = r#"<img src="http://img.other.example/a.png">"#;
        assert_eq!(sanitizer.sanitize(html).await, html);
        assert!(fetcher.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_downloads_are_bounded() {
        let fetcher = Arc::new(SlowFetcher::default());
        let sanitizer = Sanitizer::new(
            policy(OutlinkPolicy::Nofollow, true),
            Some(fetcher.clone() as Arc<dyn ImageFetcher>),
        );
        let html: String = (0..20)
            .map(|n| format!(r#"<img src="http://img.other.example/{}.png">"#, n))
            .collect();

        let out = sanitizer.sanitize(&html).await;

        let expected: String = (0..20)
            .map(|n| format!(r#"<img src="/uploads/202601/{}.png">"#, n))
            .collect();
        assert_eq!(out, expected);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!((1..=MAX_CONCURRENT_DOWNLOADS).contains(&peak), "peak {}", peak);
    }
}
