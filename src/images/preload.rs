//! Image preloading into an in-memory cache.
//!
//! `preload` waits for every URL to either load or fail; failures are logged
//! and never surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Downloaded image bytes keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct ImageCache {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl ImageCache {
    pub fn contains(&self, url: &str) -> bool {
        self.lock().contains_key(url)
    }

    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        self.lock().get(url).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drop every entry whose URL is not in `urls`.
    pub fn retain(&self, urls: &[String]) {
        self.lock().retain(|url, _| urls.contains(url));
    }

    fn insert(&self, url: String, bytes: Vec<u8>) {
        self.lock().insert(url, bytes);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fetch all `urls` concurrently. Returns how many loaded.
pub async fn preload(http: &reqwest::Client, urls: &[String], cache: &ImageCache) -> usize {
    let mut tasks = JoinSet::new();
    for url in urls {
        if cache.contains(url) {
            continue;
        }
        let http = http.clone();
        let url = url.clone();
        tasks.spawn(async move {
            let result = fetch(&http, &url).await;
            (url, result)
        });
    }

    let mut loaded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((url, Ok(bytes))) => {
                debug!("Preloaded {url} ({} bytes)", bytes.len());
                cache.insert(url, bytes);
                loaded += 1;
            }
            Ok((url, Err(e))) => warn!("Failed to preload {url}: {e}"),
            Err(e) => warn!("Preload task failed: {e}"),
        }
    }
    loaded
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, reqwest::Error> {
    let resp = http.get(url).send().await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn loads_what_it_can_and_never_fails() {
        let app = Router::new()
            .route("/a.jpg", get(|| async { vec![1u8, 2, 3] }))
            .route("/b.jpg", get(|| async { vec![4u8] }))
            .route("/gone.jpg", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(app).await;

        let urls = vec![
            format!("{base}/a.jpg"),
            format!("{base}/b.jpg"),
            format!("{base}/gone.jpg"),
            "http://127.0.0.1:1/unreachable.jpg".to_string(),
        ];
        let cache = ImageCache::default();
        let loaded = preload(&reqwest::Client::new(), &urls, &cache).await;

        assert_eq!(loaded, 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&urls[0]), Some(vec![1, 2, 3]));
        assert!(!cache.contains(&urls[2]));
    }

    #[test]
    fn retain_keeps_only_listed_urls() {
        let cache = ImageCache::default();
        cache.insert("a".into(), vec![1]);
        cache.insert("b".into(), vec![2]);
        cache.insert("c".into(), vec![3]);

        cache.retain(&["b".to_string(), "z".to_string()]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(vec![2]));
    }

    #[tokio::test]
    async fn empty_list_completes_immediately() {
        let cache = ImageCache::default();
        assert_eq!(preload(&reqwest::Client::new(), &[], &cache).await, 0);
    }

    #[tokio::test]
    async fn cached_urls_are_not_refetched() {
        let cache = ImageCache::default();
        let url = "http://127.0.0.1:1/cached.jpg".to_string();
        cache.insert(url.clone(), vec![9]);

        assert_eq!(preload(&reqwest::Client::new(), &[url.clone()], &cache).await, 0);
        assert_eq!(cache.get(&url), Some(vec![9]));
    }
}
