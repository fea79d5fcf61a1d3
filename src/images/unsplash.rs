//! Unsplash image search client.
//!
//! Random photos for a topic first; if that endpoint refuses, fall back to a
//! classic search. An unconfigured key or empty topic yields no images.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ImagesConfig;
use crate::error::ReaderError;

/// Unsplash caps both endpoints at 30 results per request.
const MAX_COUNT: usize = 30;
const UNSPLASH_HOME: &str = "https://unsplash.com";

/// One displayable image with its attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageItem {
    pub url: String,
    pub author_name: String,
    pub author_link: String,
    pub source_link: String,
}

// --- Wire types ---

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Photo {
    urls: PhotoUrls,
    user: Option<PhotoUser>,
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhotoUrls {
    regular: Option<String>,
    full: Option<String>,
    small: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PhotoUser {
    name: Option<String>,
    portfolio_url: Option<String>,
    links: Option<Links>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Links {
    html: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RandomResponse {
    Many(Vec<Photo>),
    One(Photo),
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

pub struct UnsplashClient {
    http: reqwest::Client,
    api_base: String,
    access_key: String,
}

impl UnsplashClient {
    pub fn new(config: &ImagesConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            access_key: config.resolved_access_key(),
        }
    }

    pub fn has_key(&self) -> bool {
        !self.access_key.is_empty()
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Up to `count` (max 30) landscape photos for `topic`. Empty when the
    /// key or topic is missing, or nothing matched.
    pub async fn fetch_images_for_topic(
        &self,
        topic: &str,
        count: usize,
    ) -> Result<Vec<ImageItem>, ReaderError> {
        let topic = topic.trim();
        if !self.has_key() || topic.is_empty() {
            debug!("Unsplash: missing key or topic (has_key={})", self.has_key());
            return Ok(Vec::new());
        }
        let count = count.clamp(1, MAX_COUNT).to_string();

        let resp = self
            .get("/photos/random")
            .query(&[
                ("query", topic),
                ("orientation", "landscape"),
                ("content_filter", "high"),
                ("count", count.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!("Unsplash random failed ({status}): {body}, falling back to search");
            return self.search(topic, &count).await;
        }

        let photos = match resp.json::<RandomResponse>().await? {
            RandomResponse::Many(photos) => photos,
            RandomResponse::One(photo) => vec![photo],
        };
        let images = normalize(photos);
        info!("Unsplash: {} random images for \"{topic}\"", images.len());
        Ok(images)
    }

    async fn search(&self, topic: &str, count: &str) -> Result<Vec<ImageItem>, ReaderError> {
        let resp = self
            .get("/search/photos")
            .query(&[
                ("query", topic),
                ("orientation", "landscape"),
                ("per_page", count),
                ("content_filter", "high"),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!("Unsplash search failed ({status}): {body}");
            return Ok(Vec::new());
        }

        let images = normalize(resp.json::<SearchResponse>().await?.results);
        info!("Unsplash: {} search results for \"{topic}\"", images.len());
        Ok(images)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}{path}", self.api_base))
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .header("Accept-Version", "v1")
    }
}

/// Keep photos that have some URL, filling attribution defaults.
fn normalize(photos: Vec<Photo>) -> Vec<ImageItem> {
    photos
        .into_iter()
        .filter_map(|photo| {
            let urls = photo.urls;
            let url = urls.regular.or(urls.full).or(urls.small)?;
            let (author_name, author_link) = match photo.user {
                Some(user) => (
                    user.name,
                    user.links.and_then(|l| l.html).or(user.portfolio_url),
                ),
                None => (None, None),
            };
            Some(ImageItem {
                url,
                author_name: author_name.unwrap_or_else(|| "Unknown".into()),
                author_link: author_link.unwrap_or_else(|| UNSPLASH_HOME.into()),
                source_link: photo
                    .links
                    .and_then(|l| l.html)
                    .unwrap_or_else(|| UNSPLASH_HOME.into()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    fn photo_json(id: &str) -> serde_json::Value {
        serde_json::json!({
            "urls": { "regular": format!("https://img.example/{id}.jpg") },
            "user": { "name": "Ansel", "links": { "html": "https://unsplash.com/@ansel" } },
            "links": { "html": format!("https://unsplash.com/photos/{id}") }
        })
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(api_base: String, key: &str) -> UnsplashClient {
        UnsplashClient::new(&ImagesConfig {
            access_key: key.into(),
            api_base,
            ..ImagesConfig::default()
        })
    }

    #[test]
    fn normalize_picks_best_url_and_defaults() {
        let photos: Vec<Photo> = serde_json::from_value(serde_json::json!([
            { "urls": { "full": "https://img.example/full.jpg", "small": "https://img.example/s.jpg" } },
            { "urls": {}, "user": { "name": "Nobody" } },
            {
                "urls": { "small": "https://img.example/small.jpg" },
                "user": { "portfolio_url": "https://folio.example" }
            }
        ]))
        .unwrap();

        let images = normalize(photos);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, "https://img.example/full.jpg");
        assert_eq!(images[0].author_name, "Unknown");
        assert_eq!(images[0].author_link, UNSPLASH_HOME);
        assert_eq!(images[0].source_link, UNSPLASH_HOME);
        assert_eq!(images[1].author_link, "https://folio.example");
    }

    #[tokio::test]
    async fn missing_key_or_topic_yields_nothing() {
        let unconfigured = client("http://127.0.0.1:1".into(), "");
        assert!(!unconfigured.has_key());
        assert!(unconfigured.fetch_images_for_topic("forest", 12).await.unwrap().is_empty());

        let keyed = client("http://127.0.0.1:1".into(), "key");
        assert!(keyed.fetch_images_for_topic("   ", 12).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn random_endpoint_sends_auth_and_params() {
        let app = Router::new().route(
            "/photos/random",
            get(|headers: HeaderMap, Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(headers["authorization"], "Client-ID secret");
                assert_eq!(headers["accept-version"], "v1");
                assert_eq!(q["query"], "night city");
                assert_eq!(q["orientation"], "landscape");
                assert_eq!(q["count"], "30");
                Json(serde_json::json!([photo_json("a"), photo_json("b")]))
            }),
        );
        let unsplash = client(serve(app).await, "secret");

        let images = unsplash.fetch_images_for_topic("night city", 50).await.unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].url, "https://img.example/b.jpg");
        assert_eq!(images[1].author_name, "Ansel");
        assert_eq!(images[1].source_link, "https://unsplash.com/photos/b");
    }

    #[tokio::test]
    async fn single_random_object_is_accepted() {
        let app = Router::new().route(
            "/photos/random",
            get(|| async { Json(photo_json("solo")) }),
        );
        let unsplash = client(serve(app).await, "secret");

        let images = unsplash.fetch_images_for_topic("solar", 1).await.unwrap();
        assert_eq!(images.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_search_when_random_fails() {
        let app = Router::new()
            .route(
                "/photos/random",
                get(|| async { (StatusCode::FORBIDDEN, "Rate Limit Exceeded") }),
            )
            .route(
                "/search/photos",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    assert_eq!(q["per_page"], "12");
                    Json(serde_json::json!({ "results": [photo_json("s1")] }))
                }),
            );
        let unsplash = client(serve(app).await, "secret");

        let images = unsplash.fetch_images_for_topic("forests", 12).await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].url, "https://img.example/s1.jpg");
    }

    #[tokio::test]
    async fn failed_search_yields_nothing() {
        let app = Router::new()
            .route("/photos/random", get(|| async { StatusCode::UNAUTHORIZED }))
            .route("/search/photos", get(|| async { StatusCode::UNAUTHORIZED }));
        let unsplash = client(serve(app).await, "bad");

        let images = unsplash.fetch_images_for_topic("forests", 12).await.unwrap();
        assert!(images.is_empty());
    }
}
