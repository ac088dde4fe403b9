// Card Metadata Resolution
//
// Resolves the card-definition document for a game build, consulting the
// cache before fetching and degrading to the "latest" document when a
// versioned fetch fails.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod http;
pub mod store;

pub use http::{AbortHandle, HttpFetcher};
pub use store::{FileStorage, MemoryStorage, NullStorage, StorageBackend};

pub const DEFAULT_LOCALE: &str = "enUS";

/// Game build a metadata document belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Build {
    Number(u32),
    /// Unversioned document. Always fetched, never cached.
    Latest,
}

impl From<Option<u32>> for Build {
    /// Absent and zero builds both mean "latest".
    fn from(build: Option<u32>) -> Self {
        match build {
            Some(0) | None => Build::Latest,
            Some(n) => Build::Number(n),
        }
    }
}

impl From<u32> for Build {
    fn from(build: u32) -> Self {
        Build::from(Some(build))
    }
}

impl fmt::Display for Build {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Build::Number(n) => write!(f, "{n}"),
            Build::Latest => f.write_str("latest"),
        }
    }
}

/// Ordered card-definition records for one `(build, locale)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataDocument(pub Vec<serde_json::Value>);

impl MetadataDocument {
    pub fn records(&self) -> &[serde_json::Value] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transport failures reported by a [`DocumentFetcher`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FetchError {
    /// The request was aborted by its owner. Not a failure.
    #[error("request cancelled before a response was received")]
    Cancelled,

    /// Connection, DNS, timeout or protocol failure before any status.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server responded with status {0}")]
    Status(u16),

    #[error("failed to read response body: {0}")]
    Body(String),
}

/// GET transport for metadata documents.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    /// Fetch the body at `url` as text.
    async fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// Errors returned by [`MetadataManager::get`].
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The fetch was abandoned. Not a failure; nothing is delivered.
    #[error("metadata request cancelled")]
    Cancelled,

    /// Neither the requested build nor the latest document could be loaded.
    #[error("latest metadata unavailable: {0}")]
    Unavailable(String),
}

/// Maps `(build, locale)` to a document URL.
pub type SourceUrl = Arc<dyn Fn(Build, &str) -> String + Send + Sync>;

/// Source URL resolver for a `%(build)s` / `%(locale)s` template.
pub fn url_template(template: impl Into<String>) -> SourceUrl {
    let template = template.into();
    Arc::new(move |build, locale| {
        template
            .replace("%(build)s", &build.to_string())
            .replace("%(locale)s", locale)
    })
}

/// Cache key for a concrete build. `Latest` has no key.
pub fn cache_key(build: Build, locale: &str) -> Option<String> {
    match build {
        Build::Number(n) => Some(format!("hsjson_build-{n}_{locale}")),
        Build::Latest => None,
    }
}

enum Attempt {
    Loaded(MetadataDocument),
    Cancelled,
    Failed(String),
}

/// Cache-first metadata resolver.
pub struct MetadataManager {
    source_url: SourceUrl,
    backend: Arc<dyn StorageBackend>,
    fetcher: Arc<dyn DocumentFetcher>,
    locale: String,
}

impl MetadataManager {
    pub fn new(
        source_url: SourceUrl,
        backend: Arc<dyn StorageBackend>,
        fetcher: Arc<dyn DocumentFetcher>,
    ) -> Self {
        Self {
            source_url,
            backend,
            fetcher,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        let locale = locale.into();
        if !locale.is_empty() {
            self.locale = locale;
        }
        self
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Resolve the document for `build`.
    ///
    /// A failed versioned fetch is answered with the latest document,
    /// which is returned but never cached.
    pub async fn get(&self, build: impl Into<Build>) -> Result<MetadataDocument, MetadataError> {
        let Build::Number(number) = build.into() else {
            return self.get_latest().await;
        };
        let build = Build::Number(number);

        if let Some(document) = self.cached(build) {
            tracing::debug!(%build, locale = %self.locale, "metadata cache hit");
            return Ok(document);
        }

        match self.attempt(build).await {
            Attempt::Loaded(document) => {
                self.store(build, &document);
                Ok(document)
            }
            Attempt::Cancelled => Err(MetadataError::Cancelled),
            Attempt::Failed(reason) => {
                tracing::warn!(%build, %reason, "metadata fetch failed, falling back to latest");
                self.get_latest().await
            }
        }
    }

    /// Fetch the unversioned document. Never falls back further.
    async fn get_latest(&self) -> Result<MetadataDocument, MetadataError> {
        match self.attempt(Build::Latest).await {
            Attempt::Loaded(document) => Ok(document),
            Attempt::Cancelled => Err(MetadataError::Cancelled),
            Attempt::Failed(reason) => Err(MetadataError::Unavailable(reason)),
        }
    }

    async fn attempt(&self, build: Build) -> Attempt {
        let url = (self.source_url)(build, &self.locale);
        tracing::debug!(%build, %url, "fetching metadata");

        match self.fetcher.fetch(&url).await {
            Ok(body) => match serde_json::from_str(&body) {
                Ok(document) => Attempt::Loaded(document),
                Err(err) => Attempt::Failed(format!("invalid metadata document: {err}")),
            },
            Err(FetchError::Cancelled) => Attempt::Cancelled,
            Err(err) => Attempt::Failed(err.to_string()),
        }
    }

    fn cached(&self, build: Build) -> Option<MetadataDocument> {
        let key = cache_key(build, &self.locale)?;
        if !self.backend.has(&key) {
            return None;
        }
        let raw = self.backend.get(&key)?;
        match serde_json::from_str(&raw) {
            Ok(document) => Some(document),
            Err(err) => {
                tracing::warn!(%key, error = %err, "ignoring corrupt metadata cache entry");
                None
            }
        }
    }

    fn store(&self, build: Build, document: &MetadataDocument) {
        let Some(key) = cache_key(build, &self.locale) else {
            return;
        };
        match serde_json::to_string(document) {
            Ok(raw) => self.backend.set(&key, &raw),
            Err(err) => tracing::warn!(%key, error = %err, "failed to encode metadata for cache"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted fetcher keyed by URL that records every request.
    #[derive(Default)]
    struct ScriptedFetcher {
        responses: HashMap<String, Result<String, FetchError>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedFetcher {
        fn respond(mut self, url: &str, response: Result<&str, FetchError>) -> Self {
            self.responses
                .insert(url.to_string(), response.map(str::to_string));
            self
        }

        fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .unwrap_or(Err(FetchError::Status(404)))
        }
    }

    const TEMPLATE: &str = "https://cdn.test/v1/%(build)s/%(locale)s/cards.json";
    const LATEST_URL: &str = "https://cdn.test/v1/latest/enUS/cards.json";
    const BUILD_URL: &str = "https://cdn.test/v1/13921/enUS/cards.json";

    fn manager(
        fetcher: &Arc<ScriptedFetcher>,
        storage: &Arc<MemoryStorage>,
    ) -> MetadataManager {
        MetadataManager::new(url_template(TEMPLATE), storage.clone(), fetcher.clone())
    }

    fn doc(id: &str) -> MetadataDocument {
        MetadataDocument(vec![serde_json::json!({ "id": id })])
    }

    #[test]
    fn falsy_builds_are_latest() {
        assert_eq!(Build::from(None), Build::Latest);
        assert_eq!(Build::from(Some(0)), Build::Latest);
        assert_eq!(Build::from(13921u32), Build::Number(13921));
        assert_eq!(cache_key(Build::Latest, "enUS"), None);
        assert_eq!(
            cache_key(Build::Number(13921), "enUS").as_deref(),
            Some("hsjson_build-13921_enUS")
        );
    }

    #[test]
    fn template_substitutes_build_and_locale() {
        let url = url_template(TEMPLATE);
        assert_eq!(url(Build::Number(5), "frFR"), "https://cdn.test/v1/5/frFR/cards.json");
        assert_eq!(url(Build::Latest, "enUS"), LATEST_URL);
    }

    #[tokio::test]
    async fn cache_hit_skips_network() {
        let fetcher = Arc::new(ScriptedFetcher::default());
        let storage = Arc::new(MemoryStorage::new());
        storage.set("hsjson_build-13921_enUS", r#"[{"id":"CACHED"}]"#);

        let document = manager(&fetcher, &storage).get(13921u32).await.unwrap();

        assert_eq!(document, doc("CACHED"));
        assert!(fetcher.requests().is_empty());
    }

    #[tokio::test]
    async fn fetched_build_is_cached_for_next_call() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().respond(BUILD_URL, Ok(r#"[{"id":"FETCHED"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&fetcher, &storage);

        assert_eq!(manager.get(13921u32).await.unwrap(), doc("FETCHED"));
        assert_eq!(manager.get(13921u32).await.unwrap(), doc("FETCHED"));

        assert_eq!(fetcher.requests(), vec![BUILD_URL.to_string()]);
        assert!(storage.has("hsjson_build-13921_enUS"));
    }

    #[tokio::test]
    async fn falsy_build_never_touches_cache() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().respond(LATEST_URL, Ok(r#"[{"id":"LATEST"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());
        let manager = manager(&fetcher, &storage);

        assert_eq!(manager.get(None::<u32>).await.unwrap(), doc("LATEST"));
        assert_eq!(manager.get(0u32).await.unwrap(), doc("LATEST"));
        assert_eq!(manager.get(Build::Latest).await.unwrap(), doc("LATEST"));

        assert_eq!(fetcher.requests().len(), 3);
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn failed_build_falls_back_to_latest_once() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Err(FetchError::Status(500)))
                .respond(LATEST_URL, Ok(r#"[{"id":"LATEST"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());

        let document = manager(&fetcher, &storage).get(13921u32).await.unwrap();

        assert_eq!(document, doc("LATEST"));
        assert_eq!(
            fetcher.requests(),
            vec![BUILD_URL.to_string(), LATEST_URL.to_string()]
        );
        assert!(!storage.has("hsjson_build-13921_enUS"));
    }

    #[tokio::test]
    async fn undecodable_body_falls_back_to_latest() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Ok("<html>oops</html>"))
                .respond(LATEST_URL, Ok(r#"[{"id":"LATEST"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());

        let document = manager(&fetcher, &storage).get(13921u32).await.unwrap();
        assert_eq!(document, doc("LATEST"));
    }

    #[tokio::test]
    async fn cancelled_fetch_delivers_nothing() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Err(FetchError::Cancelled))
                .respond(LATEST_URL, Ok(r#"[{"id":"LATEST"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());

        let err = manager(&fetcher, &storage).get(13921u32).await.unwrap_err();

        assert!(matches!(err, MetadataError::Cancelled));
        assert_eq!(fetcher.requests(), vec![BUILD_URL.to_string()]);
    }

    #[tokio::test]
    async fn failing_latest_is_terminal() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Err(FetchError::Status(503)))
                .respond(LATEST_URL, Err(FetchError::Status(503))),
        );
        let storage = Arc::new(MemoryStorage::new());

        let err = manager(&fetcher, &storage).get(13921u32).await.unwrap_err();

        assert!(matches!(err, MetadataError::Unavailable(_)));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_latest() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Err(FetchError::Transport("connection refused".into())))
                .respond(LATEST_URL, Ok(r#"[{"id":"LATEST"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());

        let document = manager(&fetcher, &storage).get(13921u32).await.unwrap();

        assert_eq!(document, doc("LATEST"));
        assert_eq!(fetcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn cancelled_latest_during_fallback_delivers_nothing() {
        let fetcher = Arc::new(
            ScriptedFetcher::default()
                .respond(BUILD_URL, Err(FetchError::Status(500)))
                .respond(LATEST_URL, Err(FetchError::Cancelled)),
        );
        let storage = Arc::new(MemoryStorage::new());

        let err = manager(&fetcher, &storage).get(13921u32).await.unwrap_err();

        assert!(matches!(err, MetadataError::Cancelled));
        assert_eq!(
            fetcher.requests(),
            vec![BUILD_URL.to_string(), LATEST_URL.to_string()]
        );
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched() {
        let fetcher = Arc::new(
            ScriptedFetcher::default().respond(BUILD_URL, Ok(r#"[{"id":"FRESH"}]"#)),
        );
        let storage = Arc::new(MemoryStorage::new());
        storage.set("hsjson_build-13921_enUS", "not json");

        let document = manager(&fetcher, &storage).get(13921u32).await.unwrap();

        assert_eq!(document, doc("FRESH"));
        assert_eq!(
            storage.get("hsjson_build-13921_enUS").as_deref(),
            Some(r#"[{"id":"FRESH"}]"#)
        );
    }

    #[tokio::test]
    async fn locale_is_part_of_key_and_url() {
        let url = "https://cdn.test/v1/13921/koKR/cards.json";
        let fetcher = Arc::new(ScriptedFetcher::default().respond(url, Ok("[]")));
        let storage = Arc::new(MemoryStorage::new());

        let manager = manager(&fetcher, &storage).with_locale("koKR");
        manager.get(13921u32).await.unwrap();

        assert_eq!(manager.locale(), "koKR");
        assert!(storage.has("hsjson_build-13921_koKR"));
    }
}
