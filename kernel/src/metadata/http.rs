// HTTP transport for metadata documents.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use super::{DocumentFetcher, FetchError};

const USER_AGENT: &str = concat!("hsreplay-kernel/", env!("CARGO_PKG_VERSION"));

/// Aborts every in-flight and future fetch of the fetcher it came from.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// [`DocumentFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Option<Duration>,
    abort: Option<watch::Receiver<bool>>,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
            abort: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach an abort handle. Aborted fetches resolve to `Cancelled`.
    pub fn abortable(mut self) -> (Self, AbortHandle) {
        let (tx, rx) = watch::channel(false);
        self.abort = Some(rx);
        (self, AbortHandle { tx: Arc::new(tx) })
    }

    async fn request(&self, url: &str) -> Result<String, FetchError> {
        let mut request = self.client.get(url).header("User-Agent", USER_AGENT);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(classify)?;
        let response = response.error_for_status().map_err(classify)?;

        response
            .text()
            .await
            .map_err(|err| FetchError::Body(err.to_string()))
    }
}

/// Status errors keep their code; everything else failed in transit.
fn classify(err: reqwest::Error) -> FetchError {
    match err.status() {
        Some(status) => FetchError::Status(status.as_u16()),
        None => FetchError::Transport(err.to_string()),
    }
}

/// Resolves once the flag is raised. Never resolves if the handle is gone.
async fn aborted(mut rx: watch::Receiver<bool>) {
    loop {
        let raised = *rx.borrow_and_update();
        if raised {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let Some(abort) = self.abort.clone() else {
            return self.request(url).await;
        };

        tokio::select! {
            result = self.request(url) => result,
            () = aborted(abort) => {
                tracing::debug!(%url, "metadata fetch aborted");
                Err(FetchError::Cancelled)
            }
        }
    }
}
