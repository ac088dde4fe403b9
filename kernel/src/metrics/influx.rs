// InfluxDB Line Protocol Backend
//
// Encodes each point as `series[,tag=value...] field=value[,field=value...]`
// and submits one newline-separated batch per write.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;

use super::{MetricsBackend, Point};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("telemetry request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Submits encoded batches to a write endpoint.
#[async_trait]
pub trait LineTransport: Send + Sync + 'static {
    async fn submit(&self, body: String) -> Result<(), TransportError>;
}

/// POSTs batches as `text/plain` to a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LineTransport for HttpTransport {
    async fn submit(&self, body: String) -> Result<(), TransportError> {
        self.client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

fn escape(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

/// Encode one point, or `None` when it has no writable fields.
pub fn encode_line(point: &Point) -> Option<String> {
    let fields: Vec<(&String, &f64)> = point
        .values
        .iter()
        .filter(|(_, value)| value.is_finite())
        .collect();
    if fields.is_empty() {
        return None;
    }

    let mut line = String::new();
    escape(&mut line, point.series(), &[',', ' ']);

    for (key, value) in point.tags.iter().flatten() {
        line.push(',');
        escape(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape(&mut line, value, &[',', '=', ' ']);
    }

    for (i, (key, value)) in fields.into_iter().enumerate() {
        line.push(if i == 0 { ' ' } else { ',' });
        escape(&mut line, key, &[',', '=', ' ']);
        let _ = write!(line, "={value}");
    }

    Some(line)
}

/// Encode a batch. Returns `None` when nothing would be sent.
pub fn encode_batch(points: &[Point]) -> Option<String> {
    let lines: Vec<String> = points.iter().filter_map(encode_line).collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Wire backend for a line-protocol write endpoint.
pub struct InfluxMetricsBackend<T = HttpTransport> {
    transport: Arc<T>,
}

impl InfluxMetricsBackend<HttpTransport> {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_transport(HttpTransport::new(url))
    }
}

impl<T: LineTransport> InfluxMetricsBackend<T> {
    pub fn with_transport(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

async fn submit<T: LineTransport>(transport: &T, body: String) {
    if let Err(err) = transport.submit(body).await {
        tracing::warn!(error = %err, "dropping telemetry batch");
    }
}

#[async_trait]
impl<T: LineTransport> MetricsBackend for InfluxMetricsBackend<T> {
    fn write_points(&self, points: Vec<Point>) {
        let Some(body) = encode_batch(&points) else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(points = points.len(), "no async runtime, dropping telemetry batch");
            return;
        };

        let transport = Arc::clone(&self.transport);
        runtime.spawn(async move { submit(transport.as_ref(), body).await });
    }

    async fn deliver(&self, points: Vec<Point>) {
        if let Some(body) = encode_batch(&points) {
            submit(self.transport.as_ref(), body).await;
        }
    }
}
