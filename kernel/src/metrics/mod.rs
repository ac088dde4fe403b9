// Telemetry Pipeline
//
// Data points flow from instrumentation call sites through an optional
// reporter and batching layer into a wire backend. Writes are
// fire-and-forget: transport failures never reach the caller.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod batching;
pub mod influx;
pub mod reporter;

pub use batching::BatchingMiddleware;
pub use influx::InfluxMetricsBackend;
pub use reporter::{MetricsReporter, Prefix};

/// Numeric fields of a point.
pub type Fields = BTreeMap<String, f64>;

/// String tags of a point.
pub type Tags = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PointError {
    #[error("series name must not be empty")]
    EmptySeries,
}

/// One telemetry observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    series: String,
    pub values: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Tags>,
}

impl Point {
    pub fn new(series: impl Into<String>, values: Fields) -> Result<Self, PointError> {
        let series = series.into();
        if series.is_empty() {
            return Err(PointError::EmptySeries);
        }
        Ok(Self {
            series,
            values,
            tags: None,
        })
    }

    pub fn with_tags(mut self, tags: Option<Tags>) -> Self {
        self.tags = tags;
        self
    }

    pub fn series(&self) -> &str {
        &self.series
    }
}

/// Build a [`Fields`] map from `(name, value)` pairs.
pub fn fields<'a>(pairs: impl IntoIterator<Item = (&'a str, f64)>) -> Fields {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Build a [`Tags`] map from `(name, value)` pairs.
pub fn tags<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Tags {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// How a flush hands its batch to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Hand off and return immediately.
    Detached,

    /// Wait until the transport is done with the batch.
    Synchronous,
}

static ABORTS_ASYNC_ON_UNLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Firefox/\d+").expect("static regex is valid"));

impl FlushMode {
    /// Teardown flush mode for a client.
    ///
    /// Firefox aborts in-flight asynchronous requests while a page
    /// unloads, so its final flush has to wait for delivery.
    pub fn for_user_agent(user_agent: &str) -> Self {
        if ABORTS_ASYNC_ON_UNLOAD.is_match(user_agent) {
            FlushMode::Synchronous
        } else {
            FlushMode::Detached
        }
    }
}

/// Sink for data points.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Queue points for delivery.
    fn write_points(&self, points: Vec<Point>);

    fn write_point(&self, series: &str, values: Fields, tags: Option<Tags>) {
        match Point::new(series, values) {
            Ok(point) => self.write_points(vec![point.with_tags(tags)]),
            Err(err) => tracing::warn!(error = %err, "dropping metrics point"),
        }
    }

    /// Deliver points, resolving once the transport has finished with them.
    async fn deliver(&self, points: Vec<Point>) {
        self.write_points(points);
    }
}

#[async_trait]
impl<B: MetricsBackend + ?Sized> MetricsBackend for Arc<B> {
    fn write_points(&self, points: Vec<Point>) {
        (**self).write_points(points);
    }

    fn write_point(&self, series: &str, values: Fields, tags: Option<Tags>) {
        (**self).write_point(series, values, tags);
    }

    async fn deliver(&self, points: Vec<Point>) {
        (**self).deliver(points).await;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Backend that records every batch it receives.
    #[derive(Default)]
    pub struct RecordingBackend {
        batches: Mutex<Vec<Vec<Point>>>,
        delivered: Mutex<Vec<Vec<Point>>>,
    }

    impl RecordingBackend {
        pub fn batches(&self) -> Vec<Vec<Point>> {
            self.batches.lock().unwrap().clone()
        }

        pub fn delivered(&self) -> Vec<Vec<Point>> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MetricsBackend for RecordingBackend {
        fn write_points(&self, points: Vec<Point>) {
            self.batches.lock().unwrap().push(points);
        }

        async fn deliver(&self, points: Vec<Point>) {
            self.delivered.lock().unwrap().push(points);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingBackend;
    use super::*;

    #[test]
    fn empty_series_is_rejected() {
        assert_eq!(
            Point::new("", Fields::new()).unwrap_err(),
            PointError::EmptySeries
        );
    }

    #[test]
    fn point_without_values_is_legal() {
        let point = Point::new("idle", Fields::new()).unwrap();
        assert!(point.values.is_empty());
        assert_eq!(point.series(), "idle");
    }

    #[test]
    fn write_point_wraps_single_point() {
        let backend = RecordingBackend::default();
        backend.write_point("turn", fields([("n", 1.0)]), Some(tags([("side", "a")])));
        backend.write_point("", fields([("n", 1.0)]), None);

        let batches = backend.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].series(), "turn");
        assert_eq!(batches[0][0].tags, Some(tags([("side", "a")])));
    }

    #[test]
    fn firefox_flushes_synchronously() {
        let firefox = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
        let chrome = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/126.0 Safari/537.36";

        assert_eq!(FlushMode::for_user_agent(firefox), FlushMode::Synchronous);
        assert_eq!(FlushMode::for_user_agent(chrome), FlushMode::Detached);
        assert_eq!(FlushMode::for_user_agent(""), FlushMode::Detached);
    }
}
