// Metrics Reporter
//
// Naming layer in front of a backend: series names are rewritten by a
// prefix before being handed on. Holds no buffer of its own.

use std::fmt;
use std::sync::Arc;

use super::{Fields, MetricsBackend, Tags};

/// Series-name rewrite applied by a [`MetricsReporter`].
#[derive(Clone, Default)]
pub enum Prefix {
    #[default]
    None,
    Literal(String),
    With(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Prefix {
    pub fn with(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Prefix::With(Arc::new(f))
    }

    pub fn apply(&self, series: &str) -> String {
        match self {
            Prefix::None => series.to_string(),
            Prefix::Literal(prefix) => format!("{prefix}{series}"),
            Prefix::With(f) => f(series),
        }
    }
}

impl From<&str> for Prefix {
    fn from(prefix: &str) -> Self {
        if prefix.is_empty() {
            Prefix::None
        } else {
            Prefix::Literal(prefix.to_string())
        }
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::None => f.write_str("None"),
            Prefix::Literal(prefix) => f.debug_tuple("Literal").field(prefix).finish(),
            Prefix::With(_) => f.write_str("With(..)"),
        }
    }
}

pub struct MetricsReporter<B> {
    backend: B,
    prefix: Prefix,
}

impl<B: MetricsBackend> MetricsReporter<B> {
    pub fn new(backend: B, prefix: impl Into<Prefix>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn write_point(&self, series: &str, values: Fields, tags: Option<Tags>) {
        self.backend
            .write_point(&self.prefix.apply(series), values, tags);
    }
}
