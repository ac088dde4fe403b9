// Replay Embedder
//
// Wires logging, asset resolution, metadata and telemetry into the
// playback widget, then mirrors the widget's turn/reveal/swap changes
// into its own state and republishes them to subscribers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::assets::AssetUrls;
use crate::config::SiteConfig;
use crate::metadata::{
    url_template, Build, DocumentFetcher, FileStorage, HttpFetcher, MetadataError,
    MetadataManager, NullStorage, StorageBackend,
};
use crate::metrics::{
    BatchingMiddleware, FlushMode, InfluxMetricsBackend, MetricsBackend, MetricsReporter,
};

pub mod reporting;
pub mod widget;

pub use reporting::{ErrorReporter, ReportError, Reported, SentryReporter};
pub use widget::{Container, ContainerLookup, PlaybackWidget};

/// Change published by the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Turn(u32),
    Reveal(bool),
    Swap(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Turn,
    Reveal,
    Swap,
}

impl PlaybackEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlaybackEvent::Turn(_) => EventKind::Turn,
            PlaybackEvent::Reveal(_) => EventKind::Reveal,
            PlaybackEvent::Swap(_) => EventKind::Swap,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Turn => "turn",
            EventKind::Reveal => "reveal",
            EventKind::Swap => "swap",
        }
    }
}

/// Playback state. `None` means unset or unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub turn: Option<u32>,
    pub revealed: Option<bool>,
    pub swapped: Option<bool>,
}

impl PlaybackState {
    pub fn apply(&mut self, event: &PlaybackEvent) {
        match *event {
            PlaybackEvent::Turn(turn) => self.turn = Some(turn),
            PlaybackEvent::Reveal(revealed) => self.revealed = Some(revealed),
            PlaybackEvent::Swap(swapped) => self.swapped = Some(swapped),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    #[error("could not find target container with id \"{0}\"")]
    ContainerNotFound(String),

    #[error("container \"{0}\" has no replay url")]
    MissingReplayUrl(String),

    #[error("replay is already embedded")]
    AlreadyEmbedded,

    #[error("embedding requires a running async runtime")]
    NoRuntime,

    #[error("error reporting misconfigured: {0}")]
    Reporting(#[from] ReportError),
}

/// Handle returned by [`Embedder::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&PlaybackEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    kind: Option<EventKind>,
    listener: Listener,
}

#[derive(Default)]
struct Shared {
    state: Mutex<PlaybackState>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: Mutex<u64>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    /// Mirror a widget change into state, then notify subscribers.
    fn publish(&self, event: PlaybackEvent) {
        lock(&self.state).apply(&event);

        let listeners: Vec<Listener> = lock(&self.subscribers)
            .iter()
            .filter(|s| s.kind.map_or(true, |kind| kind == event.kind()))
            .map(|s| Arc::clone(&s.listener))
            .collect();

        tracing::debug!(event = event.name(), listeners = listeners.len(), "playback change");
        for listener in listeners {
            listener(&event);
        }
    }
}

type MetricsPipeline = BatchingMiddleware<Arc<dyn MetricsBackend>>;

/// Embeds the replay widget into a page container.
pub struct Embedder {
    config: SiteConfig,
    shared: Arc<Shared>,
    storage: Option<Arc<dyn StorageBackend>>,
    fetcher: Option<Arc<dyn DocumentFetcher>>,
    metrics_backend: Option<Arc<dyn MetricsBackend>>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    release: String,
    batching: Option<Arc<MetricsPipeline>>,
    embedded: bool,
}

impl Embedder {
    pub fn new(config: SiteConfig) -> Self {
        Self {
            config,
            shared: Arc::default(),
            storage: None,
            fetcher: None,
            metrics_backend: None,
            reporter: None,
            release: env!("CARGO_PKG_VERSION").to_string(),
            batching: None,
            embedded: false,
        }
    }

    /// Override the metadata cache. Defaults to files under the cache dir.
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Override the metadata transport. Defaults to HTTP.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn DocumentFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Override the wire metrics backend. Defaults to the configured endpoint.
    pub fn with_metrics_backend(mut self, backend: Arc<dyn MetricsBackend>) -> Self {
        self.metrics_backend = Some(backend);
        self
    }

    /// Override the error reporter. Defaults to the configured DSN, if any.
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = release.into();
        self
    }

    pub fn start_at_turn(&mut self, turn: u32) -> Result<(), EmbedError> {
        self.preset(PlaybackEvent::Turn(turn))
    }

    pub fn start_revealed(&mut self, revealed: bool) -> Result<(), EmbedError> {
        self.preset(PlaybackEvent::Reveal(revealed))
    }

    pub fn start_swapped(&mut self, swapped: bool) -> Result<(), EmbedError> {
        self.preset(PlaybackEvent::Swap(swapped))
    }

    fn preset(&mut self, event: PlaybackEvent) -> Result<(), EmbedError> {
        if self.embedded {
            return Err(EmbedError::AlreadyEmbedded);
        }
        lock(&self.shared.state).apply(&event);
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        *lock(&self.shared.state)
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    /// Listen to every playback change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscriber(None, Arc::new(listener))
    }

    /// Listen to one kind of playback change.
    pub fn on(
        &self,
        kind: EventKind,
        listener: impl Fn(&PlaybackEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.add_subscriber(Some(kind), Arc::new(listener))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.shared.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    fn add_subscriber(&self, kind: Option<EventKind>, listener: Listener) -> SubscriptionId {
        let id = {
            let mut next = lock(&self.shared.next_id);
            *next += 1;
            SubscriptionId(*next)
        };
        lock(&self.shared.subscribers).push(Subscriber { id, kind, listener });
        id
    }

    /// Configure `widget` and start playback of the container's replay.
    ///
    /// Must be called from within a Tokio runtime; metadata loads and
    /// telemetry flushes are spawned onto it.
    pub fn embed(
        &mut self,
        container_id: &str,
        containers: &dyn ContainerLookup,
        widget: &mut dyn PlaybackWidget,
    ) -> Result<(), EmbedError> {
        if self.embedded {
            return Err(EmbedError::AlreadyEmbedded);
        }

        let container = containers
            .find(container_id)
            .ok_or_else(|| EmbedError::ContainerNotFound(container_id.to_string()))?;
        let replay_url = container
            .replay_url()
            .ok_or_else(|| EmbedError::MissingReplayUrl(container_id.to_string()))?
            .to_string();
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| EmbedError::NoRuntime)?;

        // logging
        let reporter = self.error_reporter()?;
        let log: Arc<dyn Fn(&Reported) + Send + Sync> = {
            let runtime = runtime.clone();
            Arc::new(move |reported: &Reported| {
                if let Some(reporter) = &reporter {
                    let reporter = Arc::clone(reporter);
                    let reported = reported.clone();
                    runtime.spawn(async move {
                        if let Err(err) = reporter.report(&reported).await {
                            tracing::warn!(error = %err, "failed to forward error report");
                        }
                    });
                }
                tracing::error!(target: "hsreplay::widget", "{reported}");
            })
        };
        {
            let log = Arc::clone(&log);
            widget.logger(Box::new(move |reported: &Reported| log(reported)));
        }

        // graphics
        let assets = AssetUrls::from_config(&self.config);
        {
            let assets = assets.clone();
            widget.assets(Box::new(move |asset: &str| assets.joust_asset(asset)));
        }
        widget.card_art(Box::new(move |card_id: &str| assets.card_art(card_id)));

        // metadata
        let manager = Arc::new(self.metadata_manager());
        {
            let runtime = runtime.clone();
            let log = Arc::clone(&log);
            widget.metadata(Box::new(move |build, callback| {
                let manager = Arc::clone(&manager);
                let log = Arc::clone(&log);
                runtime.spawn(async move {
                    match manager.get(Build::from(build)).await {
                        Ok(document) => callback(document),
                        Err(MetadataError::Cancelled) => {
                            tracing::debug!(?build, "metadata request cancelled");
                        }
                        Err(err) => log(&Reported::exception("MetadataError", err.to_string())),
                    }
                });
            }));
        }

        // telemetry
        let batching = Arc::new(BatchingMiddleware::with_interval(
            self.wire_metrics_backend(),
            self.config.flush_interval(),
        ));
        let metrics = MetricsReporter::new(
            Arc::clone(&batching),
            self.config.metrics_prefix.as_str(),
        );
        widget.events(Box::new(move |series: &str, values, tags| {
            metrics.write_point(series, values, tags);
        }));
        self.batching = Some(batching);

        // turn, reveal and swap linking
        let initial = self.state();
        if let Some(turn) = initial.turn {
            widget.start_at_turn(turn);
        }
        let shared = Arc::clone(&self.shared);
        widget.on_turn(Box::new(move |turn| shared.publish(PlaybackEvent::Turn(turn))));

        if let Some(revealed) = initial.revealed {
            widget.start_revealed(revealed);
        }
        let shared = Arc::clone(&self.shared);
        widget.on_toggle_reveal(Box::new(move |revealed| {
            shared.publish(PlaybackEvent::Reveal(revealed))
        }));

        if let Some(swapped) = initial.swapped {
            widget.start_swapped(swapped);
        }
        let shared = Arc::clone(&self.shared);
        widget.on_toggle_swap(Box::new(move |swapped| {
            shared.publish(PlaybackEvent::Swap(swapped))
        }));

        tracing::info!(container = container_id, url = %replay_url, "starting replay playback");
        widget.load_from_url(&replay_url);
        self.embedded = true;

        Ok(())
    }

    /// Final telemetry flush before the page goes away.
    pub async fn teardown(&self, user_agent: &str) {
        if let Some(batching) = &self.batching {
            batching.teardown(FlushMode::for_user_agent(user_agent)).await;
        }
    }

    fn error_reporter(&self) -> Result<Option<Arc<dyn ErrorReporter>>, EmbedError> {
        if let Some(reporter) = &self.reporter {
            return Ok(Some(Arc::clone(reporter)));
        }
        let Some(dsn) = self.config.error_dsn.as_deref() else {
            return Ok(None);
        };
        let reporter =
            SentryReporter::from_dsn(dsn, self.release.clone(), self.config.error_environment.clone())?;
        Ok(Some(Arc::new(reporter)))
    }

    fn metadata_manager(&self) -> MetadataManager {
        let storage: Arc<dyn StorageBackend> = match (&self.storage, self.config.resolved_cache_dir()) {
            (Some(storage), _) => Arc::clone(storage),
            (None, Some(dir)) => Arc::new(FileStorage::new(dir)),
            (None, None) => Arc::new(NullStorage),
        };
        let fetcher: Arc<dyn DocumentFetcher> = match &self.fetcher {
            Some(fetcher) => Arc::clone(fetcher),
            None => Arc::new(HttpFetcher::default()),
        };

        MetadataManager::new(
            url_template(self.config.metadata_url_template.clone()),
            storage,
            fetcher,
        )
        .with_locale(self.config.locale.clone())
    }

    fn wire_metrics_backend(&self) -> Arc<dyn MetricsBackend> {
        match &self.metrics_backend {
            Some(backend) => Arc::clone(backend),
            None => Arc::new(InfluxMetricsBackend::new(
                self.config.telemetry_endpoint.clone(),
            )),
        }
    }
}
