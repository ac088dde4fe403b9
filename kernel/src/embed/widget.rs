// Playback Widget Boundary
//
// The replay widget is an external collaborator. The embedder only talks
// to it through the capabilities declared here, and finds its host
// container through a lookup.
//
// This module defines *interfaces only*.

use std::collections::HashMap;

use crate::metadata::MetadataDocument;
use crate::metrics::{Fields, Tags};

use super::reporting::Reported;

/// Maps an asset or card id to a URL.
pub type AssetResolver = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Receives a metadata document. Never called for cancelled or failed loads.
pub type MetadataCallback = Box<dyn FnOnce(MetadataDocument) + Send>;

/// Widget asks for the metadata of a build (`None` when unknown).
pub type MetadataSource = Box<dyn Fn(Option<u32>, MetadataCallback) + Send + Sync>;

/// Widget telemetry: series, values, optional tags.
pub type EventSink = Box<dyn Fn(&str, Fields, Option<Tags>) + Send + Sync>;

pub type Logger = Box<dyn Fn(&Reported) + Send + Sync>;

pub type TurnListener = Box<dyn Fn(u32) + Send + Sync>;

pub type ToggleListener = Box<dyn Fn(bool) + Send + Sync>;

/// Capabilities of the external replay widget.
///
/// Configuration calls happen before `load_from_url`, which starts
/// playback.
pub trait PlaybackWidget {
    fn logger(&mut self, logger: Logger);

    fn assets(&mut self, resolver: AssetResolver);

    fn card_art(&mut self, resolver: AssetResolver);

    fn metadata(&mut self, source: MetadataSource);

    fn events(&mut self, sink: EventSink);

    fn start_at_turn(&mut self, turn: u32);

    fn start_revealed(&mut self, revealed: bool);

    fn start_swapped(&mut self, swapped: bool);

    fn on_turn(&mut self, listener: TurnListener);

    fn on_toggle_reveal(&mut self, listener: ToggleListener);

    fn on_toggle_swap(&mut self, listener: ToggleListener);

    fn load_from_url(&mut self, url: &str);
}

/// Data attribute holding the replay document URL.
pub const REPLAY_URL_ATTRIBUTE: &str = "replayurl";

/// Element the widget renders into.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub data: HashMap<String, String>,
}

impl Container {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: HashMap::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn data(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn replay_url(&self) -> Option<&str> {
        self.data(REPLAY_URL_ATTRIBUTE).filter(|url| !url.is_empty())
    }
}

/// Resolves containers by id.
pub trait ContainerLookup {
    fn find(&self, id: &str) -> Option<Container>;
}

impl ContainerLookup for HashMap<String, Container> {
    fn find(&self, id: &str) -> Option<Container> {
        self.get(id).cloned()
    }
}

impl ContainerLookup for Vec<Container> {
    fn find(&self, id: &str) -> Option<Container> {
        self.iter().find(|container| container.id == id).cloned()
    }
}
