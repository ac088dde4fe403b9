// Share Links
//
// Builds the replay URL shown in the share dialog, optionally pinned to
// the current turn and viewing perspective via the URL fragment.

use crate::embed::{PlaybackEvent, PlaybackState};

/// Which parts of the playback state a share link carries.
///
/// A toggle only counts while its checkbox is shown; the `always_` flags
/// apply regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShareOptions {
    pub show_link_to_turn: bool,
    pub link_to_turn: bool,
    pub always_link_to_turn: bool,
    pub show_preserve_perspective: bool,
    pub preserve_perspective: bool,
    pub always_preserve_perspective: bool,
}

impl ShareOptions {
    fn links_turn(&self) -> bool {
        (self.show_link_to_turn && self.link_to_turn) || self.always_link_to_turn
    }

    fn preserves_perspective(&self) -> bool {
        (self.show_preserve_perspective && self.preserve_perspective)
            || self.always_preserve_perspective
    }
}

/// Widget turns count both players; the fragment uses `<round><a|b>`.
pub fn turn_fragment(turn: u32) -> String {
    let side = if turn % 2 == 1 { 'a' } else { 'b' };
    format!("{}{side}", turn.div_ceil(2))
}

pub fn build_url(base: &str, state: &PlaybackState, options: &ShareOptions) -> String {
    let mut parts = Vec::new();

    if let Some(turn) = state.turn.filter(|turn| *turn > 0) {
        if options.links_turn() {
            parts.push(format!("turn={}", turn_fragment(turn)));
        }
    }

    if options.preserves_perspective() {
        if let Some(reveal) = state.revealed {
            parts.push(format!("reveal={}", u8::from(reveal)));
        }
        if let Some(swap) = state.swapped {
            parts.push(format!("swap={}", u8::from(swap)));
        }
    }

    if parts.is_empty() {
        base.to_string()
    } else {
        format!("{base}#{}", parts.join("&"))
    }
}

/// State behind the share dialog, kept current from embedder events.
#[derive(Debug, Clone, Default)]
pub struct ShareDialog {
    url: String,
    state: PlaybackState,
    pub options: ShareOptions,
}

impl ShareDialog {
    pub fn new(url: impl Into<String>, options: ShareOptions) -> Self {
        Self {
            url: url.into(),
            state: PlaybackState::default(),
            options,
        }
    }

    pub fn apply(&mut self, event: &PlaybackEvent) {
        self.state.apply(event);
    }

    pub fn toggle_link_to_turn(&mut self) {
        self.options.link_to_turn = !self.options.link_to_turn;
    }

    pub fn toggle_preserve_perspective(&mut self) {
        self.options.preserve_perspective = !self.options.preserve_perspective;
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn share_url(&self) -> String {
        build_url(&self.url, &self.state, &self.options)
    }
}
