// hsreplay Kernel
//
// Client-side core of the replay site: card metadata caching,
// batched telemetry, and the embedder driving the playback widget.

pub mod assets;
pub mod config;
pub mod embed;
pub mod history;
pub mod metadata;
pub mod metrics;
pub mod share;

#[cfg(test)]
mod testing;
