//! The in-process event bus (spec.md §4.12).
//!
//! A single `raise`/`subscribe` contract every component shares by `Arc`.
//! Every event is also forwarded through `tracing`, so logs are available
//! even with zero subscribers attached.

use std::fmt;

use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::error::ApiError;
use crate::path::ApiPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

/// Structured payloads the core raises. New variants are additive; adapters
/// that only care about a subset match on `_ =>`.
#[derive(Debug, Clone)]
pub enum Event {
    ServiceStartBegin,
    ServiceStartEnd,
    ServiceStopBegin,
    ServiceStopEnd,
    PollingItemBegin { name: String },
    PollingItemEnd { name: String },
    FileUploadCompleted { api_path: ApiPath, error: Option<ApiError>, cancelled: bool },
    FilesystemItemEvicted { api_path: ApiPath },
    MaxCacheSizeReached { cache_size_bytes: u64, max_cache_size_bytes: u64 },
    InvalidCacheSize { configured_bytes: u64, minimum_bytes: u64 },
    ProviderError { api_path: ApiPath, error: ApiError },
    PacketAuthFailure { peer: String },
}

impl Event {
    pub fn level(&self) -> Level {
        match self {
            Event::ServiceStartBegin
            | Event::ServiceStartEnd
            | Event::ServiceStopBegin
            | Event::ServiceStopEnd
            | Event::PollingItemBegin { .. }
            | Event::PollingItemEnd { .. }
            | Event::FilesystemItemEvicted { .. } => Level::Info,
            Event::FileUploadCompleted { error, cancelled, .. } => {
                if error.is_some() && !cancelled { Level::Error } else { Level::Info }
            }
            Event::MaxCacheSizeReached { .. } => Level::Warning,
            Event::InvalidCacheSize { .. } => Level::Error,
            Event::ProviderError { .. } => Level::Error,
            Event::PacketAuthFailure { .. } => Level::Warning,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::ServiceStartBegin => write!(f, "service start begin"),
            Event::ServiceStartEnd => write!(f, "service start end"),
            Event::ServiceStopBegin => write!(f, "service stop begin"),
            Event::ServiceStopEnd => write!(f, "service stop end"),
            Event::PollingItemBegin { name } => write!(f, "polling item begin: {name}"),
            Event::PollingItemEnd { name } => write!(f, "polling item end: {name}"),
            Event::FileUploadCompleted { api_path, error, cancelled } => match (error, cancelled) {
                (_, true) => write!(f, "upload cancelled for {api_path}"),
                (Some(e), false) => write!(f, "upload failed for {api_path}: {e}"),
                (None, false) => write!(f, "upload completed for {api_path}"),
            },
            Event::FilesystemItemEvicted { api_path } => write!(f, "evicted {api_path}"),
            Event::MaxCacheSizeReached { cache_size_bytes, max_cache_size_bytes } => write!(
                f,
                "max cache size reached: {cache_size_bytes}/{max_cache_size_bytes} bytes"
            ),
            Event::InvalidCacheSize { configured_bytes, minimum_bytes } => write!(
                f,
                "invalid cache size {configured_bytes}, minimum is {minimum_bytes}"
            ),
            Event::ProviderError { api_path, error } => {
                write!(f, "provider error for {api_path}: {error}")
            }
            Event::PacketAuthFailure { peer } => write!(f, "packet auth failure from {peer}"),
        }
    }
}

/// Non-blocking pub/sub for [`Event`]s, backed by `tokio::sync::broadcast`.
///
/// `raise` never blocks the caller: a full channel (no subscribers keeping
/// up) drops the event and logs a warning rather than stalling a hot path.
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    min_level: Level,
}

impl EventBus {
    pub fn new(min_level: Level) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender, min_level }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Raises an event: forwards to `tracing` at the event's level (if at or
    /// above `min_level`) and publishes to subscribers.
    pub fn raise(&self, event: Event) {
        let level = event.level();
        if level >= self.min_level {
            match level {
                Level::Debug => debug!("{event}"),
                Level::Info => info!("{event}"),
                Level::Warning => warn!("{event}"),
                Level::Error => error!("{event}"),
            }
        }
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_raised_event() {
        let bus = EventBus::new(Level::Debug);
        let mut rx = bus.subscribe();
        bus.raise(Event::FilesystemItemEvicted { api_path: ApiPath::root() });
        let got = rx.recv().await.unwrap();
        assert!(matches!(got, Event::FilesystemItemEvicted { .. }));
    }

    #[test]
    fn upload_completed_level_depends_on_error() {
        let ok = Event::FileUploadCompleted { api_path: ApiPath::root(), error: None, cancelled: false };
        let err = Event::FileUploadCompleted {
            api_path: ApiPath::root(),
            error: Some(ApiError::CommError),
            cancelled: false,
        };
        assert_eq!(ok.level(), Level::Info);
        assert_eq!(err.level(), Level::Error);
    }

    #[test]
    fn a_cancelled_upload_is_info_level_even_with_an_error() {
        let cancelled = Event::FileUploadCompleted {
            api_path: ApiPath::root(),
            error: Some(ApiError::CommError),
            cancelled: true,
        };
        assert_eq!(cancelled.level(), Level::Info);
    }

    #[test]
    fn raise_without_subscribers_does_not_panic() {
        let bus = EventBus::new(Level::Info);
        bus.raise(Event::ServiceStartBegin);
    }
}
