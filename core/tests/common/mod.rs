//! Shared helpers for the integration suites
//!
//! Every test runs whole sessions over one in-process `MemoryNetwork`.

#![allow(dead_code)]

use async_trait::async_trait;
use ghostlink_core::{
    MediaConstraints, MediaDescriptor, MediaDevices, MediaError, MemoryNetwork, Session,
    SessionEvent, SessionEvents, SessionSettings,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);
pub const QUIET_WINDOW: Duration = Duration::from_millis(200);

/// Media collaborator that records every call made to it
#[derive(Default)]
pub struct RecordingMedia {
    name: String,
    log: Mutex<Vec<String>>,
    fail: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl RecordingMedia {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            ..Default::default()
        })
    }

    pub fn fail_next_acquire(&self) {
        *self.fail.lock() = true;
    }

    /// Make the next acquisition take `delay`
    pub fn delay_next_acquire(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn stream_id(&self) -> String {
        format!("{}-camera", self.name)
    }
}

#[async_trait]
impl MediaDevices for RecordingMedia {
    async fn acquire_local(
        &self,
        constraints: MediaConstraints,
    ) -> Result<MediaDescriptor, MediaError> {
        self.log.lock().push("acquire".into());
        let delay = self.delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if std::mem::take(&mut *self.fail.lock()) {
            return Err(MediaError::PermissionDenied);
        }
        Ok(MediaDescriptor {
            stream_id: self.stream_id(),
            audio: constraints.audio,
            video: constraints.video,
        })
    }

    fn attach_remote(&self, _peer_id: &str, media: &MediaDescriptor) {
        self.log.lock().push(format!("attach {}", media.stream_id));
    }

    fn release_local(&self, media: &MediaDescriptor) {
        self.log.lock().push(format!("release {}", media.stream_id));
    }
}

pub struct Peer {
    pub session: Session,
    pub events: SessionEvents,
    pub id: String,
    pub media: Arc<RecordingMedia>,
}

/// Start a session with default settings
pub async fn peer(network: &MemoryNetwork, nickname: &str) -> Peer {
    peer_with(network, SessionSettings::new(nickname)).await
}

pub async fn peer_with(network: &MemoryNetwork, settings: SessionSettings) -> Peer {
    let media = RecordingMedia::new(&settings.nickname);
    let (session, mut events) =
        Session::new(Arc::new(network.backend()), media.clone(), settings).unwrap();
    let id = session.start().await.unwrap();

    match events.recv().await {
        Some(SessionEvent::Ready(ready)) => assert_eq!(ready, id),
        other => panic!("expected Ready, got {other:?}"),
    }

    Peer {
        session,
        events,
        id,
        media,
    }
}

/// Wait for the first event matching `pred`, skipping others
pub async fn next_event<F>(events: &mut SessionEvents, pred: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) if pred(&event) => return event,
            Ok(Some(_)) => continue,
            Ok(None) => panic!("event channel closed"),
            Err(_) => panic!("timed out waiting for event"),
        }
    }
}

/// Collect every event matching `pred` seen during the quiet window
pub async fn collect_events<F>(events: &mut SessionEvents, pred: F) -> Vec<SessionEvent>
where
    F: Fn(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + QUIET_WINDOW;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, events.recv()).await {
            Ok(Some(event)) if pred(&event) => seen.push(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return seen,
        }
    }
}

/// Text of every message delivered during the quiet window
pub async fn delivered_texts(events: &mut SessionEvents) -> Vec<(String, String)> {
    collect_events(events, |e| matches!(e, SessionEvent::MessageDelivered(_)))
        .await
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::MessageDelivered(message) => Some((
                message.room_id.clone(),
                message.text_content().unwrap_or_default().to_string(),
            )),
            _ => None,
        })
        .collect()
}
