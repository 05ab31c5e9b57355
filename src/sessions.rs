//! Live-session heartbeat scheduler.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::api::RemoteApi;
use crate::identity::IdentityStore;
use crate::models::Parameters;

/// Foreground usage tracked between activation and logout.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveSession {
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub active: bool,
    /// Start of the foreground time not yet reported
    segment_started: Instant,
}

struct SchedulerState {
    session: Option<LiveSession>,
    timer: Option<JoinHandle<()>>,
}

/// Sends periodic live-event heartbeats while the app is in the foreground.
///
/// Heartbeats are fire-and-forget: a failed one is logged and the next tick
/// acts as the retry.
pub struct HeartbeatScheduler {
    api: Arc<dyn RemoteApi>,
    identity: Arc<IdentityStore>,
    interval: Duration,
    state: Mutex<SchedulerState>,
}

impl HeartbeatScheduler {
    pub fn new(api: Arc<dyn RemoteApi>, identity: Arc<IdentityStore>, interval: Duration) -> Self {
        Self {
            api,
            identity,
            interval,
            state: Mutex::new(SchedulerState {
                session: None,
                timer: None,
            }),
        }
    }

    /// Start or resume the session and its recurring timer.
    pub fn start(self: &Arc<Self>) {
        let mut state = self.lock_state();

        match state.session.as_mut() {
            Some(session) if session.active => {}
            Some(session) => {
                session.active = true;
                session.segment_started = Instant::now();
                tracing::debug!("Live session resumed");
            }
            None => {
                state.session = Some(LiveSession {
                    started_at: Utc::now(),
                    last_heartbeat_at: None,
                    active: true,
                    segment_started: Instant::now(),
                });
                tracing::info!("Live session started");
            }
        }

        if state.timer.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        state.timer = Some(Self::spawn_timer(Arc::downgrade(self), self.interval));
    }

    /// Report the foreground segment once more, then suspend the timer. The
    /// session itself survives until the next `start()`.
    pub async fn on_background(&self) {
        let payload = {
            let mut state = self.lock_state();
            let payload = Self::record_heartbeat(&mut state);
            if let Some(session) = state.session.as_mut() {
                session.active = false;
            }
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            payload
        };

        tracing::debug!("Live session suspended");
        if let Some(attributes) = payload {
            self.send(attributes).await;
        }
    }

    /// Stop the timer and drop the session immediately.
    pub fn invalidate(&self) {
        let mut state = self.lock_state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.session = None;
        tracing::debug!("Live session invalidated");
    }

    pub fn session(&self) -> Option<LiveSession> {
        self.lock_state().session.clone()
    }

    pub fn is_running(&self) -> bool {
        self.lock_state()
            .timer
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    fn spawn_timer(scheduler: Weak<Self>, interval: Duration) -> JoinHandle<()> {
        let first_tick = Instant::now() + interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(first_tick, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(scheduler) = scheduler.upgrade() else {
                    break;
                };
                scheduler.beat().await;
            }
        })
    }

    async fn beat(&self) {
        let payload = Self::record_heartbeat(&mut self.lock_state());
        if let Some(attributes) = payload {
            self.send(attributes).await;
        }
    }

    /// Close the current foreground segment and build its heartbeat payload.
    fn record_heartbeat(state: &mut SchedulerState) -> Option<Parameters> {
        let session = state.session.as_mut().filter(|s| s.active)?;

        let now = Instant::now();
        let active_seconds = now.duration_since(session.segment_started).as_secs();
        session.segment_started = now;
        session.last_heartbeat_at = Some(Utc::now());

        let mut attributes = Parameters::new();
        attributes.insert("event_type".into(), "live".into());
        attributes.insert("session_started_at".into(), session.started_at.to_rfc3339().into());
        attributes.insert("active_seconds".into(), active_seconds.into());
        Some(attributes)
    }

    async fn send(&self, mut attributes: Parameters) {
        let Some(profile_id) = self.identity.profile_id() else {
            tracing::debug!("No profile, skipping heartbeat");
            return;
        };
        if let Some(installation) = self.identity.installation() {
            attributes.insert(
                "installation_meta_id".into(),
                installation.installation_meta_id.into(),
            );
        }

        if let Err(e) = self.api.track_live_event(&profile_id, &attributes).await {
            tracing::warn!("Heartbeat failed: {}", e);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.lock_state().timer.take() {
            timer.abort();
        }
    }
}

impl std::fmt::Debug for HeartbeatScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatScheduler")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}
