//! Operator control surface
//!
//! [`ControlContext`] owns the cameras, the position store and the tally
//! monitor, and executes [`ClientEvent`]s. Events from one client run in
//! arrival order through its [`ClientEvents`] queue. Recalls are detached from
//! that queue so a long recall never delays the next request, and a newer
//! recall on the same camera supersedes the older one.

mod broadcaster;
mod messages;
pub mod server;

pub use broadcaster::{Broadcaster, Outbound};
pub use messages::{
    ButtonUpdate, ClientEvent, InitData, MessageError, PositionRef, ServerMessage,
};

use crate::camera::{with_timeout, Camera, CameraError, RecallOutcome};
use crate::config::Config;
use crate::relay::{RelayCounters, RelayStats, RelayTarget};
use crate::routing::LiveRoutingPolicy;
use crate::store::{PositionStore, StoreError};
use crate::tally::{TallyChange, TallyConfig, TallyListener, TallyMonitor, TallyMonitorHandle};
use crate::visca::DeviceState;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};

const BROADCAST_CAPACITY: usize = 64;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("no PTZ camera with index {0}")]
    UnknownCamera(usize),

    #[error("no focus stored for camera {cam} position {pos}")]
    NoStoredFocus { cam: usize, pos: u8 },

    #[error("{failed} of {total} cameras failed")]
    Partial { failed: usize, total: usize },

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("store task failed: {0}")]
    Task(#[from] JoinError),
}

/// Settings the control layer takes from [`Config`]
#[derive(Debug, Clone)]
pub struct ControlSettings {
    pub ptz_count: usize,
    /// Number of monitored tally ids; sizes the state table sent to clients
    pub tally_count: usize,
    pub command_timeout: Duration,
    pub recall_timeout: Duration,
    /// `None` when tally monitoring is disabled
    pub tally: Option<TallyConfig>,
    pub preview_code: u8,
    pub on_air_mask: u8,
    pub allow_on_air_change: bool,
}

impl ControlSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ptz_count: config.ptz_count(),
            tally_count: config.tally.ids.len(),
            command_timeout: config.command_timeout(),
            recall_timeout: config.recall_timeout(),
            tally: config.tally.enabled.then(|| config.tally_config()),
            preview_code: config.relay.preview_code,
            on_air_mask: config.relay.on_air_mask,
            allow_on_air_change: config.relay.allow_on_air_change,
        }
    }
}

/// Tally fan-out: state table, relay policy and client notification
pub struct TallyHub {
    states: RwLock<Vec<u8>>,
    policy: Arc<LiveRoutingPolicy>,
    broadcaster: Broadcaster,
}

impl TallyHub {
    pub fn states(&self) -> Vec<u8> {
        self.states.read().clone()
    }
}

impl TallyListener for TallyHub {
    fn on_tally_change(&self, change: TallyChange) {
        let states = {
            let mut states = self.states.write();
            let Some(slot) = states.get_mut(change.camera) else {
                warn!(camera = change.camera, "Tally change for camera outside state table");
                return;
            };
            *slot = change.state;
            states.clone()
        };

        self.policy.apply(change.camera, change.state);

        if let Err(e) = self
            .broadcaster
            .publish(&ServerMessage::UpdateTally(states), None)
        {
            error!(error = %e, "Failed to publish tally update");
        }
    }
}

/// Camera summary for status readers
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub index: usize,
    pub address: String,
    pub ptz: bool,
    pub ephemeral_autofocus: bool,
}

/// Point-in-time view of the control state
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub cameras: Vec<CameraStatus>,
    pub tally_enabled: bool,
    pub tally_states: Vec<u8>,
    pub live_camera: Option<usize>,
    pub relay_target: Option<String>,
    pub allow_on_air_change: bool,
    pub relay: Option<RelayStats>,
    pub clients: usize,
}

/// Ordered event queue of one connected client
pub struct ClientEvents {
    client: u64,
    queue: mpsc::UnboundedSender<ClientEvent>,
}

impl ClientEvents {
    /// Parses `text` and queues the event behind earlier ones
    pub fn dispatch(&self, text: &str) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                error!(client = self.client, error = %e, "Ignoring control message");
                return;
            }
        };

        debug!(client = self.client, ?event, "Control event");
        if self.queue.send(event).is_err() {
            warn!(client = self.client, "Control event queue closed");
        }
    }
}

pub struct ControlContext {
    cameras: Vec<Arc<Camera>>,
    settings: ControlSettings,
    store: Arc<dyn PositionStore>,
    hub: Arc<TallyHub>,
    policy: Arc<LiveRoutingPolicy>,
    relay_target: RelayTarget,
    relay_counters: Option<Arc<RelayCounters>>,
    broadcaster: Broadcaster,
    tally_monitor: tokio::sync::Mutex<Option<TallyMonitorHandle>>,
    client_counter: AtomicU64,
}

impl ControlContext {
    /// `cameras` are in tally order; the first `settings.ptz_count` are PTZ-capable
    pub fn new(
        cameras: Vec<Arc<Camera>>,
        settings: ControlSettings,
        store: Arc<dyn PositionStore>,
        relay_target: RelayTarget,
    ) -> Self {
        let addrs = cameras.iter().map(|camera| camera.addr()).collect();
        let policy = LiveRoutingPolicy::new(addrs, relay_target.writer())
            .with_codes(settings.preview_code, settings.on_air_mask);
        if settings.allow_on_air_change {
            policy.set_allow_on_air_change(true);
        }
        let policy = Arc::new(policy);

        let broadcaster = Broadcaster::new(BROADCAST_CAPACITY);
        let hub = Arc::new(TallyHub {
            states: RwLock::new(vec![0; settings.tally_count]),
            policy: Arc::clone(&policy),
            broadcaster: broadcaster.clone(),
        });

        Self {
            cameras,
            settings,
            store,
            hub,
            policy,
            relay_target,
            relay_counters: None,
            broadcaster,
            tally_monitor: tokio::sync::Mutex::new(None),
            client_counter: AtomicU64::new(0),
        }
    }

    pub fn with_relay_counters(mut self, counters: Arc<RelayCounters>) -> Self {
        self.relay_counters = Some(counters);
        self
    }

    pub fn cameras(&self) -> &[Arc<Camera>] {
        &self.cameras
    }

    pub fn policy(&self) -> &LiveRoutingPolicy {
        &self.policy
    }

    pub fn tally_hub(&self) -> Arc<TallyHub> {
        Arc::clone(&self.hub)
    }

    pub fn next_client_id(&self) -> u64 {
        self.client_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.broadcaster.subscribe()
    }

    fn ptz_camera(&self, cam: usize) -> Result<&Arc<Camera>, ControlError> {
        if cam >= self.settings.ptz_count {
            return Err(ControlError::UnknownCamera(cam));
        }
        self.cameras.get(cam).ok_or(ControlError::UnknownCamera(cam))
    }

    fn publish(&self, message: ServerMessage, exclude: Option<u64>) -> Result<(), ControlError> {
        self.broadcaster.publish(&message, exclude)?;
        Ok(())
    }

    pub fn init_data(&self) -> InitData {
        InitData {
            camera_ips: self
                .cameras
                .iter()
                .map(|camera| camera.addr().ip().to_string())
                .collect(),
            all_pos: self.store.buttons(),
            tally_states: self.hub.states(),
            allow_on_air_change: self.policy.allow_on_air_change(),
        }
    }

    pub fn init_message(&self) -> Result<String, ControlError> {
        Ok(ServerMessage::Init(self.init_data()).to_json()?)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            cameras: self
                .cameras
                .iter()
                .map(|camera| CameraStatus {
                    index: camera.index(),
                    address: camera.addr().to_string(),
                    ptz: camera.index() < self.settings.ptz_count,
                    ephemeral_autofocus: camera.ephemeral_autofocus(),
                })
                .collect(),
            tally_enabled: self.settings.tally.is_some(),
            tally_states: self.hub.states(),
            live_camera: self.policy.held(),
            relay_target: self.relay_target.get().map(|addr| addr.to_string()),
            allow_on_air_change: self.policy.allow_on_air_change(),
            relay: self.relay_counters.as_ref().map(|c| c.snapshot()),
            clients: self.broadcaster.subscriber_count(),
        }
    }

    /// Starts the event queue for one client
    ///
    /// The worker ends once the returned [`ClientEvents`] is dropped and the
    /// queued events are done.
    pub fn client_events(self: &Arc<Self>, client: u64) -> ClientEvents {
        let (queue, events) = mpsc::unbounded_channel();
        tokio::spawn(Arc::clone(self).run_events(client, events));
        ClientEvents { client, queue }
    }

    async fn run_events(
        self: Arc<Self>,
        client: u64,
        mut events: mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        while let Some(event) = events.recv().await {
            if matches!(event, ClientEvent::RecallPos(_)) {
                let ctx = Arc::clone(&self);
                tokio::spawn(async move { ctx.run_event(client, event).await });
            } else {
                self.run_event(client, event).await;
            }
        }
        debug!(client, "Control event queue drained");
    }

    async fn run_event(&self, client: u64, event: ClientEvent) {
        if let Err(e) = self.handle(client, event.clone()).await {
            error!(client, ?event, error = %e, "Control action failed");
        }
    }

    pub async fn handle(&self, client: u64, event: ClientEvent) -> Result<(), ControlError> {
        match event {
            ClientEvent::UpdateButton(update) => {
                let (cam, pos) = (update.cam, update.pos);
                let (name, btn_class) = (update.name.clone(), update.btn_class.clone());
                self.write_store(move |store| store.set_button(cam, pos, &name, &btn_class))
                    .await?;
                self.publish(ServerMessage::UpdateButton(update), Some(client))
            }
            ClientEvent::SavePos(PositionRef { cam, pos }) => self.save_position(cam, pos).await,
            ClientEvent::RecallPos(PositionRef { cam, pos }) => {
                self.recall_position(cam, pos).await.map(|_| ())
            }
            ClientEvent::FocusLock => {
                self.for_all("focus_lock", |camera| async move {
                    camera.set_focus_lock(DeviceState::On).await
                })
                .await
            }
            ClientEvent::FocusUnlock => {
                self.for_all("focus_unlock", |camera| async move {
                    camera.set_focus_lock(DeviceState::Off).await
                })
                .await
            }
            ClientEvent::PowerOn => {
                self.for_all("power_on", |camera| async move {
                    camera.set_power(DeviceState::On).await
                })
                .await
            }
            ClientEvent::PowerOff => {
                self.for_all("power_off", |camera| async move {
                    camera.set_power(DeviceState::Off).await
                })
                .await
            }
            ClientEvent::ClearAll => {
                self.write_store(|store| store.clear_buttons()).await?;
                info!("All buttons cleared");
                self.publish(ServerMessage::Init(self.init_data()), None)
            }
            ClientEvent::Reconnect => {
                self.restart_tally().await;
                Ok(())
            }
            ClientEvent::AllowOnAirChange(allow) => {
                self.policy.set_allow_on_air_change(allow);
                self.publish(ServerMessage::UpdateOnAirChange(allow), None)
            }
        }
    }

    /// Stores the camera's current focus with the position, then saves the
    /// pan/tilt/zoom memory on the camera
    pub async fn save_position(&self, cam: usize, pos: u8) -> Result<(), ControlError> {
        let camera = self.ptz_camera(cam)?;
        let limit = self.settings.command_timeout;

        let focus = with_timeout(limit, camera.query_focus()).await?;
        self.write_store(move |store| store.set_stored_focus(cam, pos, focus))
            .await?;
        with_timeout(limit, camera.store_memory(pos)).await?;

        info!(camera = cam, position = pos, focus, "Position saved");
        Ok(())
    }

    pub async fn recall_position(&self, cam: usize, pos: u8) -> Result<RecallOutcome, ControlError> {
        let camera = self.ptz_camera(cam)?;
        let focus = self
            .store
            .stored_focus(cam, pos)?
            .ok_or(ControlError::NoStoredFocus { cam, pos })?;

        let outcome = with_timeout(self.settings.recall_timeout, camera.recall(pos, focus)).await?;
        if outcome == RecallOutcome::Superseded {
            debug!(camera = cam, position = pos, "Recall superseded by a newer request");
        }
        Ok(outcome)
    }

    /// Runs a store change on the blocking pool
    async fn write_store<F>(&self, write: F) -> Result<(), ControlError>
    where
        F: FnOnce(&dyn PositionStore) -> Result<(), StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || write(store.as_ref())).await??;
        Ok(())
    }

    /// Runs `op` on every camera concurrently, each bounded by the command timeout
    async fn for_all<F, Fut>(&self, action: &'static str, op: F) -> Result<(), ControlError>
    where
        F: Fn(Arc<Camera>) -> Fut,
        Fut: Future<Output = Result<(), CameraError>>,
    {
        let limit = self.settings.command_timeout;
        let results = join_all(
            self.cameras
                .iter()
                .map(|camera| with_timeout(limit, op(Arc::clone(camera)))),
        )
        .await;

        let total = results.len();
        let mut failed = 0;
        for (camera, result) in self.cameras.iter().zip(results) {
            if let Err(e) = result {
                warn!(camera = camera.index(), action, error = %e, "Camera action failed");
                failed += 1;
            }
        }

        if failed > 0 {
            return Err(ControlError::Partial { failed, total });
        }

        info!(action, cameras = total, "Applied to all cameras");
        Ok(())
    }

    /// Starts the tally monitor unless disabled or already running
    pub async fn start_tally(&self) {
        let mut monitor = self.tally_monitor.lock().await;
        self.spawn_tally(&mut monitor);
    }

    pub async fn stop_tally(&self) {
        let handle = self.tally_monitor.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
    }

    /// Stops any running monitor and starts a fresh one
    pub async fn restart_tally(&self) {
        let mut monitor = self.tally_monitor.lock().await;
        if let Some(handle) = monitor.take() {
            info!("Restarting tally monitor");
            handle.stop().await;
        }
        self.spawn_tally(&mut monitor);
    }

    fn spawn_tally(&self, monitor: &mut Option<TallyMonitorHandle>) {
        let Some(config) = self.settings.tally.clone() else {
            info!("Tally monitoring disabled");
            return;
        };

        if monitor.is_none() {
            let listener: Arc<dyn TallyListener> = self.hub.clone();
            *monitor = Some(TallyMonitor::spawn(config, listener));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonPositionStore;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::net::SocketAddr;
    use tempfile::TempDir;
    use tokio::net::UdpSocket;
    use tokio::time::timeout;

    fn settings(ptz_count: usize) -> ControlSettings {
        ControlSettings {
            ptz_count,
            tally_count: ptz_count,
            command_timeout: Duration::from_millis(200),
            recall_timeout: Duration::from_millis(200),
            tally: None,
            preview_code: 1,
            on_air_mask: 0x01,
            allow_on_air_change: false,
        }
    }

    fn context(dir: &TempDir) -> (Arc<ControlContext>, RelayTarget) {
        let cameras = ["10.1.0.31:1259", "10.1.0.32:1259", "10.1.0.34:1259"]
            .iter()
            .enumerate()
            .map(|(i, addr)| Arc::new(Camera::new(i, addr.parse().unwrap())))
            .collect();
        let store = JsonPositionStore::open(dir.path().join("p.json"), 2, 4).unwrap();
        let target = RelayTarget::new();
        let ctx = ControlContext::new(cameras, settings(2), Arc::new(store), target.clone());
        (Arc::new(ctx), target)
    }

    #[tokio::test]
    async fn test_update_button_skips_sender() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);
        let mut rx = ctx.subscribe();

        let update = ButtonUpdate {
            cam: 1,
            pos: 2,
            name: "Choir".to_string(),
            btn_class: "btn-info".to_string(),
        };
        ctx.handle(7, ClientEvent::UpdateButton(update)).await.unwrap();

        let outbound = rx.recv().await.unwrap();
        assert!(!outbound.is_for(7));
        assert!(outbound.is_for(8));
        assert!(outbound.text.contains("\"update_button\""));
        assert_eq!(ctx.init_data().all_pos[4 + 2].name, "Choir");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_client_events_keep_arrival_order() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);
        let mut rx = ctx.subscribe();
        let events = ctx.client_events(7);

        for take in 0..50 {
            let update = json!({
                "event": "update_button",
                "data": {"cam": 0, "pos": 1, "name": format!("take {}", take), "btn_class": "btn-info"},
            });
            events.dispatch(&update.to_string());
        }

        for take in 0..50 {
            let outbound = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
            assert!(
                outbound.text.contains(&format!("\"take {}\"", take)),
                "expected take {} got {}",
                take,
                outbound.text
            );
        }
        assert_eq!(ctx.init_data().all_pos[1].name, "take 49");
        assert_eq!(ctx.store.buttons()[1].name, "take 49");
    }

    #[tokio::test]
    async fn test_pending_recall_does_not_block_queue() {
        let dir = tempfile::tempdir().unwrap();
        // Never answers, so the recall stays pending
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let cameras = vec![Arc::new(Camera::new(0, silent.local_addr().unwrap()))];
        let store = JsonPositionStore::open(dir.path().join("p.json"), 1, 4).unwrap();
        store.set_stored_focus(0, 2, 600).unwrap();
        let mut settings = settings(1);
        settings.recall_timeout = Duration::from_secs(30);
        let ctx = Arc::new(ControlContext::new(
            cameras,
            settings,
            Arc::new(store),
            RelayTarget::new(),
        ));
        let mut rx = ctx.subscribe();
        let events = ctx.client_events(1);

        events.dispatch(r#"{"event":"recall_pos","data":{"cam":0,"pos":2}}"#);
        events.dispatch(r#"{"event":"allow_on_air_change","data":true}"#);

        let outbound = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert_eq!(
            &*outbound.text,
            r#"{"event":"update_on_air_change","data":true}"#
        );
    }

    #[tokio::test]
    async fn test_tally_table_sized_by_ids() {
        let dir = tempfile::tempdir().unwrap();
        let cameras = vec![
            Arc::new(Camera::new(0, "10.1.0.31:1259".parse().unwrap())),
            Arc::new(Camera::new(1, "10.1.0.32:1259".parse().unwrap())),
        ];
        let store = JsonPositionStore::open(dir.path().join("p.json"), 2, 4).unwrap();
        let mut settings = settings(2);
        settings.tally_count = 1;
        let ctx = ControlContext::new(cameras, settings, Arc::new(store), RelayTarget::new());

        assert_eq!(ctx.init_data().tally_states, vec![0]);

        ctx.tally_hub().on_tally_change(TallyChange {
            camera: 0,
            previous: 0,
            state: 1,
        });
        assert_eq!(ctx.init_data().tally_states, vec![1]);
    }

    #[tokio::test]
    async fn test_allow_on_air_change_broadcast() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);
        let mut rx = ctx.subscribe();

        ctx.handle(0, ClientEvent::AllowOnAirChange(true)).await.unwrap();

        assert!(ctx.policy().allow_on_air_change());
        let outbound = rx.recv().await.unwrap();
        assert!(outbound.is_for(0));
        assert_eq!(
            &*outbound.text,
            r#"{"event":"update_on_air_change","data":true}"#
        );
        assert!(ctx.init_data().allow_on_air_change);
    }

    #[tokio::test]
    async fn test_tally_change_updates_state_and_relay() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, target) = context(&dir);
        let mut rx = ctx.subscribe();

        ctx.tally_hub().on_tally_change(TallyChange {
            camera: 1,
            previous: 0,
            state: 1,
        });

        assert_eq!(ctx.init_data().tally_states, vec![0, 1]);
        let expected: SocketAddr = "10.1.0.32:1259".parse().unwrap();
        assert_eq!(target.get(), Some(expected));
        assert_eq!(ctx.status().live_camera, Some(1));

        let outbound = rx.recv().await.unwrap();
        assert_eq!(&*outbound.text, r#"{"event":"update_tally","data":[0,1]}"#);
    }

    #[tokio::test]
    async fn test_non_ptz_camera_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);

        assert_matches!(
            ctx.recall_position(2, 0).await,
            Err(ControlError::UnknownCamera(2))
        );
        assert_matches!(
            ctx.save_position(5, 0).await,
            Err(ControlError::UnknownCamera(5))
        );
    }

    #[tokio::test]
    async fn test_recall_without_stored_focus() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);

        assert_matches!(
            ctx.recall_position(0, 3).await,
            Err(ControlError::NoStoredFocus { cam: 0, pos: 3 })
        );
    }

    #[tokio::test]
    async fn test_clear_all_sends_init() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);
        let mut rx = ctx.subscribe();

        ctx.handle(0, ClientEvent::ClearAll).await.unwrap();

        let outbound = rx.recv().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&outbound.text).unwrap();
        assert_eq!(json["event"], "init");
        assert_eq!(json["data"]["all_pos"].as_array().unwrap().len(), 8);
        assert_eq!(json["data"]["camera_ips"][2], "10.1.0.34");
    }

    #[tokio::test]
    async fn test_reconnect_without_tally_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _) = context(&dir);
        ctx.handle(0, ClientEvent::Reconnect).await.unwrap();
        assert!(!ctx.status().tally_enabled);
    }
}
