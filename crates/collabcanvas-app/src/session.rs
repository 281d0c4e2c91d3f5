//! A participant's session: the single-threaded reactor that owns the
//! engine state and drives it from local input and transport events.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use collabcanvas_core::protocol::{CursorPayload, CursorPoint, PresenceLeavePayload};
use collabcanvas_core::transport::DEFAULT_BUS_CHANNEL;
use collabcanvas_core::{
    select_transport, BusFactory, Change, DeviceBusFactory, Event, HistoryManager, Latency, LocalBus, Operation,
    PingFuture, PointerDown, PresenceTracker, RelayFactory, Repaint, RosterEntry, SnapshotStore, ToolKind,
    ToolManager, Transport, TransportFactory, UndoSemantics, User,
};
use collabcanvas_render::{encode_data_url, Compositor, CompositorConfig, ExportError, FrameScheduler};
use image::RgbaImage;
use kurbo::Point;
use thiserror::Error;

use crate::identity::{generate_user, DEFAULT_COLOR};
use crate::shortcuts::{ShortcutAction, ShortcutRegistry};

/// Errors from bringing outside content into a session.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid history JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("History must be a JSON array of operations")]
    NotAnArray,
    #[error("Unsupported image: {0}")]
    Image(String),
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: String,
    /// Display name; a friendly one is generated when `None`.
    pub user_name: Option<String>,
    pub user_color: String,
    /// Page origin the relay URL is derived from. No relay is tried without one.
    pub origin: Option<String>,
    /// In-process bus shared with other sessions of this process.
    pub bus: Option<LocalBus>,
    pub bus_channel: String,
    /// Try the device-wide bus shared by other processes of this user.
    pub device_bus: bool,
    /// Rendezvous root for the device bus; the platform runtime dir if `None`.
    pub device_bus_root: Option<PathBuf>,
    pub undo_semantics: UndoSemantics,
    pub surface: CompositorConfig,
    pub brush_size: f64,
    pub ping_interval: Duration,
    pub connect_timeout: Duration,
    pub refresh_hz: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            room_id: "main".to_string(),
            user_name: None,
            user_color: DEFAULT_COLOR.to_string(),
            origin: None,
            bus: None,
            bus_channel: DEFAULT_BUS_CHANNEL.to_string(),
            device_bus: true,
            device_bus_root: None,
            undo_semantics: UndoSemantics::default(),
            surface: CompositorConfig::default(),
            brush_size: 6.0,
            ping_interval: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs(3),
            refresh_hz: 60,
        }
    }
}

impl SessionConfig {
    pub fn with_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    pub fn with_user_color(mut self, color: impl Into<String>) -> Self {
        self.user_color = color.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_bus(mut self, bus: LocalBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_bus_channel(mut self, channel: impl Into<String>) -> Self {
        self.bus_channel = channel.into();
        self
    }

    pub fn with_device_bus_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.device_bus = true;
        self.device_bus_root = Some(root.into());
        self
    }

    pub fn without_device_bus(mut self) -> Self {
        self.device_bus = false;
        self
    }

    pub fn with_undo_semantics(mut self, semantics: UndoSemantics) -> Self {
        self.undo_semantics = semantics;
        self
    }

    pub fn with_surface(mut self, surface: CompositorConfig) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_brush_size(mut self, size: f64) -> Self {
        self.brush_size = size;
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Transport strategies in preference order: relay, in-process bus,
    /// device bus. Loopback is added by [`select_transport`] itself.
    pub fn transport_factories(&self) -> Vec<Box<dyn TransportFactory>> {
        let mut factories: Vec<Box<dyn TransportFactory>> = Vec::new();
        if let Some(origin) = &self.origin {
            match RelayFactory::from_origin(origin) {
                Ok(relay) => factories.push(Box::new(relay.with_connect_timeout(self.connect_timeout))),
                Err(e) => log::warn!("Not trying relay: {}", e),
            }
        }
        if let Some(bus) = &self.bus {
            factories.push(Box::new(BusFactory::new(bus.clone()).with_channel(self.bus_channel.clone())));
        }
        if self.device_bus {
            let mut device = DeviceBusFactory::new().with_channel(self.bus_channel.clone());
            if let Some(root) = &self.device_bus_root {
                device = device.with_root(root.clone());
            }
            factories.push(Box::new(device));
        }
        factories
    }
}

/// One participant in a room.
pub struct Session {
    config: SessionConfig,
    user: User,
    history: HistoryManager,
    presence: PresenceTracker,
    tools: ToolManager,
    transport: Box<dyn Transport>,
    store: Box<dyn SnapshotStore>,
    compositor: Compositor,
    scheduler: FrameScheduler,
    latency: Latency,
    ping: Option<PingFuture>,
    last_ping: Option<Instant>,
    closed: bool,
}

impl Session {
    /// Start a session using the transports described by `config`.
    pub fn start(config: SessionConfig, store: Box<dyn SnapshotStore>) -> Self {
        let factories = config.transport_factories();
        Self::start_with(config, store, &factories)
    }

    /// Start a session trying `factories` in order.
    pub fn start_with(
        config: SessionConfig,
        store: Box<dyn SnapshotStore>,
        factories: &[Box<dyn TransportFactory>],
    ) -> Self {
        let user = generate_user(config.user_name.as_deref(), &config.user_color);
        log::info!("Starting session for {} in room {}", user.name, config.room_id);

        let transport = select_transport(factories, &user);
        transport.send(&Event::join(config.room_id.clone()));

        let mut session = Self {
            history: HistoryManager::new(user.id.clone()).with_semantics(config.undo_semantics),
            presence: PresenceTracker::new(user.clone()),
            tools: ToolManager::new(user.id.clone(), user.color.clone(), config.brush_size),
            compositor: Compositor::new(config.surface.clone()),
            scheduler: FrameScheduler::new(config.refresh_hz),
            latency: Latency::Unknown,
            ping: None,
            last_ping: None,
            closed: false,
            user,
            transport,
            store,
            config,
        };

        session.pump();
        if session.history.is_empty() {
            let ops = session.store.load_if_available(&session.config.room_id);
            if !ops.is_empty() {
                log::info!("Restored {} operations from local snapshot", ops.len());
                let change = session.history.restore(ops);
                session.apply(change);
            }
        }
        session.scheduler.request();
        session
    }

    // --- Local input ---

    /// Press at `position`. Text and image tools hand back to the host,
    /// which then calls [`Session::place_text`] or [`Session::place_image`].
    pub fn pointer_down(&mut self, position: Point, pressure: Option<f64>) -> PointerDown {
        self.move_local_cursor(position);
        let outcome = self.tools.pointer_down(position, pressure);
        self.scheduler.request();
        outcome
    }

    /// Pointer motion. Every move is broadcast as a cursor update.
    pub fn pointer_move(&mut self, position: Point, pressure: Option<f64>) {
        self.move_local_cursor(position);
        self.transport.send(&Event::Cursor(CursorPayload {
            user_id: self.user.id.clone(),
            name: self.user.name.clone(),
            color: self.user.color.clone(),
            p: CursorPoint {
                x: position.x,
                y: position.y,
            },
        }));
        self.tools.pointer_move(position, pressure);
        self.scheduler.request();
    }

    /// Release. Returns the id of the committed operation, if any.
    pub fn pointer_up(&mut self) -> Option<String> {
        let op = self.tools.pointer_up()?;
        Some(self.commit(op))
    }

    /// A cancelled pointer finishes the gesture like a release.
    pub fn pointer_cancel(&mut self) -> Option<String> {
        self.pointer_up()
    }

    /// The pointer left the surface: hide the local cursor. Not broadcast.
    pub fn pointer_leave(&mut self) {
        let id = self.user.id.clone();
        self.presence.hide_cursor(&id);
        self.scheduler.request();
    }

    /// Commit a text operation. Empty text commits nothing.
    pub fn place_text(&mut self, position: Point, text: &str) -> Option<String> {
        let op = self.tools.text_op(position, text)?;
        Some(self.commit(op))
    }

    /// Commit an image from encoded file bytes, capped at the surface width.
    pub fn place_image(&mut self, position: Point, bytes: &[u8]) -> Result<String, ImportError> {
        let decoded = image::load_from_memory(bytes).map_err(|e| ImportError::Image(e.to_string()))?;
        let src = encode_data_url(bytes).map_err(|e| ImportError::Image(e.to_string()))?;
        let op = self.tools.image_op(
            position,
            src,
            decoded.width(),
            decoded.height(),
            self.compositor.width() as f64,
        );
        Ok(self.commit(op))
    }

    pub fn undo(&mut self) {
        let change = self.history.undo();
        self.apply(change);
    }

    pub fn redo(&mut self) {
        let change = self.history.redo();
        self.apply(change);
    }

    pub fn clear(&mut self) {
        let change = self.history.clear();
        self.apply(change);
    }

    /// Handle a key press. Returns true if it was bound to an action.
    pub fn key_down(&mut self, key: char, ctrl: bool) -> bool {
        match ShortcutRegistry::resolve(key, ctrl) {
            Some(ShortcutAction::Undo) => self.undo(),
            Some(ShortcutAction::Redo) => self.redo(),
            Some(ShortcutAction::SelectTool(tool)) => self.set_tool(tool),
            None => return false,
        }
        true
    }

    pub fn set_tool(&mut self, tool: ToolKind) {
        self.tools.set_tool(tool);
        self.scheduler.request();
    }

    /// Change the colour of new operations and of this participant.
    pub fn set_color(&mut self, color: &str) {
        self.tools.color = color.to_string();
        self.user.color = color.to_string();
        self.presence.set_local_color(color);
    }

    pub fn set_size(&mut self, size: f64) {
        self.tools.size = size.max(1.0);
    }

    /// Resize the surfaces and replay the history.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.compositor.resize(width, height, self.history.history());
        self.scheduler.request();
    }

    fn commit(&mut self, op: Operation) -> String {
        let id = op.id().to_string();
        let change = self.history.commit(op);
        self.apply(change);
        id
    }

    fn move_local_cursor(&mut self, position: Point) {
        let id = self.user.id.clone();
        self.presence
            .move_cursor(&id, &self.user.name, &self.user.color, position.x, position.y);
    }

    // --- Engine plumbing ---

    /// Carry out the side effects of a history change.
    fn apply(&mut self, change: Change) {
        if change.repaint != Repaint::None {
            self.compositor.apply(&change.repaint, self.history.history());
            self.scheduler.request();
        }
        if change.persist {
            self.persist();
        }
        if let Some(event) = change.broadcast {
            self.transport.send(&event);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.config.room_id, self.history.history()) {
            log::warn!("Failed to save snapshot for room {}: {}", self.config.room_id, e);
        }
    }

    /// Drain and handle every inbound event. Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let events = self.transport.poll_events();
        let count = events.len();
        for event in events {
            self.handle_event(event);
        }
        count
    }

    fn handle_event(&mut self, event: Event) {
        log::debug!("Received {}", event.kind());
        match event {
            Event::PresenceJoin(p) => {
                if p.user.id == self.user.id {
                    return;
                }
                log::info!("{} joined", p.user.name);
                if self.presence.upsert_user(p.user) {
                    // Let the newcomer learn about us too.
                    self.transport.send(&Event::presence_join(self.user.clone()));
                }
            }
            Event::PresenceLeave(p) => {
                if let Some(user) = self.presence.remove_user(&p.user_id) {
                    log::info!("{} left", user.name);
                    self.scheduler.request();
                }
            }
            Event::Cursor(c) => {
                if c.user_id == self.user.id {
                    return;
                }
                self.presence.move_cursor(&c.user_id, &c.name, &c.color, c.p.x, c.p.y);
                self.scheduler.request();
            }
            Event::Ping(p) => self.transport.send(&Event::Pong(p)),
            Event::Join(_) | Event::Pong(_) => {}
            other => {
                let change = self.history.apply_remote(other);
                self.apply(change);
            }
        }
    }

    fn poll_ping(&mut self, now: Instant) {
        let due = self
            .last_ping
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.ping_interval);
        if self.ping.is_none() && due {
            self.ping = Some(self.transport.ping());
            self.last_ping = Some(now);
        }
        if let Some(latency) = self.ping.as_ref().and_then(PingFuture::try_result) {
            log::debug!("Latency {}", latency);
            self.latency = latency;
            self.ping = None;
        }
    }

    /// One reactor turn: handle inbound events, run the ping loop and
    /// present a frame if one is due. Returns true if a frame was presented.
    pub fn tick(&mut self, now: Instant) -> bool {
        self.pump();
        self.poll_ping(now);
        if !self.scheduler.should_present(now) {
            return false;
        }
        let preview = self.tools.preview();
        self.compositor.present_frame(preview.as_ref(), self.presence.cursors());
        self.scheduler.mark_presented(now);
        true
    }

    /// Run the reactor for `duration`.
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let frame = Duration::from_secs(1) / self.config.refresh_hz.max(1);
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.tick(now);
            std::thread::sleep(frame.min(deadline - now));
        }
    }

    // --- Import / export ---

    /// The history as pretty-printed JSON.
    pub fn export_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self.history.history())
    }

    /// Replace the history from exported JSON. The import is local only.
    ///
    /// Anything but a JSON array of operations is rejected and the history
    /// is left unchanged.
    pub fn import_json(&mut self, json: &str) -> Result<usize, ImportError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if !value.is_array() {
            return Err(ImportError::NotAnArray);
        }
        let ops: Vec<Operation> = serde_json::from_value(value)?;
        let count = ops.len();
        let change = self.history.import(ops);
        self.apply(change);
        log::info!("Imported {} operations", count);
        Ok(count)
    }

    /// The persistent surface as PNG.
    pub fn export_png(&self) -> Result<Vec<u8>, ExportError> {
        self.compositor.export_png()
    }

    /// Announce departure and close the transport. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.transport.send(&Event::PresenceLeave(PresenceLeavePayload {
            user_id: self.user.id.clone(),
        }));
        self.transport.close();
        self.closed = true;
        log::info!("Closed session for {}", self.user.name);
    }

    // --- Accessors ---

    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn room_id(&self) -> &str {
        &self.config.room_id
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.presence.roster()
    }

    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub fn persistent(&self) -> &RgbaImage {
        self.compositor.persistent()
    }

    pub fn visible(&self) -> &RgbaImage {
        self.compositor.visible()
    }

    pub fn latency(&self) -> Latency {
        self.latency
    }

    pub fn fps(&self) -> f64 {
        self.scheduler.fps()
    }

    /// Status line such as `60 fps • 12 ms`.
    pub fn metrics_line(&self) -> String {
        let fps = self.fps();
        let fps = if fps > 0.0 {
            format!("{:.0} fps", fps)
        } else {
            "— fps".to_string()
        };
        format!("{} • {}", fps, self.latency)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
