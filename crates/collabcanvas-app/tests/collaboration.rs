//! End-to-end behaviour of sessions talking to each other.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use collabcanvas_app::{Session, SessionConfig};
use collabcanvas_core::{
    FileSnapshotStore, LocalBus, MemorySnapshotStore, ToolKind, Transport, TransportError, TransportFactory, User,
};
use collabcanvas_render::CompositorConfig;
use kurbo::Point;

struct Unavailable(&'static str);

impl TransportFactory for Unavailable {
    fn name(&self) -> &'static str {
        self.0
    }

    fn open(&self, _user: &User) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::Unavailable("not here".into()))
    }
}

fn config(name: &str) -> SessionConfig {
    SessionConfig::default()
        .with_user_name(name)
        .with_surface(CompositorConfig::default().with_size(96, 96))
}

fn on_bus(name: &str, bus: &LocalBus) -> Session {
    Session::start(config(name).with_bus(bus.clone()), Box::new(MemorySnapshotStore::new()))
}

fn scribble(session: &mut Session, from: Point, to: Point) -> String {
    session.pointer_down(from, Some(0.5));
    for i in 1..=4 {
        session.pointer_move(from.lerp(to, i as f64 / 4.0), Some(0.5));
    }
    session.pointer_up().expect("gesture commits an operation")
}

fn ids(session: &Session) -> Vec<String> {
    session.history().history().iter().map(|op| op.id().to_string()).collect()
}

#[test]
fn test_all_transports_failing_falls_back_to_loopback() {
    let factories: Vec<Box<dyn TransportFactory>> =
        vec![Box::new(Unavailable("websocket")), Box::new(Unavailable("broadcast"))];
    let mut session = Session::start_with(config("Solo"), Box::new(MemorySnapshotStore::new()), &factories);
    assert_eq!(session.transport_name(), "local");

    let id = scribble(&mut session, Point::new(10.0, 10.0), Point::new(80.0, 80.0));
    // The loopback echo of our own commit must not duplicate it.
    session.pump();
    assert_eq!(ids(&session), vec![id]);
    assert_eq!(session.roster().len(), 1);
}

#[test]
fn test_unreachable_relay_falls_back_to_bus() {
    let bus = LocalBus::new();
    let session = Session::start(
        config("Fallback").with_origin("http://127.0.0.1:1").with_bus(bus.clone()),
        Box::new(MemorySnapshotStore::new()),
    );
    assert_eq!(session.transport_name(), "broadcast");
}

/// Pump `session` until `done` holds or a few seconds pass.
fn pump_until(session: &mut Session, done: impl Fn(&Session) -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        session.pump();
        if done(session) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_default_config_meets_peers_on_the_device_bus() {
    let rendezvous = tempfile::tempdir().unwrap();
    let device = |name: &str| {
        Session::start(
            config(name).with_device_bus_root(rendezvous.path()),
            Box::new(MemorySnapshotStore::new()),
        )
    };
    let mut alice = device("Alice");
    let mut bob = device("Bob");
    assert_eq!(alice.transport_name(), "broadcast");
    assert_eq!(bob.transport_name(), "broadcast");

    assert!(pump_until(&mut alice, |s| s.roster().len() == 2));
    assert!(pump_until(&mut bob, |s| s.roster().len() == 2));

    let stroke = scribble(&mut alice, Point::new(5.0, 5.0), Point::new(60.0, 20.0));
    assert!(pump_until(&mut bob, |s| s.history().len() == 1));
    assert_eq!(ids(&bob), vec![stroke]);

    bob.close();
    assert!(pump_until(&mut alice, |s| s.roster().len() == 1));
}

#[test]
fn test_sessions_on_a_bus_share_presence_and_history() {
    let bus = LocalBus::new();
    let mut alice = on_bus("Alice", &bus);
    let mut bob = on_bus("Bob", &bus);
    assert_eq!(alice.transport_name(), "broadcast");

    alice.pump();
    bob.pump();
    assert_eq!(alice.roster().len(), 2);
    assert_eq!(bob.roster().len(), 2);

    let stroke = scribble(&mut alice, Point::new(5.0, 5.0), Point::new(60.0, 20.0));
    bob.pump();
    assert_eq!(ids(&bob), vec![stroke.clone()]);
    assert_eq!(alice.persistent(), bob.persistent());
    assert!(bob.presence().cursor(&alice.user().id).is_some());

    alice.undo();
    bob.pump();
    assert!(bob.history().is_empty());
    alice.redo();
    bob.pump();
    assert_eq!(ids(&bob), vec![stroke]);

    bob.clear();
    alice.pump();
    assert!(alice.history().is_empty());

    bob.close();
    alice.pump();
    assert_eq!(alice.roster().len(), 1);
}

#[test]
fn test_concurrent_commits_converge_as_sets() {
    let bus = LocalBus::new();
    let mut alice = on_bus("Alice", &bus);
    let mut bob = on_bus("Bob", &bus);

    let a = scribble(&mut alice, Point::new(5.0, 5.0), Point::new(60.0, 20.0));
    bob.set_tool(ToolKind::Circle);
    let b = scribble(&mut bob, Point::new(30.0, 30.0), Point::new(70.0, 70.0));
    alice.pump();
    bob.pump();

    // Same operations, each client in its own arrival order.
    assert_eq!(ids(&alice), vec![a.clone(), b.clone()]);
    assert_ne!(ids(&alice), ids(&bob));
    let alice_set: HashSet<_> = ids(&alice).into_iter().collect();
    let bob_set: HashSet<_> = ids(&bob).into_iter().collect();
    assert_eq!(alice_set, bob_set);
}

#[test]
fn test_export_import_is_pixel_identical() {
    let mut author = Session::start_with(config("Author"), Box::new(MemorySnapshotStore::new()), &[]);
    scribble(&mut author, Point::new(5.0, 50.0), Point::new(90.0, 40.0));
    author.set_tool(ToolKind::Rect);
    scribble(&mut author, Point::new(20.0, 20.0), Point::new(60.0, 70.0));
    author.set_tool(ToolKind::Eraser);
    scribble(&mut author, Point::new(0.0, 45.0), Point::new(95.0, 45.0));
    author.place_text(Point::new(10.0, 90.0), "hello");
    let json = author.export_json().unwrap();

    let mut reader = Session::start_with(config("Reader"), Box::new(MemorySnapshotStore::new()), &[]);
    assert_eq!(reader.import_json(&json).unwrap(), 4);
    assert_eq!(reader.persistent(), author.persistent());
    assert_eq!(reader.export_png().unwrap(), author.export_png().unwrap());
}

#[test]
fn test_file_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSnapshotStore::new(dir.path()).unwrap());

    let mut first = Session::start_with(config("First").with_room("studio"), Box::new(store.clone()), &[]);
    let id = scribble(&mut first, Point::new(5.0, 5.0), Point::new(50.0, 50.0));
    first.close();

    let second = Session::start_with(config("Second").with_room("studio"), Box::new(store.clone()), &[]);
    assert_eq!(ids(&second), vec![id]);
    assert_eq!(second.persistent(), first.persistent());

    let other_room = Session::start_with(config("Third").with_room("lobby"), Box::new(store), &[]);
    assert!(other_room.history().is_empty());
}
