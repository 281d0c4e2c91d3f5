//! Same-device broadcast between processes.
//!
//! Members of a channel meet in a rendezvous directory. Each member listens
//! on a loopback TCP port and publishes it as `<member>.port`. A post is
//! written as one line of JSON to every other published member, never to
//! the sender.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{Latency, PingFuture, Transport, TransportError, TransportFactory, DEFAULT_BUS_CHANNEL};
use crate::presence::User;
use crate::protocol::Event;
use crate::storage::safe_file_stem;

const PEER_CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
const PEER_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const PORT_EXTENSION: &str = "port";

/// Where channel directories live: the per-user runtime directory when the
/// platform has one, the temp directory otherwise.
pub fn default_rendezvous_root() -> PathBuf {
    dirs::runtime_dir().unwrap_or_else(std::env::temp_dir)
}

/// A published member of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Member {
    id: String,
    port: u16,
}

fn published_members(dir: &Path) -> Vec<Member> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PORT_EXTENSION) {
                return None;
            }
            let id = path.file_stem()?.to_str()?.to_string();
            // A file still being written parses as garbage; it is picked up on
            // a later post.
            let port = fs::read_to_string(&path).ok()?.trim().parse().ok()?;
            Some(Member { id, port })
        })
        .collect()
}

fn connect_peer(port: u16) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&SocketAddr::from((Ipv4Addr::LOCALHOST, port)), PEER_CONNECT_TIMEOUT)?;
    stream.set_write_timeout(Some(PEER_WRITE_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn accept_peers(listener: TcpListener, inbox: Sender<Event>, closed: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if closed.load(Ordering::Acquire) {
            break;
        }
        match stream {
            Ok(stream) => {
                let inbox = inbox.clone();
                let closed = closed.clone();
                thread::spawn(move || read_peer(stream, inbox, closed));
            }
            Err(e) => log::debug!("Device bus accept failed: {}", e),
        }
    }
}

fn read_peer(stream: TcpStream, inbox: Sender<Event>, closed: Arc<AtomicBool>) {
    for line in BufReader::new(stream).lines() {
        let Ok(line) = line else {
            break;
        };
        if closed.load(Ordering::Acquire) {
            break;
        }
        match Event::from_json(&line) {
            Ok(event) => {
                if inbox.send(event).is_err() {
                    break;
                }
            }
            Err(e) => log::debug!("Dropping undecodable device bus frame: {}", e),
        }
    }
}

/// A member of a device-wide channel.
#[derive(Debug)]
pub struct DeviceBusTransport {
    dir: PathBuf,
    member: String,
    port: u16,
    peers: Mutex<HashMap<String, TcpStream>>,
    inbox: Receiver<Event>,
    closed: Arc<AtomicBool>,
}

impl DeviceBusTransport {
    /// Publish a new member in `dir` and announce `user` to the others.
    pub fn open(dir: &Path, user: &User) -> Result<Self, TransportError> {
        let unavailable = |what: &str, e: io::Error| TransportError::Unavailable(format!("{}: {}", what, e));

        fs::create_dir_all(dir).map_err(|e| unavailable(&dir.display().to_string(), e))?;
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(|e| unavailable("bind", e))?;
        let port = listener.local_addr().map_err(|e| unavailable("bind", e))?.port();

        let member = uuid::Uuid::new_v4().to_string();
        let port_file = dir.join(format!("{}.{}", member, PORT_EXTENSION));
        fs::write(&port_file, port.to_string()).map_err(|e| unavailable(&port_file.display().to_string(), e))?;

        let (inbox_tx, inbox) = channel();
        let closed = Arc::new(AtomicBool::new(false));
        let accept_closed = closed.clone();
        thread::spawn(move || accept_peers(listener, inbox_tx, accept_closed));
        log::info!("Joined device bus {} as {} on port {}", dir.display(), member, port);

        let transport = Self {
            dir: dir.to_path_buf(),
            member,
            port,
            peers: Mutex::new(HashMap::new()),
            inbox,
            closed,
        };
        transport.send(&Event::presence_join(user.clone()));
        Ok(transport)
    }

    fn lock_peers(&self) -> MutexGuard<'_, HashMap<String, TcpStream>> {
        self.peers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn port_file(&self, member: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", member, PORT_EXTENSION))
    }

    /// Other members currently published in the channel directory.
    pub fn peer_count(&self) -> usize {
        published_members(&self.dir).iter().filter(|m| m.id != self.member).count()
    }
}

impl Transport for DeviceBusTransport {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn send(&self, event: &Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut line = match event.to_json() {
            Ok(json) => json,
            Err(e) => {
                log::error!("Failed to serialize {}: {}", event.kind(), e);
                return;
            }
        };
        line.push('\n');

        let members = published_members(&self.dir);
        let mut peers = self.lock_peers();
        for member in members.iter().filter(|m| m.id != self.member) {
            if !peers.contains_key(&member.id) {
                match connect_peer(member.port) {
                    Ok(stream) => {
                        peers.insert(member.id.clone(), stream);
                    }
                    Err(e) => {
                        log::debug!("Device bus member {} unreachable: {}", member.id, e);
                        // Left behind by a process that did not close cleanly.
                        if e.kind() == io::ErrorKind::ConnectionRefused {
                            let _ = fs::remove_file(self.port_file(&member.id));
                        }
                        continue;
                    }
                }
            }
            let failed = peers
                .get_mut(&member.id)
                .is_some_and(|stream| stream.write_all(line.as_bytes()).is_err());
            if failed {
                log::debug!("Device bus member {} dropped", member.id);
                peers.remove(&member.id);
            }
        }
        peers.retain(|id, _| members.iter().any(|m| &m.id == id));
    }

    fn poll_events(&mut self) -> Vec<Event> {
        self.inbox.try_iter().collect()
    }

    fn ping(&self) -> PingFuture {
        PingFuture::ready(Latency::Millis(0.0))
    }

    fn close(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = fs::remove_file(self.port_file(&self.member)) {
            log::debug!("Could not unpublish device bus member: {}", e);
        }
        self.lock_peers().clear();
        // Wake the accept loop so it sees the flag and exits.
        let _ = TcpStream::connect_timeout(&SocketAddr::from((Ipv4Addr::LOCALHOST, self.port)), PEER_CONNECT_TIMEOUT);
        log::info!("Left device bus {}", self.dir.display());
    }
}

impl Drop for DeviceBusTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`DeviceBusTransport`]s on a named channel shared by every process
/// of the current user.
#[derive(Debug, Clone)]
pub struct DeviceBusFactory {
    root: PathBuf,
    channel: String,
}

impl Default for DeviceBusFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBusFactory {
    pub fn new() -> Self {
        Self {
            root: default_rendezvous_root(),
            channel: DEFAULT_BUS_CHANNEL.to_string(),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Rendezvous directory of the configured channel.
    pub fn channel_dir(&self) -> PathBuf {
        self.root.join(safe_file_stem(&self.channel))
    }
}

impl TransportFactory for DeviceBusFactory {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn open(&self, user: &User) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(DeviceBusTransport::open(&self.channel_dir(), user)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    fn user(id: &str) -> User {
        User::new(id, format!("User-{}", id), "#abcdef")
    }

    fn wait_for(transport: &mut DeviceBusTransport, count: usize) -> Vec<Event> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut events = Vec::new();
        while events.len() < count && Instant::now() < deadline {
            events.extend(transport.poll_events());
            thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn test_post_reaches_other_members_only() {
        let root = TempDir::new().unwrap();
        let factory = DeviceBusFactory::new().with_root(root.path());
        let mut a = DeviceBusTransport::open(&factory.channel_dir(), &user("a")).unwrap();
        let mut b = DeviceBusTransport::open(&factory.channel_dir(), &user("b")).unwrap();

        assert_eq!(wait_for(&mut a, 1), vec![Event::presence_join(user("b"))]);
        assert_eq!(a.peer_count(), 1);

        a.send(&Event::join("main"));
        assert_eq!(wait_for(&mut b, 1), vec![Event::join("main")]);
        thread::sleep(Duration::from_millis(50));
        assert!(a.poll_events().is_empty());
    }

    #[test]
    fn test_posts_from_one_member_keep_their_order() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("order");
        let a = DeviceBusTransport::open(&dir, &user("a")).unwrap();
        let mut b = DeviceBusTransport::open(&dir, &user("b")).unwrap();

        let rooms: Vec<Event> = (0..50).map(|i| Event::join(format!("room-{}", i))).collect();
        for event in &rooms {
            a.send(event);
        }
        assert_eq!(wait_for(&mut b, rooms.len()), rooms);
    }

    #[test]
    fn test_close_unpublishes_member() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("close");
        let mut a = DeviceBusTransport::open(&dir, &user("a")).unwrap();
        let b = DeviceBusTransport::open(&dir, &user("b")).unwrap();
        assert_eq!(b.peer_count(), 1);

        a.close();
        assert_eq!(b.peer_count(), 0);
        a.send(&Event::join("main"));
        b.send(&Event::join("main"));
    }

    #[test]
    fn test_stale_member_is_pruned() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("stale");
        fs::create_dir_all(&dir).unwrap();

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let dead_port = listener.local_addr().unwrap().port();
        drop(listener);
        fs::write(dir.join("ghost.port"), dead_port.to_string()).unwrap();

        let a = DeviceBusTransport::open(&dir, &user("a")).unwrap();
        assert!(!dir.join("ghost.port").exists());
        assert_eq!(a.peer_count(), 0);
    }

    #[test]
    fn test_channels_are_isolated() {
        let root = TempDir::new().unwrap();
        let one = DeviceBusFactory::new().with_root(root.path()).with_channel("one");
        let two = DeviceBusFactory::new().with_root(root.path()).with_channel("two");
        assert_ne!(one.channel_dir(), two.channel_dir());

        let a = DeviceBusTransport::open(&one.channel_dir(), &user("a")).unwrap();
        let b = DeviceBusTransport::open(&two.channel_dir(), &user("b")).unwrap();
        assert_eq!(a.peer_count(), 0);
        assert_eq!(b.peer_count(), 0);
    }

    #[test]
    fn test_unwritable_root_is_unavailable() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        let factory = DeviceBusFactory::new().with_root(&file);
        assert!(factory.open(&user("a")).is_err());
    }
}
