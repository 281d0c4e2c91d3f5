//! In-process broadcast bus.
//!
//! Sessions of one process sharing a [`LocalBus`] handle exchange events on a named
//! channel. A post reaches every other member of the channel, never the
//! sender.

use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Latency, PingFuture, Transport, TransportError, TransportFactory};
use crate::presence::User;
use crate::protocol::Event;

/// Channel name used when none is configured.
pub const DEFAULT_BUS_CHANNEL: &str = "collab-canvas-v3";

#[derive(Debug, Default)]
struct BusInner {
    next_member: u64,
    shut_down: bool,
    channels: HashMap<String, Vec<(u64, Sender<Event>)>>,
}

/// Shared handle to an in-process bus. Cloning shares the bus.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Refuse new members and disconnect existing ones.
    pub fn shut_down(&self) {
        let mut inner = self.lock();
        inner.shut_down = true;
        inner.channels.clear();
    }

    /// Number of members on `channel`.
    pub fn member_count(&self, channel: &str) -> usize {
        self.lock().channels.get(channel).map_or(0, Vec::len)
    }

    fn join(&self, channel_name: &str) -> Result<(u64, Receiver<Event>), TransportError> {
        let mut inner = self.lock();
        if inner.shut_down {
            return Err(TransportError::Unavailable("bus is shut down".into()));
        }
        let id = inner.next_member;
        inner.next_member += 1;
        let (tx, rx) = channel();
        inner.channels.entry(channel_name.to_string()).or_default().push((id, tx));
        Ok((id, rx))
    }

    fn leave(&self, channel_name: &str, member: u64) {
        let mut inner = self.lock();
        if let Some(members) = inner.channels.get_mut(channel_name) {
            members.retain(|(id, _)| *id != member);
        }
    }

    fn post(&self, channel_name: &str, from: u64, event: &Event) {
        let mut inner = self.lock();
        let Some(members) = inner.channels.get_mut(channel_name) else {
            return;
        };
        // Receivers that were dropped without closing are pruned here.
        members.retain(|(id, tx)| *id == from || tx.send(event.clone()).is_ok());
    }
}

/// A member of a [`LocalBus`] channel.
#[derive(Debug)]
pub struct BusTransport {
    bus: LocalBus,
    channel: String,
    member: Option<u64>,
    inbox: Receiver<Event>,
}

impl BusTransport {
    /// Join `channel` and announce `user` to the other members.
    pub fn open(bus: &LocalBus, channel: &str, user: &User) -> Result<Self, TransportError> {
        let (member, inbox) = bus.join(channel)?;
        let transport = Self {
            bus: bus.clone(),
            channel: channel.to_string(),
            member: Some(member),
            inbox,
        };
        transport.send(&Event::presence_join(user.clone()));
        Ok(transport)
    }
}

impl Transport for BusTransport {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn send(&self, event: &Event) {
        if let Some(member) = self.member {
            self.bus.post(&self.channel, member, event);
        }
    }

    fn poll_events(&mut self) -> Vec<Event> {
        self.inbox.try_iter().collect()
    }

    fn ping(&self) -> PingFuture {
        PingFuture::ready(Latency::Millis(0.0))
    }

    fn close(&mut self) {
        if let Some(member) = self.member.take() {
            self.bus.leave(&self.channel, member);
        }
    }
}

impl Drop for BusTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`BusTransport`]s on a shared bus.
#[derive(Debug, Clone)]
pub struct BusFactory {
    bus: LocalBus,
    channel: String,
}

impl BusFactory {
    pub fn new(bus: LocalBus) -> Self {
        Self {
            bus,
            channel: DEFAULT_BUS_CHANNEL.to_string(),
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

impl TransportFactory for BusFactory {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn open(&self, user: &User) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(BusTransport::open(&self.bus, &self.channel, user)?))
    }
}
