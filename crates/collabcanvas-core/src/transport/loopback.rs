//! Loopback transport: every send comes straight back as an inbound event.

use std::sync::Mutex;

use super::{Latency, PingFuture, Transport, TransportError, TransportFactory};
use crate::presence::User;
use crate::protocol::Event;

/// Single-user degenerate transport. Opening it cannot fail.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    inbox: Mutex<Vec<Event>>,
    closed: bool,
}

impl LoopbackTransport {
    /// Open the loopback and announce `user` to ourselves.
    pub fn open(user: &User) -> Self {
        let transport = Self::default();
        transport.send(&Event::presence_join(user.clone()));
        transport
    }
}

impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn send(&self, event: &Event) {
        if self.closed {
            return;
        }
        self.inbox
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }

    fn poll_events(&mut self) -> Vec<Event> {
        std::mem::take(self.inbox.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn ping(&self) -> PingFuture {
        PingFuture::ready(Latency::Millis(0.0))
    }

    fn close(&mut self) {
        self.closed = true;
        self.poll_events();
    }
}

/// Factory for [`LoopbackTransport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackFactory;

impl TransportFactory for LoopbackFactory {
    fn name(&self) -> &'static str {
        "local"
    }

    fn open(&self, user: &User) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(LoopbackTransport::open(user)))
    }
}
