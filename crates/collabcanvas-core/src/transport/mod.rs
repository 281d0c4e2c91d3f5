//! Transports: a uniform event channel over a relay, a same-device bus
//! (between processes, or between sessions of one process), or a loopback.
//!
//! A session tries an ordered list of [`TransportFactory`] strategies once at
//! startup and keeps the first that opens; there is no failover afterwards.
//! Loopback is always the last resort and cannot fail.

mod bus;
mod device;
mod loopback;
mod websocket;

pub use bus::{BusFactory, BusTransport, LocalBus, DEFAULT_BUS_CHANNEL};
pub use device::{default_rendezvous_root, DeviceBusFactory, DeviceBusTransport};
pub use loopback::{LoopbackFactory, LoopbackTransport};
pub use websocket::{relay_url_from_origin, RelayFactory, RelayTransport};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, Waker};
use thiserror::Error;

use crate::presence::User;
use crate::protocol::Event;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Connection timed out")]
    Timeout,
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// A bidirectional event channel.
pub trait Transport: Send {
    /// Short name for display ("websocket", "broadcast", "local").
    fn name(&self) -> &'static str;

    /// Send an event to the other participants.
    fn send(&self, event: &Event);

    /// Drain inbound events received since the last call (non-blocking).
    fn poll_events(&mut self) -> Vec<Event>;

    /// Measure round-trip latency. Only one probe is expected in flight.
    fn ping(&self) -> PingFuture;

    /// Stop sending and receiving. Already-delivered events are unaffected.
    fn close(&mut self);
}

/// A strategy that may open a transport.
pub trait TransportFactory {
    fn name(&self) -> &'static str;

    /// Open the transport, announcing `user` where the strategy does so.
    fn open(&self, user: &User) -> Result<Box<dyn Transport>, TransportError>;
}

/// Try each factory in order and return the first transport that opens,
/// falling back to loopback when all of them fail.
pub fn select_transport(factories: &[Box<dyn TransportFactory>], user: &User) -> Box<dyn Transport> {
    for factory in factories {
        match factory.open(user) {
            Ok(transport) => {
                log::info!("Selected {} transport", transport.name());
                return transport;
            }
            Err(e) => log::warn!("{} transport unavailable: {}", factory.name(), e),
        }
    }
    log::info!("Falling back to local loopback transport");
    Box::new(LoopbackTransport::open(user))
}

/// Result of a latency probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Latency {
    Millis(f64),
    /// The probe failed or timed out.
    Unknown,
}

impl Latency {
    pub fn as_millis(&self) -> Option<f64> {
        match self {
            Latency::Millis(ms) => Some(*ms),
            Latency::Unknown => None,
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Millis(ms) => write!(f, "{:.0} ms", ms),
            Latency::Unknown => write!(f, "— ms"),
        }
    }
}

#[derive(Debug, Default)]
struct PingSlot {
    result: Option<Latency>,
    waker: Option<Waker>,
}

fn lock_slot(slot: &Mutex<PingSlot>) -> MutexGuard<'_, PingSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pending latency probe.
///
/// Await it from async code, or check [`PingFuture::try_result`] from a
/// polling loop.
#[derive(Debug)]
pub struct PingFuture {
    slot: Arc<Mutex<PingSlot>>,
}

/// Completes a [`PingFuture`] from the transport side.
#[derive(Debug, Clone)]
pub(crate) struct PingResolver {
    slot: Arc<Mutex<PingSlot>>,
}

impl PingFuture {
    /// A probe that has already completed.
    pub fn ready(latency: Latency) -> Self {
        let (future, resolver) = Self::pending();
        resolver.resolve(latency);
        future
    }

    pub(crate) fn pending() -> (Self, PingResolver) {
        let slot = Arc::new(Mutex::new(PingSlot::default()));
        (Self { slot: slot.clone() }, PingResolver { slot })
    }

    /// The result, if the probe has completed.
    pub fn try_result(&self) -> Option<Latency> {
        lock_slot(&self.slot).result
    }
}

impl Future for PingFuture {
    type Output = Latency;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Latency> {
        let mut slot = lock_slot(&self.slot);
        match slot.result {
            Some(latency) => Poll::Ready(latency),
            None => {
                slot.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl PingResolver {
    /// Complete the probe. Later calls are ignored.
    pub(crate) fn resolve(&self, latency: Latency) {
        let waker = {
            let mut slot = lock_slot(&self.slot);
            if slot.result.is_some() {
                return;
            }
            slot.result = Some(latency);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    /// Simple blocking executor for tests.
    pub fn block_on<F: std::future::Future>(f: F) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        loop {
            match f.as_mut().poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => std::thread::yield_now(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::block_on;
    use super::*;

    struct FailingFactory(&'static str);

    impl TransportFactory for FailingFactory {
        fn name(&self) -> &'static str {
            self.0
        }

        fn open(&self, _user: &User) -> Result<Box<dyn Transport>, TransportError> {
            Err(TransportError::Unavailable("forced failure".into()))
        }
    }

    fn user() -> User {
        User::new("me", "User-Koi-7", "#123456")
    }

    #[test]
    fn test_first_success_wins() {
        let bus = LocalBus::new();
        let factories: Vec<Box<dyn TransportFactory>> = vec![
            Box::new(FailingFactory("websocket")),
            Box::new(BusFactory::new(bus)),
        ];
        let transport = select_transport(&factories, &user());
        assert_eq!(transport.name(), "broadcast");
    }

    #[test]
    fn test_all_failing_selects_loopback() {
        let factories: Vec<Box<dyn TransportFactory>> = vec![
            Box::new(FailingFactory("websocket")),
            Box::new(FailingFactory("broadcast")),
        ];
        let mut transport = select_transport(&factories, &user());
        assert_eq!(transport.name(), "local");

        // The loopback announces us, then echoes every send.
        transport.send(&Event::join("main"));
        let events = transport.poll_events();
        assert_eq!(events, vec![Event::presence_join(user()), Event::join("main")]);
    }

    #[test]
    fn test_ping_future_resolves_once() {
        let (future, resolver) = PingFuture::pending();
        assert!(future.try_result().is_none());
        resolver.resolve(Latency::Millis(12.0));
        resolver.resolve(Latency::Unknown);
        assert_eq!(block_on(future), Latency::Millis(12.0));
    }

    #[test]
    fn test_latency_display() {
        assert_eq!(Latency::Millis(12.4).to_string(), "12 ms");
        assert_eq!(Latency::Unknown.to_string(), "— ms");
    }
}
