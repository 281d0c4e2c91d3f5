//! CollabCanvas Core Library
//!
//! Platform-agnostic collaboration engine for the CollabCanvas drawing surface:
//! the replicated operation log, presence tracking, gesture state and the
//! transports that carry events between participants.

pub mod history;
pub mod ops;
pub mod presence;
pub mod protocol;
pub mod storage;
pub mod tools;
pub mod transport;

pub use history::{Change, HistoryManager, Repaint, UndoSemantics};
pub use ops::{ImageOp, Operation, ShapeGeometry, ShapeOp, StrokeOp, StrokePoint, StrokeTool, TextOp};
pub use presence::{Cursor, PresenceTracker, RosterEntry, User, HIDDEN_CURSOR};
pub use protocol::{Event, RelayFrame};
pub use storage::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, StorageError, StorageResult};
pub use tools::{PointerDown, Preview, ToolKind, ToolManager};
pub use transport::{
    select_transport, BusFactory, DeviceBusFactory, Latency, LocalBus, LoopbackFactory, PingFuture, RelayFactory,
    Transport, TransportError, TransportFactory,
};
