//! CollabCanvas Application
//!
//! The session engine that ties the history, presence, tools, transport,
//! snapshot store and compositor together, plus the headless client binary.

mod identity;
mod session;
mod shortcuts;

pub use identity::{generate_user, friendly_name, DEFAULT_COLOR};
pub use session::{ImportError, Session, SessionConfig};
pub use shortcuts::{Shortcut, ShortcutAction, ShortcutRegistry};
