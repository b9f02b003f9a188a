mod dispatch;
mod mote;
mod registry;
mod resync;

pub use dispatch::{DispatchError, Dispatched, Dispatcher};
pub use mote::{ProcessOutcome, Session, SessionConfig, SessionView, Sinks};
pub use registry::SessionRegistry;
pub use resync::{ResyncController, SyncDecision};
