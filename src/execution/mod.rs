//! Pipeline execution engine

pub mod dispatch;
pub mod error;
pub mod events;
mod flow;
mod hooks;
pub mod orchestrator;
pub mod transporter;
pub mod trigger;

pub use dispatch::{WriteOutcome, WriterAttributes};
pub use error::{EngineError, EngineResult};
pub use events::{EventBus, EventHandler, RunEvent};
pub use orchestrator::{TransportService, MAX_TRIGGER_DEPTH};
pub use transporter::Transporter;
pub use trigger::{with_lock, InMemoryLockProvider, LockProvider, ManualScheduler, ScheduledRun, ScheduledTask, TriggerScheduler};
