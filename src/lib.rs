pub mod audit;
pub mod config;
pub mod db;
pub mod domains;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod interfaces;
pub mod memories;
pub mod patterns;
pub mod policy;
pub mod users;

pub use crate::config::Config;
pub use crate::domains::event::{Event, EventFilter, EventSource, NewEvent, Severity};
pub use crate::domains::memory::{Memory, MemoryObservation, MemorySource, MemoryType};
pub use crate::domains::pattern::{BehaviorPattern, ObserveOutcome, PatternStatus};
pub use crate::domains::user::{NewUser, User, UserLifecycleEvent};
pub use crate::engine::{BehavioralSignal, CompanionEngine, IngestOutcome};
pub use crate::error::{CompanionError, Result};
