pub mod config;
pub mod controller;
pub mod event;
pub mod health;
pub mod queue;
pub mod store;
pub mod watch;
pub mod worker;

pub use config::PipelineConfig;
pub use event::{ChangeEvent, EventKind, ObjectKey};
pub use health::HealthSnapshot;
pub use controller::{Pipeline, PipelineState};
pub use queue::EventQueue;
pub use store::ResourceStore;
pub use watch::{WatchNotification, WatchSource};
pub use worker::{EventHandler, LogHandler};
