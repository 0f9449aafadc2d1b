// Public modules
pub mod types;
pub mod config;
pub mod error;
pub mod queue;
pub mod mute;
pub mod classify;
pub mod alert;
pub mod dispatch;
pub mod kubernetes;
pub mod reconciler;
pub mod controller;

// Re-export commonly used items
pub use types::*;
pub use config::{load_config, load_config_with_env, EnvironmentProvider, SystemEnvironment, MockEnvironment};
pub use error::ReconcileError;
pub use queue::WorkQueue;
pub use mute::{MuteCache, MuteClaim};
pub use classify::{crash_signals, CrashPolicy};
pub use alert::AlertContext;
pub use dispatch::{build_dispatcher, Dispatcher, FeishuDispatcher, SlackDispatcher};
pub use kubernetes::{enqueue_event, pod_events, KubePodSource, PodSource};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use controller::{Controller, ControllerSettings};
