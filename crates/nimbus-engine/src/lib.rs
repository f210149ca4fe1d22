//! nimbus-engine - the synchronization core of Nimbus
//!
//! Wires the domain model to the outside world and keeps a local folder
//! and a cloud folder convergent:
//!
//! - [`SyncOrchestrator`] - lifecycle (start/pause/resume/stop) and the
//!   event-driven plus periodic reconciliation loops
//! - [`RootWatcher`] - notify-backed filesystem watching mapped into
//!   [`ChangeEvent`]s
//! - [`ChangeScheduler`] - debouncing and exclude filtering between the
//!   watcher and the orchestrator
//! - [`LocalFileSystemAdapter`] - the tokio-backed implementation of
//!   [`ILocalFileSystem`](nimbus_core::ports::ILocalFileSystem)
//! - [`ProbeNetworkMonitor`] - reachability-probe implementation of
//!   [`INetworkMonitor`](nimbus_core::ports::INetworkMonitor) driving
//!   bandwidth throttling and offline handling
//! - [`EngineStatus`] - shared state, progress counters, and item
//!   notifications for host UIs
//!
//! The transport and the metadata store are injected as trait objects;
//! this crate never talks to a concrete backend.

pub mod filesystem;
pub mod network;
pub mod orchestrator;
pub mod scheduler;
pub mod state;
pub mod watcher;

pub use filesystem::LocalFileSystemAdapter;
pub use network::ProbeNetworkMonitor;
pub use orchestrator::SyncOrchestrator;
pub use scheduler::{ChangeScheduler, ExcludeFilter};
pub use state::{EngineState, EngineStatus, ItemNotification, SyncProgress};
pub use watcher::{ChangeEvent, DebouncedChangeQueue, RootWatcher};
