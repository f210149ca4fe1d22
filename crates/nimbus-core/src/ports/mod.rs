//! Ports: the traits adapters implement (hexagonal architecture)
//!
//! The engine depends only on these traits; concrete adapters (SQLite
//! store, HTTP transport, tokio filesystem) live in their own crates and
//! are injected at wiring time.

pub mod cloud_transport;
pub mod local_filesystem;
pub mod metadata_store;
pub mod network_monitor;

pub use cloud_transport::{ChangeSet, ICloudTransport, ProgressFn, RemoteChange, RemoteItem};
pub use local_filesystem::{FileSystemState, IFileObserver, ILocalFileSystem, WatchHandle};
pub use metadata_store::IMetadataStore;
pub use network_monitor::{INetworkMonitor, NetworkStatus, NetworkType};
