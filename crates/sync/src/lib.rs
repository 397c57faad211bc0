//! Live and historical session synchronization for one operator.
//!
//! A [`SessionStateStore`] merges full snapshots from the backend with
//! incremental push events into a single ordered working set, and publishes
//! a derived [`SyncView`] after every change.

pub mod config;
pub mod error;
pub mod fetcher;
pub mod normalize;
pub mod reconnect;
pub mod store;
pub mod stream;
pub mod transition;
pub mod view;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use fetcher::{HttpSnapshotFetcher, SnapshotFetcher};
pub use normalize::{normalize_live, normalize_record};
pub use store::{SessionStateStore, StoreOptions};
pub use stream::{parse_envelope, StreamClient, StreamEvent, StreamSignal};
pub use view::SyncView;
