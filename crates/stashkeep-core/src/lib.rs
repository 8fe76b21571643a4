//! Stashkeep Core - labeled container registry and exclusive container access
//! for world-interacting agents.
//!
//! The crate covers four concerns:
//! - [`KeyedMutex`]: FIFO mutual exclusion per string key
//! - [`RegistryStore`]: persisted records of labeled containers, per world
//! - [`classifier`]: block observations to container geometry
//! - [`AccessCoordinator`]: resolve, check policy, lock, open, use, close
//!
//! The world itself (network client, pathfinding, window handling) is reached
//! through the [`WorldHandle`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use stashkeep_core::{AccessCoordinator, CancellationToken, RegistryStore};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(RegistryStore::open("/tmp/containers.json"));
//! let coordinator = AccessCoordinator::new(registry, Default::default());
//!
//! let outcome = coordinator
//!     .with_container(world, "Iron Stash".into(), &CancellationToken::new(), |session| {
//!         Box::pin(async move { Ok(session.deposit("iron_ingot", 64).await) })
//!     })
//!     .await?;
//! println!("{}", outcome);
//! ```

pub mod access;
pub mod cancel;
pub mod classifier;
pub mod config;
pub mod error;
pub mod lock;
pub mod registry;
pub mod window;
pub mod world;

pub use access::{
    AccessCoordinator, ContainerRef, ContainerSession, DiscoveredContainer, LabelRequest,
    ReconcileReport, ResolvedContainer,
};
pub use cancel::CancellationToken;
pub use classifier::{classify, scan, Bounds, Classification};
pub use config::{CoordinatorOptions, LockScope, StoreOptions};
pub use error::{ErrorKind, Result, StashError};
pub use lock::KeyedMutex;
pub use registry::{
    ContainerKind, ContainerRecord, Coord, PersistStats, RecordDraft, RecordSelector,
    RegistryStore, WorldKey,
};
pub use window::{ContainerWindow, Region, SlotItem, TransferDirection, TransferOutcome};
pub use world::{BlockView, WorldHandle};
