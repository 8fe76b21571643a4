//! Capabilities the core needs from the world-interaction client.
//!
//! The client (network protocol, pathfinding, window handling) lives outside
//! this crate. It is reached only through these traits.

use crate::cancel::CancellationToken;
use crate::registry::{Coord, WorldKey};
use crate::window::{ContainerWindow, TransferDirection};
use crate::Result;
use async_trait::async_trait;

/// Read-only block lookup.
pub trait BlockView: Send + Sync {
    /// Block name at `position` (namespaced or not), `None` when unknown or unloaded.
    fn block_name(&self, position: Coord) -> Option<String>;
}

/// Full world-interaction handle used by [`crate::access::AccessCoordinator`].
#[async_trait]
pub trait WorldHandle: BlockView {
    /// Connection host, port and current dimension.
    fn world_key(&self) -> WorldKey;

    /// Move within reach of `position`. Must stop when `cancel` fires.
    async fn approach(&self, _position: Coord, _cancel: &CancellationToken) -> Result<()> {
        Ok(())
    }

    /// Open the container at `position`.
    async fn open_container(&self, position: Coord) -> Result<ContainerWindow>;

    /// Current contents of the open window.
    async fn read_window(&self) -> Result<ContainerWindow>;

    /// Move `count` units of `item` in one operation.
    async fn transfer_bulk(
        &self,
        direction: TransferDirection,
        item: &str,
        count: u32,
    ) -> Result<()>;

    /// Move a single unit of `item`.
    async fn transfer_unit(&self, direction: TransferDirection, item: &str) -> Result<()>;

    /// Container-specific close.
    async fn close_container(&self) -> Result<()>;

    /// Generic window close, used when the container-specific one fails.
    async fn close_window(&self) -> Result<()>;
}
