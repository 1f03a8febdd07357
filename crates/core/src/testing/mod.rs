//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the external service ports
//! (translation backend, container tool, media managers), allowing
//! comprehensive end-to-end testing without real infrastructure.

mod mock_backend;
mod mock_inventory;
mod mock_prober;

pub use mock_backend::MockBackend;
pub use mock_inventory::MockInventory;
pub use mock_prober::MockProber;
