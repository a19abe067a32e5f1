// =====================================================
// DATABASE ACCESS
// Store seams, pooled handles and schema inspection
// =====================================================

pub mod metadata;
pub mod registry;
pub mod sql_utils;
pub mod traits;

pub use registry::ConnectionRegistry;
pub use traits::{Warehouse, WarehouseConnector};
