//! Logical source table names.
//!
//! Physical table or file names are mapped onto these by configuration.

pub const LOT_HISTORY: &str = "lot_history";
pub const INVENTORY: &str = "inventory";
pub const ITEM_ASSEMBLY: &str = "item_assembly";
pub const SFC: &str = "sfc";
pub const SALES_ORDER_DETAIL: &str = "sales_order_detail";
pub const PRODUCTION_LOG: &str = "production_log";
pub const REFERENCE: &str = "reference";

/// Tables feeding the reference edge derivation.
pub const EDGE_SOURCES: [&str; 5] =
    [LOT_HISTORY, INVENTORY, ITEM_ASSEMBLY, SFC, SALES_ORDER_DETAIL];

/// Every logical table the pipeline reads.
pub const ALL: [&str; 7] = [
    LOT_HISTORY,
    INVENTORY,
    ITEM_ASSEMBLY,
    SFC,
    SALES_ORDER_DETAIL,
    PRODUCTION_LOG,
    REFERENCE,
];
