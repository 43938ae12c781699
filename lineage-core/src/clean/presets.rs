//! Built-in cleaning plans for the MES source tables.

use super::{CleaningPlan, FieldRule};
use crate::model::REFERENCE_COLUMNS;
use crate::sequence::PRODUCTION_LOG_COLUMNS;
use crate::tables;

/// Plan for a logical table, or `None` for unknown names.
pub fn plan_for(table: &str) -> Option<CleaningPlan> {
    let plan = match table {
        tables::PRODUCTION_LOG => production_log(),
        tables::LOT_HISTORY => CleaningPlan::new(tables::LOT_HISTORY)
            .required_field(FieldRule::string("source_type"))
            .required_field(FieldRule::string("source_reference_value"))
            .required_field(FieldRule::string("target_value"))
            .required_field(FieldRule::special_null("storage_location_idx"))
            .field(FieldRule::datetime("created_at")),
        tables::INVENTORY => CleaningPlan::new(tables::INVENTORY)
            .required_field(FieldRule::string("inventory_id"))
            .required_field(FieldRule::string("receiving_batch_number"))
            .field(FieldRule::datetime("created_at"))
            .field(FieldRule::datetime("updated_at"))
            .with_time_check("created_at", "updated_at"),
        tables::ITEM_ASSEMBLY => CleaningPlan::new(tables::ITEM_ASSEMBLY)
            .required_field(FieldRule::string("inventory_id"))
            .required_field(FieldRule::string("related_project"))
            .required_field(FieldRule::string("related_project_type")),
        tables::SFC => CleaningPlan::new(tables::SFC)
            .required_field(FieldRule::string("primary_key"))
            .required_field(FieldRule::string("sfc_code"))
            .field(FieldRule::datetime("created_at")),
        tables::SALES_ORDER_DETAIL => CleaningPlan::new(tables::SALES_ORDER_DETAIL)
            .required_field(FieldRule::string("primary_key"))
            .required_field(FieldRule::string("receiving_batch_no"))
            .field(FieldRule::datetime("created_at")),
        tables::REFERENCE => reference(),
        _ => return None,
    };
    Some(plan)
}

/// Production log: `sfc_no` is the process identifier.
fn production_log() -> CleaningPlan {
    let mut plan = CleaningPlan::new(tables::PRODUCTION_LOG);
    for column in PRODUCTION_LOG_COLUMNS {
        let rule = match column {
            "weight" => FieldRule::numeric(column).rounded(),
            "created_at" => FieldRule::datetime(column),
            "resource_code" | "default_unit" => FieldRule::special_null(column),
            _ => FieldRule::string(column),
        };
        plan = plan.required_field(rule);
    }
    plan.with_process_field("sfc_no")
}

fn reference() -> CleaningPlan {
    let mut plan = CleaningPlan::new(tables::REFERENCE);
    for column in REFERENCE_COLUMNS {
        let rule = match column {
            "handle" => FieldRule::numeric(column),
            "from_node_time" | "to_node_time" => FieldRule::datetime(column),
            _ => FieldRule::string(column),
        };
        plan = plan.required_field(rule);
    }
    plan
}
