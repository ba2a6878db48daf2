use ordersight_core::guard::{self, GuardViolation};
use ordersight_core::partition::{PartitionFilter, PartitionSet};
use ordersight_core::schema::SchemaGraph;
use serde_json::{Value, json};

use crate::util::{emit, exit_error, parse_partitions};

/// Check a candidate query offline, exactly as the agent's query tools would.
///
/// Exit 0 when the query would be allowed, 1 when the guard refuses it.
pub fn run(query: &str, partitions: &str) -> i32 {
    let ids = match parse_partitions(partitions) {
        Ok(ids) => ids,
        Err(message) => exit_error(&message, Some("Pass partitions as --partitions 101,205")),
    };
    let set: PartitionSet = ids.into_iter().collect();
    let schema = SchemaGraph::standard();
    let Some(filter) = PartitionFilter::new(schema.partition_column(), &set) else {
        exit_error(
            "at least one partition is required",
            Some("An empty partition set grants no access, so every query would be refused."),
        )
    };
    let (report, code) = verdict(query, &filter);
    emit(&report, code)
}

fn verdict(query: &str, filter: &PartitionFilter) -> (Value, i32) {
    match guard::inspect(query, filter) {
        Ok(()) => (
            json!({
                "allowed": true,
                "required_filter": filter.fragment(),
            }),
            0,
        ),
        Err(violation) => {
            let kind = match &violation {
                GuardViolation::NotReadOnly(_) => "not_read_only",
                GuardViolation::MissingFilter { .. } => "missing_filter",
            };
            (
                json!({
                    "allowed": false,
                    "violation": kind,
                    "message": violation.to_string(),
                    "required_filter": filter.fragment(),
                }),
                1,
            )
        }
    }
}
