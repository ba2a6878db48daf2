use ordersight_core::partition::{PartitionFilter, PartitionSet};
use ordersight_core::schema::SchemaGraph;

use crate::util::{exit_error, parse_partitions};

/// Print the schema description the model is given, rendered for `partitions`.
pub fn run(partitions: &str) -> i32 {
    let ids = match parse_partitions(partitions) {
        Ok(ids) => ids,
        Err(message) => exit_error(&message, Some("Pass partitions as --partitions 101,205")),
    };
    let set: PartitionSet = ids.into_iter().collect();
    let schema = SchemaGraph::standard();
    let Some(filter) = PartitionFilter::new(schema.partition_column(), &set) else {
        exit_error("at least one partition is required", None)
    };
    println!("{}", schema.describe(filter.fragment()));
    0
}
