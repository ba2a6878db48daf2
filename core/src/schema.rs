//! The fixed relational schema the agent may query.
//!
//! Every table hangs off one fact table (`Orders`) which alone carries the partition
//! column. Join paths are known at design time; the agent only introspects the live
//! database to confirm column names and types.

use std::collections::{BTreeMap, VecDeque};

use thiserror::Error;

/// Maximum number of join hops from any table to the fact table
/// (a direct key, or one intermediate table).
pub const MAX_JOIN_HOPS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub description: Option<String>,
    pub primary_key: String,
    pub foreign_keys: Vec<ForeignKey>,
    /// Domain rules the model must follow for this table
    pub notes: Vec<String>,
}

impl Table {
    fn new(name: &str, description: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.map(str::to_string),
            primary_key: "Id".to_string(),
            foreign_keys: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn fk(mut self, column: &str, references_table: &str, references_column: &str) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
        });
        self
    }

    fn note(mut self, note: &str) -> Self {
        self.notes.push(note.to_string());
        self
    }
}

/// A mandatory multi-hop join for a table with no key to the fact table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTemplate {
    pub table: String,
    /// `(table, join condition)` pairs walked in order, ending at the fact table
    pub hops: Vec<(String, String)>,
    /// A join that looks plausible but must never be used
    pub invalid_shortcut: Option<String>,
}

impl JoinTemplate {
    /// e.g. `Leases → Properties (Leases.PropertyId = Properties.Id) → ... → Orders`
    pub fn render(&self) -> String {
        let mut out = self.table.clone();
        for (table, condition) in &self.hops {
            out.push_str(&format!(" → {table} ({condition})"));
        }
        out
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("fact table '{0}' is not part of the schema")]
    MissingFactTable(String),
    #[error("table '{table}' references unknown table '{references}'")]
    UnknownReference { table: String, references: String },
    #[error("table '{table}' is not reachable from '{fact_table}' within {MAX_JOIN_HOPS} joins")]
    Unreachable { table: String, fact_table: String },
}

#[derive(Debug, Clone)]
pub struct SchemaGraph {
    fact_table: String,
    partition_column: String,
    tables: Vec<Table>,
    join_templates: Vec<JoinTemplate>,
}

impl SchemaGraph {
    pub fn new(
        fact_table: &str,
        partition_column: &str,
        tables: Vec<Table>,
        join_templates: Vec<JoinTemplate>,
    ) -> Result<Self, SchemaError> {
        let graph = Self {
            fact_table: fact_table.to_string(),
            partition_column: partition_column.to_string(),
            tables,
            join_templates,
        };
        graph.validate()?;
        Ok(graph)
    }

    /// The order-management schema the agent serves.
    pub fn standard() -> Self {
        let tables = vec![
            Table::new("Orders", Some("all the order information placed by users"))
                .fk("TransfereeId", "ApplicationUsers", "Id")
                .note("ServiceTeamId lives only on this table and must be filtered in every query"),
            Table::new("ApplicationUsers", Some("users/people's personal information")),
            Table::new("Children", Some("children information")).fk("OrderId", "Orders", "Id"),
            Table::new("Pets", Some("pets information")).fk("OrderId", "Orders", "Id"),
            Table::new("Homefindings", None).fk("TransfereeId", "ApplicationUsers", "Id"),
            Table::new(
                "HomeFindingProperties",
                Some("links properties and leases to orders"),
            )
            .fk("HomeFindingId", "Orders", "Id")
            .fk("HomeFindingId", "Homefindings", "Id")
            .fk("PropertyId", "Properties", "Id"),
            Table::new("Leases", Some("leasing property information"))
                .fk("PropertyId", "Properties", "Id")
                .fk("PropertyId", "HomeFindingProperties", "PropertyId")
                .note("has no direct relationship with Orders"),
            Table::new("Properties", Some("properties information"))
                .note("has no direct relationship with Orders"),
            Table::new("Tasks", Some("tasks information"))
                .fk("OrderId", "Orders", "Id")
                .fk("TaskTypeId", "TaskTypes", "Id"),
            Table::new("TaskTypes", Some("task types information")),
            Table::new("AccountPayables", None)
                .fk("OrderTransactionSummaryId", "Orders", "Id")
                .note("approval is indicated by StatusId, never IsApproved; StatusId = 2 means approved"),
            Table::new("AccountReceivables", None).fk("OrderTransactionSummaryId", "Orders", "Id"),
        ];

        let join_templates = vec![
            JoinTemplate {
                table: "Leases".to_string(),
                hops: vec![
                    (
                        "Properties".to_string(),
                        "Leases.PropertyId = Properties.Id".to_string(),
                    ),
                    (
                        "HomeFindingProperties".to_string(),
                        "Properties.Id = HomeFindingProperties.PropertyId".to_string(),
                    ),
                    (
                        "Orders".to_string(),
                        "HomeFindingProperties.HomeFindingId = Orders.Id".to_string(),
                    ),
                ],
                invalid_shortcut: Some("Leases.PropertyId = Orders.Id".to_string()),
            },
            JoinTemplate {
                table: "Properties".to_string(),
                hops: vec![
                    (
                        "HomeFindingProperties".to_string(),
                        "Properties.Id = HomeFindingProperties.PropertyId".to_string(),
                    ),
                    (
                        "Orders".to_string(),
                        "HomeFindingProperties.HomeFindingId = Orders.Id".to_string(),
                    ),
                ],
                invalid_shortcut: None,
            },
        ];

        Self::new("Orders", "ServiceTeamId", tables, join_templates)
            .expect("standard schema graph should be valid")
    }

    pub fn fact_table(&self) -> &str {
        &self.fact_table
    }

    pub fn partition_column(&self) -> &str {
        &self.partition_column
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn join_templates(&self) -> &[JoinTemplate] {
        &self.join_templates
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Case-insensitive lookup returning the canonical table.
    pub fn table(&self, name: &str) -> Option<&Table> {
        let name = name.trim().trim_matches('"');
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Join hops from `table` to the fact table, treating keys as undirected edges.
    pub fn hops_to_fact(&self, table: &str) -> Option<usize> {
        let start = self.table(table)?.name.clone();
        let adjacency = self.adjacency();
        let mut seen = BTreeMap::from([(start.clone(), 0usize)]);
        let mut queue = VecDeque::from([start]);
        while let Some(current) = queue.pop_front() {
            let depth = seen[&current];
            if current == self.fact_table {
                return Some(depth);
            }
            for next in adjacency.get(&current).into_iter().flatten() {
                if !seen.contains_key(next) {
                    seen.insert(next.clone(), depth + 1);
                    queue.push_back(next.clone());
                }
            }
        }
        None
    }

    fn adjacency(&self) -> BTreeMap<String, Vec<String>> {
        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for table in &self.tables {
            for fk in &table.foreign_keys {
                adjacency
                    .entry(table.name.clone())
                    .or_default()
                    .push(fk.references_table.clone());
                adjacency
                    .entry(fk.references_table.clone())
                    .or_default()
                    .push(table.name.clone());
            }
        }
        adjacency
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if self.table(&self.fact_table).is_none() {
            return Err(SchemaError::MissingFactTable(self.fact_table.clone()));
        }
        for table in &self.tables {
            for fk in &table.foreign_keys {
                if self.table(&fk.references_table).is_none() {
                    return Err(SchemaError::UnknownReference {
                        table: table.name.clone(),
                        references: fk.references_table.clone(),
                    });
                }
            }
        }
        for table in &self.tables {
            match self.hops_to_fact(&table.name) {
                Some(hops) if hops <= MAX_JOIN_HOPS => {}
                _ => {
                    return Err(SchemaError::Unreachable {
                        table: table.name.clone(),
                        fact_table: self.fact_table.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Table and relationship section of the agent instruction.
    pub fn describe(&self, filter_fragment: &str) -> String {
        let mut out = String::from("The following are the available tables and their relationships:\n");
        for table in &self.tables {
            out.push_str(&format!("\n**{} Table:**", table.name));
            if let Some(description) = &table.description {
                out.push_str(&format!(" ({description})"));
            }
            out.push('\n');
            out.push_str(&format!("    - Primary Key: [{}]\n", table.primary_key));
            for fk in &table.foreign_keys {
                out.push_str(&format!(
                    "    - Foreign Key: [{}] (referencing [{}] in the {} table)\n",
                    fk.column, fk.references_column, fk.references_table
                ));
            }
            if table.name == self.fact_table {
                out.push_str(&format!(
                    "    - Field: [{}] (must be filtered as `{filter_fragment}` in queries)\n",
                    self.partition_column
                ));
            }
            for note in &table.notes {
                out.push_str(&format!("    - Note: {note}\n"));
            }
            for template in self.join_templates.iter().filter(|t| t.table == table.name) {
                out.push_str(&format!(
                    "    - Required join sequence: `{}`\n",
                    template.render()
                ));
                if let Some(shortcut) = &template.invalid_shortcut {
                    out.push_str(&format!("    - This is not a valid join: `{shortcut}`\n"));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_graph_reaches_every_table_within_two_hops() {
        let graph = SchemaGraph::standard();
        assert_eq!(graph.tables().len(), 12);
        for name in graph.table_names() {
            let hops = graph.hops_to_fact(name).expect("reachable");
            assert!(hops <= MAX_JOIN_HOPS, "{name} needs {hops} hops");
        }
        assert_eq!(graph.hops_to_fact("Orders"), Some(0));
        assert_eq!(graph.hops_to_fact("Pets"), Some(1));
        assert_eq!(graph.hops_to_fact("Leases"), Some(2));
        assert_eq!(graph.hops_to_fact("Properties"), Some(2));
    }

    #[test]
    fn lookup_is_case_insensitive_and_ignores_quotes() {
        let graph = SchemaGraph::standard();
        assert_eq!(graph.table("orders").map(|t| t.name.as_str()), Some("Orders"));
        assert_eq!(
            graph.table("\"TaskTypes\"").map(|t| t.name.as_str()),
            Some("TaskTypes")
        );
        assert!(graph.table("Invoices").is_none());
    }

    #[test]
    fn unreachable_table_is_rejected() {
        let tables = vec![
            Table::new("Orders", None),
            Table::new("A", None).fk("BId", "B", "Id"),
            Table::new("B", None).fk("CId", "C", "Id"),
            Table::new("C", None).fk("OrderId", "Orders", "Id"),
        ];
        let err = SchemaGraph::new("Orders", "ServiceTeamId", tables, Vec::new()).unwrap_err();
        assert_eq!(
            err,
            SchemaError::Unreachable {
                table: "A".to_string(),
                fact_table: "Orders".to_string()
            }
        );
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let tables = vec![
            Table::new("Orders", None),
            Table::new("Pets", None).fk("OwnerId", "Owners", "Id"),
        ];
        let err = SchemaGraph::new("Orders", "ServiceTeamId", tables, Vec::new()).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownReference { .. }));
    }

    #[test]
    fn description_carries_filter_and_join_templates() {
        let graph = SchemaGraph::standard();
        let text = graph.describe("ServiceTeamId IN (101,205)");
        assert!(text.contains("must be filtered as `ServiceTeamId IN (101,205)`"));
        assert!(text.contains(
            "Leases → Properties (Leases.PropertyId = Properties.Id) → HomeFindingProperties"
        ));
        assert!(text.contains("This is not a valid join: `Leases.PropertyId = Orders.Id`"));
        assert!(text.contains("StatusId = 2 means approved"));
    }
}
