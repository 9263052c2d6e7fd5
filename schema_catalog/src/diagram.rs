//! Render-agnostic diagram descriptor
//!
//! Tables are ranked by longest path from a root; a root is a table with no
//! incoming relationship at or above the confidence floor. The descriptor is
//! rebuilt from the current tables and relationships on every request.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::types::{Cardinality, Relationship, RelationshipKind, Table};
use crate::config::DiagramConfig;

/// A column as shown on a table node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramColumn {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramNode {
    /// Qualified table name
    pub id: String,
    pub label: String,
    pub layer: usize,
    pub columns: Vec<DiagramColumn>,
    /// Active columns left out by the display cap
    pub hidden_columns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagramEdge {
    /// Referenced table and column
    pub parent_table: String,
    pub parent_column: String,
    /// Referencing table and column
    pub child_table: String,
    pub child_column: String,
    pub kind: RelationshipKind,
    pub confidence: f64,
    /// Drives the crow's-foot ends of the edge
    pub cardinality: Cardinality,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Diagram {
    pub nodes: Vec<DiagramNode>,
    pub edges: Vec<DiagramEdge>,
    /// Node ids per layer, top to bottom
    pub layers: Vec<Vec<String>>,
}

/// Longest-path layering over parent -> child edges. Cycles are broken by
/// promoting the smallest remaining table name to a root.
fn assign_layers(ids: &BTreeSet<String>, edges: &BTreeSet<(String, String)>) -> BTreeMap<String, usize> {
    let mut incoming: BTreeMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut outgoing: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (parent, child) in edges {
        if let Some(n) = incoming.get_mut(child.as_str()) {
            *n += 1;
        }
        outgoing.entry(parent.as_str()).or_default().push(child.as_str());
    }

    let mut layers: BTreeMap<String, usize> = BTreeMap::new();
    let mut depth: BTreeMap<&str, usize> = ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut remaining: BTreeSet<&str> = ids.iter().map(String::as_str).collect();

    while !remaining.is_empty() {
        let mut ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| incoming.get(id).copied().unwrap_or(0) == 0)
            .collect();
        if ready.is_empty() {
            // Cycle: promote the smallest name, placing it below its placed parents
            if let Some(&first) = remaining.iter().next() {
                ready.push(first);
            }
        }

        for id in ready {
            remaining.remove(id);
            let layer = depth.get(id).copied().unwrap_or(0);
            layers.insert(id.to_string(), layer);
            for &child in outgoing.get(id).map(Vec::as_slice).unwrap_or(&[]) {
                if !remaining.contains(child) {
                    continue;
                }
                if let Some(d) = depth.get_mut(child) {
                    *d = (*d).max(layer + 1);
                }
                if let Some(n) = incoming.get_mut(child) {
                    *n = n.saturating_sub(1);
                }
            }
        }
    }

    layers
}

/// Build the descriptor from the current tables and relationships
pub fn build(tables: &[Table], relationships: &[Relationship], config: &DiagramConfig) -> Diagram {
    let ids: BTreeSet<String> = tables.iter().map(|t| t.qualified_name.clone()).collect();

    let layering_edges: BTreeSet<(String, String)> = relationships
        .iter()
        .filter(|r| r.confidence >= config.confidence_floor)
        .filter(|r| r.parent.table != r.child.table)
        .filter(|r| ids.contains(&r.parent.table) && ids.contains(&r.child.table))
        .map(|r| (r.parent.table.clone(), r.child.table.clone()))
        .collect();

    let layer_of = assign_layers(&ids, &layering_edges);

    let mut nodes: Vec<DiagramNode> = tables
        .iter()
        .map(|table| {
            let active: Vec<_> = table.active_columns().collect();
            let shown = active.len().min(config.max_columns);
            DiagramNode {
                id: table.qualified_name.clone(),
                label: table.name.clone(),
                layer: layer_of.get(&table.qualified_name).copied().unwrap_or(0),
                columns: active[..shown]
                    .iter()
                    .map(|c| DiagramColumn {
                        name: c.name.clone(),
                        data_type: c.data_type.clone(),
                        is_primary_key: c.is_primary_key,
                    })
                    .collect(),
                hidden_columns: active.len() - shown,
            }
        })
        .collect();
    nodes.sort_by(|a, b| a.layer.cmp(&b.layer).then_with(|| a.id.cmp(&b.id)));

    let mut layers: Vec<Vec<String>> = Vec::new();
    for node in &nodes {
        if layers.len() <= node.layer {
            layers.resize(node.layer + 1, Vec::new());
        }
        layers[node.layer].push(node.id.clone());
    }

    let edges = relationships
        .iter()
        .map(|r| DiagramEdge {
            parent_table: r.parent.table.clone(),
            parent_column: r.parent.column.clone(),
            child_table: r.child.table.clone(),
            child_column: r.child.column.clone(),
            kind: r.kind,
            confidence: r.confidence,
            cardinality: r.cardinality,
        })
        .collect();

    Diagram {
        nodes,
        edges,
        layers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::{Column, Endpoint, TableDescriptor};
    use pretty_assertions::assert_eq;

    fn table(name: &str, columns: usize) -> Table {
        let mut t = Table::new(
            "db",
            "db",
            &TableDescriptor { schema: "s".into(), name: name.into(), estimated_rows: None },
        );
        for i in 0..columns {
            t.add_column(Column::new(&format!("c{}", i), "integer"));
        }
        t
    }

    fn rel(parent: &str, child: &str, confidence: f64) -> Relationship {
        let p = Endpoint::new(&format!("db.s.{}", parent), "id");
        let c = Endpoint::new(&format!("db.s.{}", child), &format!("{}_id", parent));
        let (left, right) = crate::relationships::canonical_pair(&p, &c);
        Relationship {
            left,
            right,
            kind: RelationshipKind::NamingMatch,
            confidence,
            child: c,
            parent: p,
            cardinality: Cardinality::ManyToOne,
            evidence: vec![],
        }
    }

    fn layer(diagram: &Diagram, name: &str) -> usize {
        diagram
            .nodes
            .iter()
            .find(|n| n.label == name)
            .map(|n| n.layer)
            .unwrap()
    }

    #[test]
    fn test_longest_path_layering() {
        let tables = vec![table("customers", 2), table("orders", 2), table("lines", 2), table("products", 2)];
        let rels = vec![
            rel("customers", "orders", 1.0),
            rel("orders", "lines", 1.0),
            rel("products", "lines", 1.0),
            rel("customers", "lines", 0.9),
        ];
        let diagram = build(&tables, &rels, &DiagramConfig::default());

        assert_eq!(layer(&diagram, "customers"), 0);
        assert_eq!(layer(&diagram, "products"), 0);
        assert_eq!(layer(&diagram, "orders"), 1);
        assert_eq!(layer(&diagram, "lines"), 2);
        assert_eq!(diagram.layers.len(), 3);
        assert_eq!(diagram.layers[0], vec!["db.s.customers".to_string(), "db.s.products".to_string()]);
        assert_eq!(diagram.edges.len(), 4);
        assert!(diagram.edges.iter().all(|e| e.cardinality == Cardinality::ManyToOne));
    }

    #[test]
    fn test_edges_below_floor_do_not_layer() {
        let tables = vec![table("customers", 1), table("orders", 1)];
        let rels = vec![rel("customers", "orders", 0.3)];
        let diagram = build(&tables, &rels, &DiagramConfig::default());

        assert_eq!(layer(&diagram, "orders"), 0);
        assert_eq!(diagram.edges.len(), 1);
    }

    #[test]
    fn test_cycle_is_broken() {
        let tables = vec![table("a", 1), table("b", 1), table("c", 1)];
        let rels = vec![rel("a", "b", 1.0), rel("b", "c", 1.0), rel("c", "a", 1.0)];
        let diagram = build(&tables, &rels, &DiagramConfig::default());

        assert_eq!(layer(&diagram, "a"), 0);
        assert_eq!(layer(&diagram, "b"), 1);
        assert_eq!(layer(&diagram, "c"), 2);
    }

    #[test]
    fn test_column_cap() {
        let tables = vec![table("wide", 14)];
        let diagram = build(&tables, &[], &DiagramConfig::default());

        assert_eq!(diagram.nodes[0].columns.len(), 10);
        assert_eq!(diagram.nodes[0].hidden_columns, 4);
        assert_eq!(diagram.nodes[0].columns[0].name, "c0");
    }
}
