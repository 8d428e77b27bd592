//! Tools for inspecting the structure of serialized documents.
//! Useful for debugging identity assignment and post-processing output.

use serde::Serialize;

use crate::archive::xml;
use crate::error::Result;

/// A structural report of a serialized document.
#[derive(Debug, Serialize)]
pub struct DebugReport {
    /// The archive-type attribute of the document root.
    pub archive_type: String,
    /// Format version.
    pub version: String,
    /// Total number of nodes in the document.
    pub node_count: usize,
    /// Number of reference nodes (shared values emitted once).
    pub reference_count: usize,
    /// Number of slice nodes produced by post-processing.
    pub slice_count: usize,
    /// The node trees under the data element, one per archived root.
    pub roots: Vec<NodeInfo>,
}

/// Metadata for a single node in the document.
#[derive(Debug, Serialize)]
pub struct NodeInfo {
    /// The element name (the node's kind tag or primitive type).
    pub element: String,
    /// The node's scope-unique key.
    pub key: Option<String>,
    /// The node's run-unique id.
    pub id: Option<u64>,
    /// The declared or runtime type, where the node carries one.
    pub type_name: Option<String>,
    /// Child nodes.
    pub children: Vec<NodeInfo>,
}

/// The document inspector.
#[derive(Debug)]
pub struct DocumentInspector;

impl DocumentInspector {
    /// Analyzes serialized document bytes and returns a structural report.
    pub fn inspect(data: &[u8]) -> Result<DebugReport> {
        let (archive_type, version, tree) = xml::parse_document(data)?;

        let roots: Vec<NodeInfo> = tree.children.iter().map(Self::inspect_node).collect();
        let mut node_count = 0;
        let mut reference_count = 0;
        let mut slice_count = 0;
        for root in &roots {
            Self::tally(root, &mut node_count, &mut reference_count, &mut slice_count);
        }

        Ok(DebugReport {
            archive_type,
            version,
            node_count,
            reference_count,
            slice_count,
            roots,
        })
    }

    fn inspect_node(el: &xml::Element) -> NodeInfo {
        NodeInfo {
            element: el.name.clone(),
            key: el.attr("key").map(str::to_string),
            id: el.attr("id").and_then(|v| v.parse().ok()),
            type_name: el
                .attr("runtimeType")
                .or_else(|| el.attr("type"))
                .map(str::to_string),
            children: el.children.iter().map(Self::inspect_node).collect(),
        }
    }

    fn tally(node: &NodeInfo, nodes: &mut usize, references: &mut usize, slices: &mut usize) {
        *nodes += 1;
        if node.element == "reference" {
            *references += 1;
        }
        if node.element == "slice" {
            *slices += 1;
        }
        for child in &node.children {
            Self::tally(child, nodes, references, slices);
        }
    }
}

impl std::fmt::Display for DebugReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== DOCUMENT INSPECTOR REPORT ===")?;
        writeln!(f, "Archive Type: {}", self.archive_type)?;
        writeln!(f, "Version:      {}", self.version)?;
        writeln!(
            f,
            "Nodes: {} | References: {} | Slices: {}",
            self.node_count, self.reference_count, self.slice_count
        )?;
        writeln!(f, "\n[DOCUMENT LAYOUT]")?;
        for (i, root) in self.roots.iter().enumerate() {
            root.fmt_recursive(f, "", i == self.roots.len() - 1)?;
        }
        Ok(())
    }
}

impl NodeInfo {
    fn fmt_recursive(
        &self,
        f: &mut std::fmt::Formatter<'_>,
        prefix: &str,
        is_last: bool,
    ) -> std::fmt::Result {
        let connector = if is_last { "└── " } else { "├── " };
        let child_prefix = if is_last { "    " } else { "│   " };
        let id = self
            .id
            .map(|id| format!(" id={id}"))
            .unwrap_or_default();
        let key = self
            .key
            .as_deref()
            .map(|k| format!(" key={k}"))
            .unwrap_or_default();
        let ty = self
            .type_name
            .as_deref()
            .map(|t| format!(" [{t}]"))
            .unwrap_or_default();

        writeln!(f, "{prefix}{connector}{}{key}{id}{ty}", self.element)?;

        for (i, child) in self.children.iter().enumerate() {
            let is_last_child = i == self.children.len() - 1;
            child.fmt_recursive(f, &format!("{prefix}{child_prefix}"), is_last_child)?;
        }
        Ok(())
    }
}
