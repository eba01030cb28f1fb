// src/container/mod.rs

//! Container descriptor parsing.
//!
//! The source export describes the parent/child placement of all course
//! items in a nested XML document (`Services/Container/set_*/export.xml`).
//! This module parses that document into an arena-backed [`ContainerTree`]
//! with lookup indices by reference id and by item id. The tree is built
//! once and is read-only afterwards.

use crate::error::{Error, Result};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Index of a node inside its owning [`ContainerTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Availability window attached to a container item.
///
/// Only materialized when the descriptor carries at least one concrete
/// window bound; bare flag-only `Timing` elements are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timing {
    pub timing_type: String,
    pub visible: bool,
    /// Participants may shift the window themselves
    pub changeable: bool,
    pub start: Option<String>,
    pub end: Option<String>,
    pub suggestion_start: Option<String>,
    pub suggestion_end: Option<String>,
}

impl Timing {
    fn has_window(&self) -> bool {
        self.start.is_some()
            || self.end.is_some()
            || self.suggestion_start.is_some()
            || self.suggestion_end.is_some()
    }

    /// Whether only non-binding suggestion bounds are present
    pub fn has_suggestion(&self) -> bool {
        self.suggestion_start.is_some() || self.suggestion_end.is_some()
    }
}

/// One node of the source hierarchy
#[derive(Debug, Clone)]
pub struct ContainerItem {
    pub ref_id: String,
    pub item_id: String,
    pub title: String,
    /// Source object-type tag (`grp`, `fold`, `file`, `tst`, `itgr`, ...)
    pub item_type: String,
    /// Custom-styling id; `"0"` means default styling
    pub style: String,
    pub offline: bool,
    pub timing: Option<Timing>,
    pub children: Vec<NodeId>,
}

/// Immutable item hierarchy with dual lookup indices.
///
/// Nodes live in an arena in document order; children are referenced by
/// [`NodeId`]. Duplicate `ref_id`/`item_id` keys keep the item encountered
/// first in document order.
#[derive(Debug)]
pub struct ContainerTree {
    nodes: Vec<ContainerItem>,
    root: NodeId,
    by_ref_id: HashMap<String, NodeId>,
    by_item_id: HashMap<String, NodeId>,
}

impl ContainerTree {
    fn new(nodes: Vec<ContainerItem>, root: NodeId) -> Self {
        let mut tree = Self {
            nodes,
            root,
            by_ref_id: HashMap::new(),
            by_item_id: HashMap::new(),
        };
        tree.build_indices();
        tree
    }

    fn build_indices(&mut self) {
        // Arena order is document order, so entry().or_insert keeps the
        // first occurrence of a duplicated key.
        for (idx, item) in self.nodes.iter().enumerate() {
            if !item.ref_id.is_empty() {
                self.by_ref_id.entry(item.ref_id.clone()).or_insert(NodeId(idx));
            }
            if !item.item_id.is_empty() {
                self.by_item_id.entry(item.item_id.clone()).or_insert(NodeId(idx));
            }
        }
    }

    pub fn root(&self) -> &ContainerItem {
        &self.nodes[self.root.0]
    }

    pub fn node(&self, id: NodeId) -> &ContainerItem {
        &self.nodes[id.0]
    }

    pub fn get_by_ref_id(&self, ref_id: &str) -> Option<&ContainerItem> {
        self.by_ref_id.get(ref_id).map(|id| self.node(*id))
    }

    pub fn get_by_item_id(&self, item_id: &str) -> Option<&ContainerItem> {
        self.by_item_id.get(item_id).map(|id| self.node(*id))
    }

    /// All items in document order
    pub fn items(&self) -> impl Iterator<Item = &ContainerItem> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn item_index_len(&self) -> usize {
        self.by_item_id.len()
    }
}

/// Parser for the container descriptor of a component directory
pub struct ContainerTreeParser {
    component_path: PathBuf,
}

impl ContainerTreeParser {
    pub fn new(component_path: impl Into<PathBuf>) -> Self {
        Self {
            component_path: component_path.into(),
        }
    }

    /// Locate `Services/Container/set_*/export.xml` beneath the component.
    ///
    /// Set directories are visited in name order so the result is stable.
    fn find_descriptor(&self) -> Option<PathBuf> {
        let container_dir = self.component_path.join("Services").join("Container");
        let entries = fs::read_dir(&container_dir).ok()?;

        let mut set_dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with("set_"))
            })
            .collect();
        set_dirs.sort();

        for set_dir in set_dirs {
            let candidate = set_dir.join("export.xml");
            if candidate.is_file() {
                debug!(descriptor = %candidate.display(), "container descriptor found");
                return Some(candidate);
            }
        }
        None
    }

    /// Parse the component's container descriptor.
    ///
    /// Returns `Ok(None)` when the component has no container description;
    /// callers fall back to a flat, unordered item list in that case.
    pub fn parse(&self) -> Result<Option<ContainerTree>> {
        let Some(descriptor) = self.find_descriptor() else {
            warn!(
                component = %self.component_path.display(),
                "no container descriptor found"
            );
            return Ok(None);
        };

        let content = fs::read_to_string(&descriptor)?;
        let tree = parse_descriptor(&content)
            .map_err(|e| Error::malformed(&descriptor, e))?;

        if let Some(tree) = &tree {
            info!(
                items = tree.len(),
                root = %tree.root().title,
                "container structure parsed"
            );
        }
        Ok(tree)
    }
}

/// Parse a container descriptor document into a tree.
///
/// The first `Item` element is the root; every nested `Item` is a child of
/// its lexical parent. Element names are matched on their local name, so
/// namespace prefixes and default namespaces both work.
pub fn parse_descriptor(xml: &str) -> std::result::Result<Option<ContainerTree>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut nodes: Vec<ContainerItem> = Vec::new();
    let mut root: Option<NodeId> = None;
    let mut stack: Vec<NodeId> = Vec::new();
    let mut timing: Option<Timing> = None;
    let mut window_field: Option<Vec<u8>> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Item" => {
                    if let Some(id) = attach_item(&e, &mut nodes, &mut root, &stack)? {
                        stack.push(id);
                    } else {
                        // Orphan subtree; skip it by parsing to the matching end.
                        reader.read_to_end(e.name())?;
                    }
                }
                b"Timing" if !stack.is_empty() => {
                    timing = Some(parse_timing_attrs(&e)?);
                }
                name @ (b"Start" | b"End" | b"SuggestionStart" | b"SuggestionEnd")
                    if timing.is_some() =>
                {
                    window_field = Some(name.to_vec());
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"Item" => {
                    attach_item(&e, &mut nodes, &mut root, &stack)?;
                }
                // A self-closing Timing carries flags only, never a window.
                _ => {}
            },
            Event::Text(t) => {
                if let (Some(timing), Some(field)) = (timing.as_mut(), window_field.as_ref()) {
                    let value = t.unescape()?.into_owned();
                    match field.as_slice() {
                        b"Start" => timing.start = Some(value),
                        b"End" => timing.end = Some(value),
                        b"SuggestionStart" => timing.suggestion_start = Some(value),
                        b"SuggestionEnd" => timing.suggestion_end = Some(value),
                        _ => {}
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Item" => {
                    stack.pop();
                }
                b"Timing" => {
                    if let (Some(done), Some(&owner)) = (timing.take(), stack.last())
                        && done.has_window()
                    {
                        nodes[owner.0].timing = Some(done);
                    }
                }
                b"Start" | b"End" | b"SuggestionStart" | b"SuggestionEnd" => {
                    window_field = None;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(root.map(|root| ContainerTree::new(nodes, root)))
}

/// Create a node from an `Item` element and wire it to its lexical parent.
///
/// Returns `None` for items that have neither a parent nor a claim to the
/// root slot (the tree has exactly one root).
fn attach_item(
    e: &BytesStart<'_>,
    nodes: &mut Vec<ContainerItem>,
    root: &mut Option<NodeId>,
    stack: &[NodeId],
) -> std::result::Result<Option<NodeId>, quick_xml::Error> {
    let item = parse_item_attrs(e)?;

    match stack.last() {
        Some(&parent) => {
            let id = NodeId(nodes.len());
            nodes.push(item);
            nodes[parent.0].children.push(id);
            Ok(Some(id))
        }
        None if root.is_none() => {
            let id = NodeId(nodes.len());
            nodes.push(item);
            *root = Some(id);
            Ok(Some(id))
        }
        None => {
            warn!(title = %item.title, "ignoring item outside the root hierarchy");
            Ok(None)
        }
    }
}

fn parse_item_attrs(e: &BytesStart<'_>) -> std::result::Result<ContainerItem, quick_xml::Error> {
    let mut item = ContainerItem {
        ref_id: String::new(),
        item_id: String::new(),
        title: String::new(),
        item_type: "unknown".to_string(),
        style: "0".to_string(),
        offline: false,
        timing: None,
        children: Vec::new(),
    };

    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.local_name().as_ref() {
            b"RefId" => item.ref_id = value,
            b"Id" => item.item_id = value,
            b"Title" => item.title = value,
            b"Type" => item.item_type = value,
            b"Style" => item.style = value,
            b"Offline" => item.offline = value == "1",
            _ => {}
        }
    }
    Ok(item)
}

fn parse_timing_attrs(e: &BytesStart<'_>) -> std::result::Result<Timing, quick_xml::Error> {
    let mut timing = Timing::default();
    for attr in e.attributes() {
        let attr = attr?;
        let value = attr.unescape_value()?.into_owned();
        match attr.key.local_name().as_ref() {
            b"Type" => timing.timing_type = value,
            b"Visible" => timing.visible = value == "1",
            b"Changeable" => timing.changeable = value == "1",
            _ => {}
        }
    }
    Ok(timing)
}
