// src/itemgroup.rs

//! Item-group resolution.
//!
//! Item groups reference course items by id without owning them. Before
//! mapping, each member reference is dereferenced to a concrete item. The
//! resolution ladder goes from richest to poorest source: the container
//! tree, the flat component list, the raw reference itself, and finally a
//! placeholder of type `unknown`. Resolution never fails; an unresolvable
//! reference still yields a best-effort item so the mapper can place
//! something visible in the output.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::component::{GroupMemberRef, ParsedComponent};
use crate::container::ContainerTree;

/// A dereferenced item-group member
#[derive(Debug, Clone)]
pub struct ResolvedItem {
    pub item_id: String,
    pub ref_id: Option<String>,
    pub title: String,
    pub item_type: String,
    /// Directory of the component backing this item, when known
    pub component_path: Option<PathBuf>,
    pub metadata: BTreeMap<String, String>,
}

/// Resolver over a parsed course snapshot
pub struct ItemGroupResolver<'a> {
    tree: Option<&'a ContainerTree>,
    components_by_id: HashMap<&'a str, &'a ParsedComponent>,
}

impl<'a> ItemGroupResolver<'a> {
    pub fn new(tree: Option<&'a ContainerTree>, components: &'a [ParsedComponent]) -> Self {
        let mut components_by_id = HashMap::new();
        for component in components {
            if !component.id.is_empty() {
                components_by_id.entry(component.id.as_str()).or_insert(component);
            }
        }
        Self {
            tree,
            components_by_id,
        }
    }

    /// Resolve every member reference of an item-group component.
    pub fn resolve(&self, group: &ParsedComponent) -> Vec<ResolvedItem> {
        if group.members.is_empty() {
            warn!(group = %group.title, "item group has no member references");
            return Vec::new();
        }

        debug!(group = %group.title, members = group.members.len(), "resolving item group");
        group
            .members
            .iter()
            .map(|member| self.resolve_member(member))
            .collect()
    }

    /// Resolve a single member reference, falling back gracefully.
    pub fn resolve_member(&self, member: &GroupMemberRef) -> ResolvedItem {
        // Richest source: the container tree carries ref id and type.
        if let Some(tree) = self.tree
            && let Some(item) = tree.get_by_item_id(&member.item_id)
        {
            let mut metadata = BTreeMap::new();
            metadata.insert("resolved_from".to_string(), "container".to_string());
            return ResolvedItem {
                item_id: member.item_id.clone(),
                ref_id: Some(item.ref_id.clone()),
                title: item.title.clone(),
                item_type: item.item_type.clone(),
                component_path: None,
                metadata,
            };
        }

        // Flat component list: type and path, no ref id.
        if let Some(component) = self.components_by_id.get(member.item_id.as_str()) {
            let mut metadata = component.metadata.clone();
            metadata.insert("resolved_from".to_string(), "component".to_string());
            return ResolvedItem {
                item_id: member.item_id.clone(),
                ref_id: None,
                title: component.title.clone(),
                item_type: component.component_type.clone(),
                component_path: Some(component.path.clone()),
                metadata,
            };
        }

        // Whatever the raw reference itself carries.
        if let Some(title) = member.title.as_deref().filter(|t| !t.is_empty()) {
            return ResolvedItem {
                item_id: member.item_id.clone(),
                ref_id: None,
                title: title.to_string(),
                item_type: member
                    .member_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                component_path: None,
                metadata: BTreeMap::new(),
            };
        }

        warn!(item_id = %member.item_id, "item-group member could not be resolved");
        ResolvedItem {
            item_id: member.item_id.clone(),
            ref_id: None,
            title: format!("Item {}", member.item_id),
            item_type: "unknown".to_string(),
            component_path: None,
            metadata: BTreeMap::new(),
        }
    }
}
