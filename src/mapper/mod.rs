// src/mapper/mod.rs

//! Structure mapping from the source hierarchy onto the target's flat
//! section/activity model.
//!
//! The target format knows exactly two structural levels, so deeper source
//! hierarchies are preserved visually: top-level folders become sections,
//! nested folders become label activities, and everything below gets an
//! indentation depth. Every mapping decision that loses information is
//! recorded as a warning on the resulting structure.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::component::ParsedComponent;
use crate::container::{ContainerItem, ContainerTree, NodeId};
use crate::itemgroup::ItemGroupResolver;

/// Source type tag → target module tag
pub const TYPE_MAPPING: &[(&str, &str)] = &[
    ("file", "resource"),
    ("fold", "folder"),
    ("tst", "quiz"),
    ("excex", "assign"),
    ("frm", "forum"),
    ("wiki", "wiki"),
    ("mcst", "resource"),
    ("webr", "url"),
    ("sahs", "scorm"),
    ("lm", "book"),
    ("htlm", "page"),
    ("glo", "glossary"),
    ("svy", "feedback"),
    ("poll", "choice"),
];

/// Look up the target module tag for a source type.
pub fn module_for_type(item_type: &str) -> Option<&'static str> {
    TYPE_MAPPING
        .iter()
        .find(|(source, _)| *source == item_type)
        .map(|(_, target)| *target)
}

/// One section of the target course
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetSection {
    pub section_id: u32,
    pub number: u32,
    pub name: String,
    pub summary: String,
    pub visible: bool,
    pub activities: Vec<TargetActivity>,
}

/// One activity of the target course.
///
/// `module_id` stays numerically equal to `activity_id`; downstream
/// consumers rely on that equality to cross-reference documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetActivity {
    pub activity_id: u32,
    pub module_id: u32,
    pub section_id: u32,
    /// Target module tag (resource, quiz, forum, label, ...)
    pub module_name: String,
    pub title: String,
    pub intro: String,
    pub visible: bool,
    /// Visual nesting depth for display
    pub indent: u32,
    pub source_type: Option<String>,
    pub source_id: Option<String>,
    pub source_ref_id: Option<String>,
}

/// Complete mapped course structure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStructure {
    pub course_title: String,
    pub sections: Vec<TargetSection>,
    pub warnings: Vec<String>,
}

impl TargetStructure {
    fn new(course_title: impl Into<String>) -> Self {
        Self {
            course_title: course_title.into(),
            sections: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        warn!(%warning, "mapping warning");
        self.warnings.push(warning);
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn activity_count(&self) -> usize {
        self.sections.iter().map(|s| s.activities.len()).sum()
    }

    pub fn get_section_by_id(&self, section_id: u32) -> Option<&TargetSection> {
        self.sections.iter().find(|s| s.section_id == section_id)
    }

    /// All activities in document order
    pub fn activities(&self) -> impl Iterator<Item = &TargetActivity> {
        self.sections.iter().flat_map(|s| s.activities.iter())
    }
}

/// Maps a container tree to a [`TargetStructure`].
///
/// Counters are instance fields, so every conversion run gets a fresh
/// mapper and id sequences never leak between runs.
pub struct StructureMapper<'a> {
    tree: Option<&'a ContainerTree>,
    components: &'a [ParsedComponent],
    next_section_id: u32,
    next_activity_id: u32,
    next_module_id: u32,
    /// Shared section for items that appear before any container does
    catchall: Option<usize>,
}

impl<'a> StructureMapper<'a> {
    pub fn new(tree: Option<&'a ContainerTree>, components: &'a [ParsedComponent]) -> Self {
        Self {
            tree,
            components,
            next_section_id: 1,
            next_activity_id: 1,
            next_module_id: 1,
            catchall: None,
        }
    }

    /// Map the container tree onto sections and activities.
    ///
    /// The structure always starts with the standing general section
    /// (id 0). Root children are walked at level 1; activity ordering
    /// follows document order of the source subtree.
    pub fn map(mut self) -> TargetStructure {
        let Some(tree) = self.tree else {
            let mut structure = TargetStructure::new("Unknown course");
            structure.add_warning("no container structure available for mapping");
            return structure;
        };

        let root = tree.root();
        let mut structure = TargetStructure::new(root.title.clone());
        info!(course = %root.title, "mapping course structure");

        structure.sections.push(TargetSection {
            section_id: 0,
            number: 0,
            name: "General".to_string(),
            summary: "General section".to_string(),
            visible: true,
            activities: Vec::new(),
        });

        for &child in &root.children {
            self.process_item(tree, child, &mut structure, 1, None);
        }

        info!(
            sections = structure.section_count(),
            activities = structure.activity_count(),
            warnings = structure.warnings.len(),
            "mapping complete"
        );
        structure
    }

    /// Recursive walk. `level` is 1 for root children; `current` indexes
    /// the section that activities at this point belong to.
    fn process_item(
        &mut self,
        tree: &ContainerTree,
        node: NodeId,
        structure: &mut TargetStructure,
        level: u32,
        current: Option<usize>,
    ) {
        let item = tree.node(node).clone();
        let indent = level.saturating_sub(1);
        debug!(title = %item.title, kind = %item.item_type, level, "processing item");

        match item.item_type.as_str() {
            "fold" if level == 1 => {
                let section = self.push_section(
                    structure,
                    &item.title,
                    format!("From ILIAS folder '{}'", item.title),
                    !item.offline,
                );
                for &child in &item.children {
                    self.process_item(tree, child, structure, 2, Some(section));
                }
            }
            "fold" => {
                let section = current.unwrap_or_else(|| {
                    warn!(folder = %item.title, "nested folder without a section");
                    self.push_section(
                        structure,
                        &item.title,
                        "From a nested ILIAS folder".to_string(),
                        true,
                    )
                });
                let label = self.label_activity(&item, structure.sections[section].section_id, indent);
                structure.sections[section].activities.push(label);
                for &child in &item.children {
                    self.process_item(tree, child, structure, level + 1, Some(section));
                }
            }
            "itgr" => self.process_item_group(tree, &item, structure, level, current),
            "mob" => {
                // Media objects never warrant a section of their own.
                debug!(title = %item.title, "dropping media object");
            }
            kind if module_for_type(kind).is_some() => {
                let section = match current {
                    Some(section) => section,
                    None => self.catchall_section(structure),
                };
                let activity =
                    self.activity_from_item(&item, structure.sections[section].section_id, indent);
                structure.sections[section].activities.push(activity);
            }
            kind => {
                structure.add_warning(format!(
                    "Unknown source type '{}' for item '{}' at level {}",
                    kind, item.title, level
                ));
            }
        }
    }

    fn process_item_group(
        &mut self,
        tree: &ContainerTree,
        item: &ContainerItem,
        structure: &mut TargetStructure,
        level: u32,
        current: Option<usize>,
    ) {
        let indent = level.saturating_sub(1);
        let section = if level == 1 {
            self.push_section(
                structure,
                &item.title,
                format!("From ILIAS item group '{}'", item.title),
                !item.offline,
            )
        } else {
            // Item groups below the top level become labels in whatever
            // section is in effect (the general section at worst).
            let section = current.unwrap_or(structure.sections.len() - 1);
            let label = self.label_activity(item, structure.sections[section].section_id, indent);
            structure.sections[section].activities.push(label);
            section
        };

        match self
            .components
            .iter()
            .find(|c| c.is_item_group() && c.id == item.item_id)
        {
            Some(group) => {
                let resolver = ItemGroupResolver::new(Some(tree), self.components);
                let resolved = resolver.resolve(group);
                info!(group = %item.title, resolved = resolved.len(), "item group resolved");

                let section_id = structure.sections[section].section_id;
                for member in resolved {
                    let mapped = tree
                        .get_by_item_id(&member.item_id)
                        .filter(|i| module_for_type(&i.item_type).is_some())
                        .cloned();
                    let activity = match mapped {
                        Some(container_item) => {
                            self.activity_from_item(&container_item, section_id, level)
                        }
                        // Keep unresolvable members visible as plain links.
                        None => {
                            let (activity_id, module_id) = self.next_activity_ids();
                            TargetActivity {
                                activity_id,
                                module_id,
                                section_id,
                                module_name: "url".to_string(),
                                title: member.title.clone(),
                                intro: format!(
                                    "Referenced item from item group (type: {})",
                                    member.item_type
                                ),
                                visible: true,
                                indent: level,
                                source_type: Some(member.item_type.clone()),
                                source_id: Some(member.item_id.clone()),
                                source_ref_id: member.ref_id.clone(),
                            }
                        }
                    };
                    structure.sections[section].activities.push(activity);
                }
            }
            None => {
                structure.add_warning(format!(
                    "No backing component found for item group '{}'",
                    item.title
                ));
            }
        }

        for &child in &item.children {
            self.process_item(tree, child, structure, level + 1, Some(section));
        }
    }

    /// Append a new section and return its index.
    fn push_section(
        &mut self,
        structure: &mut TargetStructure,
        name: &str,
        summary: String,
        visible: bool,
    ) -> usize {
        let section_id = self.next_section_id;
        self.next_section_id += 1;
        info!(section = name, id = section_id, "creating section");
        structure.sections.push(TargetSection {
            section_id,
            number: section_id,
            name: name.to_string(),
            summary,
            visible,
            activities: Vec::new(),
        });
        structure.sections.len() - 1
    }

    /// The shared section for items encountered before any container.
    fn catchall_section(&mut self, structure: &mut TargetStructure) -> usize {
        if let Some(section) = self.catchall {
            return section;
        }
        let section = self.push_section(
            structure,
            "Additional content",
            "Course content without a parent folder".to_string(),
            true,
        );
        self.catchall = Some(section);
        section
    }

    fn label_activity(&mut self, item: &ContainerItem, section_id: u32, indent: u32) -> TargetActivity {
        let (activity_id, module_id) = self.next_activity_ids();
        TargetActivity {
            activity_id,
            module_id,
            section_id,
            module_name: "label".to_string(),
            title: format!("--- {} ---", item.title),
            intro: format!("Subsection: {}", item.title),
            visible: !item.offline,
            indent,
            source_type: Some(item.item_type.clone()),
            source_id: Some(item.item_id.clone()),
            source_ref_id: Some(item.ref_id.clone()),
        }
    }

    fn activity_from_item(&mut self, item: &ContainerItem, section_id: u32, indent: u32) -> TargetActivity {
        let module_name = module_for_type(&item.item_type).unwrap_or("resource");
        let (activity_id, module_id) = self.next_activity_ids();
        TargetActivity {
            activity_id,
            module_id,
            section_id,
            module_name: module_name.to_string(),
            title: item.title.clone(),
            intro: format!("Converted from ILIAS {}", item.item_type),
            visible: !item.offline,
            indent,
            source_type: Some(item.item_type.clone()),
            source_id: Some(item.item_id.clone()),
            source_ref_id: Some(item.ref_id.clone()),
        }
    }

    /// Activity and module ids advance in lock-step and stay equal.
    fn next_activity_ids(&mut self) -> (u32, u32) {
        let ids = (self.next_activity_id, self.next_module_id);
        self.next_activity_id += 1;
        self.next_module_id += 1;
        ids
    }
}
