// src/component.rs

//! Component discovery over an extracted course export.
//!
//! A course export is a root `manifest.xml` plus one component directory
//! per exported object, named `{timestamp}__{installation}__{type}_{id}`.
//! The scanner turns each directory into a [`ParsedComponent`]: the narrow
//! contract the mapper and resolver consume. Rich per-type field extraction
//! (question banks, forum threads, wiki pages) lives outside this crate;
//! everything beyond id/title/type travels in the opaque metadata map.

use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Root manifest of a course export
#[derive(Debug, Clone, Default)]
pub struct ExportManifest {
    pub title: String,
    pub main_entity: String,
    pub installation_id: String,
    pub installation_url: String,
    /// `ExportSet` path attributes, relative to the export root
    pub export_sets: Vec<String>,
}

/// Raw member reference inside an item group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMemberRef {
    pub item_id: String,
    pub group_id: Option<String>,
    pub title: Option<String>,
    pub member_type: Option<String>,
}

/// A discovered course component.
///
/// `id`, `title` and `component_type` are the required contract fields;
/// everything else is best-effort passthrough.
#[derive(Debug, Clone)]
pub struct ParsedComponent {
    pub id: String,
    pub title: String,
    /// Source object-type tag from the directory name or manifest
    pub component_type: String,
    pub path: PathBuf,
    /// Opaque per-type fields (description, behaviour flags, ...)
    pub metadata: BTreeMap<String, String>,
    /// Member references, populated for item-group components only
    pub members: Vec<GroupMemberRef>,
}

impl ParsedComponent {
    pub fn is_item_group(&self) -> bool {
        self.component_type == "itgr"
    }
}

/// Scanner for an extracted export root (the directory holding the
/// root manifest).
pub struct ComponentScanner {
    export_root: PathBuf,
}

impl ComponentScanner {
    pub fn new(export_root: impl Into<PathBuf>) -> Self {
        Self {
            export_root: export_root.into(),
        }
    }

    /// Parse the root manifest and discover all components.
    ///
    /// Failures at component granularity degrade to a warning; only a
    /// missing or unreadable root manifest is fatal.
    pub fn scan(&self) -> Result<(ExportManifest, Vec<ParsedComponent>)> {
        let manifest_path = self.export_root.join("manifest.xml");
        if !manifest_path.is_file() {
            return Err(Error::MissingCriticalFile(manifest_path.display().to_string()));
        }
        let manifest = parse_export_manifest(&manifest_path)?;
        info!(course = %manifest.title, sets = manifest.export_sets.len(), "scanning export");

        let mut component_dirs: Vec<PathBuf> = manifest
            .export_sets
            .iter()
            .map(|set| self.export_root.join(set))
            .filter(|p| p.is_dir())
            .collect();

        if component_dirs.is_empty() {
            // No usable ExportSet entries; fall back to directory naming.
            component_dirs = self.scan_for_component_dirs();
        }
        if component_dirs.is_empty() {
            warn!(root = %self.export_root.display(), "no component directories found");
        }

        let mut components = Vec::new();
        for dir in component_dirs {
            match parse_component(&dir) {
                Some(component) => {
                    debug!(
                        id = %component.id,
                        kind = %component.component_type,
                        title = %component.title,
                        "component discovered"
                    );
                    components.push(component);
                }
                None => warn!(dir = %dir.display(), "component directory not recognized"),
            }
        }
        Ok((manifest, components))
    }

    fn scan_for_component_dirs(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.export_root) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.is_dir()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.contains("__") && n.contains('_'))
            })
            .collect();
        dirs.sort();
        dirs
    }
}

/// Parse the root manifest document of a course export.
pub fn parse_export_manifest(path: &Path) -> Result<ExportManifest> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content).map_err(|e| Error::malformed(path, e))
}

fn parse_manifest_str(xml: &str) -> std::result::Result<ExportManifest, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut manifest = ExportManifest::default();
    let mut saw_root = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                if !saw_root {
                    saw_root = true;
                    for attr in e.attributes() {
                        let attr = attr?;
                        let value = attr.unescape_value()?.into_owned();
                        match attr.key.local_name().as_ref() {
                            b"Title" => manifest.title = value,
                            b"MainEntity" => manifest.main_entity = value,
                            b"InstallationId" => manifest.installation_id = value,
                            b"InstallationUrl" => manifest.installation_url = value,
                            _ => {}
                        }
                    }
                } else if e.local_name().as_ref() == b"ExportSet" {
                    for attr in e.attributes() {
                        let attr = attr?;
                        if attr.key.local_name().as_ref() == b"Path" {
                            manifest
                                .export_sets
                                .push(attr.unescape_value()?.into_owned());
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(manifest)
}

/// Build a [`ParsedComponent`] from a component directory.
///
/// Type and id come from the directory name, refined by the component's own
/// `manifest.xml`; the title is refined from the first `Title` element of a
/// discovered `export.xml`. Item-group components additionally get their
/// member references parsed.
fn parse_component(dir: &Path) -> Option<ParsedComponent> {
    let name = dir.file_name()?.to_str()?;

    // {timestamp}__{installation}__{type}_{id}
    let (mut component_type, mut id) = (String::new(), String::new());
    let parts: Vec<&str> = name.split("__").collect();
    if parts.len() >= 3 {
        if let Some((kind, obj_id)) = parts[2].split_once('_') {
            component_type = kind.to_string();
            id = obj_id.to_string();
        } else {
            component_type = parts[2].to_string();
        }
    }

    let mut title = String::new();
    let manifest_path = dir.join("manifest.xml");
    if manifest_path.is_file() {
        match parse_export_manifest(&manifest_path) {
            Ok(manifest) => {
                if !manifest.main_entity.is_empty() {
                    component_type = manifest.main_entity;
                }
                if !manifest.title.is_empty() {
                    title = manifest.title;
                }
            }
            Err(e) => warn!(manifest = %manifest_path.display(), error = %e, "unreadable component manifest"),
        }
    }

    if component_type.is_empty() {
        return None;
    }

    let export_xml = find_export_xml(dir);
    if title.is_empty()
        && let Some(export_xml) = &export_xml
        && let Some(found) = first_title_element(export_xml)
    {
        title = found;
    }

    let mut component = ParsedComponent {
        id,
        title,
        component_type,
        path: dir.to_path_buf(),
        metadata: BTreeMap::new(),
        members: Vec::new(),
    };

    if component.is_item_group()
        && let Some(export_xml) = &export_xml
    {
        match parse_item_group_records(export_xml) {
            Ok(records) => {
                if let Some(group_id) = records.fields.get("id")
                    && !group_id.is_empty()
                {
                    component.id = group_id.clone();
                }
                if let Some(group_title) = records.fields.get("title")
                    && !group_title.is_empty()
                {
                    component.title = group_title.clone();
                }
                component.metadata = records.fields;
                component.members = records.members;
            }
            Err(e) => {
                warn!(export = %export_xml.display(), error = %e, "item-group records not parseable");
            }
        }
    }

    Some(component)
}

fn find_export_xml(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .find(|e| e.file_type().is_file() && e.file_name().to_str() == Some("export.xml"))
        .map(|e| e.into_path())
}

/// Extract the text of the first `Title` element in a document.
fn first_title_element(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    let mut reader = Reader::from_str(&content);
    reader.trim_text(true);

    let mut in_title = false;
    loop {
        match reader.read_event().ok()? {
            Event::Start(e) if e.local_name().as_ref() == b"Title" => in_title = true,
            Event::Text(t) if in_title => {
                let text = t.unescape().ok()?.into_owned();
                if !text.is_empty() {
                    return Some(text);
                }
            }
            Event::End(e) if e.local_name().as_ref() == b"Title" => in_title = false,
            Event::Eof => return None,
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
struct ItemGroupRecords {
    fields: BTreeMap<String, String>,
    members: Vec<GroupMemberRef>,
}

/// Parse the DataSet records of an item-group export document.
///
/// Group fields live in `Rec Entity="itgr"` under an `Itgr` element;
/// member references in `Rec Entity="itgr_item"` under `ItgrItem` with
/// `ItemId` and `ItgrId` children.
fn parse_item_group_records(path: &Path) -> Result<ItemGroupRecords> {
    let content = fs::read_to_string(path)?;
    parse_item_group_str(&content).map_err(|e| Error::malformed(path, e))
}

fn parse_item_group_str(xml: &str) -> std::result::Result<ItemGroupRecords, quick_xml::Error> {
    #[derive(PartialEq)]
    enum Section {
        None,
        Group,
        Member,
    }

    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = ItemGroupRecords::default();
    let mut section = Section::None;
    let mut field: Option<String> = None;
    let mut member_item_id = String::new();
    let mut member_group_id = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = e.local_name().as_ref().to_vec();
                match local.as_slice() {
                    b"Rec" => {
                        for attr in e.attributes() {
                            let attr = attr?;
                            if attr.key.local_name().as_ref() == b"Entity" {
                                section = match attr.unescape_value()?.as_ref() {
                                    "itgr" => Section::Group,
                                    "itgr_item" => Section::Member,
                                    _ => Section::None,
                                };
                            }
                        }
                    }
                    b"ItgrItem" if section == Section::Member => {
                        member_item_id.clear();
                        member_group_id.clear();
                    }
                    name => {
                        if section != Section::None {
                            field = std::str::from_utf8(name).ok().map(str::to_string);
                        }
                    }
                }
            }
            Event::Text(t) => {
                if let Some(name) = &field {
                    let value = t.unescape()?.into_owned();
                    match section {
                        Section::Group => {
                            records.fields.insert(name.to_ascii_lowercase(), value);
                        }
                        Section::Member => match name.as_str() {
                            "ItemId" => member_item_id = value,
                            "ItgrId" => member_group_id = value,
                            _ => {}
                        },
                        Section::None => {}
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"Rec" => section = Section::None,
                b"ItgrItem" => {
                    if !member_item_id.is_empty() {
                        records.members.push(GroupMemberRef {
                            item_id: std::mem::take(&mut member_item_id),
                            group_id: if member_group_id.is_empty() {
                                None
                            } else {
                                Some(std::mem::take(&mut member_group_id))
                            },
                            title: None,
                            member_type: None,
                        });
                    }
                }
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(records)
}
