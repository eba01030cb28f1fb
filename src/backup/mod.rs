// src/backup/mod.rs

//! Backup archive generation.
//!
//! Serializes a [`TargetStructure`] into the target platform's backup
//! document tree inside a private scratch directory and packages it as a
//! zip. The manifest's `sectionid`/`moduleid` listings and the
//! per-directory descriptors' own `id` fields are generated from the same
//! structure values, so they always agree. Any write failure is fatal; a
//! partially written tree is never packaged.

pub mod xml;

use chrono::{Months, Utc};
use md5::{Digest, Md5};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};
use crate::mapper::{TargetActivity, TargetSection, TargetStructure};
use xml::{XmlDoc, empty_document};

const MOODLE_VERSION: &str = "2024100701.05";
const MOODLE_RELEASE: &str = "4.5.1+ (Build: 20250109)";
const BACKUP_VERSION: &str = "2010072300";
const BACKUP_RELEASE: &str = "2.0";
const DEFAULT_WWWROOT: &str = "http://course-export-converter";

/// Placeholder the restore pipeline expects for absent values
const NULL_VALUE: &str = "$@NULL@$";

/// Module types that get a type-specific descriptor document
const TYPED_DESCRIPTORS: &[&str] = &["resource", "forum", "quiz", "folder"];

/// Always-present root documents and their root elements
const ROOT_DOCUMENTS: &[(&str, &str)] = &[
    ("files.xml", "files"),
    ("scales.xml", "scales"),
    ("outcomes.xml", "outcomes"),
    ("questions.xml", "question_categories"),
    ("groups.xml", "groups"),
    ("gradebook.xml", "gradebook"),
    ("grade_history.xml", "grade_history"),
    ("completion.xml", "completions"),
    ("badges.xml", "badges"),
];

/// Always-present course documents and their root elements
const COURSE_DOCUMENTS: &[(&str, &str)] = &[
    ("filters.xml", "filters"),
    ("comments.xml", "comments"),
    ("completiondefaults.xml", "course_completion_defaults"),
    ("contentbank.xml", "contentbank"),
    ("logstores.xml", "logstores"),
    ("competencies.xml", "competencies"),
    ("loglastaccess.xml", "loglastaccesses"),
    ("roles.xml", "roles"),
    ("calendar.xml", "calendar"),
    ("enrolments.xml", "enrolments"),
    ("logs.xml", "logs"),
    ("inforef.xml", "inforef"),
];

/// Always-present per-activity documents and their root elements
const ACTIVITY_DOCUMENTS: &[(&str, &str)] = &[
    ("grades.xml", "activity_gradebook"),
    ("roles.xml", "roles"),
    ("grading.xml", "activity_gradebook"),
    ("filters.xml", "filters"),
    ("comments.xml", "comments"),
    ("completion.xml", "completions"),
    ("logstores.xml", "logstores"),
    ("competencies.xml", "competencies"),
    ("grade_history.xml", "grade_history"),
    ("calendar.xml", "calendar"),
    ("xapistate.xml", "xapistate"),
    ("logs.xml", "logs"),
    ("inforef.xml", "inforef"),
];

/// Writer owning the scratch directory a backup is assembled in.
///
/// The produced archive lives inside the scratch directory; callers move
/// or copy it out before dropping the writer.
pub struct BackupWriter {
    scratch: TempDir,
    wwwroot: String,
}

impl BackupWriter {
    pub fn new() -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("courseport-backup-").tempdir()?;
        Ok(Self {
            scratch,
            wwwroot: DEFAULT_WWWROOT.to_string(),
        })
    }

    /// Override the original-site URL recorded in the manifest.
    pub fn with_wwwroot(mut self, wwwroot: impl Into<String>) -> Self {
        let wwwroot = wwwroot.into();
        if !wwwroot.is_empty() {
            self.wwwroot = wwwroot;
        }
        self
    }

    /// Directory the backup document tree is assembled in.
    pub fn backup_dir(&self) -> PathBuf {
        self.scratch.path().join("backup")
    }

    /// Serialize the structure into the backup document tree and package
    /// it as a zip. Returns the archive path inside the scratch directory.
    pub fn write(&self, structure: &TargetStructure) -> Result<PathBuf> {
        let backup_dir = self.backup_dir();
        let timestamp = Utc::now().timestamp();
        let backup_name = self.backup_name(structure, timestamp);
        info!(course = %structure.course_title, backup = %backup_name, "writing backup");

        self.create_dir(&backup_dir)?;
        self.write_doc(
            &backup_dir.join("moodle_backup.xml"),
            self.backup_manifest(structure, timestamp, &backup_name),
        )?;

        for (file_name, root) in ROOT_DOCUMENTS {
            self.write_bytes(&backup_dir.join(file_name), empty_document(root))?;
        }
        self.write_users_xml(&backup_dir)?;
        self.write_roles_xml(&backup_dir)?;

        let course_dir = backup_dir.join("course");
        self.create_dir(&course_dir)?;
        self.write_doc(&course_dir.join("course.xml"), self.course_xml(structure, timestamp))?;
        self.write_doc(&course_dir.join("sections.xml"), self.sections_xml(structure, timestamp))?;
        for (file_name, root) in COURSE_DOCUMENTS {
            self.write_bytes(&course_dir.join(file_name), empty_document(root))?;
        }

        for section in &structure.sections {
            let section_dir = backup_dir
                .join("sections")
                .join(format!("section_{}", section.section_id));
            self.create_dir(&section_dir)?;
            self.write_doc(&section_dir.join("section.xml"), self.section_xml(section, timestamp))?;
            self.write_bytes(&section_dir.join("inforef.xml"), empty_document("inforef"))?;
        }

        for section in &structure.sections {
            for activity in &section.activities {
                self.write_activity(&backup_dir, section, activity, timestamp)?;
            }
        }

        let archive_path = self.package(&backup_dir, structure)?;
        info!(archive = %archive_path.display(), "backup archive written");
        Ok(archive_path)
    }

    /// Remove the scratch directory explicitly.
    pub fn cleanup(self) -> Result<()> {
        self.scratch.close()?;
        Ok(())
    }

    fn backup_name(&self, structure: &TargetStructure, timestamp: i64) -> String {
        let stamp = chrono::DateTime::from_timestamp(timestamp, 0)
            .unwrap_or_else(Utc::now)
            .format("%Y%m%d-%H%M");
        format!(
            "backup-moodle2-course-{}-{}.mbz",
            structure.course_title.replace(' ', "-"),
            stamp
        )
    }

    fn write_activity(
        &self,
        backup_dir: &Path,
        section: &TargetSection,
        activity: &TargetActivity,
        timestamp: i64,
    ) -> Result<()> {
        let dir_name = format!("{}_{}", activity.module_name, activity.module_id);
        let activity_dir = backup_dir.join("activities").join(&dir_name);
        self.create_dir(&activity_dir)?;
        debug!(activity = %dir_name, "writing activity documents");

        self.write_doc(
            &activity_dir.join("activity.xml"),
            self.activity_xml(section, activity, timestamp),
        )?;
        self.write_doc(
            &activity_dir.join("module.xml"),
            self.module_xml(section, activity, timestamp),
        )?;
        if TYPED_DESCRIPTORS.contains(&activity.module_name.as_str()) {
            self.write_doc(
                &activity_dir.join(format!("{}.xml", activity.module_name)),
                self.typed_descriptor_xml(section, activity, timestamp),
            )?;
        }
        for (file_name, root) in ACTIVITY_DOCUMENTS {
            self.write_bytes(&activity_dir.join(file_name), empty_document(root))?;
        }
        Ok(())
    }

    /// The top-level manifest: information block, contents listings and
    /// the settings list.
    fn backup_manifest(&self, structure: &TargetStructure, timestamp: i64, backup_name: &str) -> XmlDoc {
        let site_hash = md5_hex(self.wwwroot.as_bytes());
        let backup_id = md5_hex(timestamp.to_string().as_bytes());
        let end_timestamp = end_of_course(timestamp);

        let mut doc = XmlDoc::new();
        doc.start("moodle_backup", &[]);
        doc.start("information", &[]);

        doc.leaf("n", backup_name);
        doc.leaf("moodle_version", MOODLE_VERSION);
        doc.leaf("moodle_release", MOODLE_RELEASE);
        doc.leaf("backup_version", BACKUP_VERSION);
        doc.leaf("backup_release", BACKUP_RELEASE);
        doc.leaf("backup_date", &timestamp.to_string());
        doc.leaf("mnet_remoteusers", "0");
        doc.leaf("include_files", "1");
        doc.leaf("include_file_references_to_external_content", "0");
        doc.leaf("original_wwwroot", &self.wwwroot);
        doc.leaf("original_site_identifier_hash", &site_hash);
        doc.leaf("original_course_id", "1");
        doc.leaf("original_course_format", "topics");
        doc.leaf("original_course_fullname", &structure.course_title);
        doc.leaf("original_course_shortname", &short_name(&structure.course_title));
        doc.leaf("original_course_startdate", &timestamp.to_string());
        doc.leaf("original_course_enddate", &end_timestamp.to_string());
        doc.leaf("original_course_contextid", "20");
        doc.leaf("original_system_contextid", "1");

        doc.start("details", &[]);
        doc.start("detail", &[("backup_id", backup_id.as_str())]);
        doc.leaf("type", "course");
        doc.leaf("format", "moodle2");
        doc.leaf("interactive", "1");
        doc.leaf("mode", "70");
        doc.leaf("execution", "2");
        doc.leaf("executiontime", "0");
        doc.end("detail");
        doc.end("details");

        doc.start("contents", &[]);
        doc.start("activities", &[]);
        for section in &structure.sections {
            for activity in &section.activities {
                doc.start("activity", &[]);
                doc.leaf("moduleid", &activity.module_id.to_string());
                doc.leaf("sectionid", &section.section_id.to_string());
                doc.leaf("modulename", &activity.module_name);
                doc.leaf("title", &activity.title);
                doc.leaf(
                    "directory",
                    &format!("activities/{}_{}", activity.module_name, activity.module_id),
                );
                doc.empty("insubsection");
                doc.end("activity");
            }
        }
        doc.end("activities");

        doc.start("sections", &[]);
        for section in &structure.sections {
            doc.start("section", &[]);
            doc.leaf("sectionid", &section.section_id.to_string());
            doc.leaf("title", &section.name);
            doc.leaf("directory", &format!("sections/section_{}", section.section_id));
            doc.empty("parentcmid");
            doc.empty("modname");
            doc.end("section");
        }
        doc.end("sections");

        doc.start("course", &[]);
        doc.leaf("courseid", "1");
        doc.leaf("title", &structure.course_title);
        doc.leaf("directory", "course");
        doc.end("course");
        doc.end("contents");

        doc.start("settings", &[]);
        let root_settings: &[(&str, &str)] = &[
            ("filename", backup_name),
            ("users", "1"),
            ("anonymize", "1"),
            ("role_assignments", "1"),
            ("activities", "1"),
            ("blocks", "1"),
            ("files", "1"),
            ("filters", "1"),
            ("comments", "1"),
            ("badges", "1"),
            ("calendarevents", "1"),
            ("userscompletion", "1"),
            ("logs", "1"),
            ("grade_histories", "1"),
            ("questionbank", "1"),
            ("groups", "1"),
            ("competencies", "1"),
            ("customfield", "1"),
            ("contentbankcontent", "1"),
            ("xapistate", "1"),
            ("legacyfiles", "1"),
        ];
        for (name, value) in root_settings {
            write_setting(&mut doc, "root", None, name, value);
        }
        for section in &structure.sections {
            let target = format!("section_{}", section.section_id);
            write_setting(&mut doc, "section", Some(&target), &format!("{target}_included"), "1");
            write_setting(&mut doc, "section", Some(&target), &format!("{target}_userinfo"), "0");
        }
        for activity in structure.activities() {
            let target = format!("{}_{}", activity.module_name, activity.activity_id);
            write_setting(&mut doc, "activity", Some(&target), &format!("{target}_included"), "1");
            write_setting(&mut doc, "activity", Some(&target), &format!("{target}_userinfo"), "0");
        }
        doc.end("settings");

        doc.end("information");
        doc.end("moodle_backup");
        doc
    }

    fn course_xml(&self, structure: &TargetStructure, timestamp: i64) -> XmlDoc {
        let mut doc = XmlDoc::new();
        doc.start("course", &[("id", "1")]);
        doc.leaf("id", "1");
        doc.leaf("category", "1");
        doc.leaf("fullname", &structure.course_title);
        doc.leaf("shortname", &short_name(&structure.course_title));
        doc.leaf("summary", &format!("Imported course: {}", structure.course_title));
        doc.leaf("summaryformat", "1");
        doc.leaf("format", "topics");
        doc.leaf("showgrades", "1");
        doc.leaf("newsitems", "5");
        doc.leaf("startdate", &timestamp.to_string());
        doc.leaf("enddate", &end_of_course(timestamp).to_string());
        doc.leaf("marker", "0");
        doc.leaf("maxbytes", "0");
        doc.leaf("legacyfiles", "0");
        doc.leaf("showreports", "0");
        doc.leaf("visible", "1");
        doc.leaf("groupmode", "0");
        doc.leaf("groupmodeforce", "0");
        doc.leaf("defaultgroupingid", "0");
        doc.end("course");
        doc
    }

    fn sections_xml(&self, structure: &TargetStructure, timestamp: i64) -> XmlDoc {
        let mut doc = XmlDoc::new();
        doc.start("sections", &[]);
        for section in &structure.sections {
            doc.start("section", &[]);
            doc.leaf("id", &section.section_id.to_string());
            doc.leaf("number", &section.number.to_string());
            doc.leaf("name", &section.name);
            doc.leaf("summary", &section.summary);
            doc.leaf("sequence", &sequence(section));
            doc.leaf("visible", bool_flag(section.visible));
            doc.leaf("timemodified", &timestamp.to_string());
            doc.end("section");
        }
        doc.end("sections");
        doc
    }

    fn section_xml(&self, section: &TargetSection, timestamp: i64) -> XmlDoc {
        let mut doc = XmlDoc::new();
        let id = section.section_id.to_string();
        doc.start("section", &[("id", id.as_str())]);
        doc.leaf("id", &id);
        doc.leaf("number", &section.number.to_string());
        doc.leaf("name", &section.name);
        doc.leaf("summary", &section.summary);
        doc.leaf("summaryformat", "1");
        doc.leaf("sequence", &sequence(section));
        doc.leaf("visible", bool_flag(section.visible));
        doc.leaf("timemodified", &timestamp.to_string());
        doc.end("section");
        doc
    }

    fn activity_xml(&self, section: &TargetSection, activity: &TargetActivity, timestamp: i64) -> XmlDoc {
        let id = activity.activity_id.to_string();
        let module_id = activity.module_id.to_string();
        let ts = timestamp.to_string();

        let mut doc = XmlDoc::new();
        doc.start(
            "activity",
            &[
                ("id", id.as_str()),
                ("moduleid", module_id.as_str()),
                ("modulename", activity.module_name.as_str()),
            ],
        );
        doc.leaf("id", &id);
        doc.leaf("moduleid", &module_id);
        doc.leaf("modulename", &activity.module_name);
        doc.leaf("title", &activity.title);
        doc.leaf("section", &section.section_id.to_string());
        doc.leaf("sectionnumber", &section.number.to_string());
        doc.leaf("visible", bool_flag(activity.visible));
        doc.leaf("intro", &activity.intro);
        doc.leaf("introformat", "1");
        doc.leaf("timecreated", &ts);
        doc.leaf("timemodified", &ts);
        doc.leaf("availability", NULL_VALUE);
        doc.leaf("showdescription", "0");
        if let Some(source_id) = &activity.source_id {
            doc.leaf("ilias_id", source_id);
        }
        doc.end("activity");
        doc
    }

    fn module_xml(&self, section: &TargetSection, activity: &TargetActivity, timestamp: i64) -> XmlDoc {
        let module_id = activity.module_id.to_string();

        let mut doc = XmlDoc::new();
        doc.start("module", &[("id", module_id.as_str())]);
        doc.leaf("modulename", &activity.module_name);
        doc.leaf("sectionid", &section.section_id.to_string());
        doc.leaf("sectionnum", &section.number.to_string());
        doc.leaf("instance", &activity.activity_id.to_string());
        doc.leaf("idnumber", "");
        doc.leaf("added", &timestamp.to_string());
        doc.leaf("score", "0");
        doc.leaf("indent", &activity.indent.to_string());
        doc.leaf("visible", bool_flag(activity.visible));
        doc.leaf("visibleold", bool_flag(activity.visible));
        doc.leaf("groupmode", "0");
        doc.leaf("groupingid", "0");
        doc.leaf("completion", "0");
        doc.leaf("completiongradeitemnumber", NULL_VALUE);
        doc.leaf("completionview", "0");
        doc.leaf("completionexpected", "0");
        doc.leaf("availability", NULL_VALUE);
        doc.leaf("showdescription", "0");
        doc.end("module");
        doc
    }

    /// Type-specific descriptor (resource.xml, forum.xml, quiz.xml,
    /// folder.xml) wrapping the instance element.
    fn typed_descriptor_xml(
        &self,
        section: &TargetSection,
        activity: &TargetActivity,
        timestamp: i64,
    ) -> XmlDoc {
        let id = activity.activity_id.to_string();
        let module_id = activity.module_id.to_string();

        let mut doc = XmlDoc::new();
        doc.start(
            "activity",
            &[
                ("id", id.as_str()),
                ("moduleid", module_id.as_str()),
                ("modulename", activity.module_name.as_str()),
                ("contextid", "1"),
            ],
        );
        doc.start(&activity.module_name, &[("id", id.as_str())]);
        doc.leaf("name", &activity.title);
        doc.leaf("intro", &activity.intro);
        doc.leaf("introformat", "1");
        doc.leaf("section", &section.number.to_string());
        doc.leaf("sectionnumber", &section.number.to_string());
        doc.leaf("visible", bool_flag(activity.visible));
        doc.leaf("timemodified", &timestamp.to_string());
        doc.end(&activity.module_name);
        doc.end("activity");
        doc
    }

    fn write_users_xml(&self, backup_dir: &Path) -> Result<()> {
        let mut doc = XmlDoc::new();
        doc.start("users", &[]);
        doc.start("user", &[("id", "1")]);
        doc.leaf("id", "1");
        doc.leaf("username", "admin");
        doc.leaf("firstname", "Admin");
        doc.leaf("lastname", "User");
        doc.leaf("email", "admin@example.com");
        doc.end("user");
        doc.end("users");
        self.write_doc(&backup_dir.join("users.xml"), doc)
    }

    fn write_roles_xml(&self, backup_dir: &Path) -> Result<()> {
        let mut doc = XmlDoc::new();
        doc.start("roles", &[]);
        doc.start("role", &[("id", "1")]);
        doc.leaf("id", "1");
        doc.leaf("name", "editingteacher");
        doc.end("role");
        doc.end("roles");
        self.write_doc(&backup_dir.join("roles.xml"), doc)
    }

    /// Package the assembled tree as a zip with forward-slash relative
    /// paths. Only called after every document was written successfully.
    fn package(&self, backup_dir: &Path, structure: &TargetStructure) -> Result<PathBuf> {
        let safe_title: String = structure
            .course_title
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '_' })
            .collect();
        let archive_path = self.scratch.path().join(format!("{safe_title}_moodle_backup.mbz"));

        let file = File::create(&archive_path).map_err(|e| Error::WriteFailure {
            path: archive_path.clone(),
            source: e,
        })?;
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();

        for entry in WalkDir::new(backup_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::WriteFailure {
                path: backup_dir.to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(backup_dir)
                .map_err(|_| Error::UnsafePathEntry(entry.path().display().to_string()))?
                .to_string_lossy()
                .replace('\\', "/");

            writer.start_file(rel.as_str(), options)?;
            let mut content = Vec::new();
            File::open(entry.path())
                .and_then(|mut f| f.read_to_end(&mut content))
                .map_err(|e| Error::WriteFailure {
                    path: entry.path().to_path_buf(),
                    source: e,
                })?;
            writer.write_all(&content).map_err(|e| Error::WriteFailure {
                path: archive_path.clone(),
                source: e,
            })?;
        }
        writer.finish()?;
        Ok(archive_path)
    }

    fn create_dir(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::WriteFailure {
            path: dir.to_path_buf(),
            source: e,
        })
    }

    fn write_doc(&self, path: &Path, doc: XmlDoc) -> Result<()> {
        self.write_bytes(path, doc.finish())
    }

    fn write_bytes(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        fs::write(path, bytes).map_err(|e| Error::WriteFailure {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

fn write_setting(doc: &mut XmlDoc, level: &str, target: Option<&str>, name: &str, value: &str) {
    doc.start("setting", &[]);
    doc.leaf("level", level);
    if let Some(target) = target {
        doc.leaf(level, target);
    }
    doc.leaf("n", name);
    doc.leaf("value", value);
    doc.end("setting");
}

/// Comma-joined module ids of a section's activities
fn sequence(section: &TargetSection) -> String {
    section
        .activities
        .iter()
        .map(|a| a.module_id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn bool_flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn short_name(title: &str) -> String {
    title.chars().take(20).collect()
}

fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Course end one year after the start
fn end_of_course(timestamp: i64) -> i64 {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .and_then(|start| start.checked_add_months(Months::new(12)))
        .map(|end| end.timestamp())
        .unwrap_or(timestamp)
}
