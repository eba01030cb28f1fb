// src/extract/mod.rs

//! Safe extraction of untrusted course-export archives.
//!
//! Handles both zip and tar+gzip containers behind a single interface:
//! format sniffing, pre-extraction validation, guarded member-by-member
//! extraction (path traversal, extension allow-list, zip-bomb ceilings) and
//! classification of extracted members into the roles the rest of the
//! pipeline cares about (root manifest, course descriptor, section and
//! activity descriptors, file storage).

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use glob::Pattern;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tar::Archive;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// File extensions that may be extracted from an untrusted archive.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "xml", "txt", "html", "json", "csv", "png", "jpg", "jpeg", "gif", "pdf", "doc", "docx",
];

/// Entry names that qualify as the root manifest of an archive.
///
/// Course exports carry a `manifest.xml` (sometimes one directory deep when
/// the user zipped the surrounding folder); backup archives carry
/// `moodle_backup.xml` at the root.
const MANIFEST_NAMES: &[&str] = &["manifest.xml", "moodle_backup.xml"];

static SECTION_DESCRIPTOR: LazyLock<Pattern> =
    LazyLock::new(|| Pattern::new("sections/section_*/section.xml").expect("static pattern"));
static ACTIVITY_DESCRIPTOR: LazyLock<Pattern> =
    LazyLock::new(|| Pattern::new("activities/*/module.xml").expect("static pattern"));

/// Archive container formats supported for extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Sniff the container format of a file.
    ///
    /// Tries a zip open first, then tar+gzip entry iteration, then a raw
    /// gzip stream with the `ustar` magic at decompressed offset 257.
    pub fn detect(path: &Path) -> Result<Self> {
        if let Ok(file) = File::open(path)
            && zip::ZipArchive::new(file).is_ok()
        {
            return Ok(ArchiveFormat::Zip);
        }

        if let Ok(file) = File::open(path) {
            let mut archive = Archive::new(GzDecoder::new(file));
            if let Ok(mut entries) = archive.entries()
                && matches!(entries.next(), Some(Ok(_)))
            {
                return Ok(ArchiveFormat::TarGz);
            }
        }

        // Fallback: gzip stream whose payload starts with a tar header.
        // The ustar signature sits at byte offset 257 of the first block.
        if let Ok(file) = File::open(path) {
            let mut decoder = GzDecoder::new(file);
            let mut header = [0u8; 262];
            if decoder.read_exact(&mut header).is_ok() && &header[257..262] == b"ustar" {
                return Ok(ArchiveFormat::TarGz);
            }
        }

        Err(Error::UnknownFormat(path.to_path_buf()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Hard ceilings applied during extraction
#[derive(Debug, Clone, Copy)]
pub struct ExtractorLimits {
    /// Maximum size of the archive file itself
    pub max_archive_size: u64,
    /// Maximum cumulative uncompressed size of all members
    pub max_total_size: u64,
    /// Maximum number of extracted members
    pub max_members: u64,
}

impl Default for ExtractorLimits {
    fn default() -> Self {
        Self {
            max_archive_size: 100 * 1024 * 1024,
            max_total_size: 500 * 1024 * 1024,
            max_members: 10_000,
        }
    }
}

/// Classified output of a successful extraction.
///
/// All paths point into the extractor's scratch directory and stay valid
/// until the extractor is dropped or `cleanup()` is called.
#[derive(Debug)]
pub struct ExtractionResult {
    /// Directory all members were extracted into
    pub root: PathBuf,
    /// Detected container format
    pub format: ArchiveFormat,
    /// Root manifest document (shallowest match wins)
    pub manifest: Option<PathBuf>,
    /// Course descriptor (`course/course.xml`)
    pub course_descriptor: Option<PathBuf>,
    /// Per-section descriptors (`sections/section_*/section.xml`)
    pub section_descriptors: Vec<PathBuf>,
    /// Per-activity descriptors (`activities/*/module.xml`)
    pub activity_descriptors: Vec<PathBuf>,
    /// File-blob storage directory (`files/`), when present
    pub files_dir: Option<PathBuf>,
    /// Number of members written to disk
    pub member_count: u64,
}

impl ExtractionResult {
    fn new(root: PathBuf, format: ArchiveFormat) -> Self {
        Self {
            root,
            format,
            manifest: None,
            course_descriptor: None,
            section_descriptors: Vec::new(),
            activity_descriptors: Vec::new(),
            files_dir: None,
            member_count: 0,
        }
    }

    /// Record the role of an extracted member, if any.
    fn classify(&mut self, rel: &str, full: &Path) {
        let depth = rel.matches('/').count();
        if MANIFEST_NAMES.contains(&rel.rsplit('/').next().unwrap_or(rel)) {
            // Component subdirectories carry their own manifest.xml; the
            // shallowest match is the export root manifest.
            let current_depth = self
                .manifest
                .as_ref()
                .and_then(|p| p.strip_prefix(&self.root).ok())
                .map(|p| p.components().count().saturating_sub(1));
            if current_depth.is_none_or(|d| depth < d) {
                self.manifest = Some(full.to_path_buf());
            }
        } else if rel == "course/course.xml" {
            if self.course_descriptor.is_none() {
                self.course_descriptor = Some(full.to_path_buf());
            }
        } else if SECTION_DESCRIPTOR.matches(rel) {
            self.section_descriptors.push(full.to_path_buf());
        } else if ACTIVITY_DESCRIPTOR.matches(rel) {
            self.activity_descriptors.push(full.to_path_buf());
        } else if rel.starts_with("files/") && self.files_dir.is_none() {
            self.files_dir = full.parent().map(Path::to_path_buf);
        }
    }
}

/// Extractor owning a private scratch directory.
///
/// The scratch directory has a unique random name, so concurrent runs never
/// collide. Dropping the extractor removes it; `cleanup()` does the same
/// but reports failures.
pub struct ArchiveExtractor {
    scratch: TempDir,
    limits: ExtractorLimits,
}

impl ArchiveExtractor {
    pub fn new() -> Result<Self> {
        Self::with_limits(ExtractorLimits::default())
    }

    pub fn with_limits(limits: ExtractorLimits) -> Result<Self> {
        let scratch = tempfile::Builder::new().prefix("courseport-extract-").tempdir()?;
        Ok(Self { scratch, limits })
    }

    /// The scratch directory owned by this extractor.
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Extract and classify an untrusted archive.
    ///
    /// Fails closed: any validation or guard violation aborts the whole
    /// extraction. On success, all paths in the result live under
    /// [`scratch_path`](Self::scratch_path).
    pub fn extract(&self, archive_path: &Path) -> Result<ExtractionResult> {
        self.validate_archive_file(archive_path)?;
        let format = ArchiveFormat::detect(archive_path)?;
        info!(archive = %archive_path.display(), %format, "extracting archive");

        let extract_dir = self.scratch.path().join("extracted");
        fs::create_dir_all(&extract_dir)?;

        let mut result = ExtractionResult::new(extract_dir.clone(), format);
        match format {
            ArchiveFormat::Zip => self.extract_zip(archive_path, &extract_dir, &mut result)?,
            ArchiveFormat::TarGz => self.extract_tar_gz(archive_path, &extract_dir, &mut result)?,
        }

        if result.manifest.is_none() {
            return Err(Error::MissingCriticalFile(
                "root manifest (manifest.xml or moodle_backup.xml)".to_string(),
            ));
        }

        info!(
            members = result.member_count,
            sections = result.section_descriptors.len(),
            activities = result.activity_descriptors.len(),
            "extraction complete"
        );
        Ok(result)
    }

    /// Explicitly remove the scratch directory.
    pub fn cleanup(self) -> Result<()> {
        self.scratch.close()?;
        Ok(())
    }

    fn validate_archive_file(&self, path: &Path) -> Result<()> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(Error::UnknownFormat(path.to_path_buf()));
        }
        if meta.len() > self.limits.max_archive_size {
            return Err(Error::SizeLimitExceeded {
                what: "archive size",
                limit: self.limits.max_archive_size,
                actual: meta.len(),
            });
        }
        Ok(())
    }

    fn extract_zip(&self, path: &Path, dest: &Path, result: &mut ExtractionResult) -> Result<()> {
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;

        // Validate declared totals before writing a single byte.
        let mut declared_size: u64 = 0;
        let mut member_count: u64 = 0;
        let mut has_manifest = false;
        for i in 0..archive.len() {
            let member = archive.by_index(i)?;
            declared_size = declared_size.saturating_add(member.size());
            if !member.is_dir() {
                member_count += 1;
            }
            if MANIFEST_NAMES.contains(&member.name().rsplit('/').next().unwrap_or("")) {
                has_manifest = true;
            }
            self.check_ceilings(declared_size, member_count)?;
        }
        if !has_manifest {
            return Err(Error::MissingCriticalFile(
                "root manifest (manifest.xml or moodle_backup.xml)".to_string(),
            ));
        }

        let mut total: u64 = 0;
        let mut count: u64 = 0;
        for i in 0..archive.len() {
            let mut member = archive.by_index(i)?;
            if member.is_dir() {
                continue;
            }
            let name = member.name().to_string();
            let Some(target) = self.guarded_target(&name, dest)? else {
                continue;
            };

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            let written = io::copy(&mut member, &mut out)?;
            total = total.saturating_add(written);
            count += 1;
            self.check_ceilings(total, count)?;

            result.member_count += 1;
            result.classify(&name, &target);
        }
        Ok(())
    }

    fn extract_tar_gz(&self, path: &Path, dest: &Path, result: &mut ExtractionResult) -> Result<()> {
        // Validation pass: tar streams are single-shot, so listing and
        // extraction each reopen the file.
        let mut archive = Archive::new(GzDecoder::new(File::open(path)?));
        let mut declared_size: u64 = 0;
        let mut member_count: u64 = 0;
        let mut has_manifest = false;
        for entry in archive.entries()? {
            let entry = entry?;
            declared_size = declared_size.saturating_add(entry.header().size()?);
            if !entry.header().entry_type().is_dir() {
                member_count += 1;
            }
            let name = entry.path()?.to_string_lossy().replace('\\', "/");
            if MANIFEST_NAMES.contains(&name.rsplit('/').next().unwrap_or("")) {
                has_manifest = true;
            }
            self.check_ceilings(declared_size, member_count)?;
        }
        if !has_manifest {
            return Err(Error::MissingCriticalFile(
                "root manifest (manifest.xml or moodle_backup.xml)".to_string(),
            ));
        }

        let mut archive = Archive::new(GzDecoder::new(File::open(path)?));
        let mut total: u64 = 0;
        let mut count: u64 = 0;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if entry.header().entry_type().is_dir() {
                continue;
            }
            let name = entry.path()?.to_string_lossy().replace('\\', "/");
            let Some(target) = self.guarded_target(&name, dest)? else {
                continue;
            };

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            let written = io::copy(&mut entry, &mut out)?;
            total = total.saturating_add(written);
            count += 1;
            self.check_ceilings(total, count)?;

            result.member_count += 1;
            result.classify(&name, &target);
        }
        Ok(())
    }

    /// Resolve a member name to its extraction target, applying the path
    /// and extension guards. Returns `None` for members that are skipped.
    fn guarded_target(&self, name: &str, dest: &Path) -> Result<Option<PathBuf>> {
        let rel = Path::new(name);
        if rel.is_absolute() {
            return Err(Error::UnsafePathEntry(name.to_string()));
        }
        for component in rel.components() {
            match component {
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(Error::UnsafePathEntry(name.to_string()));
                }
                _ => {}
            }
        }

        if let Some(ext) = rel.extension().and_then(|e| e.to_str()) {
            if !ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
                warn!(member = name, extension = ext, "skipping member with disallowed extension");
                return Ok(None);
            }
        }

        debug!(member = name, "extracting member");
        Ok(Some(dest.join(rel)))
    }

    fn check_ceilings(&self, total_size: u64, member_count: u64) -> Result<()> {
        if total_size > self.limits.max_total_size {
            return Err(Error::SizeLimitExceeded {
                what: "uncompressed size",
                limit: self.limits.max_total_size,
                actual: total_size,
            });
        }
        if member_count > self.limits.max_members {
            return Err(Error::SizeLimitExceeded {
                what: "member count",
                limit: self.limits.max_members,
                actual: member_count,
            });
        }
        Ok(())
    }
}
