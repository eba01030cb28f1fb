// src/pipeline.rs

//! One-call conversion pipeline.
//!
//! Wires the phases together: extract the untrusted archive, discover
//! components, parse the container structure, map it onto the target
//! model, run the compatibility analysis, and write the backup archive.
//! Extraction and write failures abort the run; parsing ambiguities
//! degrade to report warnings. All scratch space is reclaimed on every
//! exit path through the extractor's and writer's ownership of their
//! temp directories.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::backup::BackupWriter;
use crate::compat::{CompatibilityChecker, ConversionReport};
use crate::component::{ComponentScanner, ExportManifest, ParsedComponent};
use crate::container::{ContainerTree, ContainerTreeParser};
use crate::error::{Error, Result};
use crate::extract::{ArchiveExtractor, ExtractorLimits};
use crate::mapper::{StructureMapper, TargetStructure};

/// Options for a conversion run
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Destination archive path; defaults to the input path with an
    /// `.mbz` extension
    pub output: Option<PathBuf>,
    /// Suppress the companion Markdown report
    pub no_report: bool,
    pub limits: ExtractorLimits,
}

/// Result of a finished conversion
#[derive(Debug)]
pub struct ConversionOutcome {
    pub archive_path: PathBuf,
    pub report_path: Option<PathBuf>,
    pub report: ConversionReport,
    pub structure: TargetStructure,
}

/// Convert a course-export archive into a backup archive.
pub fn convert(archive: &Path, options: &ConvertOptions) -> Result<ConversionOutcome> {
    let extractor = ArchiveExtractor::with_limits(options.limits)?;
    let extraction = extractor.extract(archive)?;

    let (manifest, components, tree) = analyze(&extraction.manifest)?;
    let structure = build_structure(&manifest, &components, tree.as_ref());

    let checker = CompatibilityChecker::new();
    let report = checker.generate_report(&structure, tree.as_ref());

    let writer = BackupWriter::new()?.with_wwwroot(manifest.installation_url.clone());
    let scratch_archive = writer.write(&structure)?;

    let destination = options
        .output
        .clone()
        .unwrap_or_else(|| archive.with_extension("mbz"));
    std::fs::copy(&scratch_archive, &destination).map_err(|e| Error::WriteFailure {
        path: destination.clone(),
        source: e,
    })?;

    let report_path = if options.no_report {
        None
    } else {
        write_report(&destination, &report)
    };

    writer.cleanup()?;
    extractor.cleanup()?;

    info!(
        archive = %destination.display(),
        sections = structure.section_count(),
        activities = structure.activity_count(),
        "conversion finished"
    );
    Ok(ConversionOutcome {
        archive_path: destination,
        report_path,
        report,
        structure,
    })
}

/// Parse and analyze an archive without writing a backup.
pub fn inspect(archive: &Path, limits: ExtractorLimits) -> Result<(TargetStructure, ConversionReport)> {
    let extractor = ArchiveExtractor::with_limits(limits)?;
    let extraction = extractor.extract(archive)?;

    let (manifest, components, tree) = analyze(&extraction.manifest)?;
    let structure = build_structure(&manifest, &components, tree.as_ref());
    let report = CompatibilityChecker::new().generate_report(&structure, tree.as_ref());

    extractor.cleanup()?;
    Ok((structure, report))
}

/// Scan components and locate the container structure for an extracted
/// export, starting from the root manifest path.
fn analyze(
    manifest_path: &Option<PathBuf>,
) -> Result<(ExportManifest, Vec<ParsedComponent>, Option<ContainerTree>)> {
    let manifest_path = manifest_path.as_ref().ok_or_else(|| {
        Error::MissingCriticalFile("root manifest (manifest.xml or moodle_backup.xml)".to_string())
    })?;
    let export_root = manifest_path
        .parent()
        .ok_or_else(|| Error::MissingCriticalFile(manifest_path.display().to_string()))?;

    let scanner = ComponentScanner::new(export_root);
    let (manifest, components) = scanner.scan()?;

    // The first component carrying a container descriptor wins. A
    // malformed descriptor degrades to "no structure" instead of aborting;
    // partial conversion output still has value.
    let mut tree = None;
    for component in &components {
        match ContainerTreeParser::new(&component.path).parse() {
            Ok(Some(parsed)) => {
                tree = Some(parsed);
                break;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(component = %component.path.display(), error = %e, "container descriptor unusable");
            }
        }
    }
    if tree.is_none() {
        warn!("no container structure found; falling back to flat item list");
    }

    Ok((manifest, components, tree))
}

fn build_structure(
    manifest: &ExportManifest,
    components: &[ParsedComponent],
    tree: Option<&ContainerTree>,
) -> TargetStructure {
    let mut structure = StructureMapper::new(tree, components).map();
    if tree.is_none() && !manifest.title.is_empty() {
        structure.course_title = manifest.title.clone();
    }
    structure
}

/// Write the companion Markdown report next to the archive.
///
/// Report failures are logged, not fatal; the backup itself is complete.
fn write_report(archive_path: &Path, report: &ConversionReport) -> Option<PathBuf> {
    let report_path = archive_path.with_extension("report.md");
    match std::fs::write(&report_path, report.to_markdown()) {
        Ok(()) => {
            info!(report = %report_path.display(), "conversion report written");
            Some(report_path)
        }
        Err(e) => {
            warn!(report = %report_path.display(), error = %e, "could not write conversion report");
            None
        }
    }
}
