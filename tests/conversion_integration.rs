// tests/conversion_integration.rs
//! Integration tests for the export-to-backup conversion pipeline
//!
//! These tests validate the end-to-end conversion process from a course
//! export archive to a backup archive, including:
//! - Archive extraction with security guards
//! - Component discovery and container-structure parsing
//! - Hierarchy mapping with item-group resolution
//! - Compatibility report generation
//! - Backup document generation and packaging

use courseport::{
    ArchiveExtractor, ArchiveFormat, ContainerTreeParser, ConvertOptions, ExtractorLimits,
    backup::BackupWriter, compat::CompatibilityChecker, container::parse_descriptor,
    mapper::StructureMapper,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

// =============================================================================
// TEST FIXTURES
// =============================================================================

const ROOT_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Manifest MainEntity="grp" Title="Demo Course" TargetRelease="8.0"
          InstallationId="13869" InstallationUrl="https://campus.example">
  <ExportSet Path="1744020005__13869__grp_9094" Type="grp"/>
  <ExportSet Path="1744020005__13869__itgr_9125" Type="itgr"/>
</Manifest>"#;

const GROUP_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Manifest MainEntity="grp" Title="Demo Course" InstallationId="13869"
          InstallationUrl="https://campus.example"/>"#;

const ITGR_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Manifest MainEntity="itgr" Title="Essentials" InstallationId="13869"
          InstallationUrl="https://campus.example"/>"#;

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<exp:Export InstallationId="13869" InstallationUrl="https://campus.example" Entity="struct"
    SchemaVersion="4.1.0" xmlns:exp="http://www.ilias.de/Services/Export/exp/4_1"
    xmlns="https://www.ilias.de/Modules/Folder/fold/4_1">
  <exp:ExportItem Id="9094">
    <Items>
      <Item RefId="3812" Id="9094" Title="Demo Course" Type="grp" Style="0">
        <Item RefId="3840" Id="9150" Title="Syllabus" Type="file" Style="0"/>
        <Item RefId="3826" Id="9124" Title="Week 1 files" Type="fold" Style="0">
          <Item RefId="3845" Id="9151" Title="Quiz 1" Type="tst" Style="0" Offline="1"/>
        </Item>
        <Item RefId="3827" Id="9125" Title="Essentials" Type="itgr" Style="0"/>
      </Item>
    </Items>
  </exp:ExportItem>
</exp:Export>"#;

const ITGR_EXPORT_XML: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<exp:Export xmlns:exp="http://www.ilias.de/Services/Export/exp/4_1"
            xmlns:ds="http://www.ilias.de/Services/DataSet/ds/4_3">
  <exp:ExportItem Id="9125">
    <ds:DataSet InstallationId="13869" InstallationUrl="https://campus.example">
      <ds:Rec Entity="itgr">
        <Itgr>
          <Id>9125</Id>
          <Title>Essentials</Title>
          <Description>Key materials</Description>
        </Itgr>
      </ds:Rec>
      <ds:Rec Entity="itgr_item">
        <ItgrItem>
          <Id>1</Id>
          <ItgrId>9125</ItgrId>
          <ItemId>9151</ItemId>
        </ItgrItem>
      </ds:Rec>
      <ds:Rec Entity="itgr_item">
        <ItgrItem>
          <Id>2</Id>
          <ItgrId>9125</ItgrId>
          <ItemId>9404</ItemId>
        </ItgrItem>
      </ds:Rec>
    </ds:DataSet>
  </exp:ExportItem>
</exp:Export>"#;

/// All members of the synthetic course export
fn export_members() -> Vec<(String, Vec<u8>)> {
    vec![
        ("manifest.xml".to_string(), ROOT_MANIFEST.into()),
        (
            "1744020005__13869__grp_9094/manifest.xml".to_string(),
            GROUP_MANIFEST.into(),
        ),
        (
            "1744020005__13869__grp_9094/Services/Container/set_1/export.xml".to_string(),
            CONTAINER_XML.into(),
        ),
        (
            "1744020005__13869__itgr_9125/manifest.xml".to_string(),
            ITGR_MANIFEST.into(),
        ),
        (
            "1744020005__13869__itgr_9125/Services/ItemGroup/set_1/export.xml".to_string(),
            ITGR_EXPORT_XML.into(),
        ),
    ]
}

fn write_export_zip(path: &Path) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    for (name, content) in export_members() {
        writer.start_file(name, options).unwrap();
        writer.write_all(&content).unwrap();
    }
    writer.finish().unwrap();
}

fn write_export_tar_gz(path: &Path) {
    let file = File::create(path).unwrap();
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in export_members() {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

// =============================================================================
// END-TO-END CONVERSION
// =============================================================================

#[test]
fn test_convert_zip_export_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let outcome = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    assert_eq!(outcome.archive_path, dir.path().join("demo_course.mbz"));
    assert!(outcome.archive_path.is_file());

    // General + item-group section + catch-all (Syllabus) + Week 1 files.
    let structure = &outcome.structure;
    assert_eq!(structure.course_title, "Demo Course");
    assert_eq!(structure.section_count(), 4);

    let essentials = structure
        .sections
        .iter()
        .find(|s| s.name == "Essentials")
        .unwrap();
    assert_eq!(essentials.activities.len(), 2);
    assert_eq!(essentials.activities[0].module_name, "quiz");
    // The dangling member reference survives as a link.
    assert_eq!(essentials.activities[1].module_name, "url");

    let week1 = structure
        .sections
        .iter()
        .find(|s| s.name == "Week 1 files")
        .unwrap();
    assert_eq!(week1.activities.len(), 1);
    assert_eq!(week1.activities[0].module_name, "quiz");
    assert!(!week1.activities[0].visible);

    // module_id == activity_id across the run, strictly increasing.
    let ids: Vec<u32> = structure.activities().map(|a| a.activity_id).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    for activity in structure.activities() {
        assert_eq!(activity.activity_id, activity.module_id);
    }

    assert!(outcome.report.error_issues.is_empty());
}

#[test]
fn test_convert_tar_gz_export() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.tar.gz");
    write_export_tar_gz(&archive);

    let outcome = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    assert!(outcome.archive_path.is_file());
    assert_eq!(outcome.structure.course_title, "Demo Course");
}

#[test]
fn test_companion_report_written_next_to_archive() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let outcome = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    let report_path = outcome.report_path.unwrap();
    assert_eq!(report_path, dir.path().join("demo_course.report.md"));

    let markdown = fs::read_to_string(&report_path).unwrap();
    assert!(markdown.contains("# Course Conversion Report"));
    assert!(markdown.contains("**Course**: Demo Course"));
    assert!(markdown.contains("## Statistics"));
    // The offline quiz shows up as an info entry.
    assert!(markdown.contains("Quiz 1"));
}

#[test]
fn test_no_report_option_suppresses_report() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let options = ConvertOptions {
        no_report: true,
        ..ConvertOptions::default()
    };
    let outcome = courseport::convert(&archive, &options).unwrap();
    assert!(outcome.report_path.is_none());
    assert!(!dir.path().join("demo_course.report.md").exists());
}

#[test]
fn test_explicit_output_path() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let output = dir.path().join("out/converted.mbz");
    fs::create_dir_all(output.parent().unwrap()).unwrap();
    let options = ConvertOptions {
        output: Some(output.clone()),
        ..ConvertOptions::default()
    };
    let outcome = courseport::convert(&archive, &options).unwrap();
    assert_eq!(outcome.archive_path, output);
    assert!(output.is_file());
}

#[test]
fn test_inspect_does_not_write_anything() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let (structure, report) =
        courseport::inspect(&archive, ExtractorLimits::default()).unwrap();
    assert_eq!(structure.course_title, "Demo Course");
    assert_eq!(report.total_sections, structure.section_count());
    assert!(!dir.path().join("demo_course.mbz").exists());
}

// =============================================================================
// WRITER / EXTRACTOR ROUND TRIP
// =============================================================================

#[test]
fn test_backup_archive_round_trips_through_extractor() {
    let tree = parse_descriptor(CONTAINER_XML).unwrap().unwrap();
    let structure = StructureMapper::new(Some(&tree), &[]).map();

    let writer = BackupWriter::new().unwrap();
    let archive = writer.write(&structure).unwrap();

    let extractor = ArchiveExtractor::new().unwrap();
    let result = extractor.extract(&archive).unwrap();
    assert_eq!(result.format, ArchiveFormat::Zip);
    assert!(result.manifest.is_some());
    assert!(result.course_descriptor.is_some());
    assert_eq!(result.section_descriptors.len(), structure.section_count());
    assert_eq!(result.activity_descriptors.len(), structure.activity_count());

    // Every written file is re-discoverable with identical relative path
    // and byte-for-byte content.
    let backup_dir = writer.backup_dir();
    for entry in WalkDir::new(&backup_dir) {
        let entry = entry.unwrap();
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(&backup_dir).unwrap();
        let extracted = result.root.join(rel);
        assert!(extracted.is_file(), "missing {}", rel.display());
        assert_eq!(
            fs::read(entry.path()).unwrap(),
            fs::read(&extracted).unwrap(),
            "content mismatch for {}",
            rel.display()
        );
    }
}

// =============================================================================
// SECURITY PROPERTIES
// =============================================================================

#[test]
fn test_traversal_member_aborts_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("evil.zip");
    let file = File::create(&archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    writer.start_file("manifest.xml", options).unwrap();
    writer.write_all(ROOT_MANIFEST.as_bytes()).unwrap();
    writer.start_file("../escape.txt", options).unwrap();
    writer.write_all(b"pwned").unwrap();
    writer.finish().unwrap();

    let err = courseport::convert(&archive, &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, courseport::Error::UnsafePathEntry(_)));
    assert!(!dir.path().join("escape.txt").exists());
    assert!(!dir.path().join("evil.mbz").exists());
}

#[test]
fn test_oversized_archive_rejected_before_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("big.zip");
    write_export_zip(&archive);

    let options = ConvertOptions {
        limits: ExtractorLimits {
            max_archive_size: 16,
            ..ExtractorLimits::default()
        },
        ..ConvertOptions::default()
    };
    let err = courseport::convert(&archive, &options).unwrap_err();
    assert!(matches!(
        err,
        courseport::Error::SizeLimitExceeded { what: "archive size", .. }
    ));
}

#[test]
fn test_garbage_input_is_unknown_format() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("garbage.zip");
    fs::write(&archive, b"definitely not an archive").unwrap();

    let err = courseport::convert(&archive, &ConvertOptions::default()).unwrap_err();
    assert!(matches!(err, courseport::Error::UnknownFormat(_)));
}

// =============================================================================
// DEGRADED INPUTS
// =============================================================================

#[test]
fn test_export_without_container_structure_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("flat.zip");
    let file = File::create(&archive).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    writer.start_file("manifest.xml", options).unwrap();
    writer.write_all(ROOT_MANIFEST.as_bytes()).unwrap();
    writer
        .start_file("1744020005__13869__grp_9094/manifest.xml", options)
        .unwrap();
    writer.write_all(GROUP_MANIFEST.as_bytes()).unwrap();
    writer.finish().unwrap();

    let outcome = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    // No container description: best-effort output plus a warning issue.
    assert_eq!(outcome.structure.course_title, "Demo Course");
    assert!(outcome.archive_path.is_file());
    assert!(!outcome.report.warning_issues.is_empty());
}

#[test]
fn test_container_parser_index_matches_item_count() {
    let dir = tempfile::tempdir().unwrap();
    let component = dir.path().join("1744020005__13869__grp_9094");
    let set_dir = component.join("Services/Container/set_1");
    fs::create_dir_all(&set_dir).unwrap();
    fs::write(set_dir.join("export.xml"), CONTAINER_XML).unwrap();

    let tree = ContainerTreeParser::new(&component).parse().unwrap().unwrap();
    assert_eq!(tree.item_index_len(), 4);
    assert_eq!(tree.len(), 4);
}

// =============================================================================
// COMPATIBILITY ANALYSIS OVER A FULL EXPORT
// =============================================================================

#[test]
fn test_report_covers_offline_and_type_tallies() {
    let tree = parse_descriptor(CONTAINER_XML).unwrap().unwrap();
    let structure = StructureMapper::new(Some(&tree), &[]).map();
    let report = CompatibilityChecker::new().generate_report(&structure, Some(&tree));

    // The offline quiz is an info finding.
    assert!(
        report
            .info_issues
            .iter()
            .any(|i| i.source_item == "Quiz 1" && i.source_feature == "Offline mode")
    );
    assert_eq!(report.type_conversions.get("file"), Some(&1));
    assert_eq!(report.type_conversions.get("tst"), Some(&1));
}

#[test]
fn test_conversion_is_idempotent_per_run() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("demo_course.zip");
    write_export_zip(&archive);

    let first = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    let second = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    assert_eq!(first.structure, second.structure);
}

#[test]
fn test_scratch_directories_are_unique() {
    let a = ArchiveExtractor::new().unwrap();
    let b = ArchiveExtractor::new().unwrap();
    assert_ne!(a.scratch_path(), b.scratch_path());
}

/// Output paths stay inside expectations even for odd input names.
#[test]
fn test_default_output_replaces_extension() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("weird.name.tar.gz");
    write_export_tar_gz(&archive);

    let outcome = courseport::convert(&archive, &ConvertOptions::default()).unwrap();
    assert_eq!(
        outcome.archive_path.file_name().unwrap().to_str().unwrap(),
        "weird.name.tar.mbz"
    );
}
