// src/lib.rs

//! Courseport
//!
//! Converts ILIAS course-export archives into Moodle backup (MBZ)
//! archives, preserving the course hierarchy as faithfully as the flat
//! section/activity model allows and reporting every feature that has no
//! lossless equivalent.
//!
//! # Architecture
//!
//! - One sequential pipeline: extract → scan → parse → map → check → write
//! - Each phase hands an immutable snapshot to the next; no shared state
//! - Private randomly named scratch directories; safe to run concurrently
//! - Untrusted input: extraction fails closed, parsing degrades gracefully

pub mod backup;
pub mod compat;
pub mod component;
pub mod container;
mod error;
pub mod extract;
pub mod itemgroup;
pub mod mapper;
pub mod pipeline;

pub use compat::{CompatibilityChecker, CompatibilityIssue, ConversionReport, Severity};
pub use component::{ComponentScanner, ExportManifest, GroupMemberRef, ParsedComponent};
pub use container::{ContainerItem, ContainerTree, ContainerTreeParser, Timing};
pub use error::{Error, Result};
pub use extract::{ArchiveExtractor, ArchiveFormat, ExtractionResult, ExtractorLimits};
pub use itemgroup::{ItemGroupResolver, ResolvedItem};
pub use mapper::{StructureMapper, TargetActivity, TargetSection, TargetStructure};
pub use pipeline::{ConversionOutcome, ConvertOptions, convert, inspect};
