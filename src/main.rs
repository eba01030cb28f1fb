// src/main.rs

use anyhow::Result;
use clap::{Parser, Subcommand};
use courseport::{ConvertOptions, ExtractorLimits};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "courseport")]
#[command(author, version, about = "Convert ILIAS course exports into Moodle backup archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a course-export archive into a backup archive
    Convert {
        /// Path to the export archive (zip or tar.gz)
        archive: PathBuf,
        /// Output path (default: input path with .mbz extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Skip the companion Markdown report
        #[arg(long)]
        no_report: bool,
        /// Maximum accepted archive size in bytes
        #[arg(long)]
        max_archive_size: Option<u64>,
    },
    /// Analyze an export archive without writing a backup
    Inspect {
        /// Path to the export archive (zip or tar.gz)
        archive: PathBuf,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Convert {
            archive,
            output,
            no_report,
            max_archive_size,
        } => {
            let mut limits = ExtractorLimits::default();
            if let Some(max) = max_archive_size {
                limits.max_archive_size = max;
            }
            let options = ConvertOptions {
                output,
                no_report,
                limits,
            };

            let outcome = courseport::convert(&archive, &options)?;
            info!(archive = %outcome.archive_path.display(), "backup archive created");

            println!("Backup written to {}", outcome.archive_path.display());
            if let Some(report_path) = &outcome.report_path {
                println!("Report written to {}", report_path.display());
            }
            print_summary(&outcome.report);
        }
        Commands::Inspect { archive, json } => {
            let (structure, report) = courseport::inspect(&archive, ExtractorLimits::default())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Course: {}", structure.course_title);
                for section in &structure.sections {
                    println!("  [{}] {}", section.section_id, section.name);
                    for activity in &section.activities {
                        println!(
                            "    {}- {} ({})",
                            "  ".repeat(activity.indent as usize),
                            activity.title,
                            activity.module_name
                        );
                    }
                }
                print_summary(&report);
            }
        }
    }
    Ok(())
}

fn print_summary(report: &courseport::ConversionReport) {
    println!(
        "{} sections, {} activities; {} info, {} warnings, {} errors",
        report.total_sections,
        report.total_activities,
        report.info_issues.len(),
        report.warning_issues.len(),
        report.error_issues.len(),
    );
    for issue in report.warning_issues.iter().chain(&report.error_issues) {
        println!("  [{}] {}: {}", issue.severity, issue.source_item, issue.message);
    }
    if report.has_errors() {
        println!("Some source features could not be converted; see the report for details.");
    }
}
