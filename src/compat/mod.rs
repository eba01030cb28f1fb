// src/compat/mod.rs

//! Compatibility analysis between source features and the target format.
//!
//! Classification is purely table-driven: every item is checked against a
//! type-compatibility table and a feature-unsupported table, producing
//! severity-tagged issues. The same rules on the same input always produce
//! the same issues. Report generation folds in the mapping warnings and
//! per-type conversion counts, and renders to Markdown or JSON.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use strum_macros::Display;
use tracing::info;

use crate::container::{ContainerItem, ContainerTree};
use crate::mapper::TargetStructure;

/// Issue severity, ordered least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single compatibility finding for one source item
#[derive(Debug, Clone, Serialize)]
pub struct CompatibilityIssue {
    pub severity: Severity,
    pub source_feature: String,
    /// Title of the affected item
    pub source_item: String,
    pub message: String,
    pub target_alternative: Option<String>,
}

/// How a source type lands in the target format
struct TypeCompatibility {
    source: &'static str,
    target: &'static str,
    notes: &'static str,
}

const TYPE_COMPATIBILITY: &[TypeCompatibility] = &[
    TypeCompatibility { source: "file", target: "resource", notes: "fully supported" },
    TypeCompatibility { source: "fold", target: "folder", notes: "as folder or section" },
    TypeCompatibility { source: "tst", target: "quiz", notes: "question types may vary" },
    TypeCompatibility { source: "excex", target: "assign", notes: "basic features supported" },
    TypeCompatibility { source: "frm", target: "forum", notes: "fully supported" },
    TypeCompatibility { source: "wiki", target: "wiki", notes: "fully supported" },
    TypeCompatibility { source: "mcst", target: "resource", notes: "as file resource" },
    TypeCompatibility { source: "webr", target: "url", notes: "fully supported" },
    TypeCompatibility { source: "sahs", target: "scorm", notes: "SCORM compatible" },
    TypeCompatibility { source: "lm", target: "book", notes: "as book module" },
    TypeCompatibility { source: "htlm", target: "page", notes: "as text page" },
    TypeCompatibility { source: "glo", target: "glossary", notes: "fully supported" },
    TypeCompatibility { source: "svy", target: "feedback", notes: "as feedback activity" },
    TypeCompatibility { source: "poll", target: "choice", notes: "as choice activity" },
    TypeCompatibility { source: "itgr", target: "section", notes: "members become activities" },
    TypeCompatibility { source: "grp", target: "course", notes: "becomes the course itself" },
];

/// Source features with no lossless target equivalent
struct UnsupportedFeature {
    feature: &'static str,
    message: &'static str,
    target_alternative: Option<&'static str>,
}

const UNSUPPORTED_FEATURES: &[UnsupportedFeature] = &[
    UnsupportedFeature {
        feature: "waiting_list",
        message: "Waiting lists are not supported by the target platform",
        target_alternative: Some("Manual enrolment management"),
    },
    UnsupportedFeature {
        feature: "view_mode",
        message: "View-mode settings cannot be carried over",
        target_alternative: Some("Default target course view"),
    },
    UnsupportedFeature {
        feature: "style",
        message: "Custom content styles must be recreated in the target theme",
        target_alternative: Some("Target theme system"),
    },
    UnsupportedFeature {
        feature: "timing_changeable",
        message: "Participant-changeable availability is not supported; only fixed windows exist",
        target_alternative: Some("Fixed availability windows"),
    },
    UnsupportedFeature {
        feature: "session_limit",
        message: "Session limits are not supported",
        target_alternative: None,
    },
];

fn type_compatibility(source: &str) -> Option<&'static TypeCompatibility> {
    TYPE_COMPATIBILITY.iter().find(|t| t.source == source)
}

/// Target module and support notes for a source type, when known.
pub fn type_support(source: &str) -> Option<(&'static str, &'static str)> {
    type_compatibility(source).map(|t| (t.target, t.notes))
}

fn unsupported_feature(feature: &str) -> Option<&'static UnsupportedFeature> {
    UNSUPPORTED_FEATURES.iter().find(|f| f.feature == feature)
}

/// Rule-driven compatibility checker
#[derive(Debug, Default)]
pub struct CompatibilityChecker;

impl CompatibilityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Check a single item against the compatibility tables.
    pub fn check_item(&self, item: &ContainerItem) -> Vec<CompatibilityIssue> {
        let mut issues = Vec::new();

        if type_compatibility(&item.item_type).is_none() {
            issues.push(CompatibilityIssue {
                severity: Severity::Warning,
                source_feature: "Object type".to_string(),
                source_item: item.title.clone(),
                message: format!(
                    "Unknown source type '{}' - converted as 'resource'",
                    item.item_type
                ),
                target_alternative: Some("resource".to_string()),
            });
        }

        if let Some(timing) = &item.timing {
            if timing.changeable
                && let Some(rule) = unsupported_feature("timing_changeable")
            {
                issues.push(CompatibilityIssue {
                    severity: Severity::Warning,
                    source_feature: "Changeable timing".to_string(),
                    source_item: item.title.clone(),
                    message: rule.message.to_string(),
                    target_alternative: rule.target_alternative.map(str::to_string),
                });
            }
            if timing.has_suggestion() {
                issues.push(CompatibilityIssue {
                    severity: Severity::Info,
                    source_feature: "Suggestion times".to_string(),
                    source_item: item.title.clone(),
                    message: "Suggested (non-binding) availability windows are not carried over"
                        .to_string(),
                    target_alternative: Some("Fixed start/end times".to_string()),
                });
            }
        }

        if item.offline {
            issues.push(CompatibilityIssue {
                severity: Severity::Info,
                source_feature: "Offline mode".to_string(),
                source_item: item.title.clone(),
                message: "Item is offline in the source - marked as hidden in the target"
                    .to_string(),
                target_alternative: Some("visible=false".to_string()),
            });
        }

        if !item.style.is_empty()
            && item.style != "0"
            && let Some(rule) = unsupported_feature("style")
        {
            issues.push(CompatibilityIssue {
                severity: Severity::Warning,
                source_feature: "Custom style".to_string(),
                source_item: item.title.clone(),
                message: format!("{} (style id {})", rule.message, item.style),
                target_alternative: rule.target_alternative.map(str::to_string),
            });
        }

        issues
    }

    /// Check every item of a container tree, in document order.
    pub fn check(&self, tree: &ContainerTree) -> Vec<CompatibilityIssue> {
        tree.items().flat_map(|item| self.check_item(item)).collect()
    }

    /// Build the full conversion report for a mapped structure.
    ///
    /// Replays the mapper's warnings as warning issues and tallies how many
    /// activities each source type produced.
    pub fn generate_report(
        &self,
        structure: &TargetStructure,
        tree: Option<&ContainerTree>,
    ) -> ConversionReport {
        let mut report = ConversionReport {
            course_title: structure.course_title.clone(),
            conversion_date: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            total_sections: structure.section_count(),
            total_activities: structure.activity_count(),
            info_issues: Vec::new(),
            warning_issues: Vec::new(),
            error_issues: Vec::new(),
            type_conversions: BTreeMap::new(),
        };

        for activity in structure.activities() {
            let source_type = activity
                .source_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string());
            *report.type_conversions.entry(source_type).or_insert(0) += 1;
        }

        for warning in &structure.warnings {
            report.add_issue(CompatibilityIssue {
                severity: Severity::Warning,
                source_feature: "Mapping".to_string(),
                source_item: "Various items".to_string(),
                message: warning.clone(),
                target_alternative: None,
            });
        }

        if let Some(tree) = tree {
            for issue in self.check(tree) {
                report.add_issue(issue);
            }
        }

        info!(
            warnings = report.warning_issues.len(),
            errors = report.error_issues.len(),
            "conversion report generated"
        );
        report
    }
}

/// Human- and machine-readable summary of one conversion run
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub course_title: String,
    pub conversion_date: String,
    pub total_sections: usize,
    pub total_activities: usize,
    pub info_issues: Vec<CompatibilityIssue>,
    pub warning_issues: Vec<CompatibilityIssue>,
    pub error_issues: Vec<CompatibilityIssue>,
    /// Source type tag → number of activities produced from it
    pub type_conversions: BTreeMap<String, u32>,
}

impl ConversionReport {
    pub fn add_issue(&mut self, issue: CompatibilityIssue) {
        match issue.severity {
            Severity::Info => self.info_issues.push(issue),
            Severity::Warning => self.warning_issues.push(issue),
            Severity::Error => self.error_issues.push(issue),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.error_issues.is_empty()
    }

    /// Render the report as Markdown.
    pub fn to_markdown(&self) -> String {
        let mut lines = Vec::new();

        lines.push("# Course Conversion Report".to_string());
        lines.push(String::new());
        lines.push(format!("**Course**: {}", self.course_title));
        lines.push(format!("**Converted**: {}", self.conversion_date));
        lines.push(String::new());

        lines.push("## Statistics".to_string());
        lines.push(String::new());
        lines.push(format!("- **Sections**: {}", self.total_sections));
        lines.push(format!("- **Activities**: {}", self.total_activities));
        lines.push(format!("- **Info messages**: {}", self.info_issues.len()));
        lines.push(format!("- **Warnings**: {}", self.warning_issues.len()));
        lines.push(format!("- **Errors**: {}", self.error_issues.len()));
        lines.push(String::new());

        if !self.type_conversions.is_empty() {
            lines.push("## Type conversions".to_string());
            lines.push(String::new());
            for (source_type, count) in &self.type_conversions {
                match type_support(source_type) {
                    Some((target, notes)) => lines.push(format!(
                        "- `{}` → {}: {}x ({})",
                        source_type, target, count, notes
                    )),
                    None => lines.push(format!("- `{}`: {}x", source_type, count)),
                }
            }
            lines.push(String::new());
        }

        if !self.error_issues.is_empty() {
            lines.push("## Errors".to_string());
            lines.push(String::new());
            lines.push("These features could not be converted:".to_string());
            lines.push(String::new());
            for issue in &self.error_issues {
                Self::push_issue_block(&mut lines, issue, "Problem");
            }
        }

        if !self.warning_issues.is_empty() {
            lines.push("## Warnings".to_string());
            lines.push(String::new());
            lines.push("These features were converted with limitations:".to_string());
            lines.push(String::new());
            for issue in &self.warning_issues {
                Self::push_issue_block(&mut lines, issue, "Note");
            }
        }

        if !self.info_issues.is_empty() {
            lines.push("## Information".to_string());
            lines.push(String::new());
            for issue in &self.info_issues {
                lines.push(format!("- **{}**: {}", issue.source_item, issue.message));
            }
            lines.push(String::new());
        }

        lines.join("\n")
    }

    fn push_issue_block(lines: &mut Vec<String>, issue: &CompatibilityIssue, label: &str) {
        lines.push(format!("### {}", issue.source_item));
        lines.push(format!("- **Feature**: {}", issue.source_feature));
        lines.push(format!("- **{}**: {}", label, issue.message));
        if let Some(alternative) = &issue.target_alternative {
            lines.push(format!("- **Alternative**: {}", alternative));
        }
        lines.push(String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{Timing, parse_descriptor};
    use crate::mapper::StructureMapper;

    fn item(item_type: &str) -> ContainerItem {
        ContainerItem {
            ref_id: "1".to_string(),
            item_id: "10".to_string(),
            title: "Sample".to_string(),
            item_type: item_type.to_string(),
            style: "0".to_string(),
            offline: false,
            timing: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn test_unknown_type_yields_exactly_one_warning() {
        let checker = CompatibilityChecker::new();
        let issues = checker.check_item(&item("unknown_xyz"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].message.contains("unknown_xyz"));
    }

    #[test]
    fn test_known_type_is_clean() {
        let checker = CompatibilityChecker::new();
        assert!(checker.check_item(&item("file")).is_empty());
    }

    #[test]
    fn test_offline_item_is_info() {
        let checker = CompatibilityChecker::new();
        let mut offline = item("file");
        offline.offline = true;
        let issues = checker.check_item(&offline);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Info);
        assert_eq!(issues[0].source_feature, "Offline mode");
    }

    #[test]
    fn test_custom_style_is_warning() {
        let checker = CompatibilityChecker::new();
        let mut styled = item("file");
        styled.style = "9115".to_string();
        let issues = checker.check_item(&styled);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].message.contains("9115"));
    }

    #[test]
    fn test_timing_rules() {
        let checker = CompatibilityChecker::new();

        let mut changeable = item("file");
        changeable.timing = Some(Timing {
            changeable: true,
            start: Some("2025-02-05 08:40:24".to_string()),
            ..Timing::default()
        });
        let issues = checker.check_item(&changeable);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert_eq!(issues[0].source_feature, "Changeable timing");

        let mut suggested = item("file");
        suggested.timing = Some(Timing {
            suggestion_start: Some("2025-02-12 14:44:16".to_string()),
            ..Timing::default()
        });
        let issues = checker.check_item(&suggested);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Info);
        assert_eq!(issues[0].source_feature, "Suggestion times");
    }

    #[test]
    fn test_check_is_deterministic() {
        let xml = r#"<Export><ExportItem><Items>
            <Item RefId="1" Id="1" Title="Course" Type="grp">
              <Item RefId="2" Id="2" Title="Odd" Type="unknown_xyz"/>
              <Item RefId="3" Id="3" Title="Hidden" Type="file" Offline="1"/>
            </Item>
        </Items></ExportItem></Export>"#;
        let tree = parse_descriptor(xml).unwrap().unwrap();
        let checker = CompatibilityChecker::new();

        let first = checker.check(&tree);
        let second = checker.check(&tree);
        assert_eq!(first.len(), second.len());
        let summary: Vec<(Severity, &str)> = first
            .iter()
            .map(|i| (i.severity, i.source_item.as_str()))
            .collect();
        assert_eq!(summary, vec![(Severity::Warning, "Odd"), (Severity::Info, "Hidden")]);
    }

    #[test]
    fn test_report_counts_and_replayed_warnings() {
        let xml = r#"<Export><ExportItem><Items>
            <Item RefId="1" Id="1" Title="Course" Type="grp">
              <Item RefId="2" Id="2" Title="Docs" Type="fold">
                <Item RefId="3" Id="3" Title="Handout" Type="file"/>
                <Item RefId="4" Id="4" Title="Strange" Type="unknown_xyz"/>
              </Item>
            </Item>
        </Items></ExportItem></Export>"#;
        let tree = parse_descriptor(xml).unwrap().unwrap();
        let structure = StructureMapper::new(Some(&tree), &[]).map();
        let checker = CompatibilityChecker::new();
        let report = checker.generate_report(&structure, Some(&tree));

        assert_eq!(report.course_title, "Course");
        assert_eq!(report.total_sections, 2);
        assert_eq!(report.total_activities, 1);
        assert_eq!(report.type_conversions.get("file"), Some(&1));
        // One mapper warning replayed, one type warning from the checker.
        assert_eq!(report.warning_issues.len(), 2);
        assert!(report.error_issues.is_empty());
    }

    #[test]
    fn test_markdown_rendering() {
        let xml = r#"<Export><ExportItem><Items>
            <Item RefId="1" Id="1" Title="Course" Type="grp">
              <Item RefId="2" Id="2" Title="Hidden" Type="file" Offline="1"/>
            </Item>
        </Items></ExportItem></Export>"#;
        let tree = parse_descriptor(xml).unwrap().unwrap();
        let structure = StructureMapper::new(Some(&tree), &[]).map();
        let checker = CompatibilityChecker::new();
        let markdown = checker.generate_report(&structure, Some(&tree)).to_markdown();

        assert!(markdown.contains("# Course Conversion Report"));
        assert!(markdown.contains("## Statistics"));
        assert!(markdown.contains("## Information"));
        assert!(markdown.contains("**Hidden**"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let structure = StructureMapper::new(None, &[]).map();
        let checker = CompatibilityChecker::new();
        let report = checker.generate_report(&structure, None);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["course_title"], "Unknown course");
        assert!(json["warning_issues"].as_array().is_some());
    }
}
