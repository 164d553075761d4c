//! Renders the plain-text summary printed after a run.

use std::path::Path;

use crate::model::{
    EntityToFix, ExceptionsByScanType, FailedEntity, FixChangeSummary, FixHandlerResultByPlugin,
};

pub const PADDING_SPACE: &str = "  ";

/// Target file relative to the run's root path, or `"<type> project"` when
/// the entity has no target file.
pub fn generate_entity_display_name(entity: &EntityToFix) -> String {
    match entity.target_file() {
        Some(target_file) => {
            let path = Path::new(target_file);
            path.strip_prefix(&entity.options.path)
                .unwrap_or(path)
                .display()
                .to_string()
        }
        None => format!("{} project", entity.scan_type()),
    }
}

fn format_applied_change(change: &FixChangeSummary) -> String {
    if change.success {
        return format!("{PADDING_SPACE}✔ {}", change.user_message);
    }
    let mut line = format!("{PADDING_SPACE}✖ {}", change.user_message);
    if let Some(reason) = &change.reason {
        line.push_str(&format!("\n{PADDING_SPACE}Reason:{PADDING_SPACE}{reason}"));
    }
    if let Some(tip) = &change.tip {
        line.push_str(&format!("\n{PADDING_SPACE}Tip:     {tip}"));
    }
    line
}

pub fn format_changes_summary(entity: &EntityToFix, changes: &[FixChangeSummary]) -> String {
    let mut out = format!("{PADDING_SPACE}{}", generate_entity_display_name(entity));
    for change in changes {
        out.push('\n');
        out.push_str(&format_applied_change(change));
    }
    out
}

pub fn format_skipped(entity: &EntityToFix, user_message: &str) -> String {
    format!(
        "{PADDING_SPACE}{}\n{PADDING_SPACE}✖ {user_message}",
        generate_entity_display_name(entity)
    )
}

pub fn format_unresolved(failed: &FailedEntity) -> String {
    let mut out = format!(
        "{PADDING_SPACE}{}\n{PADDING_SPACE}✖ {}",
        generate_entity_display_name(&failed.original),
        failed.error
    );
    if let Some(tip) = &failed.tip {
        out.push_str(&format!("\n{PADDING_SPACE}Tip:     {tip}"));
    }
    out
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| format!("{PADDING_SPACE}{}. {}", index + 1, item.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Builds the summary text for a whole run. Sections with nothing to show are
/// left out; the closing counts line is always present.
pub fn show_results_summary(
    results_by_plugin: &FixHandlerResultByPlugin,
    exceptions_by_scan_type: &ExceptionsByScanType,
) -> String {
    let mut fixed = Vec::new();
    let mut unresolved = Vec::new();
    let mut skipped = Vec::new();

    for (_, response) in results_by_plugin.iter() {
        fixed.extend(
            response
                .succeeded
                .iter()
                .map(|s| format_changes_summary(&s.original, &s.changes)),
        );
        unresolved.extend(response.failed.iter().map(format_unresolved));
        skipped.extend(
            response
                .skipped
                .iter()
                .map(|s| format_skipped(&s.original, &s.user_message)),
        );
    }

    let mut sections = Vec::new();
    if !fixed.is_empty() {
        sections.push(format!(
            "Following files had fixes applied:\n{}",
            numbered(&fixed)
        ));
    }
    if !unresolved.is_empty() {
        sections.push(format!("Unresolved items:\n{}", numbered(&unresolved)));
    }
    if !skipped.is_empty() {
        sections.push(format!(
            "These did not have any fixes applied as they are not currently supported:\n{}",
            numbered(&skipped)
        ));
    }
    for (scan_type, errors) in exceptions_by_scan_type {
        if errors.is_empty() {
            continue;
        }
        sections.push(format!(
            "These {scan_type} files were not updated as there was an error:\n{}",
            numbered(errors)
        ));
    }

    sections.push(format!(
        "Summary: {} fixed, {} unresolved, {} skipped",
        fixed.len(),
        unresolved.len(),
        skipped.len()
    ));
    sections.join("\n\n")
}
