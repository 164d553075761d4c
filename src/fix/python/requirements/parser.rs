//! Line-preserving parser for pip requirements files.
//!
//! Every line becomes a [`Requirement`], including blank lines, comments and
//! option lines. Only lines that look like `name[extras] <cmp> version ...`
//! get the structured fields filled in. [`apply_upgrades`] writes the file
//! back, replacing only the lines that were updated.

use regex::Regex;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::OnceLock;

/// A single line of a requirements file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Lowercased package name
    pub name: Option<String>,

    /// Package name as written
    pub original_name: Option<String>,

    /// Comparator as written, e.g. `==`, `>=`, `~=`
    pub version_comparator: Option<String>,

    pub version: Option<String>,

    /// Everything after the version: extra specifiers, markers, comments
    pub extras: Option<String>,

    /// The line exactly as read, without the `\n` separator
    pub original_text: String,

    /// Index of the line in the file
    pub line: usize,

    version_span: Option<Range<usize>>,
}

impl Requirement {
    fn unparsed(line: usize, original_text: &str) -> Self {
        Self {
            name: None,
            original_name: None,
            version_comparator: None,
            version: None,
            extras: None,
            original_text: original_text.to_string(),
            line,
            version_span: None,
        }
    }

    /// Whether this line declares a package with a pinned or bounded version.
    pub fn is_versioned(&self) -> bool {
        self.name.is_some()
            && self.version_comparator.is_some()
            && self.version.is_some()
            && !self.original_text.is_empty()
    }

    /// Returns the line with its version token replaced. Name casing,
    /// comparator, spacing, markers and comments are left as written.
    pub fn with_version(&self, new_version: &str) -> Option<String> {
        let span = self.version_span.clone()?;
        let mut updated = String::with_capacity(self.original_text.len() + new_version.len());
        updated.push_str(&self.original_text[..span.start]);
        updated.push_str(new_version);
        updated.push_str(&self.original_text[span.end..]);
        Some(updated)
    }
}

fn requirement_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[[^\]]*\])?\s*(?P<cmp>===|==|~=|!=|>=|<=|>|<)\s*(?P<version>[A-Za-z0-9][A-Za-z0-9._*+!-]*)(?P<extras>.*)$",
        )
        .expect("requirement pattern is valid")
    })
}

/// Parses the whole file. Splitting is on `\n` only, so `\r` stays part of
/// the line text and joining with `\n` reproduces the input.
pub fn parse_requirements_file(text: &str) -> Vec<Requirement> {
    text.split('\n')
        .enumerate()
        .map(|(line, raw)| parse_requirement_line(line, raw))
        .collect()
}

fn parse_requirement_line(line: usize, raw: &str) -> Requirement {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('-') {
        return Requirement::unparsed(line, raw);
    }

    let Some(caps) = requirement_pattern().captures(raw) else {
        return Requirement::unparsed(line, raw);
    };
    let (Some(name), Some(cmp), Some(version)) =
        (caps.name("name"), caps.name("cmp"), caps.name("version"))
    else {
        return Requirement::unparsed(line, raw);
    };
    let extras = caps
        .name("extras")
        .map(|m| m.as_str())
        .filter(|e| !e.is_empty());

    Requirement {
        name: Some(name.as_str().to_lowercase()),
        original_name: Some(name.as_str().to_string()),
        version_comparator: Some(cmp.as_str().to_string()),
        version: Some(version.as_str().to_string()),
        extras: extras.map(str::to_string),
        original_text: raw.to_string(),
        line,
        version_span: Some(version.range()),
    }
}

/// Serializes `requirements` back to text, swapping in the lines found in
/// `updated` (keyed by line index). Untouched lines are emitted verbatim, so
/// the trailing newline of the source is kept as is.
pub fn apply_upgrades(requirements: &[Requirement], updated: &BTreeMap<usize, String>) -> String {
    requirements
        .iter()
        .map(|r| {
            updated
                .get(&r.line)
                .map(String::as_str)
                .unwrap_or(r.original_text.as_str())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
