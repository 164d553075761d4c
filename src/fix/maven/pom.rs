//! Minimal pom.xml model.
//!
//! The document is read into an element tree that records where each element
//! sits in the source text. Leaf values are kept as trimmed strings (a version
//! such as `1.10` is never turned into a number) and attributes are ignored.
//! Serialization splices only the edited values back into the original text,
//! so everything else in the file stays byte-for-byte identical.

use quick_xml::escape::{escape, unescape};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

use crate::traits::PomError;

// ============================================================================
// Element tree
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ElementSpan {
    /// Offset of the `<` opening the element
    start: usize,
    /// Offset just past the closing `>`
    end: usize,
    /// Byte range between the start and end tags; `None` for `<empty/>`
    content: Option<(usize, usize)>,
}

#[derive(Debug, Clone)]
pub struct XmlElement {
    pub name: String,
    pub children: Vec<XmlElement>,
    /// Trimmed text of a leaf element; `None` for whitespace-only content or
    /// elements with child elements
    pub text: Option<String>,
    span: ElementSpan,
}

impl XmlElement {
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.text.as_deref())
    }

    /// Index path of the first descendant found by following `names`.
    fn find_path(&self, names: &[&str]) -> Option<Vec<usize>> {
        let mut path = Vec::with_capacity(names.len());
        let mut current = self;
        for name in names {
            let index = current.children.iter().position(|c| c.name == *name)?;
            path.push(index);
            current = &current.children[index];
        }
        Some(path)
    }

    fn at(&self, path: &[usize]) -> Option<&XmlElement> {
        path.iter()
            .try_fold(self, |element, &index| element.children.get(index))
    }

    fn at_mut(&mut self, path: &[usize]) -> Option<&mut XmlElement> {
        path.iter()
            .try_fold(self, |element, &index| element.children.get_mut(index))
    }
}

fn comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"))
}

fn cdata_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<!\[CDATA\[(.*?)\]\]>").expect("cdata pattern is valid")
    })
}

fn leaf_text(raw: &str) -> Option<String> {
    let without_comments = comment_pattern().replace_all(raw, "");
    let unwrapped = cdata_pattern().replace_all(&without_comments, "$1");
    let trimmed = unwrapped.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        unescape(trimmed)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| trimmed.to_string()),
    )
}

fn parse_tree(source: &str) -> Result<XmlElement, PomError> {
    let mut reader = Reader::from_str(source);
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        let event = reader.read_event().map_err(|e| {
            PomError::Malformed(format!("{e} (near byte {})", reader.buffer_position()))
        })?;
        let after = reader.buffer_position() as usize;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let start = source[..after].rfind('<').unwrap_or(0);
                stack.push(XmlElement {
                    name,
                    children: Vec::new(),
                    text: None,
                    span: ElementSpan {
                        start,
                        end: after,
                        content: Some((after, after)),
                    },
                });
            }
            Event::Empty(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let start = source[..after].rfind('<').unwrap_or(0);
                let element = XmlElement {
                    name,
                    children: Vec::new(),
                    text: None,
                    span: ElementSpan {
                        start,
                        end: after,
                        content: None,
                    },
                };
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let mut element = stack
                    .pop()
                    .ok_or_else(|| PomError::Malformed("unexpected closing tag".to_string()))?;
                let close_start = source[..after].rfind("</").unwrap_or(after);
                let content_start = element.span.end;
                element.span.end = after;
                element.span.content = Some((content_start, close_start));
                if element.children.is_empty() {
                    element.text = leaf_text(&source[content_start..close_start]);
                }
                attach(&mut stack, &mut root, element)?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(PomError::Malformed(format!("unclosed element <{}>", open.name)));
    }
    root.ok_or(PomError::MissingProject)
}

fn attach(
    stack: &mut [XmlElement],
    root: &mut Option<XmlElement>,
    element: XmlElement,
) -> Result<(), PomError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(element);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(element);
            Ok(())
        }
        None => Err(PomError::Malformed(format!(
            "second root element <{}>",
            element.name
        ))),
    }
}

// ============================================================================
// Pom document
// ============================================================================

/// A `<dependency>` entry from the normalized dependency list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PomDependency {
    pub group_id: Option<String>,
    pub artifact_id: Option<String>,
    pub version: Option<String>,
}

impl PomDependency {
    /// `groupId:artifactId`
    pub fn package_name(&self) -> String {
        format!(
            "{}:{}",
            self.group_id.as_deref().unwrap_or_default(),
            self.artifact_id.as_deref().unwrap_or_default()
        )
    }
}

/// What [`PomDocument::upgrade_dependency`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeOutcome {
    Upgraded,
    AlreadyAtVersion,
    NotFound,
}

#[derive(Debug, Clone)]
struct Edit {
    end: usize,
    replacement: String,
}

#[derive(Debug, Clone)]
pub struct PomDocument {
    source: String,
    root: XmlElement,
    /// Pending splices keyed by start offset
    edits: BTreeMap<usize, Edit>,
}

const DEPENDENCY_SECTIONS: [&[&str]; 2] = [
    &["dependencies"],
    &["dependencyManagement", "dependencies"],
];

impl PomDocument {
    pub fn parse(source: &str) -> Result<Self, PomError> {
        let root = parse_tree(source)?;
        if root.name != "project" {
            return Err(PomError::MissingProject);
        }
        Ok(Self {
            source: source.to_string(),
            root,
            edits: BTreeMap::new(),
        })
    }

    pub fn project(&self) -> &XmlElement {
        &self.root
    }

    /// Index paths of every usable `<dependency>`: the project's own
    /// dependencies first, then the ones under `<dependencyManagement>`.
    /// Self-closing or empty entries are dropped.
    fn dependency_paths(&self) -> Vec<Vec<usize>> {
        let mut paths = Vec::new();
        for section in DEPENDENCY_SECTIONS {
            let Some(section_path) = self.root.find_path(section) else {
                continue;
            };
            let Some(list) = self.root.at(&section_path) else {
                continue;
            };
            for (index, dependency) in list.children.iter().enumerate() {
                if dependency.name == "dependency" && !dependency.children.is_empty() {
                    let mut path = section_path.clone();
                    path.push(index);
                    paths.push(path);
                }
            }
        }
        paths
    }

    pub fn dependencies(&self) -> Vec<PomDependency> {
        self.dependency_paths()
            .iter()
            .filter_map(|path| self.root.at(path))
            .map(|d| PomDependency {
                group_id: d.child_text("groupId").map(str::to_string),
                artifact_id: d.child_text("artifactId").map(str::to_string),
                version: d.child_text("version").map(str::to_string),
            })
            .collect()
    }

    /// Sets the version of the first dependency whose `groupId:artifactId`
    /// equals `package_name`.
    ///
    /// A `${property}` version defined in this pom's `<properties>` is
    /// upgraded at the property. A dependency without a `<version>` gets one
    /// inserted after its `<artifactId>`. A version that already equals
    /// `new_version` is left alone.
    pub fn upgrade_dependency(&mut self, package_name: &str, new_version: &str) -> UpgradeOutcome {
        let found = self.dependency_paths().into_iter().find(|path| {
            self.root.at(path).is_some_and(|d| {
                format!(
                    "{}:{}",
                    d.child_text("groupId").unwrap_or_default(),
                    d.child_text("artifactId").unwrap_or_default()
                ) == package_name
            })
        });
        let Some(dependency_path) = found else {
            return UpgradeOutcome::NotFound;
        };

        let version_index = self.root.at(&dependency_path).and_then(|d| {
            d.children.iter().position(|c| c.name == "version")
        });

        let applied = match version_index {
            Some(index) => {
                let mut version_path = dependency_path.clone();
                version_path.push(index);
                let target = self.property_path(&version_path).unwrap_or(version_path);
                let current = self.root.at(&target).and_then(|v| v.text.as_deref());
                if current == Some(new_version) {
                    debug!(package_name, new_version, "Already at the target version");
                    return UpgradeOutcome::AlreadyAtVersion;
                }
                self.set_text(&target, new_version)
            }
            None => self.insert_version(&dependency_path, new_version),
        };
        if applied {
            UpgradeOutcome::Upgraded
        } else {
            UpgradeOutcome::NotFound
        }
    }

    /// Resolves `${name}` to the path of `<properties><name>` when defined.
    fn property_path(&self, version_path: &[usize]) -> Option<Vec<usize>> {
        let text = self.root.at(version_path)?.text.as_deref()?;
        let property = text.strip_prefix("${")?.strip_suffix('}')?;
        let path = self.root.find_path(&["properties", property])?;
        debug!(property, "Version is defined by a property");
        Some(path)
    }

    fn set_text(&mut self, path: &[usize], value: &str) -> bool {
        let Some(element) = self.root.at_mut(path) else {
            return false;
        };
        let span = element.span;
        let name = element.name.clone();
        element.text = Some(value.to_string());

        let escaped = escape(value).into_owned();
        match span.content {
            Some((content_start, content_end)) => {
                let raw = &self.source[content_start..content_end];
                let start = content_start + (raw.len() - raw.trim_start().len());
                let end = (content_end - (raw.len() - raw.trim_end().len())).max(start);
                self.edits.insert(
                    start,
                    Edit {
                        end,
                        replacement: escaped,
                    },
                );
            }
            None => {
                self.edits.insert(
                    span.start,
                    Edit {
                        end: span.end,
                        replacement: format!("<{name}>{escaped}</{name}>"),
                    },
                );
            }
        }
        true
    }

    fn insert_version(&mut self, dependency_path: &[usize], value: &str) -> bool {
        let Some(dependency) = self.root.at(dependency_path) else {
            return false;
        };
        let Some(index) = dependency
            .children
            .iter()
            .position(|c| c.name == "artifactId")
        else {
            return false;
        };
        let artifact = &dependency.children[index];
        let preceding_end = match index {
            0 => dependency
                .span
                .content
                .map(|(start, _)| start)
                .unwrap_or(artifact.span.start),
            _ => dependency.children[index - 1].span.end,
        };
        let gap = &self.source[preceding_end..artifact.span.start];
        let indent = if gap.trim().is_empty() { gap } else { "" };
        let at = artifact.span.end;
        let replacement = format!("{indent}<version>{}</version>", escape(value));
        self.edits.insert(at, Edit { end: at, replacement });
        true
    }

    pub fn is_modified(&self) -> bool {
        !self.edits.is_empty()
    }

    /// Original text with all pending edits applied.
    pub fn to_xml(&self) -> String {
        let mut output = self.source.clone();
        for (start, edit) in self.edits.iter().rev() {
            output.replace_range(*start..edit.end, &edit.replacement);
        }
        output
    }
}
