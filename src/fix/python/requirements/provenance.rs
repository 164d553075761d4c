//! Follows `-r` / `-c` directives to find every file a requirements manifest
//! pulls in.

use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use super::parser::{parse_requirements_file, Requirement};
use crate::traits::{FixError, Workspace};
use crate::workspace::normalize_path;

fn require_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?m)^[^\S\n]*-(r|c)[^\S\n]+(.+)").expect("require pattern is valid")
    })
}

/// Returns the paths named by `-r <path>` and `-c <path>` lines, in file order.
/// A trailing ` #comment` after the path is dropped.
pub fn require_directives(requirements_txt: &str) -> Vec<String> {
    require_pattern()
        .captures_iter(requirements_txt)
        .filter_map(|caps| caps.get(2))
        .map(|m| {
            let arg = m.as_str();
            let arg = arg.split(" #").next().unwrap_or(arg);
            arg.trim().to_string()
        })
        .filter(|arg| !arg.is_empty())
        .collect()
}

/// One file discovered while following include directives.
#[derive(Debug, Clone)]
pub struct ProvenanceFile {
    /// Workspace-relative path
    pub path: PathBuf,
    pub requirements: Vec<Requirement>,
}

/// Files reachable from an entry manifest, in depth-first discovery order.
/// The entry file is always first.
#[derive(Debug, Clone, Default)]
pub struct Provenance {
    files: Vec<ProvenanceFile>,
    seen: HashSet<PathBuf>,
}

impl Provenance {
    pub fn contains(&self, path: &Path) -> bool {
        self.seen.contains(path)
    }

    pub fn files(&self) -> &[ProvenanceFile] {
        &self.files
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|f| f.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn insert(&mut self, file: ProvenanceFile) {
        self.seen.insert(file.path.clone());
        self.files.push(file);
    }
}

/// Reads `dir/base` and every file it includes, transitively.
///
/// Each file is read and parsed once. Paths in directives resolve against the
/// directory of the file containing them. Revisiting a known file is a no-op,
/// which makes include cycles terminate.
///
/// # Errors
///
/// Fails if any file in the chain cannot be read.
pub async fn extract_provenance(
    workspace: &dyn Workspace,
    dir: &Path,
    base: &str,
) -> Result<Provenance, FixError> {
    let mut provenance = Provenance::default();
    let mut pending = vec![normalize_path(&dir.join(base))];

    while let Some(path) = pending.pop() {
        if provenance.contains(&path) {
            debug!(path = %path.display(), "Already visited, skipping");
            continue;
        }

        let requirements_txt = workspace.read_file(&path).await?;
        let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let includes: Vec<PathBuf> = require_directives(&requirements_txt)
            .iter()
            .map(|include| normalize_path(&parent.join(include)))
            .collect();
        debug!(
            path = %path.display(),
            includes = includes.len(),
            "Extracted provenance"
        );

        provenance.insert(ProvenanceFile {
            path,
            requirements: parse_requirements_file(&requirements_txt),
        });

        // Reversed so the first directive is visited next.
        pending.extend(includes.into_iter().rev());
    }

    Ok(provenance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::MemoryWorkspace;

    #[test]
    fn test_require_directives() {
        let text = "-r base.txt\n  -c constraints.txt # pins\nDjango==1.6.1\n-R nope.txt\n--requirement=x.txt\n";
        assert_eq!(require_directives(text), vec!["base.txt", "constraints.txt"]);
        assert!(require_directives("Django==1.6.1\n# -r commented.txt\n-r\n").is_empty());
    }

    #[tokio::test]
    async fn test_extract_provenance_follows_includes_depth_first() {
        let ws = MemoryWorkspace::new()
            .with_file("app/requirements.txt", "-r base.txt\n-c constraints.txt\nDjango==1.6.1\n")
            .with_file("app/base.txt", "-r common/shared.txt\nclick==7.0\n")
            .with_file("app/common/shared.txt", "six==1.0.0\n")
            .with_file("app/constraints.txt", "transitive==1.0.0\n");

        let provenance = extract_provenance(&ws, Path::new("app"), "requirements.txt")
            .await
            .unwrap();
        let paths: Vec<&Path> = provenance.paths().collect();
        assert_eq!(
            paths,
            vec![
                Path::new("app/requirements.txt"),
                Path::new("app/base.txt"),
                Path::new("app/common/shared.txt"),
                Path::new("app/constraints.txt"),
            ]
        );
        assert_eq!(provenance.files()[0].requirements.len(), 4);
    }

    #[tokio::test]
    async fn test_extract_provenance_terminates_on_cycles() {
        let ws = MemoryWorkspace::new()
            .with_file("requirements.txt", "-r requirements.txt\n-r a.txt\n")
            .with_file("a.txt", "-r b.txt\n")
            .with_file("b.txt", "-r ./a.txt\n-r requirements.txt\n");

        let provenance = extract_provenance(&ws, Path::new(""), "requirements.txt")
            .await
            .unwrap();
        assert_eq!(provenance.len(), 3);
        assert!(provenance.contains(Path::new("a.txt")));
        assert!(provenance.contains(Path::new("b.txt")));
    }

    #[tokio::test]
    async fn test_extract_provenance_missing_include_fails() {
        let ws = MemoryWorkspace::new().with_file("requirements.txt", "-r missing.txt\n");
        let err = extract_provenance(&ws, Path::new(""), "requirements.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::Workspace(_)));
    }
}
