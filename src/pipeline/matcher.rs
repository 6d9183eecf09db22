// src/pipeline/matcher.rs

//! Glob resolution: [`PathPattern`] → [`FileSet`].

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::Context;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::errors::{AssetdagError, Result};
use crate::fs::FileSystem;
use crate::watch::path_utils::relative_str;

/// Characters that make a path segment a glob rather than a literal.
const GLOB_META: &[char] = &['*', '?', '[', ']', '{', '}', '\\'];

/// One or more glob expressions evaluated relative to a base directory.
///
/// Entries prefixed with `!` are exclusions. `*` never crosses a `/`; `**`
/// matches any number of segments.
#[derive(Clone)]
pub struct PathPattern {
    base: PathBuf,
    globs: Vec<String>,
    include: GlobSet,
    exclude: Option<GlobSet>,
    walk_roots: Vec<PathBuf>,
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPattern")
            .field("base", &self.base)
            .field("globs", &self.globs)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in {})", self.globs.join(", "), self.base.display())
    }
}

impl PathPattern {
    /// Compile `globs` against `base`.
    ///
    /// Fails with a configuration error if no inclusion glob is given or a
    /// glob does not parse.
    pub fn new<S: AsRef<str>>(base: impl Into<PathBuf>, globs: &[S]) -> Result<Self> {
        let base = base.into();
        let globs: Vec<String> = globs.iter().map(|g| g.as_ref().trim().to_string()).collect();

        let (excludes, includes): (Vec<&str>, Vec<&str>) = globs
            .iter()
            .map(String::as_str)
            .filter(|g| !g.is_empty())
            .partition(|g| g.starts_with('!'));
        let excludes: Vec<&str> = excludes
            .into_iter()
            .map(|g| g[1..].trim_start_matches("./"))
            .collect();
        // Walked paths are relative to the base and never start with `./`.
        let includes: Vec<&str> = includes
            .into_iter()
            .map(|g| g.trim_start_matches("./"))
            .collect();

        if includes.is_empty() {
            return Err(AssetdagError::Config(format!(
                "pattern list {:?} has no inclusion glob",
                globs
            )));
        }

        let include = build_globset(&includes)?;
        let exclude = if excludes.is_empty() {
            None
        } else {
            Some(build_globset(&excludes)?)
        };

        let walk_roots = walk_roots_for(&includes);

        Ok(Self {
            base,
            globs,
            include,
            exclude,
            walk_roots,
        })
    }

    /// Convenience for a single glob.
    pub fn single(base: impl Into<PathBuf>, glob: &str) -> Result<Self> {
        Self::new(base, &[glob])
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    /// Whether a `/`-separated path relative to the base matches.
    pub fn matches_relative(&self, rel_path: &str) -> bool {
        if !self.include.is_match(rel_path) {
            return false;
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(rel_path),
            None => true,
        }
    }

    /// Whether `path` matches. Relative paths are taken as relative to the
    /// base; absolute paths outside the base never match.
    pub fn matches(&self, path: &Path) -> bool {
        let rel = if path.is_absolute() {
            relative_str(&self.base, path)
        } else {
            Some(path.to_string_lossy().replace('\\', "/"))
        };
        rel.is_some_and(|r| self.matches_relative(&r))
    }

    /// Walk the filesystem under the base directory and collect every
    /// matching file, sorted by relative path.
    pub fn resolve(&self, fs: &dyn FileSystem) -> Result<FileSet> {
        if !fs.is_dir(&self.base) {
            return Err(AssetdagError::io(
                &self.base,
                io::Error::new(io::ErrorKind::NotFound, "pattern base directory does not exist"),
            ));
        }
        let base = fs.canonicalize(&self.base)?;

        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        let mut visited: HashSet<PathBuf> = HashSet::new();
        for root in &self.walk_roots {
            let start = base.join(root);
            if !fs.is_dir(&start) {
                debug!(root = ?start, "literal prefix of pattern does not exist; nothing to match");
                continue;
            }

            let mut stack = vec![start];
            while let Some(dir) = stack.pop() {
                // Symlinked directories can point back up the tree.
                if !visited.insert(fs.canonicalize(&dir)?) {
                    debug!(dir = ?dir, "directory already walked; skipping");
                    continue;
                }
                let children = fs
                    .read_dir(&dir)
                    .with_context(|| format!("walking {:?} for {}", dir, self))?;
                for path in children {
                    if fs.is_dir(&path) {
                        stack.push(path);
                    } else if fs.is_file(&path) {
                        if let Ok(rel) = path.strip_prefix(&base) {
                            let rel_str = rel.to_string_lossy().replace('\\', "/");
                            if self.matches_relative(&rel_str) {
                                entries.push((rel_str, path));
                            }
                        }
                    }
                }
            }
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.dedup_by(|a, b| a.0 == b.0);

        debug!(pattern = %self, matched = entries.len(), "resolved pattern");

        Ok(FileSet {
            base,
            files: entries.into_iter().map(|(_, p)| p).collect(),
        })
    }
}

/// Ordered set of absolute file paths produced by [`PathPattern::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    base: PathBuf,
    files: Vec<PathBuf>,
}

impl FileSet {
    pub fn new(base: impl Into<PathBuf>, files: Vec<PathBuf>) -> Self {
        Self {
            base: base.into(),
            files,
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of `file` relative to the set's base (falls back to the file name).
    pub fn relative<'a>(&self, file: &'a Path) -> &'a Path {
        file.strip_prefix(&self.base)
            .unwrap_or_else(|_| file.file_name().map(Path::new).unwrap_or(file))
    }

    /// Relative paths with `/` separators, mostly useful for assertions.
    pub fn relative_strings(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|f| self.relative(f).to_string_lossy().replace('\\', "/"))
            .collect()
    }
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = GlobBuilder::new(pat)
            .literal_separator(true)
            .build()
            .map_err(|e| AssetdagError::Config(format!("invalid glob pattern '{pat}': {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| AssetdagError::Config(format!("building glob set: {e}")))
}

/// Directories (relative to the base) that need walking for these globs:
/// the literal leading segments of each glob, without nested duplicates.
fn walk_roots_for(includes: &[&str]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = includes.iter().map(|g| literal_prefix(g)).collect();
    roots.sort();
    roots.dedup();

    let mut kept: Vec<PathBuf> = Vec::new();
    for root in roots {
        if !kept.iter().any(|k| root.starts_with(k)) {
            kept.push(root);
        }
    }
    kept
}

fn literal_prefix(glob: &str) -> PathBuf {
    let segments: Vec<&str> = glob.trim_start_matches("./").split('/').collect();
    let mut prefix = PathBuf::new();
    // The last segment names files, never a directory to walk into.
    for seg in &segments[..segments.len().saturating_sub(1)] {
        if seg.contains(GLOB_META) || seg.is_empty() {
            break;
        }
        prefix.push(seg);
    }
    prefix
}
