// src/pipeline/stage.rs

//! Pipeline stages: ordered transformations over a list of assets.
//!
//! The built-in stages cover the generic plumbing of an asset build
//! (renaming, content rewrites, concatenation, incremental filtering).
//! Language-specific compilers and minifiers plug in through [`Filter`],
//! which pipes each asset through an external command.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;

use anyhow::{anyhow, Context};
use regex::Regex;
use tracing::debug;

use crate::errors::{AssetdagError, Result};
use crate::fs::FileSystem;
use crate::pipeline::hash::{content_hash, HashKey, HashRecord, SharedHashStore};

/// One file flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Where the content originally came from.
    pub source: PathBuf,
    /// Output path, relative to the destination directory.
    pub rel_path: PathBuf,
    pub contents: Vec<u8>,
}

impl Asset {
    pub fn new(source: impl Into<PathBuf>, rel_path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            source: source.into(),
            rel_path: rel_path.into(),
            contents: contents.into(),
        }
    }

    fn text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.contents).context("content is not valid UTF-8")
    }
}

/// Failure of a stage on a specific file.
#[derive(Debug)]
pub struct StageFailure {
    pub path: PathBuf,
    pub cause: anyhow::Error,
}

impl StageFailure {
    pub fn new(path: impl Into<PathBuf>, cause: anyhow::Error) -> Self {
        Self {
            path: path.into(),
            cause,
        }
    }
}

/// State shared by the stages of one pipeline run.
#[derive(Debug)]
pub struct StageContext<'a> {
    task: String,
    hashes: Option<SharedHashStore>,
    /// Used to check that previously written outputs are still there.
    fs: Option<&'a dyn FileSystem>,
    /// Hashes recorded by `changed`, committed only after a successful write.
    pending_hashes: Mutex<Vec<(HashKey, String)>>,
}

impl<'a> StageContext<'a> {
    pub fn new(task: impl Into<String>, hashes: Option<SharedHashStore>) -> Self {
        Self {
            task: task.into(),
            hashes,
            fs: None,
            pending_hashes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fs(mut self, fs: &'a dyn FileSystem) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn hashes(&self) -> Option<&SharedHashStore> {
        self.hashes.as_ref()
    }

    /// Whether `path` is still on disk. Without a filesystem the answer is
    /// assumed to be yes.
    fn output_exists(&self, path: &Path) -> bool {
        self.fs.is_none_or(|fs| fs.is_file(path))
    }

    fn stage_hash(&self, key: HashKey, hash: String) {
        let mut pending = self.pending_hashes.lock().unwrap_or_else(|p| p.into_inner());
        pending.push((key, hash));
    }

    /// Persist the hashes staged during this run.
    ///
    /// `outputs` pairs each written file with the source it was built from.
    /// A source missing from it is recorded against the only output when
    /// there is exactly one (the result of `concat`), otherwise without one.
    pub fn commit_hashes(&self, outputs: &[(PathBuf, PathBuf)]) -> Result<()> {
        let Some(store) = &self.hashes else {
            return Ok(());
        };
        let pending = std::mem::take(&mut *self.pending_hashes.lock().unwrap_or_else(|p| p.into_inner()));
        if pending.is_empty() {
            return Ok(());
        }

        let by_source: HashMap<String, &PathBuf> = outputs
            .iter()
            .map(|(source, target)| (source.to_string_lossy().into_owned(), target))
            .collect();
        let only = match outputs {
            [(_, target)] => Some(target),
            _ => None,
        };
        let entries: Vec<(HashKey, HashRecord)> = pending
            .into_iter()
            .map(|(key, hash)| {
                let output = by_source.get(&key.source).copied().or(only).cloned();
                (key, HashRecord::new(hash, output))
            })
            .collect();

        let mut store = store
            .lock()
            .map_err(|_| anyhow!("hash store mutex poisoned"))?;
        store.save_all(&entries)?;
        Ok(())
    }
}

/// A transformation step in a task's pipeline.
///
/// Stages must not reorder assets.
pub trait Stage: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(&self, ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure>;

    /// Name of the single file this stage collapses its input into, if any.
    fn output_file(&self) -> Option<&str> {
        None
    }

    /// Whether this stage can change output paths.
    fn renames(&self) -> bool {
        false
    }
}

/// Rewrite output paths: replace the directory, add a prefix/suffix to the
/// file stem, or swap the extension.
#[derive(Debug, Clone, Default)]
pub struct Rename {
    /// `Some("")` flattens every asset into the destination root.
    pub dirname: Option<String>,
    pub prefix: Option<String>,
    pub suffix: Option<String>,
    pub extension: Option<String>,
}

impl Rename {
    fn rename_path(&self, rel: &Path) -> PathBuf {
        let stem = rel
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = match &self.extension {
            Some(ext) => ext.trim_start_matches('.').to_string(),
            None => rel
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };

        let mut file_name = format!(
            "{}{}{}",
            self.prefix.as_deref().unwrap_or(""),
            stem,
            self.suffix.as_deref().unwrap_or("")
        );
        if !ext.is_empty() {
            file_name.push('.');
            file_name.push_str(&ext);
        }

        let dir = match &self.dirname {
            Some(dir) => PathBuf::from(dir),
            None => rel.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        dir.join(file_name)
    }
}

impl Stage for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn apply(&self, _ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        Ok(assets
            .into_iter()
            .map(|mut asset| {
                asset.rel_path = self.rename_path(&asset.rel_path);
                asset
            })
            .collect())
    }

    fn renames(&self) -> bool {
        true
    }
}

/// Regex search-and-replace over every asset's text.
#[derive(Debug, Clone)]
pub struct Replace {
    pattern: Regex,
    with: String,
}

impl Replace {
    pub fn new(pattern: &str, with: impl Into<String>) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| AssetdagError::Config(format!("invalid replace pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern,
            with: with.into(),
        })
    }
}

impl Stage for Replace {
    fn name(&self) -> &str {
        "replace"
    }

    fn apply(&self, _ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        assets
            .into_iter()
            .map(|mut asset| {
                let text = asset
                    .text()
                    .map_err(|e| StageFailure::new(&asset.source, e))?;
                let replaced = self.pattern.replace_all(text, self.with.as_str()).into_owned();
                asset.contents = replaced.into_bytes();
                Ok(asset)
            })
            .collect()
    }
}

/// Merge every asset into one file, keeping input order.
#[derive(Debug, Clone)]
pub struct Concat {
    pub file: String,
    pub separator: String,
}

impl Concat {
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            separator: "\n".to_string(),
        }
    }
}

impl Stage for Concat {
    fn name(&self) -> &str {
        "concat"
    }

    fn apply(&self, _ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        let Some(first) = assets.first() else {
            return Ok(Vec::new());
        };
        let source = first.source.clone();

        let mut contents: Vec<u8> = Vec::new();
        for (i, asset) in assets.iter().enumerate() {
            if i > 0 {
                contents.extend_from_slice(self.separator.as_bytes());
            }
            contents.extend_from_slice(&asset.contents);
        }

        Ok(vec![Asset::new(source, &self.file, contents)])
    }

    fn output_file(&self) -> Option<&str> {
        Some(&self.file)
    }

    fn renames(&self) -> bool {
        true
    }
}

/// Literal text added before (`header`) or after (`footer`) every asset.
#[derive(Debug, Clone)]
pub struct Wrap {
    name: &'static str,
    text: String,
    at_start: bool,
}

impl Wrap {
    pub fn header(text: impl Into<String>) -> Self {
        Self {
            name: "header",
            text: text.into(),
            at_start: true,
        }
    }

    pub fn footer(text: impl Into<String>) -> Self {
        Self {
            name: "footer",
            text: text.into(),
            at_start: false,
        }
    }
}

impl Stage for Wrap {
    fn name(&self) -> &str {
        self.name
    }

    fn apply(&self, _ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        Ok(assets
            .into_iter()
            .map(|mut asset| {
                if self.at_start {
                    let mut contents = self.text.clone().into_bytes();
                    contents.append(&mut asset.contents);
                    asset.contents = contents;
                } else {
                    asset.contents.extend_from_slice(self.text.as_bytes());
                }
                asset
            })
            .collect())
    }
}

/// Drop assets whose content is unchanged since the task last ran
/// successfully and whose output is still in place. Without a hash store
/// every asset passes.
#[derive(Debug, Clone, Default)]
pub struct Changed;

impl Stage for Changed {
    fn name(&self) -> &str {
        "changed"
    }

    fn apply(&self, ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        let Some(store) = ctx.hashes() else {
            return Ok(assets);
        };

        let mut kept = Vec::with_capacity(assets.len());
        for asset in assets {
            let key = HashKey::new(ctx.task(), asset.source.to_string_lossy());
            let hash = content_hash(&asset.contents);

            let previous = {
                let store = store
                    .lock()
                    .map_err(|_| StageFailure::new(&asset.source, anyhow!("hash store mutex poisoned")))?;
                store
                    .load(&key)
                    .map_err(|e| StageFailure::new(&asset.source, e))?
            };

            let up_to_date = previous.is_some_and(|record| {
                record.hash == hash
                    && record
                        .output
                        .as_deref()
                        .is_some_and(|output| ctx.output_exists(output))
            });
            if up_to_date {
                debug!(task = %ctx.task(), file = ?asset.source, "unchanged; skipping");
                continue;
            }
            ctx.stage_hash(key, hash);
            kept.push(asset);
        }
        Ok(kept)
    }
}

/// Pipe each asset through an external command (stdin → stdout).
#[derive(Debug, Clone)]
pub struct Filter {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl Filter {
    fn run_one(&self, asset: &Asset) -> anyhow::Result<Vec<u8>> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning `{}`", self.command))?;

        // Feed stdin from a separate thread so a chatty child cannot fill its
        // stdout pipe while we are still writing.
        let mut stdin = child.stdin.take().context("child stdin not captured")?;
        let input = asset.contents.clone();
        let writer = std::thread::spawn(move || stdin.write_all(&input));

        let output = child
            .wait_with_output()
            .with_context(|| format!("waiting for `{}`", self.command))?;
        writer
            .join()
            .map_err(|_| anyhow!("stdin writer thread panicked"))?
            .or_else(|e| {
                // The child may legitimately exit before reading everything.
                if e.kind() == std::io::ErrorKind::BrokenPipe {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .context("writing to child stdin")?;

        if !output.status.success() {
            return Err(anyhow!(
                "`{}` exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }
}

impl Stage for Filter {
    fn name(&self) -> &str {
        &self.command
    }

    fn apply(&self, _ctx: &StageContext<'_>, assets: Vec<Asset>) -> std::result::Result<Vec<Asset>, StageFailure> {
        assets
            .into_iter()
            .map(|mut asset| {
                asset.contents = self
                    .run_one(&asset)
                    .map_err(|e| StageFailure::new(&asset.source, e))?;
                Ok(asset)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::pipeline::hash::MemoryHashStore;
    use std::sync::Arc;

    fn assets() -> Vec<Asset> {
        vec![
            Asset::new("/s/src/pages/index.twig", "src/pages/index.twig", "<img src=\"../img/a.png\">"),
            Asset::new("/s/src/pages/blog/post.twig", "src/pages/blog/post.twig", "post"),
        ]
    }

    fn ctx() -> StageContext<'static> {
        StageContext::new("twig", None)
    }

    fn outputs_of(assets: &[Asset]) -> Vec<(PathBuf, PathBuf)> {
        assets
            .iter()
            .map(|a| (a.source.clone(), Path::new("/out").join(&a.rel_path)))
            .collect()
    }

    #[test]
    fn rename_flattens_and_swaps_extension() {
        let stage = Rename {
            dirname: Some(String::new()),
            extension: Some(".html".into()),
            ..Rename::default()
        };
        let out = stage.apply(&ctx(), assets()).unwrap();
        let paths: Vec<_> = out.iter().map(|a| a.rel_path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("index.html"), PathBuf::from("post.html")]);
    }

    #[test]
    fn rename_keeps_directory_by_default() {
        let stage = Rename {
            suffix: Some(".min".into()),
            ..Rename::default()
        };
        let out = stage.apply(&ctx(), assets()).unwrap();
        assert_eq!(out[1].rel_path, PathBuf::from("src/pages/blog/post.min.twig"));
    }

    #[test]
    fn replace_rewrites_image_paths() {
        let stage = Replace::new(r#"src="(?:\.\./)*img/"#, r#"src="assets/img/"#).unwrap();
        let out = stage.apply(&ctx(), assets()).unwrap();
        assert_eq!(out[0].contents, b"<img src=\"assets/img/a.png\">");
        assert_eq!(out[1].contents, b"post");
    }

    #[test]
    fn replace_rejects_binary_content_with_file_path() {
        let stage = Replace::new("x", "y").unwrap();
        let bad = vec![Asset::new("/s/src/img/logo.png", "logo.png", vec![0xff, 0xfe, 0x00])];
        let failure = stage.apply(&ctx(), bad).unwrap_err();
        assert_eq!(failure.path, PathBuf::from("/s/src/img/logo.png"));
    }

    #[test]
    fn concat_preserves_input_order() {
        let stage = Concat::new("all.min.js");
        let input = vec![
            Asset::new("/s/a.js", "a.js", "A"),
            Asset::new("/s/b.js", "b.js", "B"),
            Asset::new("/s/c.js", "c.js", "C"),
        ];
        let out = stage.apply(&ctx(), input).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rel_path, PathBuf::from("all.min.js"));
        assert_eq!(out[0].contents, b"A\nB\nC");
        assert!(stage.apply(&ctx(), Vec::new()).unwrap().is_empty());
    }

    #[test]
    fn header_and_footer_wrap_contents() {
        let input = vec![Asset::new("/s/a.css", "a.css", "body{}")];
        let out = Wrap::header("/* built */\n").apply(&ctx(), input).unwrap();
        let out = Wrap::footer("\n").apply(&ctx(), out).unwrap();
        assert_eq!(out[0].contents, b"/* built */\nbody{}\n");
    }

    #[test]
    fn changed_skips_assets_after_commit() {
        let store: SharedHashStore = Arc::new(Mutex::new(Box::new(MemoryHashStore::new())));

        let first = StageContext::new("images", Some(store.clone()));
        let out = Changed.apply(&first, assets()).unwrap();
        assert_eq!(out.len(), 2);
        first.commit_hashes(&outputs_of(&out)).unwrap();

        let mut edited = assets();
        edited[1].contents = b"post, edited".to_vec();

        let second = StageContext::new("images", Some(store));
        let out = Changed.apply(&second, edited).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, PathBuf::from("/s/src/pages/blog/post.twig"));
    }

    #[test]
    fn uncommitted_hashes_do_not_skip() {
        let store: SharedHashStore = Arc::new(Mutex::new(Box::new(MemoryHashStore::new())));
        let failed_run = StageContext::new("images", Some(store.clone()));
        Changed.apply(&failed_run, assets()).unwrap();

        let retry = StageContext::new("images", Some(store));
        assert_eq!(Changed.apply(&retry, assets()).unwrap().len(), 2);
    }

    #[test]
    fn changed_reemits_when_output_was_deleted() {
        let fs = MockFileSystem::new();
        fs.add_file("/out/src/pages/index.twig", "<img src=\"../img/a.png\">");
        let store: SharedHashStore = Arc::new(Mutex::new(Box::new(MemoryHashStore::new())));

        let first = StageContext::new("images", Some(store.clone())).with_fs(&fs);
        let out = Changed.apply(&first, assets()).unwrap();
        first.commit_hashes(&outputs_of(&out)).unwrap();

        // Only index.twig's output is on disk; post.twig's was cleaned away.
        let second = StageContext::new("images", Some(store)).with_fs(&fs);
        let out = Changed.apply(&second, assets()).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source, PathBuf::from("/s/src/pages/blog/post.twig"));
    }

    #[test]
    fn concatenated_sources_share_the_single_output() {
        let store: SharedHashStore = Arc::new(Mutex::new(Box::new(MemoryHashStore::new())));
        let ctx = StageContext::new("scripts", Some(store.clone()));
        Changed.apply(&ctx, assets()).unwrap();
        let bundle = PathBuf::from("/out/all.js");
        ctx.commit_hashes(&[(PathBuf::from("/s/src/pages/index.twig"), bundle.clone())])
            .unwrap();

        let store = store.lock().unwrap();
        let record = store
            .load(&HashKey::new("scripts", "/s/src/pages/blog/post.twig"))
            .unwrap()
            .unwrap();
        assert_eq!(record.output, Some(bundle));
    }

    #[cfg(unix)]
    #[test]
    fn filter_pipes_through_external_command() {
        let stage = Filter {
            command: "tr".into(),
            args: vec!["a-z".into(), "A-Z".into()],
            cwd: None,
        };
        let out = stage
            .apply(&ctx(), vec![Asset::new("/s/a.js", "a.js", "let x;")])
            .unwrap();
        assert_eq!(out[0].contents, b"LET X;");
    }

    #[cfg(unix)]
    #[test]
    fn filter_failure_names_the_file() {
        let stage = Filter {
            command: "false".into(),
            args: Vec::new(),
            cwd: None,
        };
        let failure = stage
            .apply(&ctx(), vec![Asset::new("/s/src/broken.scss", "broken.scss", "{")])
            .unwrap_err();
        assert_eq!(failure.path, PathBuf::from("/s/src/broken.scss"));
    }
}
