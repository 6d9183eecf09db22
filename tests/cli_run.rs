// tests/cli_run.rs

mod common;
use crate::common::{init_tracing, project, read_file, with_timeout, write_file};

use std::error::Error;
use std::path::Path;

use clap::Parser;

use assetdag::cli::CliArgs;
use assetdag::errors::AssetdagError;

type TestResult = Result<(), Box<dyn Error>>;

const CONFIG: &str = r#"
[config]
concurrency = 2

[paths.js]
src = "src/js/**/*.js"
dest = "dist/assets/js"

[paths.twig]
src = "**/*.twig"
base = "src/pages"
dest = "dist"

[task.scripts]
input = "js"
stages = [{ kind = "concat", file = "all.min.js" }]

[task.twig]
input = "twig"
stages = [{ kind = "rename", dirname = "", extension = "html" }]

[task.default]
after = ["scripts", "twig"]
"#;

fn args(config: &Path, rest: &[&str]) -> CliArgs {
    let mut argv = vec!["assetdag", "--config", config.to_str().unwrap()];
    argv.extend_from_slice(rest);
    CliArgs::try_parse_from(argv).unwrap()
}

fn site() -> (tempfile::TempDir, std::path::PathBuf, std::path::PathBuf) {
    let (dir, root) = project();
    let config = write_file(&root, "Assetdag.toml", CONFIG);
    write_file(&root, "src/js/a.js", "a();");
    write_file(&root, "src/js/b.js", "b();");
    write_file(&root, "src/pages/index.twig", "<h1>hi</h1>");
    (dir, root, config)
}

#[tokio::test]
async fn run_builds_the_default_task() -> TestResult {
    init_tracing();
    let (_dir, root, config) = site();

    with_timeout(assetdag::run(args(&config, &["run"]))).await?;

    assert_eq!(read_file(&root, "dist/assets/js/all.min.js"), "a();\nb();");
    assert_eq!(read_file(&root, "dist/index.html"), "<h1>hi</h1>");
    Ok(())
}

#[tokio::test]
async fn dry_run_writes_nothing() -> TestResult {
    init_tracing();
    let (_dir, root, config) = site();

    with_timeout(assetdag::run(args(&config, &["run", "default", "--dry-run"]))).await?;

    assert!(!root.join("dist").exists());
    Ok(())
}

#[tokio::test]
async fn list_succeeds() -> TestResult {
    init_tracing();
    let (_dir, _root, config) = site();
    with_timeout(assetdag::run(args(&config, &["list"]))).await?;
    Ok(())
}

#[tokio::test]
async fn unknown_task_is_reported() {
    init_tracing();
    let (_dir, _root, config) = site();

    let err = with_timeout(assetdag::run(args(&config, &["run", "styleguide"])))
        .await
        .unwrap_err();
    assert!(matches!(err, AssetdagError::NotFound(ref name) if name == "styleguide"));
}

#[tokio::test]
async fn zero_concurrency_flag_is_a_config_error() {
    init_tracing();
    let (_dir, _root, config) = site();

    let err = with_timeout(assetdag::run(args(&config, &["--concurrency", "0", "run"])))
        .await
        .unwrap_err();
    assert!(err.is_fatal_config());
}

#[tokio::test]
async fn missing_config_file_is_an_io_error() {
    let (_dir, root) = project();
    let err = with_timeout(assetdag::run(args(&root.join("nope.toml"), &["run"])))
        .await
        .unwrap_err();
    assert!(matches!(err, AssetdagError::Io { .. }));
}
