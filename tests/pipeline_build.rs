// tests/pipeline_build.rs

mod common;
use crate::common::{init_tracing, project, read_file, with_timeout, write_file};

use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use assetdag::config::build_registry;
use assetdag::config::model::StageSpec;
use assetdag::config::ConfigFile;
use assetdag::engine::Engine;
use assetdag::errors::AssetdagError;
use assetdag::fs::{FileSystem, RealFileSystem};
use assetdag::pipeline::open_hash_store;
use assetdag::types::HashStorageMode;
use assetdag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn engine_for(cfg: &ConfigFile, root: &Path) -> Result<Engine, AssetdagError> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let hashes = open_hash_store(HashStorageMode::Memory, root);
    let registry = build_registry(cfg, root, fs, Some(hashes))?;
    Ok(Engine::new(Arc::new(registry), 2))
}

#[tokio::test]
async fn scripts_are_concatenated_in_path_order() -> TestResult {
    init_tracing();
    let (_dir, root) = project();
    write_file(&root, "src/js/b.js", "var b;");
    write_file(&root, "src/js/a.js", "var a;");
    write_file(&root, "src/js/widgets/c.js", "var c;");
    write_file(&root, "src/js/notes.txt", "ignored");

    let cfg = ConfigFileBuilder::new()
        .with_role("js", &["src/js/**/*.js"], Some("dist/assets/js"))
        .with_task("scripts", TaskConfigBuilder::new().input("js").concat("all.min.js").build())
        .build();

    with_timeout(engine_for(&cfg, &root)?.run(&["scripts"])).await?;

    assert_eq!(
        read_file(&root, "dist/assets/js/all.min.js"),
        "var a;\nvar b;\nvar c;"
    );
    Ok(())
}

#[tokio::test]
async fn twig_pages_are_flattened_and_rewritten() -> TestResult {
    init_tracing();
    let (_dir, root) = project();
    write_file(&root, "src/pages/index.twig", r#"<img src="../img/logo.png">"#);
    write_file(&root, "src/pages/blog/post.twig", r#"<img src="../../img/a.png">"#);

    let cfg = ConfigFileBuilder::new()
        .with_task(
            "twig",
            TaskConfigBuilder::new()
                .src("**/*.twig")
                .base("src/pages")
                .dest("dist")
                .stage(StageSpec::Replace {
                    pattern: r#"src="(?:\.\./)*img/"#.into(),
                    with: r#"src="assets/img/"#.into(),
                })
                .stage(StageSpec::Rename {
                    dirname: Some(String::new()),
                    prefix: None,
                    suffix: None,
                    extension: Some("html".into()),
                })
                .build(),
        )
        .build();

    with_timeout(engine_for(&cfg, &root)?.run(&["twig"])).await?;

    assert_eq!(
        read_file(&root, "dist/index.html"),
        r#"<img src="assets/img/logo.png">"#
    );
    assert_eq!(
        read_file(&root, "dist/post.html"),
        r#"<img src="assets/img/a.png">"#
    );
    assert!(!root.join("dist/blog").exists());
    Ok(())
}

#[tokio::test]
async fn changed_stage_skips_unchanged_images() -> TestResult {
    init_tracing();
    let (_dir, root) = project();
    write_file(&root, "src/img/logo.png", "logo-v1");
    write_file(&root, "src/img/icons/star.svg", "<svg/>");

    let cfg = ConfigFileBuilder::new()
        .with_task(
            "images",
            TaskConfigBuilder::new()
                .src("**/*.{png,svg}")
                .base("src/img")
                .dest("dist/assets/img")
                .stage(StageSpec::Changed)
                .build(),
        )
        .build();
    let engine = engine_for(&cfg, &root)?;

    with_timeout(engine.run(&["images"])).await?;
    assert_eq!(read_file(&root, "dist/assets/img/logo.png"), "logo-v1");
    assert_eq!(read_file(&root, "dist/assets/img/icons/star.svg"), "<svg/>");

    // Tamper with an output: an unchanged source must not rewrite it.
    write_file(&root, "dist/assets/img/logo.png", "tampered");
    with_timeout(engine.run(&["images"])).await?;
    assert_eq!(read_file(&root, "dist/assets/img/logo.png"), "tampered");

    write_file(&root, "src/img/logo.png", "logo-v2");
    with_timeout(engine.run(&["images"])).await?;
    assert_eq!(read_file(&root, "dist/assets/img/logo.png"), "logo-v2");
    Ok(())
}

#[tokio::test]
async fn clean_output_is_rebuilt_with_persisted_hashes() -> TestResult {
    init_tracing();
    let (_dir, root) = project();
    write_file(&root, "src/img/logo.png", "logo-v1");

    let cfg = ConfigFileBuilder::new()
        .with_task(
            "images",
            TaskConfigBuilder::new()
                .src("**/*.png")
                .base("src/img")
                .dest("dist/assets/img")
                .stage(StageSpec::Changed)
                .build(),
        )
        .build();
    let fresh_engine = || -> Result<Engine, AssetdagError> {
        let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
        let hashes = open_hash_store(HashStorageMode::File, &root);
        let registry = build_registry(&cfg, &root, fs, Some(hashes))?;
        Ok(Engine::new(Arc::new(registry), 2))
    };

    with_timeout(fresh_engine()?.run(&["images"])).await?;
    assert_eq!(read_file(&root, "dist/assets/img/logo.png"), "logo-v1");

    std::fs::remove_dir_all(root.join("dist"))?;
    with_timeout(fresh_engine()?.run(&["images"])).await?;
    assert_eq!(read_file(&root, "dist/assets/img/logo.png"), "logo-v1");
    Ok(())
}

#[tokio::test]
async fn group_task_runs_everything_it_depends_on() -> TestResult {
    init_tracing();
    let (_dir, root) = project();
    write_file(&root, "src/js/app.js", "app();");
    write_file(&root, "src/scss/main.css", "body {}");

    let cfg = ConfigFileBuilder::new()
        .with_role("js", &["src/js/**/*.js"], Some("dist/assets/js"))
        .with_role("css", &["src/scss/**/*.css"], Some("dist/assets/css"))
        .with_task("scripts", TaskConfigBuilder::new().input("js").concat("all.min.js").build())
        .with_task("sass", TaskConfigBuilder::new().input("css").concat("all.min.css").build())
        .with_task(
            "default",
            TaskConfigBuilder::new().after("scripts").after("sass").build(),
        )
        .build();

    let report = with_timeout(engine_for(&cfg, &root)?.run(&["default"])).await?;

    assert_eq!(report.tasks_run, 3);
    assert_eq!(
        report.completed,
        vec![
            vec!["sass".to_string(), "scripts".to_string()],
            vec!["default".to_string()],
        ]
    );
    assert_eq!(read_file(&root, "dist/assets/js/all.min.js"), "app();");
    assert_eq!(read_file(&root, "dist/assets/css/all.min.css"), "body {}");
    Ok(())
}

#[tokio::test]
async fn missing_source_directory_fails_the_task() -> TestResult {
    init_tracing();
    let (_dir, root) = project();

    let cfg = ConfigFileBuilder::new()
        .with_task(
            "images",
            TaskConfigBuilder::new()
                .src("**/*.png")
                .base("src/img")
                .dest("dist/assets/img")
                .build(),
        )
        .build();

    let err = with_timeout(engine_for(&cfg, &root)?.run(&["images"]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("src/img"), "{err}");
    Ok(())
}

#[cfg(unix)]
mod external_commands {
    use super::*;

    const FAIL_ON_ERROR: &str =
        r#"input=$(cat); case "$input" in *@error*) echo "Undefined variable" >&2; exit 1;; esac; printf '%s' "$input""#;

    #[tokio::test]
    async fn failing_filter_names_the_broken_file() -> TestResult {
        init_tracing();
        let (_dir, root) = project();
        write_file(&root, "src/scss/a.scss", "a {}");
        write_file(&root, "src/scss/broken.scss", "@error here");

        let cfg = ConfigFileBuilder::new()
            .with_task(
                "sass",
                TaskConfigBuilder::new()
                    .src("src/scss/**/*.scss")
                    .dest("dist/assets/css")
                    .stage(StageSpec::Filter {
                        cmd: "sh".into(),
                        args: vec!["-c".into(), FAIL_ON_ERROR.into()],
                        cwd: None,
                    })
                    .concat("all.min.css")
                    .build(),
            )
            .with_task("default", TaskConfigBuilder::new().after("sass").build())
            .build();

        let err = with_timeout(engine_for(&cfg, &root)?.run(&["default"]))
            .await
            .unwrap_err();

        match &err {
            AssetdagError::Stage { task, path, .. } => {
                assert_eq!(task, "sass");
                assert!(path.ends_with("broken.scss"), "{path:?}");
            }
            other => panic!("expected Stage error, got {other:?}"),
        }
        let msg = err.to_string();
        assert!(msg.contains("broken.scss"), "{msg}");
        assert!(msg.contains("Undefined variable"), "{msg}");
        assert!(!root.join("dist/assets/css/all.min.css").exists());
        Ok(())
    }

    #[tokio::test]
    async fn command_runs_before_the_pipeline_of_the_same_task() -> TestResult {
        init_tracing();
        let (_dir, root) = project();

        let cfg = ConfigFileBuilder::new()
            .with_task(
                "styleguide",
                TaskConfigBuilder::new()
                    .cmd(
                        "sh",
                        &["-c", "mkdir -p build/kss && printf 'kss' > build/kss/kss.css"],
                    )
                    .src("kss/*.css")
                    .base("build")
                    .dest("dist/styleguide")
                    .stage(StageSpec::Rename {
                        dirname: Some("kss-assets".into()),
                        prefix: None,
                        suffix: None,
                        extension: None,
                    })
                    .build(),
            )
            .build();

        with_timeout(engine_for(&cfg, &root)?.run(&["styleguide"])).await?;
        assert_eq!(read_file(&root, "dist/styleguide/kss-assets/kss.css"), "kss");
        Ok(())
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() -> TestResult {
        init_tracing();
        let (_dir, root) = project();

        let cfg = ConfigFileBuilder::new()
            .with_task(
                "lint",
                TaskConfigBuilder::new()
                    .cmd("sh", &["-c", "echo 'app.js: missing semicolon' >&2; exit 2"])
                    .build(),
            )
            .build();

        let err = with_timeout(engine_for(&cfg, &root)?.run(&["lint"]))
            .await
            .unwrap_err();
        match err {
            AssetdagError::Process { code, stderr, .. } => {
                assert_eq!(code, Some(2));
                assert!(stderr.contains("missing semicolon"));
            }
            other => panic!("expected Process error, got {other:?}"),
        }
        Ok(())
    }
}
