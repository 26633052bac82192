// tests/run_once.rs

mod common;
use crate::common::init_tracing;

use std::path::Path;

use changewatch::cli::{CliArgs, LogFormat};
use changewatch::errors::ChangewatchError;
use changewatch::run;

fn args(config: &Path, once: bool, dry_run: bool) -> CliArgs {
    CliArgs {
        config: config.display().to_string(),
        once,
        log_level: None,
        log_format: LogFormat::Text,
        dry_run,
    }
}

#[tokio::test]
async fn dry_run_validates_without_watching() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("Changewatch.toml");
    std::fs::write(&config, "[adapter]\nroot = \"does-not-exist\"\n").unwrap();

    run(args(&config, false, true)).await.unwrap();
}

#[tokio::test]
async fn invalid_config_exits_with_config_status() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("Changewatch.toml");
    std::fs::write(&config, "[dispatch]\nconcurrency = 0\n").unwrap();

    let err = run(args(&config, true, false)).await.unwrap_err();
    assert!(matches!(err, ChangewatchError::ConfigError(_)));
    assert_eq!(err.exit_code(), 2);
}

#[cfg(unix)]
#[tokio::test]
async fn once_runs_react_only_to_new_changes() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    std::fs::write(data.join("x.txt"), "one").unwrap();

    let out = dir.path().join("reactions.log");
    let config = dir.path().join("Changewatch.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[adapter]
include = ["data/**"]

[handler]
cmd = "echo \"$CHANGEWATCH_UNIT $CHANGEWATCH_KIND\" >> '{}'"

[baseline]
storage = "file"
"#,
            out.display()
        ),
    )
    .unwrap();

    let reactions = || std::fs::read_to_string(&out).unwrap_or_default();

    run(args(&config, true, false)).await.unwrap();
    assert_eq!(reactions(), "data/x.txt added\n");
    assert!(dir.path().join(".changewatch/baseline").is_file());

    run(args(&config, true, false)).await.unwrap();
    assert_eq!(reactions(), "data/x.txt added\n", "nothing changed in between");

    std::fs::write(data.join("x.txt"), "two").unwrap();
    std::fs::remove_file(data.join("x.txt")).unwrap();
    std::fs::write(data.join("y.txt"), "new").unwrap();
    run(args(&config, true, false)).await.unwrap();

    let lines: Vec<String> = reactions().lines().map(str::to_string).collect();
    assert_eq!(lines.len(), 3, "{lines:?}");
    assert!(lines.contains(&"data/x.txt removed".to_string()));
    assert!(lines.contains(&"data/y.txt added".to_string()));
}
