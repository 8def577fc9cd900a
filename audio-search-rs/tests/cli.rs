mod common;

use assert_cmd::Command;
use common::*;
use predicates::prelude::*;
use std::path::Path;

fn write_config(root: &Path) -> std::path::PathBuf {
    let config = format!(
        r#"
audio_dir = "{audio}"
embeddings_dir = "{emb}"
music_embeddings_dir = "{music}"
keywords_path = "{keywords}"

[model]
backend = "hash"
device = "cpu"
enable_music_model = false

[translation]
provider = "googletrans"
api_url = "http://127.0.0.1:9/unreachable"
timeout_ms = 500
"#,
        audio = root.join("audio").display(),
        emb = root.join("embeddings").display(),
        music = root.join("embeddings/music").display(),
        keywords = keywords_path().display(),
    );
    let path = root.join("audio-search.toml");
    std::fs::write(&path, config).unwrap();
    path
}

fn cli() -> Command {
    let mut cmd = Command::cargo_bin("audio-search").unwrap();
    cmd.env_remove("AUDIO_SEARCH_CONFIG").env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_lists_subcommands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("index"))
        .stdout(predicate::str::contains("query"));
}

#[test]
fn index_then_query() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(&dir.path().join("audio"));
    let config = write_config(dir.path());
    let out = dir.path().join("embeddings/sfx");

    cli()
        .arg("--config")
        .arg(&config)
        .arg("index")
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"successful\": 5"));
    assert!(out.join("index.asvi").exists());
    assert!(out.join("content_scores.npz").exists());

    let output = cli()
        .arg("--config")
        .arg(&config)
        .args(["query", "heavy rain", "--json", "--top-k", "2"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let response: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(response["num_results"], 2);
    assert_eq!(response["content_type"], "sfx");
    assert_eq!(response["results"][0]["filename"], "rain_heavy.wav");
}

#[test]
fn query_prints_a_table_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(&dir.path().join("audio"));
    let config = write_config(dir.path());

    cli()
        .arg("--config")
        .arg(&config)
        .args(["index", "--output-dir"])
        .arg(dir.path().join("embeddings/sfx"))
        .assert()
        .success();

    cli()
        .arg("--config")
        .arg(&config)
        .args(["query", "dog bark", "--content-type", "sfx"])
        .assert()
        .success()
        .stderr(predicate::str::contains("dog_bark.wav"))
        .stdout(predicate::str::contains("\"resolved_query\": \"dog bark\""));
}

#[test]
fn index_of_an_empty_directory_warns() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("audio")).unwrap();
    let config = write_config(dir.path());

    cli()
        .arg("--config")
        .arg(&config)
        .arg("index")
        .assert()
        .success()
        .stderr(predicate::str::contains("No audio files found"));
}

#[test]
fn query_without_a_corpus_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("audio")).unwrap();
    let config = write_config(dir.path());

    cli()
        .arg("--config")
        .arg(&config)
        .args(["query", "rain"])
        .assert()
        .failure();
}

#[test]
fn invalid_settings_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "[rerank]\nweight = 2.0\n").unwrap();

    cli()
        .arg("--config")
        .arg(&config)
        .args(["query", "rain"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rerank.weight"));
}
