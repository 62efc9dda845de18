use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

fn seed_store(dir: &Path) {
    let document = json!({
        "epm:meta": { "version": 4, "next_list_index": 2 },
        "1438": {
            "title": "The Wire",
            "year": [2002],
            "imdb_id": "tt0306414",
            "episodes": [
                { "season": 1, "episode": 1, "title": "The Target" },
                { "season": 1, "episode": 2, "title": "The Detail" },
            ],
            "epm:meta": { "added": "2024-01-01 10:00:00", "list_index": 1 },
        },
    });
    // the active snapshot is slot 0; uncompressed because the tests run
    // with EPM_NO_COMPRESS=1
    fs::write(dir.join("series-db.0"), document.to_string()).expect("seed store");
}

fn epm(dir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("epm");
    cmd.env("EPM_SERIES_DB", dir.join("series-db"))
        .env("EPM_NO_COMPRESS", "1")
        .env_remove("TMDB_API_KEY");
    cmd
}

fn stdout_of(assert: assert_cmd::assert::Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

fn json_stdout(assert: assert_cmd::assert::Assert) -> Value {
    serde_json::from_str(&stdout_of(assert)).expect("json envelope")
}

#[test]
fn help_lists_the_command_surface() {
    let output = stdout_of(cargo_bin_cmd!("epm").arg("--help").assert().success());
    for command in ["list", "search", "add", "seen", "refresh", "rollback"] {
        assert!(output.contains(command), "help missing `{command}`: {output}");
    }
}

#[test]
fn listing_a_brand_new_store_succeeds() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = stdout_of(epm(temp.path()).arg("list").assert().success());
    assert!(output.contains("0 series"), "unexpected list output: {output}");
}

#[test]
fn list_reports_state_and_next_unseen() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_store(temp.path());

    let payload = json_stdout(epm(temp.path()).args(["--json", "list"]).assert().success());
    assert_eq!(payload["status"], json!("ok"));
    let series = &payload["details"]["series"][0];
    assert_eq!(series["title"], json!("The Wire"));
    assert_eq!(series["index"], json!("1"));
    assert_eq!(series["state"], json!("planned"));
    assert_eq!(series["watched"], json!(0));
    assert_eq!(series["next"], json!("1:1 The Target"));
}

#[test]
fn seen_marks_the_next_unseen_episode_and_persists() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_store(temp.path());

    let output = stdout_of(epm(temp.path()).args(["seen", "1"]).assert().success());
    assert!(output.contains("marked 1:1 seen"), "unexpected seen output: {output}");

    let payload = json_stdout(epm(temp.path()).args(["--json", "list"]).assert().success());
    let series = &payload["details"]["series"][0];
    assert_eq!(series["state"], json!("started"));
    assert_eq!(series["watched"], json!(1));
    assert_eq!(series["next"], json!("1:2 The Detail"));

    // the save shifted the previous snapshot into the backup chain
    let payload = json_stdout(epm(temp.path()).args(["--json", "backups"]).assert().success());
    assert_eq!(payload["details"]["backups"].as_array().map(Vec::len), Some(1));
}

#[test]
fn rate_records_the_score() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_store(temp.path());

    let output = stdout_of(epm(temp.path()).args(["rate", "wire", "9"]).assert().success());
    assert!(
        output.contains("rated The Wire 9/10"),
        "unexpected rate output: {output}"
    );
}

#[test]
fn unknown_series_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_store(temp.path());

    let assert = epm(temp.path()).args(["seen", "nosuch"]).assert().code(1);
    let output = stdout_of(assert);
    assert!(output.contains("no series matches"), "unexpected error: {output}");
}

#[test]
fn rollback_without_backups_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    seed_store(temp.path());

    let assert = epm(temp.path()).arg("rollback").assert().code(1);
    let output = stdout_of(assert);
    assert!(output.contains("no backup"), "unexpected error: {output}");
}

#[test]
fn search_without_an_api_key_points_at_the_env_var() {
    let temp = tempfile::tempdir().expect("tempdir");

    let assert = epm(temp.path()).args(["search", "the wire"]).assert().code(1);
    let output = stdout_of(assert);
    assert!(output.contains("TMDB_API_KEY"), "unexpected error: {output}");
}
