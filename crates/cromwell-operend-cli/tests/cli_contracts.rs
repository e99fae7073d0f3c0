#![allow(clippy::single_match_else)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{json, Value};
use ulid::Ulid;

fn binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_cromwell2operend") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let path =
                Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/cromwell2operend");
            if !path.exists() {
                let status = Command::new("cargo")
                    .args(["build", "-p", "cromwell-operend-cli", "--bin", "cromwell2operend"])
                    .status();
                match status {
                    Ok(value) if value.success() => {}
                    Ok(value) => panic!("failed to build cromwell2operend binary (status={value})"),
                    Err(err) => panic!("failed to invoke cargo build: {err}"),
                }
            }
            path
        }
    }
}

fn run(args: &[&str]) -> Output {
    let mut command = Command::new(binary_path());
    command.env_remove("OPEREND_CONFIG").env_remove("RUST_LOG");
    for arg in args {
        command.arg(arg);
    }
    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run cromwell2operend {args:?}: {err}"),
    }
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

struct Fixture {
    dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("c2o-cli-{}", Ulid::new()));
        if let Err(err) = fs::create_dir_all(&dir) {
            panic!("failed to create fixture dir: {err}");
        }
        Self { dir }
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.dir.join(name);
        if let Err(err) = fs::write(&path, content) {
            panic!("failed to write fixture {name}: {err}");
        }
        path.display().to_string()
    }

    fn write_json(&self, name: &str, value: &Value) -> String {
        self.write(name, &value.to_string())
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.dir);
    }
}

fn scattered_metadata(fixture: &Fixture) -> Value {
    let a = fixture.write("a.txt", "alpha");
    let b = fixture.write("b.txt", "beta");
    json!({
        "workflowName": "wf",
        "calls": {
            "wf.step": [
                {"shardIndex": 0, "inputs": {"x": 1}, "outputs": {"y": a, "note": "first"}},
                {"shardIndex": 1, "inputs": {"x": 2}, "outputs": {"y": b, "note": null}}
            ]
        }
    })
}

#[test]
fn help_lists_subcommands() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = stdout_of(&output);
    for required in ["list", "columns", "post"] {
        assert!(stdout.contains(required), "missing subcommand {required}");
    }

    let post_help = stdout_of(&run(&["post", "--help"]));
    for flag in ["--dry-run", "--very-dry-run", "--mock-file", "--config"] {
        assert!(post_help.contains(flag), "missing flag {flag}");
    }
}

#[test]
fn list_counts_fields_and_shows_examples() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json("metadata.json", &scattered_metadata(&fixture));

    let output = run(&["list", &metadata]);
    assert!(output.status.success(), "stderr={}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("1 INPUTS. Names and example values:"));
    assert!(stdout.contains("step.x\t1"));
    assert!(stdout.contains("2 OUTPUTS. Names and example values:"));
    assert!(stdout.contains("step.note\t\"first\""));
}

#[test]
fn columns_prints_rows_in_order() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json("metadata.json", &scattered_metadata(&fixture));

    let output = run(&[
        "columns", &metadata, "--input", "step.x", "--output", "step.note",
    ]);
    assert!(output.status.success(), "stderr={}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "step.x\tstep.note\n1\tfirst\n2\tnull\n");
}

#[test]
fn very_dry_run_reports_would_be_posts() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json("metadata.json", &scattered_metadata(&fixture));
    let manifest = fixture.write_json(
        "manifest.json",
        &json!({
            "entityClass": "demo",
            "inputValues": {"step.x": "x"},
            "outputValues": {"step.note": "note"},
            "outputFiles": {"step.y": "y_file"}
        }),
    );

    let output = run(&["post", &metadata, &manifest, "99", "--very-dry-run"]);
    assert!(output.status.success(), "stderr={}", stderr_of(&output));
    let stdout = stdout_of(&output);
    assert!(stdout.contains("pretending it has wfid 101"));
    assert!(stdout.contains("pretending it has wfid 102"));
    assert!(stdout.contains(
        r#"would be posting entity {"_class":"demo","x":1,"note":"first","y_file":101}"#
    ));
    assert!(stdout.contains(r#"would be posting entity {"_class":"demo","x":2,"y_file":102}"#));
    assert!(stdout.contains(r#"would be updating job run 99 with file outputs {"y_file":[101,102]}"#));
}

#[test]
fn manifests_with_input_files_are_rejected() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json("metadata.json", &scattered_metadata(&fixture));
    let manifest = fixture.write_json(
        "manifest.json",
        &json!({"entityClass": "demo", "inputFiles": {"step.x": "x"}}),
    );

    let output = run(&["post", &metadata, &manifest, "--very-dry-run"]);
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("inputFiles is not yet supported"));
}

#[test]
fn missing_output_file_fails_local_validation() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json(
        "metadata.json",
        &json!({"calls": {"wf.step": [{"shardIndex": 0, "outputs": {"y": "/nonexistent/c2o.txt"}}]}}),
    );
    let manifest = fixture.write_json(
        "manifest.json",
        &json!({"entityClass": "demo", "outputFiles": {"step.y": "y_file"}}),
    );

    let output = run(&["post", &metadata, &manifest, "--very-dry-run"]);
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("/nonexistent/c2o.txt"));

    let mock = fixture.write("mock.txt", "mock");
    let mocked = run(&["post", &metadata, &manifest, "--very-dry-run", "--mock-file", &mock]);
    assert!(mocked.status.success(), "stderr={}", stderr_of(&mocked));
    assert!(stdout_of(&mocked).contains("would be POSTing file /nonexistent/c2o.txt (really"));
}

#[test]
fn conflicting_rows_fail_with_ambiguity() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json(
        "metadata.json",
        &json!({
            "calls": {
                "wf.outer": [
                    {"shardIndex": -1, "subWorkflowMetadata": {"calls": {
                        "inner.step": [{"shardIndex": 0, "outputs": {"y": "a"}}]
                    }}},
                    {"shardIndex": -1, "subWorkflowMetadata": {"calls": {
                        "inner.step": [{"shardIndex": 0, "outputs": {"y": "b"}}]
                    }}}
                ]
            }
        }),
    );

    let output = run(&["list", &metadata]);
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("ambiguity"));
}

#[test]
fn server_modes_need_a_config() {
    let fixture = Fixture::new();
    let metadata = fixture.write_json("metadata.json", &scattered_metadata(&fixture));
    let manifest = fixture.write_json("manifest.json", &json!({"entityClass": "demo"}));

    let output = run(&["post", &metadata, &manifest, "--dry-run"]);
    assert!(!output.status.success());
    assert!(stderr_of(&output).contains("OPEREND_CONFIG"));
}
