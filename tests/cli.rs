use assert_cmd::Command;
use tempfile::tempdir;

fn write_config(dir: &std::path::Path, organization: &str) -> std::path::PathBuf {
    let path = dir.join("workflow.yml");
    let content = format!(
        "organization: {organization}\n\
         application-name: shop\n\
         service-name: checkout\n\
         version: 1.2.3\n"
    );
    std::fs::write(&path, content).unwrap();
    path
}

#[test]
fn help_lists_subcommands() {
    let mut cmd = Command::cargo_bin("stepledger").unwrap();
    let assert = cmd.arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains("archive"));
    assert!(output.contains("evidence"));
    assert!(output.contains("record"));
}

#[test]
fn validate_accepts_a_complete_config() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), "acme");

    Command::cargo_bin("stepledger")
        .unwrap()
        .args(["validate"])
        .arg(&config)
        .assert()
        .success();
}

#[test]
fn validate_rejects_an_empty_required_value() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), "''");

    Command::cargo_bin("stepledger")
        .unwrap()
        .args(["validate"])
        .arg(&config)
        .assert()
        .failure();
}

#[test]
fn digest_prints_the_sha256_of_a_file() {
    let temp = tempdir().unwrap();
    let file = temp.path().join("artifact.bin");
    std::fs::write(&file, b"0123456789").unwrap();

    let assert = Command::cargo_bin("stepledger")
        .unwrap()
        .args(["digest"])
        .arg(&file)
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(
        output.starts_with("84d89877f0d4041efb6bf91a16f0248f2fd573e6af05c19f96bedb9f882f7882")
    );
}

#[test]
fn archive_step_appends_its_result_to_the_workflow_file() {
    let temp = tempdir().unwrap();
    let config = write_config(temp.path(), "acme");
    let workflow_file = temp.path().join("workflow-result.json");
    let work_dir = temp.path().join("work");

    Command::cargo_bin("stepledger")
        .unwrap()
        .args(["archive", "--workflow-file"])
        .arg(&workflow_file)
        .arg("--config")
        .arg(&config)
        .arg("--work-dir")
        .arg(&work_dir)
        .assert()
        .success();

    let content = std::fs::read_to_string(&workflow_file).unwrap();
    assert!(content.contains("result-artifacts-archive"));
    assert!(content.contains("No result artifact values to archive."));
}

#[test]
fn merge_prints_the_wrapped_results_document() {
    let temp = tempdir().unwrap();
    let workflow_file = temp.path().join("absent.json");

    let assert = Command::cargo_bin("stepledger")
        .unwrap()
        .args(["merge", "--workflow-file"])
        .arg(&workflow_file)
        .assert()
        .success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(output.contains("\"workflow-results\""));
}
