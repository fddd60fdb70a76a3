use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

// Must match the tags and env var understood by the binary's fault hooks.
const FAULT_ENV_VAR: &str = "DIRLINES_ENABLE_FAULTS";
const METADATA_FAIL_TAG: &str = "__dirlines_metadata_fail__";
const READ_DIR_FAIL_TAG: &str = "__dirlines_read_dir_fail__";
const OPEN_FAIL_TAG: &str = "__dirlines_open_fail__";

fn dirlines_bin() -> &'static str {
    env!("CARGO_BIN_EXE_dirlines")
}

fn write_file(path: &Path, contents: &str) {
    fs::write(path, contents).expect("failed to write test file");
}

fn run_with_faults(root: &Path) -> (std::process::ExitStatus, String, String) {
    let output = Command::new(dirlines_bin())
        .arg(root)
        .env(FAULT_ENV_VAR, "1")
        .output()
        .expect("failed to execute dirlines");
    (
        output.status,
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

#[test]
fn cli_missing_root_reports_error_but_exits_clean() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let missing = temp_dir.path().join("does_not_exist");

    let output = Command::new(dirlines_bin())
        .arg(&missing)
        .output()
        .expect("failed to execute dirlines");

    assert!(
        output.status.success(),
        "walk should absorb a missing root, got {:?}",
        output.status.code()
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    // Summaries are only printed for directories that could be listed.
    assert!(
        !stdout.contains(&format!("{} =", missing.display())),
        "unlistable root must not get a summary line: {stdout}"
    );
    assert!(
        stdout.contains("Walk Summary"),
        "final stats block should still print: {stdout}"
    );
    assert!(
        stderr.contains(&missing.display().to_string()),
        "stderr missing diagnostic for root: {stderr}"
    );
}

#[test]
fn cli_unreadable_file_still_counts_as_a_file() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    write_file(&temp_dir.path().join("fine.txt"), "1\n2\n3\n");
    write_file(&temp_dir.path().join(OPEN_FAIL_TAG), "hidden\nlines\n");

    let (status, stdout, stderr) = run_with_faults(temp_dir.path());
    assert!(status.success());

    assert!(
        stdout.contains(&format!("{} = 2 files, 3 lines", temp_dir.path().display())),
        "unreadable file should count with zero lines: {stdout}"
    );
    let diagnostics = stderr
        .lines()
        .filter(|line| line.contains(OPEN_FAIL_TAG))
        .count();
    assert_eq!(diagnostics, 1, "expected exactly one diagnostic: {stderr}");
    assert!(
        stdout.contains("Failures"),
        "final stats missing failure count: {stdout}"
    );
}

#[test]
fn cli_unclassifiable_entry_is_excluded_from_counts() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    write_file(&temp_dir.path().join("kept.txt"), "1\n");
    write_file(&temp_dir.path().join(METADATA_FAIL_TAG), "never\nseen\n");

    let (status, stdout, stderr) = run_with_faults(temp_dir.path());
    assert!(status.success());

    assert!(
        stdout.contains(&format!("{} = 1 files, 1 lines", temp_dir.path().display())),
        "dropped entry must count as neither file nor directory: {stdout}"
    );
    assert!(
        stderr.contains(METADATA_FAIL_TAG),
        "stderr missing classification diagnostic: {stderr}"
    );
}

#[test]
fn cli_unlistable_subdir_leaves_siblings_intact() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let bad = temp_dir.path().join(READ_DIR_FAIL_TAG);
    fs::create_dir(&bad).expect("failed to create bad directory");
    write_file(&bad.join("unseen.txt"), "a\nb\nc\n");
    let good = temp_dir.path().join("good");
    fs::create_dir(&good).expect("failed to create good directory");
    write_file(&good.join("seen.txt"), "a\nb\n");

    let (status, stdout, stderr) = run_with_faults(temp_dir.path());
    assert!(status.success());

    assert!(
        stdout.contains(&format!("{} = 1 files, 2 lines", good.display())),
        "sibling directory miscounted: {stdout}"
    );
    assert!(
        stdout.contains(&format!("{} = 1 files, 2 lines", temp_dir.path().display())),
        "unlistable subtree should contribute nothing to the root: {stdout}"
    );
    assert!(
        !stdout.contains(&format!("{} =", bad.display())),
        "unlistable directory must not get a summary line: {stdout}"
    );
    assert!(
        stderr.contains(READ_DIR_FAIL_TAG),
        "stderr missing listing diagnostic: {stderr}"
    );
}

#[test]
fn cli_without_fault_env_treats_tag_names_as_ordinary_files() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    write_file(&temp_dir.path().join(OPEN_FAIL_TAG), "real\ncontent\n");

    let output = Command::new(dirlines_bin())
        .arg(temp_dir.path())
        .output()
        .expect("failed to execute dirlines");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(&format!("{} = 1 files, 2 lines", temp_dir.path().display())),
        "fault tag must be inert without the env var: {stdout}"
    );
}
