use std::path::Path;
use std::process::Command;

fn write_config(dir: &Path, scenario: &str, nodes: u32) -> std::path::PathBuf {
    let config = format!(
        "participant_count: {nodes}\n\
         scenario: {scenario}\n\
         counter_path: {counter}\n\
         work_dir: {session}\n\
         sync:\n  mode: file\n  poll_interval_ms: 5\n  timeout_ms: 60000\n",
        counter = dir.join("counter.dat").display(),
        session = dir.join("session").display(),
    );
    let path = dir.join(format!("{scenario}.yaml"));
    std::fs::write(&path, config).unwrap();
    path
}

fn launch(config: &Path) -> Vec<String> {
    let output = Command::new(env!("CARGO_BIN_EXE_node_harness"))
        .arg("launch")
        .arg(config)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "launch failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_three_processes_count_to_three_then_six() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "counter", 3);

    let first = launch(&config);
    assert_eq!(first, vec!["[0] total: 3"]);
    assert_eq!(std::fs::read_to_string(dir.path().join("counter.dat")).unwrap(), "3");

    let second = launch(&config);
    assert_eq!(second, vec!["[0] total: 6"]);
    assert!(!dir.path().join("session").exists());
}

#[test]
fn test_queue_fixture_reports_from_node_zero_only() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "queue_bool", 2);

    let lines = launch(&config);
    let mut expected = vec![
        "[0] size before empty: 10".to_string(),
        "[0] size after empty: 0".to_string(),
    ];
    expected.extend(std::iter::repeat("[0] False".to_string()).take(5));
    expected.extend(std::iter::repeat("[0] True".to_string()).take(5));
    assert_eq!(lines, expected);
}

#[test]
fn test_malformed_counter_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "counter", 2);
    std::fs::write(dir.path().join("counter.dat"), "not a number").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_node_harness"))
        .arg("launch")
        .arg(&config)
        .env("RUST_LOG", "error")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("counter.dat")).unwrap(),
        "not a number"
    );
}
