use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn lookback(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_lookback"))
        .args(args)
        .output()
        .expect("failed to run lookback")
}

fn run_scan(dir: &Path, input: &str) -> (Output, String) {
    let input_path = dir.join("input.txt");
    let output_path = dir.join("output.txt");
    fs::write(&input_path, input).unwrap();

    let output = lookback(&[
        "--no-gpu",
        "0",
        input_path.to_str().unwrap(),
        output_path.to_str().unwrap(),
    ]);
    let written = fs::read_to_string(&output_path).unwrap_or_default();

    (output, written)
}

#[test]
fn scenarios() {
    let dir = tempfile::tempdir().unwrap();

    for (input, expected) in [
        ("5\n1 2 3 4 5", "1 3 6 10 15 "),
        ("0", ""),
        ("3\n-1 1 2", "-1 0 2 "),
        ("2\n1000000 234567", "1e+06 1.23457e+06 "),
        ("2\n0.1 0.2", "0.1 0.3 "),
    ] {
        let (output, written) = run_scan(dir.path(), input);

        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        assert_eq!(written, expected, "input {input:?}");
    }
}

#[test]
fn reports_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let (output, _) = run_scan(dir.path(), "4 1 1 1 1");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Device: host worker pool"), "{stdout}");
    assert!(stdout.contains("Time: "), "{stdout}");
    assert!(stdout.contains("Groups: 1 clusters x 16 workers x 16 elements"), "{stdout}");
}

#[test]
fn many_clusters_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let n = 10_000;
    let mut input = format!("{n}\n");
    for i in 0..n {
        input.push_str(if i % 2 == 0 { "1 " } else { "2 " });
    }

    let (output, written) = run_scan(dir.path(), &input);
    assert!(output.status.success());

    let sums: Vec<f32> = written.split_whitespace().map(|t| t.parse().unwrap()).collect();
    assert_eq!(sums.len(), n);
    assert_eq!(sums[0], 1.0);
    assert_eq!(sums[n - 1], 15_000.0);
}

#[test]
fn bad_arguments_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("input.txt");
    let output_path = dir.path().join("output.txt");
    fs::write(&input_path, "1 1").unwrap();
    let input = input_path.to_str().unwrap();
    let output = output_path.to_str().unwrap();

    // Wrong argument count, bad rank, rank past the last resource.
    assert_eq!(lookback(&["--no-gpu", "0", input]).status.code(), Some(1));
    assert_eq!(lookback(&["--no-gpu", "abc", input, output]).status.code(), Some(1));
    assert_eq!(lookback(&["--no-gpu", "-1", input, output]).status.code(), Some(1));
    assert_eq!(lookback(&["--no-gpu", "5", input, output]).status.code(), Some(1));
}

#[test]
fn unreadable_paths_exit_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.txt");
    let output_path = dir.path().join("output.txt");

    let result = lookback(&["--no-gpu", "0", missing.to_str().unwrap(), output_path.to_str().unwrap()]);
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("Can't open input file"));

    let input_path = dir.path().join("input.txt");
    fs::write(&input_path, "1 1").unwrap();
    let unwritable = dir.path().join("no-such-dir").join("output.txt");

    let result = lookback(&["--no-gpu", "0", input_path.to_str().unwrap(), unwritable.to_str().unwrap()]);
    assert_eq!(result.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&result.stderr).contains("Can't open output file"));
}

#[test]
fn malformed_input_exits_with_one() {
    let dir = tempfile::tempdir().unwrap();
    let (output, _) = run_scan(dir.path(), "3 1 2");

    assert_eq!(output.status.code(), Some(1));
}
