//! Smoke test for the `tether-bridge` binary.

#[cfg(unix)]
#[test]
fn binary_starts_and_stops_cleanly() {
    use std::io::{BufRead, BufReader};
    use std::process::{Command, Stdio};

    let bin = env!("CARGO_BIN_EXE_tether-bridge");

    // Nothing listens on the remote port; the bridge keeps retrying until SIGINT.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let config_content = format!(
        "[remote]\nport = {port}\ntransport_retries = 0\n\n[server]\nbind = \"127.0.0.1:0\"\n"
    );
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    std::io::Write::write_all(&mut config_file, config_content.as_bytes()).unwrap();

    // tracing_subscriber writes to stdout by default
    let stdout_file = tempfile::NamedTempFile::new().unwrap();
    let stdout_writer = stdout_file.reopen().unwrap();

    let child = Command::new(bin)
        .args(["--config", config_file.path().to_str().unwrap()])
        .args(["--retry-count", "-1"])
        .env("RUST_LOG_FORMAT", "json")
        .env("RUST_LOG", "info")
        .stdout(Stdio::from(stdout_writer))
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn tether-bridge");

    let pid = child.id();

    std::thread::sleep(std::time::Duration::from_millis(500));

    Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()
        .expect("failed to send SIGINT");

    // Kill after 5s if it hangs.
    let guard = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_secs(5));
        let _ = Command::new("kill")
            .args(["-9", &pid.to_string()])
            .status();
    });

    let output = child.wait_with_output().expect("failed to wait on child");
    drop(guard);

    assert!(
        output.status.success(),
        "expected exit code 0, got {:?}",
        output.status.code()
    );

    let stdout_content = std::fs::read_to_string(stdout_file.path()).unwrap();
    let lines: Vec<String> = BufReader::new(stdout_content.as_bytes())
        .lines()
        .map_while(Result::ok)
        .collect();
    assert!(
        lines.iter().any(|l| l.starts_with('{')),
        "expected at least one JSON log line, got: {stdout_content}"
    );
    assert!(
        lines.iter().any(|l| l.contains("bridge shutdown complete")),
        "expected a clean shutdown log line, got: {stdout_content}"
    );
}

#[test]
fn missing_config_fails() {
    let bin = env!("CARGO_BIN_EXE_tether-bridge");
    let dir = tempfile::tempdir().unwrap();
    let output = std::process::Command::new(bin)
        .args(["--config", dir.path().join("absent.toml").to_str().unwrap()])
        .output()
        .expect("failed to run tether-bridge");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load config"), "stderr: {stderr}");
}
