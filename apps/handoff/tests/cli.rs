use std::path::Path;
use std::process::{Command, Output};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn handoff(args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_handoff"));
    command.env_clear();
    if let Some(path) = std::env::var_os("PATH") {
        command.env("PATH", path);
    }
    command
        .env("HANDOFF_LOG_LEVEL", "warn")
        .args(args)
        .output()
        .expect("spawn handoff")
}

const TARGET: &[&str] = &[
    "--resource-id",
    "i-1",
    "--address",
    "203.0.113.5",
    "--ssh-key",
    "/keys/todo.pem",
    "--repository-url",
    "https://git.example.test/todo.git",
];

#[test]
fn render_prints_inventory() {
    let mut args = vec!["render", "--domain", "example.test"];
    args.extend_from_slice(TARGET);
    let output = handoff(&args);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("\"ansible_host\": \"203.0.113.5\""));
    assert!(stdout.contains("\"domain_name\": \"example.test\""));
    assert!(stdout.ends_with("}\n"));
}

#[test]
fn render_without_domain_exits_with_render_code() {
    let mut args = vec!["render"];
    args.extend_from_slice(TARGET);
    let output = handoff(&args);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing required parameter 'domain'"), "{stderr}");
}

#[test]
fn status_without_record() -> TestResult {
    let work = tempfile::tempdir()?;
    let work_dir = work.path().display().to_string();
    let output = handoff(&["status", "--resource-id", "i-1", "--work-dir", &work_dir]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "i-1: no configuration run recorded\n"
    );
    Ok(())
}

#[cfg(unix)]
mod process {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    fn run_args<'a>(
        work_dir: &'a str,
        ssh: &'a str,
        runner: &'a str,
        generation: &'a str,
    ) -> Vec<&'a str> {
        let mut args = vec![
            "run",
            "--domain",
            "example.test",
            "--generation",
            generation,
            "--work-dir",
            work_dir,
            "--ssh-bin",
            ssh,
            "--runner-bin",
            runner,
            "--max-attempts",
            "2",
            "--attempt-timeout",
            "5",
            "--backoff",
            "0",
        ];
        args.extend_from_slice(TARGET);
        args
    }

    #[test]
    fn run_applies_then_skips() -> TestResult {
        let work = tempfile::tempdir()?;
        let bin = tempfile::tempdir()?;
        let calls = bin.path().join("runner-calls");
        let ssh = script(bin.path(), "ssh", "exit 0");
        let runner = script(
            bin.path(),
            "ansible-playbook",
            &format!("echo \"$@\" >> '{}'\necho 'PLAY RECAP'", calls.display()),
        );
        let work_dir = work.path().display().to_string();

        let first = handoff(&run_args(&work_dir, &ssh, &runner, "g1"));
        assert!(first.status.success(), "{first:?}");
        let stdout = String::from_utf8_lossy(&first.stdout);
        assert!(stdout.contains("PLAY RECAP"), "{stdout}");
        assert!(stdout.contains("applied: i-1"), "{stdout}");

        let second = handoff(&run_args(&work_dir, &ssh, &runner, "g1"));
        assert!(second.status.success(), "{second:?}");
        assert!(String::from_utf8_lossy(&second.stdout).contains("skipped: i-1"));

        let recorded = std::fs::read_to_string(&calls)?;
        assert_eq!(recorded.lines().count(), 1);
        assert!(recorded.contains("i-1.inventory.yml"));

        let status = handoff(&["status", "--resource-id", "i-1", "--work-dir", &work_dir]);
        assert!(String::from_utf8_lossy(&status.stdout).contains("applied generation g1"));
        Ok(())
    }

    #[test]
    fn unreachable_host_exits_with_code_3() -> TestResult {
        let work = tempfile::tempdir()?;
        let bin = tempfile::tempdir()?;
        let ssh = script(
            bin.path(),
            "ssh",
            "echo 'Connection refused' >&2; exit 255",
        );
        let runner = script(bin.path(), "ansible-playbook", "exit 0");
        let work_dir = work.path().display().to_string();

        let output = handoff(&run_args(&work_dir, &ssh, &runner, "g1"));
        assert_eq!(output.status.code(), Some(3));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("target unreachable after 2 attempt(s)"), "{stderr}");
        Ok(())
    }

    #[test]
    fn failed_playbook_exits_with_code_4() -> TestResult {
        let work = tempfile::tempdir()?;
        let bin = tempfile::tempdir()?;
        let ssh = script(bin.path(), "ssh", "exit 0");
        let runner = script(
            bin.path(),
            "ansible-playbook",
            "echo 'fatal: [i-1]: FAILED!' >&2; exit 2",
        );
        let work_dir = work.path().display().to_string();

        let output = handoff(&run_args(&work_dir, &ssh, &runner, "g1"));
        assert_eq!(output.status.code(), Some(4));
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("fatal: [i-1]: FAILED!"), "{stderr}");
        assert!(stderr.contains("configuration run failed"), "{stderr}");
        Ok(())
    }
}
