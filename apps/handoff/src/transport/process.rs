use std::process::ExitStatus;

/// Human-readable exit status: `exit code N` or `signal N`.
pub fn describe_exit_status(status: ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit code {code}");
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("signal {signal}");
        }
    }

    "unknown status".to_string()
}

/// Last non-empty line of a process stream, for one-line error context.
pub fn last_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn describes_codes_and_signals() {
        assert_eq!(describe_exit_status(ExitStatus::from_raw(0)), "exit code 0");
        assert_eq!(describe_exit_status(ExitStatus::from_raw(255 << 8)), "exit code 255");
        assert_eq!(describe_exit_status(ExitStatus::from_raw(9)), "signal 9");
    }

    #[test]
    fn last_line_skips_trailing_blank_lines() {
        assert_eq!(last_line(b"warning\nPermission denied (publickey).\n\n"), "Permission denied (publickey).");
        assert_eq!(last_line(b""), "");
    }
}
