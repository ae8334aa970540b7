//! Policy check: production code never parks a task in sleep()
//!
//! Production code waits on I/O or on timers owned by a select loop. It
//! must not park itself to poll, to "give things time", or to synchronize
//! with another task.
//!
//! Allowed sleeps:
//! - The fixed delay between client reconnection attempts
//! - A deadline future armed for `select!` (bound and pinned, never awaited
//!   inline)
//! - The echo engine's paced fragment output (pacing is its contract, and
//!   the sleep races cancellation)
//! - Periodic tasks driven by `tokio::time::interval()`
//! - Test code

use std::fs;
use std::path::{Path, PathBuf};

/// Directories holding production code, relative to the workspace root
const SCAN_ROOTS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

#[test]
fn test_no_sleep_in_production_code() {
    let findings = scan_workspace();
    if findings.is_empty() {
        return;
    }

    eprintln!("\n❌ Parked sleeps in gateway production code:\n");
    for finding in &findings {
        eprintln!("  ❌ {finding}");
    }
    eprintln!("\n✅ Sleeps that are allowed to stay:");
    eprintln!("  - the fixed delay between client reconnect attempts");
    eprintln!("  - a deadline future armed for select! (bound and pinned, never awaited inline)");
    eprintln!("  - the echo engine pacing its fragment stream");
    eprintln!("  - periodic work driven by tokio::time::interval()");
    eprintln!("  - anything under #[cfg(test)]");
    eprintln!("\n❌ Everything else is a task parking itself:");
    eprintln!("  - polling loops belong on a timer or a watch channel");
    eprintln!("  - task handoffs belong on channels, not timing guesses");

    panic!(
        "\n{} parked sleep(s) in production code; wait on I/O or a select-owned timer instead.",
        findings.len()
    );
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

fn scan_workspace() -> Vec<String> {
    let mut findings = Vec::new();

    for root in SCAN_ROOTS {
        let dir = workspace_root().join(root);
        assert!(
            dir.is_dir(),
            "scan root {} is missing; workspace layout changed",
            dir.display()
        );

        for entry in walkdir::WalkDir::new(&dir) {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "rs") {
                scan_file(path, &mut findings);
            }
        }
    }

    findings
}

/// The lines of a file before its test module
///
/// Test modules sit at the tail of each file behind `#[cfg(test)]`.
fn production_lines(content: &str) -> Vec<&str> {
    content
        .lines()
        .take_while(|line| line.trim() != "#[cfg(test)]")
        .collect()
}

fn scan_file(path: &Path, findings: &mut Vec<String>) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    let lines = production_lines(&content);

    for (idx, line) in lines.iter().enumerate() {
        let code = match line.find("//") {
            Some(comment_start) => &line[..comment_start],
            None => line,
        };

        if !code.contains("::sleep(") && !code.contains(".sleep(") {
            continue;
        }
        if is_retry_delay(&lines, idx)
            || is_armed_deadline(code)
            || is_paced_engine_output(path, &lines, idx)
            || is_interval_pattern(&lines, idx)
        {
            continue;
        }

        findings.push(format!("{}:{}: {}", path.display(), idx + 1, line.trim()));
    }
}

/// Whether the sleep is the delay between connection attempts
fn is_retry_delay(lines: &[&str], idx: usize) -> bool {
    let range = idx.saturating_sub(15)..std::cmp::min(idx + 5, lines.len());

    lines[range].iter().any(|line| {
        let line = line.to_lowercase();
        line.contains("retry") || line.contains("reconnect") || line.contains("attempt")
    })
}

/// Whether the sleep is bound as a deadline for `select!` instead of awaited
fn is_armed_deadline(code: &str) -> bool {
    code.contains("deadline") && !code.contains(".await")
}

/// Whether the sleep paces the echo engine's fragment stream
fn is_paced_engine_output(path: &Path, lines: &[&str], idx: usize) -> bool {
    if !path.ends_with("engine/echo.rs") {
        return false;
    }

    let range = idx.saturating_sub(10)..std::cmp::min(idx + 5, lines.len());
    lines[range]
        .iter()
        .any(|line| line.to_lowercase().contains("delay"))
}

/// Whether the sleep belongs to a `tokio::time::interval` driven task
fn is_interval_pattern(lines: &[&str], idx: usize) -> bool {
    let start = idx.saturating_sub(20);
    let end = std::cmp::min(idx + 5, lines.len());

    let armed_above = lines[start..idx]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"));
    let ticks_below = lines[idx..end]
        .iter()
        .any(|line| line.contains("interval.tick()"));

    armed_above || ticks_below
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_detection() {
        let code = vec![
            "Err(error) => {",
            "    warn!(attempt, \"Connection attempt failed\");",
            "    attempt += 1;",
            "    tokio::time::sleep(self.config.reconnect_delay()).await;",
            "}",
        ];

        assert!(is_retry_delay(&code, 3), "Should detect retry context");
    }

    #[test]
    fn test_armed_deadline_is_not_a_wait() {
        assert!(is_armed_deadline(
            "    let deadline = tokio::time::sleep(descriptor.timeout);"
        ));
        assert!(
            !is_armed_deadline("    tokio::time::sleep(delay).await;"),
            "An awaited sleep is a wait even if a deadline is nearby"
        );
    }

    #[test]
    fn test_paced_engine_output_is_scoped_to_echo() {
        let code = vec![
            "if !delay.is_zero() {",
            "    tokio::time::sleep(delay).await;",
            "}",
        ];

        assert!(is_paced_engine_output(
            Path::new("gateway/core/src/engine/echo.rs"),
            &code,
            1
        ));
        assert!(
            !is_paced_engine_output(Path::new("gateway/core/src/dispatch.rs"), &code, 1),
            "Pacing is only the echo engine's contract"
        );
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn real() {}\n#[cfg(test)]\nmod tests {\n    fn helper() { sleep(); }\n}\n";
        assert_eq!(production_lines(content), vec!["fn real() {}"]);
    }

    #[test]
    fn test_bare_sleep_has_no_excuse() {
        let code = vec![
            "loop {",
            "    check_for_work();",
            "    tokio::time::sleep(Duration::from_millis(10)).await;",
            "}",
        ];

        assert!(!is_retry_delay(&code, 2));
        assert!(!is_armed_deadline(code[2]));
        assert!(!is_interval_pattern(&code, 2));
    }
}
