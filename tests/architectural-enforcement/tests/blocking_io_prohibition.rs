//! Policy check: async functions must not perform blocking I/O
//!
//! In an async fn, reach for `tokio::fs`, `tokio::net`, `tokio::process`,
//! or move the work into a synchronous helper that runs before the runtime
//! is involved.
//!
//! Blocking std calls remain fine in non-async functions (config loading,
//! socket path preparation, PID files: all run at startup or from sync
//! helpers) and in test code.

use std::fs;
use std::path::{Path, PathBuf};

/// Directories holding production code, relative to the workspace root
const SCAN_ROOTS: &[&str] = &["gateway/core/src", "gateway/daemon/src"];

/// Call prefixes that block, with the label reported for each
const BLOCKING_CALLS: &[(&str, &str)] = &[
    ("std::fs::", "blocking file I/O"),
    ("std::net::", "blocking network I/O"),
    ("std::process::Command", "blocking process spawn"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let findings = scan_workspace();
    if findings.is_empty() {
        return;
    }

    eprintln!("\n❌ Blocking I/O inside async gateway code:\n");
    for finding in &findings {
        eprintln!("  ❌ {finding}");
    }
    eprintln!("\n❌ These block a runtime worker thread:");
    eprintln!("  - std::fs reads, writes, and File handles");
    eprintln!("  - std::net stream types");
    eprintln!("  - std::process::Command spawns");
    eprintln!("\n✅ In an async fn, reach for:");
    eprintln!("  - the tokio::fs / tokio::net / tokio::process equivalents");
    eprintln!("  - or a sync helper invoked before the runtime is involved");

    panic!(
        "\n{} blocking call(s) inside async production code; a worker thread stalls on each.",
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

        for (needle, label) in BLOCKING_CALLS {
            if code.contains(needle) && enclosing_fn_is_async(&lines, idx) {
                findings.push(format!(
                    "{}:{}: {} [{}]",
                    path.display(),
                    idx + 1,
                    line.trim(),
                    label
                ));
            }
        }
    }
}

/// Whether the nearest enclosing function above `idx` is async
///
/// Walks upward until a function signature, `mod`, or `impl` boundary
/// settles the question. Spawned `async move` blocks count as async.
fn enclosing_fn_is_async(lines: &[&str], idx: usize) -> bool {
    for raw in lines[..idx].iter().rev() {
        let line = raw.trim();

        if line.contains("async fn ") || line.contains("async move") {
            return true;
        }
        if starts_sync_fn(line) {
            return false;
        }
        if line.starts_with("mod ") || (line.starts_with("impl ") && line.contains('{')) {
            return false;
        }
    }
    false
}

fn starts_sync_fn(line: &str) -> bool {
    (line.starts_with("fn ") || line.starts_with("pub fn ") || line.starts_with("pub(crate) fn "))
        && !line.contains("async")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_in_async_fn_is_flagged() {
        let code = vec![
            "async fn refresh_state(&mut self) {",
            "    let raw = std::fs::read_to_string(&self.path)?;",
            "}",
        ];

        assert!(enclosing_fn_is_async(&code, 1));
    }

    #[test]
    fn test_spawned_block_counts_as_async() {
        let code = vec![
            "tokio::spawn(async move {",
            "    std::fs::remove_file(&path).ok();",
            "});",
        ];

        assert!(enclosing_fn_is_async(&code, 1));
    }

    #[test]
    fn test_sync_helper_is_acceptable() {
        let code = vec![
            "fn prepare_socket_path(&self) -> Result<(), TransportError> {",
            "    std::fs::create_dir_all(parent)?;",
            "}",
        ];

        assert!(!enclosing_fn_is_async(&code, 1));
    }

    #[test]
    fn test_public_sync_fn_is_acceptable() {
        let code = vec![
            "pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {",
            "    let content = std::fs::read_to_string(config_path)?;",
            "}",
        ];

        assert!(!enclosing_fn_is_async(&code, 1));
    }

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "async fn real() {}\n#[cfg(test)]\nmod tests {\n    use std::fs::read;\n}\n";
        assert_eq!(production_lines(content), vec!["async fn real() {}"]);
    }
}
