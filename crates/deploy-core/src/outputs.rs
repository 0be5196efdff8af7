//! Step outputs (`version`, `release_id`) handed back to the workflow.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use tracing::info;
use uuid::Uuid;

/// Receives named step outputs in the order they are produced.
pub trait OutputSink: Send + Sync {
    fn set_output(&self, name: &str, value: &str) -> std::io::Result<()>;
}

/// Appends outputs to the file named by `GITHUB_OUTPUT`.
#[derive(Debug, Clone)]
pub struct GitHubOutputFile {
    path: PathBuf,
}

impl GitHubOutputFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSink for GitHubOutputFile {
    fn set_output(&self, name: &str, value: &str) -> std::io::Result<()> {
        let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
        let entry = format_output(name, value, &delimiter)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.as_bytes())?;
        info!(%name, %value, "set output");
        Ok(())
    }
}

/// One output-file entry. Multi-line values use the heredoc form, which
/// is only unambiguous while `delimiter` occurs in neither name nor value.
fn format_output(name: &str, value: &str, delimiter: &str) -> io::Result<String> {
    if !value.contains('\n') {
        return Ok(format!("{name}={value}\n"));
    }
    if name.contains(delimiter) || value.contains(delimiter) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("Output {name} contains its heredoc delimiter {delimiter}"),
        ));
    }
    Ok(format!("{name}<<{delimiter}\n{value}\n{delimiter}\n"))
}

/// Prints `name=value` lines to stdout when no output file is configured.
#[derive(Debug, Clone, Default)]
pub struct StdoutOutputs;

impl OutputSink for StdoutOutputs {
    fn set_output(&self, name: &str, value: &str) -> std::io::Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{name}={value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_name_value_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        std::fs::write(&path, "existing=1\n").unwrap();

        let sink = GitHubOutputFile::new(&path);
        sink.set_output("version", "0.0.0-1639156200222").unwrap();
        sink.set_output("release_id", "2008424").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "existing=1\nversion=0.0.0-1639156200222\nrelease_id=2008424\n"
        );
    }

    #[test]
    fn multiline_values_use_fresh_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output");
        let sink = GitHubOutputFile::new(&path);
        sink.set_output("notes", "a\nb").unwrap();
        sink.set_output("notes", "c\nd").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 8);

        let first = lines[0].strip_prefix("notes<<").unwrap();
        assert!(first.starts_with("ghadelimiter_"));
        assert_eq!(&lines[1..4], &["a", "b", first]);

        let second = lines[4].strip_prefix("notes<<").unwrap();
        assert_ne!(first, second);
        assert_eq!(&lines[5..8], &["c", "d", second]);
    }

    #[test]
    fn value_carrying_delimiter_is_rejected() {
        let forged = "x\nEOF\nrelease_id=1";
        let err = format_output("version", forged, "EOF").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        assert!(format_output("EOF", "a\nb", "EOF").is_err());
        assert_eq!(
            format_output("notes", "a\nb", "EOF").unwrap(),
            "notes<<EOF\na\nb\nEOF\n"
        );
    }
}
