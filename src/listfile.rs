//! Line-oriented list file editing (e.g. /etc/ca-certificates.conf).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Editor for a file holding one record per line.
#[derive(Debug, Clone)]
pub struct ListFile {
    path: PathBuf,
}

impl ListFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => Ok(s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("read list file: {}", self.path.display())),
        }
    }

    fn write(&self, lines: &[&str]) -> Result<()> {
        if let Some(p) = self.path.parent() {
            std::fs::create_dir_all(p)?;
        }
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .with_context(|| format!("write list file: {}", self.path.display()))
    }

    pub fn contains(&self, line: &str) -> Result<bool> {
        Ok(self.read()?.lines().any(|l| l.trim_end() == line))
    }

    /// Append `line` unless already present. Returns whether the file changed.
    pub fn ensure_line(&self, line: &str) -> Result<bool> {
        let content = self.read()?;
        if content.lines().any(|l| l.trim_end() == line) {
            return Ok(false);
        }
        let mut lines: Vec<&str> = content.lines().collect();
        lines.push(line);
        self.write(&lines)?;
        Ok(true)
    }

    /// Drop every occurrence of `line`. Returns whether the file changed.
    pub fn remove_line(&self, line: &str) -> Result<bool> {
        let content = self.read()?;
        let lines: Vec<&str> = content.lines().filter(|l| l.trim_end() != line).collect();
        if lines.len() == content.lines().count() {
            return Ok(false);
        }
        self.write(&lines)?;
        Ok(true)
    }
}
