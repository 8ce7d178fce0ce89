//! Input-file parsing for `download -i <file>`: one URL per line, `#`
//! comments, blank lines skipped, anything else tracked as invalid.

use std::path::Path;

use anyhow::{Context, Result};

pub struct InvalidLine {
    pub line_number: usize,
    pub text: String,
    pub reason: &'static str,
}

pub struct BatchFile {
    pub urls: Vec<String>,
    pub invalid: Vec<InvalidLine>,
}

pub fn read(path: &Path) -> Result<BatchFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read input file {}", path.display()))?;

    let mut urls = Vec::new();
    let mut invalid = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lower = line.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            urls.push(line.to_string());
        } else {
            invalid.push(InvalidLine {
                line_number: idx + 1,
                text: line.to_string(),
                reason: "does not start with http:// or https://",
            });
        }
    }

    Ok(BatchFile { urls, invalid })
}
