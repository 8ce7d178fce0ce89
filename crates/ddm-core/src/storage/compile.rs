//! Compile per-part files into the final destination file.

use anyhow::{Context, Result};
use std::io::{Read, Write};
use std::path::Path;

use crate::model::Part;

/// Directory holding a download's part files: `<data_dir>/<hash>/`.
pub fn part_dir(data_dir: &Path, hash: &str) -> std::path::PathBuf {
    data_dir.join(hash)
}

/// Path to a single part file, named by its offset.
pub fn part_path(data_dir: &Path, hash: &str, offset: u64) -> std::path::PathBuf {
    part_dir(data_dir, hash).join(offset.to_string())
}

/// Stream `parts` (already in offset order) into `destination`, calling
/// `on_progress(n_bytes)` after each chunk copied. For a single part, the
/// part file is renamed into place with no byte copy.
pub fn compile_parts(
    parts: &[&Part],
    destination: &Path,
    mut on_progress: impl FnMut(u64),
) -> Result<()> {
    if parts.len() == 1 {
        std::fs::rename(&parts[0].path, destination).with_context(|| {
            format!(
                "rename {} to {}",
                parts[0].path.display(),
                destination.display()
            )
        })?;
        on_progress(parts[0].size);
        return Ok(());
    }

    let mut out = std::fs::File::options()
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
        .with_context(|| format!("create destination {}", destination.display()))?;

    let mut buf = [0u8; 64 * 1024];
    for part in parts {
        let mut f = std::fs::File::open(&part.path)
            .with_context(|| format!("open part file {}", part.path.display()))?;
        loop {
            let n = f.read(&mut buf).context("read part file")?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).context("write destination file")?;
            on_progress(n as u64);
        }
    }
    out.sync_all().context("sync destination file")?;

    for part in parts {
        let _ = std::fs::remove_file(&part.path);
    }
    Ok(())
}
