//! Disk I/O and file lifecycle.
//!
//! Preallocates temp files (fallocate on Linux when available, else set_len),
//! supports concurrent offset writes (pwrite), fsync policy, and atomic
//! finalize (rename from `.part` to final name).

mod builder;
mod compile;
mod writer;

pub use builder::StorageWriterBuilder;
pub use compile::{compile_parts, part_dir, part_path};
pub use writer::StorageWriter;

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `file.iso` → `file.iso.part`).
pub fn temp_path(final_path: &std::path::Path) -> std::path::PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(".part");
    std::path::PathBuf::from(o)
}
