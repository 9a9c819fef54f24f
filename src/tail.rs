use std::fs;
use std::io;
use std::path::Path;

/// Read the last non-blank line of the worker's log file.
///
/// Returns `Ok(None)` for a file with no usable lines; the supervisor treats
/// that the same as a read error (worker presumed absent, not yet writing).
pub fn last_line(path: &Path) -> io::Result<Option<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .map(|line| line.to_string()))
}
