use indicatif::{ProgressBar, ProgressStyle};
use jwalk::WalkDir;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

/// Create a progress bar with the given length and label; hidden unless `visible`
pub fn create_progress_bar(len: u64, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
            label
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb
}

/// Safely create output directories and return their paths
pub fn create_output_directory(path: &Path) -> std::io::Result<PathBuf> {
    if path.exists() {
        log::warn!(
            "Directory {:?} already exists. Deleting and recreating it.",
            path
        );
        fs::remove_dir_all(path).and_then(|_| fs::create_dir_all(path))?;
    } else {
        fs::create_dir_all(path)?;
    }
    Ok(path.to_path_buf())
}

/// Thread pool bounding the number of concurrent file operations; 0 means rayon's default
pub fn create_io_thread_pool(workers: usize) -> std::io::Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(std::io::Error::other)
}

/// Local timestamp used to name backups, reports and quarantine folders
pub fn timestamp_slug() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S").to_string()
}

/// First `base`, `base_1`, `base_2`, ... that does not exist under `parent`
pub fn unique_child(parent: &Path, base: &str) -> PathBuf {
    let mut candidate = parent.join(base);
    let mut n = 1;
    while candidate.exists() {
        candidate = parent.join(format!("{}_{}", base, n));
        n += 1;
    }
    candidate
}

/// Absolute path with `.` and `..` folded and symlinks of its existing prefix
/// resolved; the remaining components need not exist yet.
pub fn resolve_path(path: &Path) -> std::io::Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other),
        }
    }

    let mut existing = normalized.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = fs::canonicalize(existing)?;
    for name in rest.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// File name `<key>.<ext>` safe to use on any platform
pub fn output_file_name(key: &str, extension: &str) -> String {
    let stem = sanitize_filename::sanitize(key);
    if extension.is_empty() {
        stem
    } else {
        format!("{}.{}", stem, extension)
    }
}

/// Write a file through a temporary sibling and rename it into place
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut writer = BufWriter::new(fs::File::create(&tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

/// Total size in bytes and number of regular files below `dir`
pub fn directory_usage(dir: &Path) -> (u64, usize) {
    if !dir.exists() {
        return (0, 0);
    }
    WalkDir::new(dir)
        .skip_hidden(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .fold((0, 0), |(bytes, files), metadata| {
            (bytes + metadata.len(), files + 1)
        })
}
