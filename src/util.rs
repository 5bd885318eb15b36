use anyhow::{Context, Result};
use memmap2::Mmap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct InputEntry {
    /// Forward-slash path relative to the bundle base directory.
    pub relative_path: String,
    pub full_path: PathBuf,
}

/// Collect the regular files under each input path, relative to `base`.
/// Paths use forward slashes for cross-platform consistency in the bundle.
/// Results are de-duplicated and sorted by relative path; `exclude` (usually
/// the bundle being written) is left out.
pub fn collect_inputs(
    inputs: &[PathBuf],
    base: &Path,
    exclude: Option<&Path>,
) -> Result<Vec<InputEntry>> {
    let base = base
        .canonicalize()
        .with_context(|| format!("Failed to canonicalize base: {}", base.display()))?;
    let exclude = exclude.and_then(|p| p.canonicalize().ok());

    let mut entries = BTreeMap::new();

    for input in inputs {
        let input = input
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize input: {}", input.display()))?;

        for entry in WalkDir::new(&input).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to read directory entry in {}", input.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let full_path = entry.path().to_path_buf();
            if exclude.as_deref() == Some(full_path.as_path()) {
                continue;
            }

            let relative = full_path.strip_prefix(&base).with_context(|| {
                format!(
                    "{} is not inside the base directory {}",
                    full_path.display(),
                    base.display()
                )
            })?;
            let relative_str = relative
                .to_str()
                .with_context(|| format!("Non-UTF8 path: {}", relative.display()))?
                .replace('\\', "/");

            entries.insert(
                relative_str.clone(),
                InputEntry {
                    relative_path: relative_str,
                    full_path,
                },
            );
        }
    }

    Ok(entries.into_values().collect())
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    // SAFETY: We only read from this mapping; no concurrent modification of these files.
    unsafe {
        Mmap::map(&file)
            .with_context(|| format!("Failed to memory-map file: {}", path.display()))
    }
}

/// Read a whole file, mapping it when non-empty.
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata: {}", path.display()))?
        .len();
    if len == 0 {
        return Ok(Vec::new());
    }
    Ok(mmap_file(path)?.to_vec())
}

/// Compute the BLAKE3 hash of a byte slice.
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// True when the regular file at `path` already holds exactly `data`.
pub fn same_content(path: &Path, data: &[u8]) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() == data.len() as u64 => read_file(path)
            .map(|existing| hash_bytes(&existing) == hash_bytes(data))
            .unwrap_or(false),
        _ => false,
    }
}
