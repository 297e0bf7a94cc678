//! Output file naming and snapshot writes.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::engine::Engine;
use crate::error::AppError;

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{suffix}"),
    };
    base.with_file_name(name)
}

/// `<stem>_<processed><.ext>` next to `base`.
pub fn checkpoint_path(base: &Path, processed: usize) -> PathBuf {
    with_suffix(base, &processed.to_string())
}

/// Final snapshot path: `base` itself, or `<stem>_final<.ext>` when splitting.
pub fn final_path(base: &Path, split: usize) -> PathBuf {
    if split > 0 {
        with_suffix(base, "final")
    } else {
        base.to_path_buf()
    }
}

/// Whether `processed` spectra (1-based count) end a checkpoint block.
pub fn is_checkpoint(processed: usize, split: usize) -> bool {
    split > 0 && processed > 0 && processed % split == 0
}

/// Persist the whole session to `path`.
pub fn write_snapshot<E: Engine>(engine: &E, path: &Path) -> Result<(), AppError> {
    engine.persist_state(path)?;
    info!(path = %path.display(), datasets = engine.dataset_count(), "session written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_keep_directory_and_extension() {
        let base = Path::new("/tmp/out/map.fit");
        assert_eq!(checkpoint_path(base, 20), PathBuf::from("/tmp/out/map_20.fit"));
        assert_eq!(final_path(base, 10), PathBuf::from("/tmp/out/map_final.fit"));
        assert_eq!(final_path(base, 0), base.to_path_buf());
        assert_eq!(checkpoint_path(Path::new("run"), 3), PathBuf::from("run_3"));
    }

    #[test]
    fn checkpoint_boundaries() {
        let hits: Vec<usize> = (1..=7).filter(|&n| is_checkpoint(n, 3)).collect();
        assert_eq!(hits, vec![3, 6]);
        assert!(!is_checkpoint(4, 0));
    }
}
