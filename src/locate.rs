use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::stage::{GADGET_CONFIG_NAME, GADGET_SONAME};

/// Module names that mark the application's primary native code in most
/// build layouts. Checked before falling back to the size heuristic.
pub const PRIMARY_MODULE_NAMES: [&str; 2] = ["libmain.so", "libnative-lib.so"];

/// Immediate children of the native-libraries root, one per ABI, in a
/// stable order.
pub fn arch_dirs(lib_root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(lib_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Picks the module to patch inside one architecture directory, or `None`
/// when there is nothing to do. The largest-file fallback is a stand-in
/// for real entry-point analysis and may mis-select on unusual layouts.
pub fn select_primary_module(arch_dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut candidates: Vec<(String, PathBuf, u64)> = Vec::new();
    for entry in fs::read_dir(arch_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("so") {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        // artifacts staged by an earlier run are never injection targets
        if name == GADGET_SONAME || name == GADGET_CONFIG_NAME {
            continue;
        }
        let size = entry.metadata()?.len();
        candidates.push((name, path, size));
    }
    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    for conventional in PRIMARY_MODULE_NAMES {
        if let Some((_, path, _)) = candidates
            .iter()
            .find(|(name, _, _)| name.as_str() == conventional)
        {
            return Ok(Some(path.clone()));
        }
    }

    let mut best: Option<(PathBuf, u64)> = None;
    for (_, path, size) in candidates {
        if best.as_ref().map_or(true, |(_, largest)| size > *largest) {
            best = Some((path, size));
        }
    }
    Ok(best.map(|(path, _)| path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, len: usize) {
        fs::write(path, vec![0u8; len]).unwrap();
    }

    #[test]
    fn conventional_name_wins_over_size() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("libhuge.so"), 4096);
        touch(&tmp.path().join("libmain.so"), 16);

        let selected = select_primary_module(tmp.path()).unwrap().unwrap();
        assert_eq!(selected.file_name().unwrap(), "libmain.so");
    }

    #[test]
    fn falls_back_to_largest_module() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("liba.so"), 128);
        touch(&tmp.path().join("libb.so"), 4096);
        touch(&tmp.path().join("libc.so"), 512);

        let selected = select_primary_module(tmp.path()).unwrap().unwrap();
        assert_eq!(selected.file_name().unwrap(), "libb.so");
    }

    #[test]
    fn empty_directory_signals_skip() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join("notes.txt"), 64);
        assert!(select_primary_module(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn previously_staged_gadget_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        touch(&tmp.path().join(GADGET_SONAME), 1 << 20);
        touch(&tmp.path().join(GADGET_CONFIG_NAME), 128);
        touch(&tmp.path().join("libapp.so"), 256);

        let selected = select_primary_module(tmp.path()).unwrap().unwrap();
        assert_eq!(selected.file_name().unwrap(), "libapp.so");
    }

    #[test]
    fn lists_arch_dirs_sorted() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("x86")).unwrap();
        fs::create_dir(tmp.path().join("arm64-v8a")).unwrap();
        touch(&tmp.path().join("stray.txt"), 4);

        let dirs = arch_dirs(tmp.path()).unwrap();
        let names: Vec<_> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["arm64-v8a", "x86"]);
    }
}
