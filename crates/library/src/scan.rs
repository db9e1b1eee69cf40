use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Every regular file under `root`, sorted. Unreadable entries are skipped.
pub fn walk_target(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_nested_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("top.mp3"), b"x").unwrap();
        fs::write(dir.path().join("a/b/deep.flac"), b"x").unwrap();

        let files = walk_target(dir.path());
        assert_eq!(
            files,
            vec![dir.path().join("a/b/deep.flac"), dir.path().join("top.mp3")]
        );
    }

    #[test]
    fn missing_root_yields_nothing() {
        assert!(walk_target(Path::new("/definitely/not/here")).is_empty());
    }
}
