//! Recursive deletion with byte accounting.
//!
//! The traversal and readonly handling follow Cargo's `clean`
//! implementation. Cargo is dual-licensed under either Apache 2.0 or MIT,
//! at the user's choice.
//! Source: <https://github.com/rust-lang/cargo/blob/master/src/cargo/ops/cargo_clean.rs>

use std::io;
use std::path::Path;

/// What a removal actually freed. Aggregated across entries by the
/// pruner via `+=`.
#[derive(Debug, Default)]
pub struct Removal {
    pub num_files: u64,
    pub num_dirs: u64,
    /// Exact byte sizes, which over-count hard-linked files and ignore
    /// block rounding.
    pub total_bytes: u64,
}

impl std::ops::AddAssign for Removal {
    fn add_assign(&mut self, other: Self) {
        self.num_files += other.num_files;
        self.num_dirs += other.num_dirs;
        self.total_bytes += other.total_bytes;
    }
}

/// Recursively delete a file or directory and all its contents.
///
/// Missing paths are not an error; eviction and pruning race with other
/// processes that may have removed an entry first.
pub fn rm_rf(path: impl AsRef<Path>) -> io::Result<Removal> {
    let path = path.as_ref();
    let mut removal = Removal::default();

    let metadata = match fs_err::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(removal),
        Err(err) => return Err(err),
    };

    if !metadata.is_dir() {
        removal.num_files += 1;
        removal.total_bytes += metadata.len();
        remove_file(path)?;
        return Ok(removal);
    }

    // Children before parents, so each directory is empty by the time it
    // is visited. `remove_dir_all` covers anything added concurrently.
    for entry in walkdir::WalkDir::new(path).contents_first(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            removal.num_dirs += 1;
            fs_err::remove_dir_all(entry.path())?;
        } else {
            removal.num_files += 1;
            if let Ok(meta) = entry.metadata() {
                removal.total_bytes += meta.len();
            }
            remove_file(entry.path())?;
        }
    }

    Ok(removal)
}

/// Remove a file, lifting a readonly bit if that is what blocks deletion.
/// npm-built trees can leave readonly files behind.
fn remove_file(path: &Path) -> io::Result<()> {
    match fs_err::remove_file(path) {
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            let mut perms = path.metadata()?.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                fs_err::set_permissions(path, perms)?;
                return fs_err::remove_file(path);
            }
            Err(err)
        }
        other => other,
    }
}
