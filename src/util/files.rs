use fs2::FileExt;

use std::{ffi, fs, path};

use crate::Result;

/// Open file for reading and writing, if `create` is true and file does not
/// exist, create an empty file along with its parent directories.
pub fn open_file_rw(file: &ffi::OsStr, create: bool) -> Result<fs::File> {
    let os_file = path::Path::new(file);

    if create {
        let parent = match os_file.parent() {
            Some(parent) => Ok(parent),
            None => err_at!(InvalidFile, msg: "{:?}", file),
        }?;
        err_at!(IOError, fs::create_dir_all(parent))?;
    }

    let mut opts = fs::OpenOptions::new();
    err_at!(
        IOError,
        opts.read(true).write(true).create(create).open(os_file),
        "open {:?}",
        file
    )
}

/// Open file for reading.
pub fn open_file_r(file: &ffi::OsStr) -> Result<fs::File> {
    let os_file = path::Path::new(file);
    err_at!(
        IOError,
        fs::OpenOptions::new().read(true).open(os_file),
        "open {:?}",
        file
    )
}

/// Take an exclusive advisory lock on file, fail if some other file
/// descriptor already holds a lock on this file.
pub fn lock_file(fd: &fs::File, file: &ffi::OsStr) -> Result<()> {
    err_at!(IOError, fd.try_lock_exclusive(), "file {:?} locked", file)
}

/// Release the lock acquired via [lock_file].
pub fn unlock_file(fd: &fs::File, file: &ffi::OsStr) -> Result<()> {
    err_at!(IOError, fd.unlock(), "unlock {:?}", file)
}

/// Return file size in bytes, ZERO if file does not exist.
pub fn file_len(file: &ffi::OsStr) -> Result<u64> {
    match fs::metadata(file) {
        Ok(m) => Ok(m.len()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(err) => err_at!(IOError, Err(err), "metadata {:?}", file),
    }
}

/// Truncate file to `len` bytes.
pub fn truncate_file(file: &ffi::OsStr, len: u64) -> Result<()> {
    let fd = open_file_rw(file, false)?;
    err_at!(IOError, fd.set_len(len), "truncate {:?} to {}", file, len)?;
    err_at!(IOError, fd.sync_all(), "sync {:?}", file)
}

/// List the name of every regular file, or symbolic link, directly
/// under `dir`. Links are not resolved.
pub fn list_files(dir: &ffi::OsStr) -> Result<Vec<ffi::OsString>> {
    let mut names = vec![];
    for entry in err_at!(IOError, fs::read_dir(dir), "read_dir {:?}", dir)? {
        let entry = err_at!(IOError, entry)?;
        let file_type = err_at!(IOError, entry.file_type())?;
        if file_type.is_file() || file_type.is_symlink() {
            names.push(entry.file_name())
        }
    }
    Ok(names)
}

/// Remove file, ignore if file is already missing.
pub fn remove_file(file: &ffi::OsStr) -> Result<()> {
    match fs::remove_file(file) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => err_at!(IOError, Err(err), "remove {:?}", file),
    }
}

#[cfg(test)]
#[path = "files_test.rs"]
mod files_test;
