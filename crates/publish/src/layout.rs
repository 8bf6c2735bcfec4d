//! On-disk layout of published artifacts under the store root.
//!
//! ```text
//! <root>/<filename>/<hash>/<filename>   copied bytes
//! <root>/<filename>/<hash>/file.ptr     "PATH:<location>" (link mode)
//! ```
//!
//! Both are written to a temporary sibling first and renamed into place.
//! Everything here is blocking I/O: call it from
//! [`spawn_blocking`](tokio::task::spawn_blocking).

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use symsrv_storage::{ReadSeek, validate_path};

pub const POINTER_FILE: &str = "file.ptr";
const POINTER_PREFIX: &str = "PATH:";

/// `<filename>/<hash>`, relative to the store root.
///
/// Both values come from outside (a remote listing, a hash provider) so each
/// must be exactly one plain path segment.
fn symbol_dir(filename: &str, hash: &str) -> Result<PathBuf> {
    let invalid = || ErrorKind::StoreFiles(format!("{filename}/{hash}"));
    let single_segment = |s: &str| !s.is_empty() && !s.contains(['/', '\\']);
    if !single_segment(filename) || !single_segment(hash) {
        exn::bail!(invalid());
    }
    let dir = validate_path(Path::new(filename).join(hash)).or_raise(invalid)?;
    match dir.components().count() {
        2 => Ok(dir),
        _ => exn::bail!(invalid()),
    }
}

/// Relative store path, always `/`-separated regardless of platform.
fn store_path(filename: &str, hash: &str, leaf: &str) -> String {
    format!("{filename}/{hash}/{leaf}")
}

fn write_atomic(target: &Path, write: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) -> io::Result<()> {
    let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp = target.with_file_name(temp_name);
    let result = File::create(&temp).and_then(|file| {
        let mut writer = BufWriter::new(file);
        write(&mut writer)?;
        writer.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()
    });
    match result.and_then(|()| fs::rename(&temp, target)) {
        Ok(()) => Ok(()),
        Err(error) => {
            let _ = fs::remove_file(&temp);
            Err(error)
        },
    }
}

/// Copy the whole stream to `<root>/<filename>/<hash>/<filename>`.
///
/// Returns the store path relative to `root`.
pub fn copy_into(root: &Path, filename: &str, hash: &str, stream: &mut dyn ReadSeek) -> Result<String> {
    let relative = store_path(filename, hash, filename);
    let dir = root.join(symbol_dir(filename, hash)?);
    let failed = || ErrorKind::StoreFiles(relative.clone());
    fs::create_dir_all(&dir).or_raise(failed)?;
    stream.seek(SeekFrom::Start(0)).or_raise(failed)?;
    write_atomic(&dir.join(filename), |writer| io::copy(stream, writer).map(|_| ())).or_raise(failed)?;
    tracing::debug!(path = %relative, "Copied artifact into store");
    Ok(relative)
}

/// Write `<root>/<filename>/<hash>/file.ptr` pointing at `location`.
///
/// Returns the store path of the pointer file relative to `root`.
pub fn write_pointer(root: &Path, filename: &str, hash: &str, location: &str) -> Result<String> {
    let relative = store_path(filename, hash, POINTER_FILE);
    let dir = root.join(symbol_dir(filename, hash)?);
    let failed = || ErrorKind::StoreFiles(relative.clone());
    fs::create_dir_all(&dir).or_raise(failed)?;
    write_atomic(&dir.join(POINTER_FILE), |writer| write!(writer, "{POINTER_PREFIX}{location}")).or_raise(failed)?;
    tracing::debug!(path = %relative, %location, "Wrote pointer file");
    Ok(relative)
}

/// Read back the location a pointer file refers to.
pub fn read_pointer(path: &Path) -> Option<String> {
    let contents = fs::read_to_string(path).ok()?;
    contents.strip_prefix(POINTER_PREFIX).map(|location| location.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    #[test]
    fn test_copy_into_layout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut stream = Cursor::new(b"MZ binary".to_vec());
        stream.seek(SeekFrom::End(0)).unwrap();
        let relative = copy_into(temp_dir.path(), "app.exe", "ABC1", &mut stream).unwrap();
        assert_eq!(relative, "app.exe/ABC1/app.exe");
        let written = fs::read(temp_dir.path().join("app.exe").join("ABC1").join("app.exe")).unwrap();
        assert_eq!(written, b"MZ binary");
        assert!(!temp_dir.path().join("app.exe/ABC1/app.exe.tmp").exists());
    }

    #[test]
    fn test_copy_into_overwrites() {
        let temp_dir = tempfile::tempdir().unwrap();
        copy_into(temp_dir.path(), "a.pdb", "H", &mut Cursor::new(b"old contents".to_vec())).unwrap();
        copy_into(temp_dir.path(), "a.pdb", "H", &mut Cursor::new(b"new".to_vec())).unwrap();
        assert_eq!(fs::read(temp_dir.path().join("a.pdb/H/a.pdb")).unwrap(), b"new");
    }

    #[test]
    fn test_write_pointer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let location = r"\\share\builds\app.pdb";
        let relative = write_pointer(temp_dir.path(), "app.pdb", "H1", location).unwrap();
        assert_eq!(relative, "app.pdb/H1/file.ptr");
        let path = temp_dir.path().join("app.pdb/H1/file.ptr");
        assert_eq!(fs::read_to_string(&path).unwrap(), format!("PATH:{location}"));
        assert_eq!(read_pointer(&path).as_deref(), Some(location));
    }

    #[rstest]
    #[case("", "H1")]
    #[case("app.exe", "")]
    #[case("..", "H1")]
    #[case("app.exe", "..")]
    #[case("sub/app.exe", "H1")]
    #[case(r"sub\app.exe", "H1")]
    #[case("app.exe", "H1/../../x")]
    #[case(".", "H1")]
    fn test_rejects_unsafe_segments(#[case] filename: &str, #[case] hash: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = write_pointer(temp_dir.path(), filename, hash, "loc").unwrap_err();
        assert!(matches!(&*err, ErrorKind::StoreFiles(_)));
    }

    #[test]
    fn test_read_pointer_rejects_other_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("x");
        fs::write(&path, "not a pointer").unwrap();
        assert_eq!(read_pointer(&path), None);
        assert_eq!(read_pointer(&temp_dir.path().join("missing")), None);
    }
}
