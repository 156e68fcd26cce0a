// store.rs
//
// Content store: checksums and the on-disk layout of managed files.
use crate::catalog::Catalog;
use crate::errors::{ToasterError, ToasterWarning};
use crate::models::FileKind;
use log::{debug, info, warn};
use md5::{Digest, Md5};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const MD5_BUFFER: usize = 64 * 1024;

/// Lower-case hex md5 of the file contents, read in fixed-size chunks.
pub fn md5_file(path: &Path) -> Result<String, ToasterError> {
  let mut file =
    File::open(path).map_err(|e| ToasterError::File(format!("cannot open {}: {}", path.display(), e)))?;
  let mut hasher = Md5::new();
  let mut buf = vec![0u8; MD5_BUFFER];
  loop {
    let n = file.read(&mut buf)?;
    if n == 0 {
      break;
    }
    hasher.update(&buf[..n]);
  }
  Ok(format!("{:x}", hasher.finalize()))
}

/// Places files under `root` following a `{pulsar}/{obssys}` style layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentStore {
  root: PathBuf,
  layout: String,
}

impl ContentStore {
  pub fn new(root: impl Into<PathBuf>, layout: impl Into<String>) -> Self {
    Self { root: root.into(), layout: layout.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn destination_dir(&self, pulsar: &str, obssys: &str) -> PathBuf {
    let rel = self.layout.replace("{pulsar}", &sanitize(pulsar)).replace("{obssys}", &sanitize(obssys));
    self.root.join(rel)
  }

  /// Copies `src` into `dir` under its own file name.
  pub fn place(&self, src: &Path, dir: &Path, remove_source: bool) -> Result<PathBuf, ToasterError> {
    let name =
      src.file_name().ok_or_else(|| ToasterError::File(format!("{} has no file name", src.display())))?;
    self.place_at(src, &dir.join(name), remove_source)
  }

  /// Copies `src` to exactly `dest`, refusing to replace an existing file.
  /// The copy is never a rename, so it works across filesystems.
  pub fn place_at(&self, src: &Path, dest: &Path, remove_source: bool) -> Result<PathBuf, ToasterError> {
    if !src.is_file() {
      return Err(ToasterError::File(format!("{} does not exist", src.display())));
    }
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent)
        .map_err(|e| ToasterError::Archiving(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    copy_new(src, dest).map_err(|e| match e.kind() {
                          io::ErrorKind::AlreadyExists => {
                            ToasterError::Archiving(format!("refusing to overwrite existing file {}", dest.display()))
                          }
                          _ => ToasterError::Archiving(format!("cannot copy {} to {}: {}",
                                                               src.display(),
                                                               dest.display(),
                                                               e)),
                        })?;
    if remove_source {
      fs::remove_file(src)?;
      debug!("moved {} -> {}", src.display(), dest.display());
    } else {
      debug!("copied {} -> {}", src.display(), dest.display());
    }
    Ok(dest.to_path_buf())
  }
}

/// Copies `src` into a file that must not exist yet. A partial copy is
/// removed again.
fn copy_new(src: &Path, dest: &Path) -> io::Result<()> {
  let mut input = File::open(src)?;
  let mut output = OpenOptions::new().write(true).create_new(true).open(dest)?;
  if let Err(e) = io::copy(&mut input, &mut output).and_then(|_| output.sync_all()) {
    drop(output);
    if let Err(cleanup) = fs::remove_file(dest) {
      warn!("could not remove partial copy {}: {}", dest.display(), cleanup);
    }
    return Err(e);
  }
  Ok(())
}

fn sanitize(component: &str) -> String {
  component.chars().map(|c| if c == '/' || c == '\\' || c.is_whitespace() { '_' } else { c }).collect()
}

/// Moves a managed file and updates its catalog row.
///
/// Either the old path still exists and the row is unchanged, or the new path
/// exists and the row points at it.
pub fn move_file(catalog: &dyn Catalog, kind: FileKind, id: i64, new_path: &Path) -> Result<(), ToasterError> {
  if new_path.exists() {
    return Err(ToasterError::File(format!("destination {} already exists", new_path.display())));
  }
  let mut copied = false;
  let result = catalog.relocate_file(kind, id, new_path, &mut |old: &Path| {
                        if let Some(parent) = new_path.parent() {
                          fs::create_dir_all(parent)?;
                        }
                        copy_new(old, new_path).map_err(|e| {
                                                 ToasterError::File(format!("cannot copy {} to {}: {}",
                                                                            old.display(),
                                                                            new_path.display(),
                                                                            e))
                                               })?;
                        copied = true;
                        Ok(())
                      });
  match result {
    Ok(old) => {
      remove_moved_source(&old);
      info!("moved {} {} from {} to {}", kind, id, old.display(), new_path.display());
      Ok(())
    }
    Err(e) => {
      if copied {
        if let Err(cleanup) = fs::remove_file(new_path) {
          warn!("could not remove partial copy {}: {}", new_path.display(), cleanup);
        }
      }
      Err(e)
    }
  }
}

/// Removes the original of a committed move. Failure leaves a warning.
fn remove_moved_source(old: &Path) -> Option<ToasterWarning> {
  let reason = fs::remove_file(old).err()?;
  let warning = ToasterWarning::SourceNotRemoved { path: old.display().to_string(), reason: reason.to_string() };
  warning.emit();
  Some(warning)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn md5_matches_known_digest() {
    let dir = tempfile::tempdir().unwrap();
    let f = dir.path().join("a.txt");
    fs::write(&f, b"hello world").unwrap();
    assert_eq!(md5_file(&f).unwrap(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
  }

  #[test]
  fn layout_substitutes_names() {
    let store = ContentStore::new("/data", "{pulsar}/{obssys}");
    assert_eq!(store.destination_dir("J1909-3744", "GBT GUPPI"), PathBuf::from("/data/J1909-3744/GBT_GUPPI"));
  }

  #[test]
  fn place_refuses_to_clobber() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.ar");
    fs::write(&src, b"archive").unwrap();
    let store = ContentStore::new(dir.path().join("store"), "{pulsar}");
    let dest_dir = store.destination_dir("J0437-4715", "x");
    let placed = store.place(&src, &dest_dir, false).unwrap();
    assert!(placed.exists() && src.exists());
    let err = store.place(&src, &dest_dir, false).unwrap_err();
    assert_eq!(err.kind(), "ArchivingError");
  }

  #[test]
  fn place_at_never_writes_into_an_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.ar");
    fs::write(&src, b"new archive").unwrap();
    let dest = dir.path().join("store").join("taken.ar");
    fs::create_dir_all(dest.parent().unwrap()).unwrap();
    fs::write(&dest, b"old").unwrap();
    let store = ContentStore::new(dir.path().join("store"), "{pulsar}");
    let err = store.place_at(&src, &dest, true).unwrap_err();
    assert_eq!(err.kind(), "ArchivingError");
    assert_eq!(fs::read(&dest).unwrap(), b"old");
    assert!(src.exists());
    assert_eq!(copy_new(&src, &dest).unwrap_err().kind(), io::ErrorKind::AlreadyExists);
  }

  #[test]
  fn leftover_source_after_a_move_is_only_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("old.ar");
    fs::write(&old, b"archive").unwrap();
    assert_eq!(remove_moved_source(&old), None);
    assert!(!old.exists());
    // Already gone: the move still counts as done.
    match remove_moved_source(&old) {
      Some(ToasterWarning::SourceNotRemoved { path, .. }) => assert_eq!(path, old.display().to_string()),
      other => panic!("expected a warning, got {:?}", other),
    }
  }

  #[test]
  fn place_can_remove_the_source() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("in.ar");
    fs::write(&src, b"archive").unwrap();
    let store = ContentStore::new(dir.path().join("store"), "{pulsar}");
    let placed = store.place(&src, &store.destination_dir("J0437-4715", "x"), true).unwrap();
    assert!(placed.exists());
    assert!(!src.exists());
  }
}
