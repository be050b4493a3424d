//! Proxy bundle packaging: unpack an archive into a working directory, write
//! policy files into it, and zip the tree back up.
//!
//! The archive layout (`apiproxy/policies/*.xml`, `apiproxy/proxies/<one>.xml`)
//! is what the gateway import service expects, so repacking mirrors the
//! working tree path for path.
use crate::error::{AugmentError, Result};
use crate::policy::{validate_policy_name, Policy};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const BUNDLE_ROOT: &str = "apiproxy";
pub const POLICIES_DIR: &str = "policies";
pub const PROXIES_DIR: &str = "proxies";

/// An unpacked bundle working directory.
#[derive(Debug, Clone)]
pub struct Bundle {
    root: PathBuf,
}

impl Bundle {
    /// Use an already unpacked directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(AugmentError::not_found(
                "bundle directory",
                root.display().to_string(),
            ));
        }
        Ok(Bundle { root })
    }

    /// Unpack next to the archive, into a directory named after its stem.
    pub fn unpack(archive: &Path) -> Result<Self> {
        Self::unpack_into(archive, &default_work_dir(archive))
    }

    /// Unpack `archive` into `work_dir`. An existing `work_dir` is replaced
    /// only when it holds nothing but a previous unpack (`apiproxy/`).
    pub fn unpack_into(archive: &Path, work_dir: &Path) -> Result<Self> {
        let file = File::open(archive).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => {
                AugmentError::not_found("archive", archive.display().to_string())
            }
            _ => AugmentError::io("open archive", archive, err),
        })?;
        let mut zip = ZipArchive::new(file).map_err(|err| bad_archive(archive, err))?;

        if work_dir.exists() {
            clear_previous_unpack(work_dir)?;
        }
        fs::create_dir_all(work_dir).map_err(|err| AugmentError::io("create", work_dir, err))?;

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|err| bad_archive(archive, err))?;
            let Some(rel) = entry.enclosed_name() else {
                return Err(AugmentError::BadArchive {
                    path: archive.to_path_buf(),
                    reason: format!("entry '{}' escapes the archive root", entry.name()),
                });
            };
            let out = work_dir.join(rel);
            if entry.is_dir() {
                fs::create_dir_all(&out).map_err(|err| AugmentError::io("create", &out, err))?;
                continue;
            }
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| AugmentError::io("create", parent, err))?;
            }
            let mut target =
                File::create(&out).map_err(|err| AugmentError::io("create", &out, err))?;
            io::copy(&mut entry, &mut target).map_err(|err| match err.kind() {
                io::ErrorKind::InvalidData => AugmentError::BadArchive {
                    path: archive.to_path_buf(),
                    reason: format!("{}: {err}", out.display()),
                },
                _ => AugmentError::io("extract", &out, err),
            })?;
        }

        tracing::info!(
            archive = %archive.display(),
            work_dir = %work_dir.display(),
            entries = zip.len(),
            "unpacked bundle"
        );
        Ok(Bundle {
            root: work_dir.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policies_dir(&self) -> PathBuf {
        self.root.join(BUNDLE_ROOT).join(POLICIES_DIR)
    }

    /// The single flow configuration document under `apiproxy/proxies`.
    pub fn proxy_document_path(&self) -> Result<PathBuf> {
        let dir = self.root.join(BUNDLE_ROOT).join(PROXIES_DIR);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AugmentError::not_found(
                    "proxies directory",
                    dir.display().to_string(),
                ));
            }
            Err(err) => return Err(AugmentError::io("read", &dir, err)),
        };
        let mut documents = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| AugmentError::io("read", &dir, err))?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "xml") {
                documents.push(path);
            }
        }
        documents.sort();
        match documents.len() {
            0 => Err(AugmentError::not_found(
                "proxy document",
                dir.display().to_string(),
            )),
            1 => Ok(documents.remove(0)),
            count => Err(AugmentError::Schema {
                path: dir,
                reason: format!("expected exactly one proxy document, found {count}"),
            }),
        }
    }

    /// Write `policy` as `apiproxy/policies/<name>.xml`, overwriting any
    /// existing file of that name.
    pub fn write_policy(&self, policy: &Policy) -> Result<PathBuf> {
        validate_policy_name(&policy.name)?;
        let dir = self.policies_dir();
        fs::create_dir_all(&dir).map_err(|err| AugmentError::io("create", &dir, err))?;
        let path = dir.join(policy.file_name());
        fs::write(&path, policy.text.as_bytes())
            .map_err(|err| AugmentError::io("write policy", &path, err))?;
        tracing::info!(policy = %policy.name, path = %path.display(), "wrote policy");
        Ok(path)
    }

    /// Relative paths of every file in the working tree, sorted.
    #[cfg(test)]
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_error(&self.root, err))?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    files.push(rel.to_path_buf());
                }
            }
        }
        Ok(files)
    }

    /// Zip the working tree into `archive`. The archive is written beside its
    /// final path and renamed into place.
    pub fn repack(&self, archive: &Path) -> Result<()> {
        let parent = match archive.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|err| AugmentError::io("create", parent, err))?;
        let staged = tempfile::NamedTempFile::new_in(parent)
            .map_err(|err| AugmentError::io("create", parent, err))?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(staged.as_file());
        let mut files = 0usize;
        for entry in WalkDir::new(&self.root).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|err| walk_error(&self.root, err))?;
            let path = entry.path();
            if path == staged.path() {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let name = archive_name(rel);
            if entry.file_type().is_dir() {
                writer
                    .add_directory(name, options)
                    .map_err(|err| zip_write_error(archive, err))?;
            } else if entry.file_type().is_file() {
                writer
                    .start_file(name, options)
                    .map_err(|err| zip_write_error(archive, err))?;
                let mut source =
                    File::open(path).map_err(|err| AugmentError::io("read", path, err))?;
                io::copy(&mut source, &mut writer)
                    .map_err(|err| AugmentError::io("write archive", archive, err))?;
                files += 1;
            }
        }
        writer
            .finish()
            .map_err(|err| zip_write_error(archive, err))?;
        staged
            .persist(archive)
            .map_err(|err| AugmentError::io("persist", archive, err.error))?;

        tracing::info!(archive = %archive.display(), files, "repacked bundle");
        Ok(())
    }
}

/// `build/petstore.zip` unpacks into `build/petstore`; an archive without an
/// extension gets a `.bundle` sibling instead.
pub fn default_work_dir(archive: &Path) -> PathBuf {
    match archive.extension() {
        Some(_) => archive.with_extension(""),
        None => {
            let mut name = archive.as_os_str().to_os_string();
            name.push(".bundle");
            PathBuf::from(name)
        }
    }
}

fn clear_previous_unpack(work_dir: &Path) -> Result<()> {
    let in_use = |reason: String| AugmentError::WorkDirInUse {
        path: work_dir.to_path_buf(),
        reason,
    };
    if !work_dir.is_dir() {
        return Err(in_use("not a directory".to_string()));
    }
    let entries = fs::read_dir(work_dir).map_err(|err| AugmentError::io("read", work_dir, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| AugmentError::io("read", work_dir, err))?;
        if entry.file_name() != BUNDLE_ROOT {
            return Err(in_use(format!(
                "holds '{}'",
                entry.file_name().to_string_lossy()
            )));
        }
    }
    tracing::warn!(path = %work_dir.display(), "replacing previous working directory");
    fs::remove_dir_all(work_dir).map_err(|err| AugmentError::io("remove", work_dir, err))
}

fn archive_name(rel: &Path) -> String {
    rel.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn bad_archive(path: &Path, err: ZipError) -> AugmentError {
    match err {
        ZipError::Io(err) => AugmentError::io("read archive", path, err),
        other => AugmentError::BadArchive {
            path: path.to_path_buf(),
            reason: other.to_string(),
        },
    }
}

fn zip_write_error(path: &Path, err: ZipError) -> AugmentError {
    match err {
        ZipError::Io(err) => AugmentError::io("write archive", path, err),
        other => AugmentError::io("write archive", path, io::Error::other(other.to_string())),
    }
}

fn walk_error(root: &Path, err: walkdir::Error) -> AugmentError {
    let path = err.path().unwrap_or(root).to_path_buf();
    AugmentError::io("walk", path, io::Error::other(err.to_string()))
}

#[cfg(test)]
#[path = "bundle_tests.rs"]
mod tests;
