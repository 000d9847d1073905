// src/images/import.rs

//! Runtime-side import of repackaged images
//!
//! An `.untar` directory is turned back into the tarball the container
//! runtime expects. Layer sizes come from the gzip trailer so tar headers
//! can be written before the layer is decompressed.

use crate::error::{Error, Result};
use crate::hash::hash_file;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Records the `manifest.json` hash of the last successful import
pub const IMPORTED_INFO: &str = "imported.info";

const MANIFEST_JSON: &str = "manifest.json";

/// Uncompressed size stored in the last 4 bytes of a gzip file
///
/// The trailer holds the size modulo 2^32.
pub fn raw_size(path: &Path) -> Result<u32> {
    let mut file = File::open(path)?;
    if file.metadata()?.len() < 18 {
        return Err(Error::InvalidPath(format!("{} is not a gzip file", path.display())));
    }
    file.seek(SeekFrom::End(-4))?;
    let mut trailer = [0u8; 4];
    file.read_exact(&mut trailer)?;
    Ok(u32::from_le_bytes(trailer))
}

/// Tar stream over an `.untar` directory
pub struct ImportStream {
    root: PathBuf,
}

impl ImportStream {
    pub fn new(untar_dir: &Path) -> Self {
        Self {
            root: untar_dir.to_path_buf(),
        }
    }

    /// Write the image tarball to `out`
    ///
    /// `*.tar.gz` entries are decompressed back to `*.tar`, and the import
    /// bookkeeping file is left out.
    pub fn write_to<W: Write>(&self, out: W) -> Result<()> {
        let mut builder = tar::Builder::new(out);

        let entries = WalkDir::new(&self.root).sort_by_file_name();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .map_err(|e| Error::InvalidPath(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            if relative == IMPORTED_INFO {
                continue;
            }

            let metadata = entry.metadata().map_err(|e| Error::Io(e.into()))?;
            let mtime = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs())
                .unwrap_or(0);

            let mut header = tar::Header::new_gnu();
            header.set_mode(0o644);
            header.set_mtime(mtime);

            match relative.strip_suffix(".tar.gz") {
                Some(stem) => {
                    header.set_size(u64::from(raw_size(entry.path())?));
                    header.set_cksum();
                    let data = GzDecoder::new(File::open(entry.path())?);
                    builder.append_data(&mut header, format!("{}.tar", stem), data)?;
                }
                None => {
                    header.set_size(metadata.len());
                    header.set_cksum();
                    builder.append_data(&mut header, &relative, File::open(entry.path())?)?;
                }
            }
        }

        builder.into_inner()?.flush()?;
        Ok(())
    }
}

/// Loads an image tarball into the container runtime
pub trait ImageImporter {
    fn import(&self, untar_dir: &Path) -> Result<()>;
}

/// Imports through the runtime's `ctr` client
pub struct CtrImporter {
    program: PathBuf,
    socket: PathBuf,
    namespace: String,
}

impl CtrImporter {
    pub fn new(program: &Path, socket: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            socket: socket.to_path_buf(),
            namespace: "k8s.io".to_string(),
        }
    }
}

impl ImageImporter for CtrImporter {
    fn import(&self, untar_dir: &Path) -> Result<()> {
        let collaborator = |message: String| Error::Collaborator {
            tool: "ctr".to_string(),
            message,
        };

        let mut child = Command::new(&self.program)
            .arg("--address")
            .arg(&self.socket)
            .args(["--namespace", &self.namespace, "images", "import", "--all-platforms", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| collaborator(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| collaborator("stdin not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| collaborator("stderr not captured".to_string()))?;

        // Drained on its own thread so a chatty child never blocks the stream
        let drain = thread::spawn(move || {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text);
            text
        });

        let streamed = ImportStream::new(untar_dir).write_to(stdin);

        let status = child.wait().map_err(|e| collaborator(e.to_string()))?;
        let errors = drain.join().unwrap_or_default();

        if !status.success() {
            let message = errors
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("exited with {}", status));
            return Err(collaborator(message));
        }
        streamed
    }
}

/// Import every `*.untar` directory under `images_dir` that changed since
/// its last import
///
/// Returns how many directories were imported.
pub fn import_packaged_images(images_dir: &Path, importer: &dyn ImageImporter) -> Result<usize> {
    if !images_dir.is_dir() {
        debug!("No packaged images at {}", images_dir.display());
        return Ok(0);
    }

    let mut untar_dirs: Vec<PathBuf> = fs::read_dir(images_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir() && p.extension().is_some_and(|ext| ext == "untar"))
        .collect();
    untar_dirs.sort();

    let mut imported = 0;
    for dir in untar_dirs {
        let manifest = dir.join(MANIFEST_JSON);
        if !manifest.is_file() {
            warn!("Invalid untar dir {}: no {}", dir.display(), MANIFEST_JSON);
            continue;
        }

        let current = hash_file(&manifest)?;
        let info_path = dir.join(IMPORTED_INFO);
        match fs::read_to_string(&info_path) {
            Ok(previous) if previous.trim() == current.as_str() => {
                debug!("{} has already been imported", dir.display());
                continue;
            }
            Ok(_) => info!("{} changed since it was last imported", dir.display()),
            Err(_) => info!("{} has not been imported before", dir.display()),
        }

        importer.import(&dir)?;
        imported += 1;

        if let Err(e) = fs::write(&info_path, current.as_str()) {
            warn!("Cannot write {}: {}", info_path.display(), e);
        }
    }

    Ok(imported)
}
