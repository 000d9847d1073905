// src/builder/install_file.rs

//! Self-extracting installer assembly
//!
//! An installer is the stub binary followed by a zip archive. The stub is
//! copied to the output path, the file is reopened read-write at its end and
//! the zip writer appends entries from there. Entry and central directory
//! offsets are absolute file positions, so any zip reader that starts from
//! the trailing end-of-central-directory record parses the archive, while the
//! OS still executes the file as the stub.
//!
//! [`InstallFile::complete_creation`] must be called to write the manifest
//! and the central directory. Without it the output is not a valid archive.

use super::helm::{chart_resource, chart_resource_target, chart_target};
use super::manifests::images_in_manifest;
use crate::error::{Error, Result};
use crate::fetch::{extract_single_file, ContainerEngine, Downloader};
use crate::filesystem::normalize_entry_path;
use crate::hash::{hash_file, hash_reader, ContentHash};
use crate::images::{is_image_tarball, repackage, untar_dir_for, CacheStats, DiskLayerCache, LayerSink};
use crate::package::{PackageManifest, MANIFEST_PATH};
use crate::settings::BuildSettings;
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::collections::{BTreeSet, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Target of the image tarball saved from the container engine
pub const IMAGES_TARGET: &str = "data/agent/images/images.tar";

const MANIFESTS_DIR: &str = "data/server/manifests";

/// Mode for entries that do not come from a file on disk
fn default_entry_mode(target: &str) -> u32 {
    let executable_tree = ["bin", "lib"]
        .iter()
        .any(|dir| target == *dir || target.starts_with(&format!("{}/", dir)));
    if executable_tree {
        0o755
    } else {
        0o644
    }
}

/// Zip timestamps have no zone; UTC keeps builds reproducible
fn zip_time(time: DateTime<Utc>) -> zip::DateTime {
    let year = u16::try_from(time.year()).unwrap_or(1980);
    zip::DateTime::from_date_and_time(
        year,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .unwrap_or_default()
}

/// Zip writer plus the bookkeeping that must stay in step with it
struct ArchiveWriter {
    zip: ZipWriter<File>,
    manifest: PackageManifest,
    added_files: HashSet<String>,
    compression_level: u32,
}

impl ArchiveWriter {
    fn options(&self, mode: u32, modified: DateTime<Utc>, size: u64) -> FileOptions {
        let options = if self.compression_level == 0 {
            FileOptions::default().compression_method(CompressionMethod::Stored)
        } else {
            FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .compression_level(Some(self.compression_level as i32))
        };

        options
            .unix_permissions(mode)
            .last_modified_time(zip_time(modified))
            .large_file(size >= u64::from(u32::MAX))
    }

    /// Hash `data`, copy it into a new entry and check the byte count
    fn copy_entry<R: Read + Seek>(
        &mut self,
        target: &str,
        data: &mut R,
        mode: u32,
        modified: DateTime<Utc>,
    ) -> Result<ContentHash> {
        let expected = data.seek(SeekFrom::End(0))?;
        data.seek(SeekFrom::Start(0))?;
        let (hash, _) = hash_reader(data)?;
        data.seek(SeekFrom::Start(0))?;

        let options = self.options(mode, modified, expected);
        self.zip.start_file(target, options)?;
        let written = io::copy(data, &mut self.zip)?;

        if written != expected {
            return Err(Error::ShortWrite {
                path: target.to_string(),
                expected,
                written,
            });
        }

        Ok(hash)
    }

    /// Write a normalized `target` once and record its hash in the manifest
    fn write_entry<R: Read + Seek>(
        &mut self,
        target: &str,
        data: &mut R,
        mode: u32,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        if target == MANIFEST_PATH {
            return Err(Error::BuildInput(format!("{} is reserved", MANIFEST_PATH)));
        }
        if !self.added_files.insert(target.to_string()) {
            debug!("File {} already added to installer", target);
            return Ok(());
        }

        debug!("Adding {} to installer", target);
        let hash = self.copy_entry(target, data, mode, modified)?;
        self.manifest.register_file(target, &hash)?;
        Ok(())
    }
}

impl LayerSink for ArchiveWriter {
    fn add_entry<R: Read + Seek>(
        &mut self,
        path: &str,
        data: &mut R,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        let target = normalize_entry_path(path)?;
        let mode = default_entry_mode(&target);
        self.write_entry(&target, data, mode, modified)
    }
}

/// Summary of a finished build
#[derive(Debug, Clone)]
pub struct BuiltInstaller {
    pub path: PathBuf,
    pub manifest: PackageManifest,
    /// Length of the stub, where the zip data begins
    pub archive_offset: u64,
    pub cache_stats: CacheStats,
}

/// An installer under construction
pub struct InstallFile {
    path: PathBuf,
    archive_offset: u64,
    work_dir: PathBuf,
    docker_images: BTreeSet<String>,
    cache: DiskLayerCache,
    archive: ArchiveWriter,
}

impl InstallFile {
    /// Copy the installer stub to `output` and open the archive after it
    pub fn start_creation(
        settings: &BuildSettings,
        output: &Path,
        manifest: PackageManifest,
    ) -> Result<Self> {
        let name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Building {}", name);

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::copy(&settings.installer_stub, output).map_err(|source| Error::MissingInput {
            path: settings.installer_stub.clone(),
            source,
        })?;
        fs::set_permissions(output, fs::Permissions::from_mode(0o755))?;

        // Not append mode: the zip writer seeks back to patch local headers
        let mut file = OpenOptions::new().read(true).write(true).open(output)?;
        let archive_offset = file.seek(SeekFrom::End(0))?;
        debug!("Installer stub is {} bytes, archive starts there", archive_offset);

        Ok(Self {
            path: output.to_path_buf(),
            archive_offset,
            work_dir: settings.work_dir.clone(),
            docker_images: BTreeSet::new(),
            cache: DiskLayerCache::new(&settings.cache_dir, settings.compression_level),
            archive: ArchiveWriter {
                zip: ZipWriter::new(file),
                manifest,
                added_files: HashSet::new(),
                compression_level: settings.compression_level,
            },
        })
    }

    pub fn manifest(&self) -> &PackageManifest {
        &self.archive.manifest
    }

    pub fn manifest_mut(&mut self) -> &mut PackageManifest {
        &mut self.archive.manifest
    }

    pub fn archive_offset(&self) -> u64 {
        self.archive_offset
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.docker_images.iter().map(String::as_str)
    }

    /// Has `target` already been written in this build?
    pub fn contains(&self, target: &str) -> bool {
        normalize_entry_path(target)
            .map(|t| self.archive.added_files.contains(&t))
            .unwrap_or(false)
    }

    /// Add the file at `source` as `target`
    ///
    /// A target that was already added is skipped. Image tarballs under
    /// `data/agent/images/` are repackaged into an `.untar` tree instead of
    /// being stored as-is.
    pub fn add_file(&mut self, source: &Path, target: &str) -> Result<()> {
        let target = normalize_entry_path(target)?;
        if self.archive.added_files.contains(&target) {
            debug!(
                "File {} already added to installer. Not adding {}",
                target,
                source.display()
            );
            return Ok(());
        }

        let mut file = File::open(source).map_err(|e| Error::MissingInput {
            path: source.to_path_buf(),
            source: e,
        })?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(Error::BuildInput(format!(
                "{} is a directory, use add_directory",
                source.display()
            )));
        }

        if is_image_tarball(&target) {
            self.archive.added_files.insert(target.clone());
            repackage(source, &untar_dir_for(&target), &mut self.cache, &mut self.archive)?;
            return Ok(());
        }

        let mode = metadata.permissions().mode() & 0o7777;
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        self.archive.write_entry(&target, &mut file, mode, modified)
    }

    /// Add in-memory or generated content as `target`
    pub fn add_file_data<R: Read + Seek>(
        &mut self,
        data: &mut R,
        target: &str,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        let target = normalize_entry_path(target)?;
        let mode = default_entry_mode(&target);
        self.archive.write_entry(&target, data, mode, modified)
    }

    /// Add every file under `source` below `target_base`, in sorted order
    pub fn add_directory(&mut self, source: &Path, target_base: &str) -> Result<usize> {
        if !source.is_dir() {
            return Err(Error::MissingInput {
                path: source.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
            });
        }

        let mut added = 0;
        for entry in WalkDir::new(source).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| Error::InvalidPath(e.to_string()))?;
            let target = format!("{}/{}", target_base.trim_end_matches('/'), relative.to_string_lossy());
            self.add_file(entry.path(), &target)?;
            added += 1;
        }
        Ok(added)
    }

    /// Queue a container image; all images are saved at completion
    pub fn add_image(&mut self, tag: &str) {
        if self.docker_images.insert(tag.to_string()) {
            info!("Including image {}", tag);
        }
    }

    /// Add a Kubernetes manifest and queue every image it references
    pub fn add_kubernetes_manifest(&mut self, source: &Path) -> Result<()> {
        let content = fs::read_to_string(source).map_err(|e| Error::MissingInput {
            path: source.to_path_buf(),
            source: e,
        })?;

        let images = images_in_manifest(&content).map_err(|e| {
            Error::BuildInput(format!("Error parsing {}: {}", source.display(), e))
        })?;
        for image in images {
            self.add_image(&image);
        }

        let file_name = source
            .file_name()
            .ok_or_else(|| Error::InvalidPath(source.display().to_string()))?
            .to_string_lossy();
        self.add_file(source, &format!("{}/{}", MANIFESTS_DIR, file_name))
    }

    /// Add a packaged Helm chart under its content-hashed name, plus the
    /// `HelmChart` resource that references it
    pub fn add_helm_chart(&mut self, chart: &Path, chart_id: &str, values: Option<&str>) -> Result<()> {
        let hash = hash_file(chart).map_err(|e| Error::MissingInput {
            path: chart.to_path_buf(),
            source: e,
        })?;

        let resource = chart_resource(chart_id, &hash, values)?;
        self.add_file_data(
            &mut Cursor::new(resource.into_bytes()),
            &chart_resource_target(chart_id),
            Utc::now(),
        )?;
        self.add_file(chart, &chart_target(chart_id, &hash))
    }

    pub fn add_downloaded_file(&mut self, downloader: &Downloader, url: &str, target: &str) -> Result<()> {
        let local = downloader.download(url)?;
        self.add_file(&local, target)
    }

    /// Download a `.tar.gz` and add one file from inside it
    pub fn add_downloaded_nested_file(
        &mut self,
        downloader: &Downloader,
        url: &str,
        inner: &str,
        target: &str,
    ) -> Result<()> {
        let archive = downloader.download(url)?;
        let extracted = extract_single_file(&archive, inner)?;
        self.add_file(&extracted, target)
    }

    fn save_docker_images(&mut self, engine: &dyn ContainerEngine) -> Result<()> {
        if self.docker_images.is_empty() {
            return Ok(());
        }

        let tags: Vec<String> = self.docker_images.iter().cloned().collect();
        for tag in &tags {
            engine.pull(tag).map_err(|e| {
                Error::BuildInput(format!("error pulling {}: {}", tag, e))
            })?;
        }

        info!("Collecting {} container image(s)", tags.len());
        fs::create_dir_all(&self.work_dir)?;
        let tarball = self.work_dir.join(format!("images-{}.tar", Uuid::new_v4()));
        engine
            .save(&tags, &tarball)
            .map_err(|e| Error::BuildInput(format!("error collecting containers: {}", e)))?;

        let added = self.add_file(&tarball, IMAGES_TARGET);
        if let Err(e) = fs::remove_file(&tarball) {
            warn!("Cannot remove {}: {}", tarball.display(), e);
        }
        added
    }

    /// Save queued images, write the manifest and close the archive
    pub fn complete_creation(mut self, engine: &dyn ContainerEngine) -> Result<BuiltInstaller> {
        self.save_docker_images(engine)?;

        let encoded = self.archive.manifest.encode()?;
        self.archive.copy_entry(
            MANIFEST_PATH,
            &mut Cursor::new(encoded.into_bytes()),
            0o644,
            Utc::now(),
        )?;

        let mut file = self.archive.zip.finish()?;
        file.flush()?;
        file.sync_all()?;

        info!(
            "Built {} with {} files",
            self.path.display(),
            self.archive.manifest.files.len()
        );

        Ok(BuiltInstaller {
            path: self.path,
            manifest: self.archive.manifest,
            archive_offset: self.archive_offset,
            cache_stats: self.cache.stats(),
        })
    }
}
