// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use nix::unistd::{getgid, Group};
use std::cell::{Cell, RefCell};
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use stowage::fetch::{ChartSource, ContainerEngine};
use stowage::install::{ProcessHandle, ProcessLocator};
use stowage::{BuildSettings, Result};
use tempfile::TempDir;

pub const STUB: &[u8] = b"#!/bin/sh\necho installer stub\n";

/// Name of the group the tests run as, used as the admin group
pub fn admin_group() -> String {
    Group::from_gid(getgid())
        .unwrap()
        .map(|g| g.name)
        .unwrap_or_else(|| "root".to_string())
}

/// Build settings with a stub and cache inside `dir`
pub fn build_settings(dir: &Path) -> BuildSettings {
    let stub = dir.join("stub");
    if !stub.exists() {
        fs::write(&stub, STUB).unwrap();
    }
    BuildSettings::new(&dir.join("cache"), 6, &stub).unwrap()
}

pub fn write_file(path: &Path, content: &[u8], mode: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
}

pub fn mode_of(path: &Path) -> u32 {
    fs::metadata(path).unwrap().permissions().mode() & 0o7777
}

/// Write a `docker save` style tarball with one layer per `(id, data)`
pub fn write_image_tar(path: &Path, layers: &[(&str, &[u8])]) {
    let mut builder = tar::Builder::new(File::create(path).unwrap());

    let layer_paths: Vec<String> = layers
        .iter()
        .map(|(id, _)| format!("\"{}/layer.tar\"", id))
        .collect();
    let manifest = format!(
        "[{{\"Config\":\"config.json\",\"RepoTags\":[\"demo:1\"],\"Layers\":[{}]}}]",
        layer_paths.join(",")
    );

    let mut entries: Vec<(String, Vec<u8>)> = vec![("manifest.json".to_string(), manifest.into_bytes())];
    for (id, data) in layers {
        entries.push((format!("{}/layer.tar", id), data.to_vec()));
    }

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap();
}

/// Container engine that saves a canned single-layer image
#[derive(Default)]
pub struct FakeEngine {
    pub pulled: RefCell<Vec<String>>,
}

impl ContainerEngine for FakeEngine {
    fn pull(&self, tag: &str) -> Result<()> {
        self.pulled.borrow_mut().push(tag.to_string());
        Ok(())
    }

    fn save(&self, _tags: &[String], dest: &Path) -> Result<()> {
        write_image_tar(dest, &[("layer1", b"first layer bytes")]);
        Ok(())
    }
}

/// Chart source that never downloads and renders charts with no workloads
pub struct NoCharts;

impl ChartSource for NoCharts {
    fn download(&self, repo: &str, chart: &str, _version: &str, _dest: &Path) -> Result<PathBuf> {
        panic!("unexpected chart download {} from {}", chart, repo);
    }

    fn render(&self, _chart: &Path, _values: Option<&Path>) -> Result<String> {
        Ok(String::new())
    }
}

/// Chart source rendering every chart to a fixed document
pub struct RenderedCharts {
    pub yaml: String,
    pub rendered: RefCell<Vec<(PathBuf, Option<PathBuf>)>>,
}

impl RenderedCharts {
    pub fn new(yaml: &str) -> Self {
        Self {
            yaml: yaml.to_string(),
            rendered: RefCell::new(Vec::new()),
        }
    }
}

impl ChartSource for RenderedCharts {
    fn download(&self, repo: &str, chart: &str, _version: &str, _dest: &Path) -> Result<PathBuf> {
        panic!("unexpected chart download {} from {}", chart, repo);
    }

    fn render(&self, chart: &Path, values: Option<&Path>) -> Result<String> {
        self.rendered
            .borrow_mut()
            .push((chart.to_path_buf(), values.map(Path::to_path_buf)));
        Ok(self.yaml.clone())
    }
}

/// A server process that records whether it was stopped
pub struct FakeServer {
    pub alive: Rc<Cell<bool>>,
    pub terminated: Rc<Cell<bool>>,
}

impl ProcessHandle for FakeServer {
    fn pid(&self) -> i32 {
        4242
    }

    fn is_alive(&self) -> bool {
        self.alive.get()
    }

    fn terminate(&self, _timeout: Duration) -> Result<()> {
        self.alive.set(false);
        self.terminated.set(true);
        Ok(())
    }
}

/// Locator handing out one [`FakeServer`]
#[derive(Clone)]
pub struct FakeLocator {
    pub alive: Rc<Cell<bool>>,
    pub terminated: Rc<Cell<bool>>,
}

impl FakeLocator {
    pub fn running() -> Self {
        Self {
            alive: Rc::new(Cell::new(true)),
            terminated: Rc::new(Cell::new(false)),
        }
    }
}

impl ProcessLocator for FakeLocator {
    fn locate(&self, _install_root: &Path) -> Result<Option<Box<dyn ProcessHandle>>> {
        Ok(Some(Box::new(FakeServer {
            alive: Rc::clone(&self.alive),
            terminated: Rc::clone(&self.terminated),
        })))
    }
}

/// Scratch area holding a project directory, build output and install target
pub struct Workspace {
    pub temp: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("project")).unwrap();
        Self { temp }
    }

    pub fn project(&self) -> PathBuf {
        self.temp.path().join("project")
    }

    pub fn out(&self) -> PathBuf {
        self.temp.path().join("out")
    }

    pub fn target(&self) -> PathBuf {
        self.temp.path().join("install")
    }

    pub fn settings(&self) -> BuildSettings {
        build_settings(self.temp.path())
    }

    pub fn write_project(&self, toml: &str) {
        fs::write(self.project().join("stowage.toml"), toml).unwrap();
    }

    pub fn write_source(&self, relative: &str, content: &[u8], mode: u32) {
        write_file(&self.project().join(relative), content, mode);
    }
}
