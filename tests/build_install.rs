// tests/build_install.rs

//! Build a project into an installer, then install it into a fresh target.

mod common;

use common::{admin_group, mode_of, FakeEngine, NoCharts, RenderedCharts, Workspace, STUB};
use std::fs::{self, File};
use std::io::Read;
use stowage::hash::hash_bytes;
use stowage::install::{InstallOptions, InstallOutcome, InstallState, JoinToken, KUBECONFIG_PATH};
use stowage::package::{LocalConfig, MANIFEST_PATH};
use stowage::{BuildTools, Installer, PackageManifest, ParsedInstallFile, Project};
use zip::ZipArchive;

const PROJECT: &str = r#"
images = ["example/api:2"]

[package]
id = "demo"
name = "Demo"
version = "1.0"
manager = "demo-ctl"

[[files]]
source = "src/demo-ctl"
target = "bin/demo-ctl"

[[files]]
source = "src/other-ctl"
target = "bin/demo-ctl"

[[files]]
source = "src/secret.txt"
target = "data/secret.txt"

[[files]]
source = "src/notes.txt"
target = "data/notes.txt"

[[directories]]
source = "web"
target = "data/web"

[[manifests]]
path = "k8s/app.yaml"

[[charts]]
id = "redis"
path = "charts/redis.tgz"
values = "redis-values.yaml"

[permissions."data/secret.txt"]
adminGroupReadable = true
"#;

const APP_YAML: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      initContainers:
        - name: migrate
          image: example/migrate:1
      containers:
        - name: web
          image: example/web:1
"#;

fn populated_workspace() -> Workspace {
    let ws = Workspace::new();
    ws.write_project(PROJECT);
    ws.write_source("src/demo-ctl", b"#!/bin/sh\necho ctl\n", 0o755);
    ws.write_source("src/other-ctl", b"should never be packaged", 0o755);
    ws.write_source("src/secret.txt", b"top secret", 0o644);
    ws.write_source("src/notes.txt", b"notes", 0o604);
    ws.write_source("web/index.html", b"<html></html>", 0o644);
    ws.write_source("web/css/site.css", b"body {}", 0o644);
    ws.write_source("k8s/app.yaml", APP_YAML.as_bytes(), 0o644);
    ws.write_source("charts/redis.tgz", b"not really a tarball", 0o644);
    ws.write_source("redis-values.yaml", b"replicas: 2\n", 0o644);
    ws
}

fn read_entry(path: &std::path::Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    entry.read_to_end(&mut data).unwrap();
    data
}

#[test]
fn test_build_writes_stub_archive_and_manifest() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let engine = FakeEngine::default();
    let tools = BuildTools {
        engine: &engine,
        charts: &NoCharts,
    };

    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();

    assert_eq!(built.path, ws.out().join("demo_1.0.installer"));
    assert_eq!(built.archive_offset, STUB.len() as u64);
    assert!(fs::read(&built.path).unwrap().starts_with(STUB));

    // The first source for a target wins and is stored once
    let archive = ZipArchive::new(File::open(&built.path).unwrap()).unwrap();
    assert_eq!(archive.file_names().filter(|n| *n == "bin/demo-ctl").count(), 1);
    assert_eq!(read_entry(&built.path, "bin/demo-ctl"), b"#!/bin/sh\necho ctl\n");
    assert_eq!(
        built.manifest.files.get("bin/demo-ctl").map(String::as_str),
        Some(hash_bytes(b"#!/bin/sh\necho ctl\n").as_str())
    );

    assert!(built.manifest.files.contains_key("data/web/css/site.css"));
    assert!(built.manifest.files.contains_key("data/server/manifests/app.yaml"));
    assert!(built.manifest.files.contains_key("data/server/manifests/redis.yaml"));
    let chart_hash = hash_bytes(b"not really a tarball");
    assert!(built
        .manifest
        .files
        .contains_key(&format!("data/server/static/charts/redis-{}.tgz", chart_hash)));

    let resource = String::from_utf8(read_entry(&built.path, "data/server/manifests/redis.yaml")).unwrap();
    assert!(resource.contains("kind: HelmChart"));
    assert!(resource.contains("replicas: 2"));

    // Images from the manifest and the project, pulled once each in tag order
    assert_eq!(
        *engine.pulled.borrow(),
        vec!["example/api:2", "example/migrate:1", "example/web:1"]
    );
    assert!(built
        .manifest
        .files
        .contains_key("data/agent/images/images.untar/layer1/layer.tar.gz"));
    assert!(!built.manifest.files.contains_key("data/agent/images/images.tar"));

    let stored = PackageManifest::decode(
        &String::from_utf8(read_entry(&built.path, MANIFEST_PATH)).unwrap(),
    )
    .unwrap();
    assert_eq!(stored.files, built.manifest.files);
    assert!(!stored.files.contains_key(MANIFEST_PATH));
}

#[test]
fn test_images_from_rendered_charts_are_pulled() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let engine = FakeEngine::default();
    let charts = RenderedCharts::new(
        "---\napiVersion: apps/v1\nkind: StatefulSet\nmetadata:\n  name: redis\nspec:\n  template:\n    spec:\n      containers:\n        - name: redis\n          image: example/redis:7\n",
    );
    let tools = BuildTools {
        engine: &engine,
        charts: &charts,
    };

    project.build(&ws.settings(), &ws.out(), &tools).unwrap();

    assert_eq!(
        *charts.rendered.borrow(),
        vec![(
            ws.project().join("charts/redis.tgz"),
            Some(ws.project().join("redis-values.yaml"))
        )]
    );
    assert_eq!(
        *engine.pulled.borrow(),
        vec!["example/api:2", "example/migrate:1", "example/redis:7", "example/web:1"]
    );
}

#[test]
fn test_fresh_install_round_trip() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };
    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();

    let package = ParsedInstallFile::parse(&built.path).unwrap();
    assert_eq!(package.manifest().id, "demo");

    let target = ws.target();
    assert_eq!(Installer::detect(&target), InstallState::Fresh);

    let token = JoinToken {
        server: "10.0.0.1".to_string(),
        token: "K10secret".to_string(),
        kube_config: "apiVersion: v1\n".to_string(),
    };
    let options = InstallOptions {
        target: target.clone(),
        admin_group: admin_group(),
        bind_address: "10.0.0.2".to_string(),
        join_token: Some(token),
    };

    let mut installer = Installer::new(&package);
    let outcome = installer.run(&options).unwrap();
    assert_eq!(installer.state(), InstallState::Complete);
    match outcome {
        InstallOutcome::Installed { report } => {
            assert_eq!(report.files, package.manifest().files.len() + 1);
            assert_eq!(report.images_imported, 0);
        }
        other => panic!("expected a fresh install, got {:?}", other),
    }

    // Every inventoried file is on disk with the recorded content hash
    for (path, hash) in &package.manifest().files {
        let content = fs::read(target.join(path)).unwrap();
        assert_eq!(hash_bytes(&content).as_str(), hash.as_str(), "{}", path);
    }

    let layer = target.join("data/agent/images/images.untar/layer1/layer.tar.gz");
    assert_eq!(stowage::images::raw_size(&layer).unwrap(), 17);

    // Modes follow the most specific permission rule
    assert_eq!(mode_of(&target), 0o750);
    assert_eq!(mode_of(&target.join("bin/demo-ctl")), 0o750);
    assert_eq!(mode_of(&target.join(MANIFEST_PATH)), 0o640);
    assert_eq!(mode_of(&target.join("data/secret.txt")), 0o640);
    assert_eq!(mode_of(&target.join("data/notes.txt")), 0o604);
    assert_eq!(mode_of(&target.join("data/web")), 0o750);

    let local = LocalConfig::load(&target).unwrap();
    assert_eq!(local.admin_group, admin_group());
    assert_eq!(local.bind_address, "10.0.0.2");
    assert_eq!(local.join.unwrap().server, "10.0.0.1");
    assert_eq!(mode_of(&target.join("config/local.config")), 0o640);
    assert_eq!(fs::read_to_string(target.join(KUBECONFIG_PATH)).unwrap(), "apiVersion: v1\n");

    assert_eq!(Installer::detect(&target), InstallState::Existing);
}

#[test]
fn test_unknown_admin_group_is_a_permission_error() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };
    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();
    let package = ParsedInstallFile::parse(&built.path).unwrap();

    let options = InstallOptions {
        target: ws.target(),
        admin_group: "no-such-group-for-stowage".to_string(),
        bind_address: "10.0.0.2".to_string(),
        join_token: None,
    };
    let mut installer = Installer::new(&package);
    let err = installer.run(&options).unwrap_err();
    assert!(err.is_permission());
    assert_eq!(installer.state(), InstallState::Failed);
}

#[test]
fn test_failed_fresh_install_can_be_retried() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };
    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();
    let package = ParsedInstallFile::parse(&built.path).unwrap();
    let target = ws.target();

    let bad = InstallOptions {
        target: target.clone(),
        admin_group: "no-such-group-for-stowage".to_string(),
        bind_address: "10.0.0.2".to_string(),
        join_token: None,
    };
    assert!(Installer::new(&package).run(&bad).is_err());
    assert!(!target.join(MANIFEST_PATH).exists());
    assert_eq!(Installer::detect(&target), InstallState::Fresh);

    let good = InstallOptions {
        admin_group: admin_group(),
        ..bad
    };
    let mut installer = Installer::new(&package);
    let outcome = installer.run(&good).unwrap();
    assert!(matches!(outcome, InstallOutcome::Installed { .. }));
    assert_eq!(installer.state(), InstallState::Complete);
    assert_eq!(LocalConfig::load(&target).unwrap().admin_group, admin_group());
}

#[test]
fn test_interrupted_install_without_host_config_is_fresh() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };
    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();
    let package = ParsedInstallFile::parse(&built.path).unwrap();
    let target = ws.target();

    // A manifest on disk with no host config behind it
    fs::create_dir_all(&target).unwrap();
    fs::write(target.join(MANIFEST_PATH), package.manifest().encode().unwrap()).unwrap();
    assert_eq!(Installer::detect(&target), InstallState::Fresh);

    let options = InstallOptions {
        target: target.clone(),
        admin_group: admin_group(),
        bind_address: "10.0.0.2".to_string(),
        join_token: None,
    };
    let outcome = Installer::new(&package).run(&options).unwrap();
    assert!(matches!(outcome, InstallOutcome::Installed { .. }));
    assert_eq!(Installer::detect(&target), InstallState::Existing);
}

#[test]
fn test_directory_in_place_of_a_file_is_reported() {
    let ws = populated_workspace();
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };
    let built = project.build(&ws.settings(), &ws.out(), &tools).unwrap();
    let package = ParsedInstallFile::parse(&built.path).unwrap();

    let target = ws.target();
    fs::create_dir_all(target.join("bin/demo-ctl/nested")).unwrap();

    let options = InstallOptions {
        target: target.clone(),
        admin_group: admin_group(),
        bind_address: "10.0.0.2".to_string(),
        join_token: None,
    };
    let err = Installer::new(&package).run(&options).unwrap_err();
    assert!(matches!(err, stowage::Error::InvalidPath(_)));
    assert!(err.to_string().contains("bin/demo-ctl"));
    assert!(err.to_string().contains("directory"));
}

#[test]
fn test_missing_source_fails_the_build() {
    let ws = Workspace::new();
    ws.write_project(
        "[package]\nid = 'demo'\nname = 'Demo'\nversion = '1'\n[[files]]\nsource = 'gone'\ntarget = 'bin/gone'\n",
    );
    let project = Project::load(&ws.project()).unwrap();
    let tools = BuildTools {
        engine: &FakeEngine::default(),
        charts: &NoCharts,
    };

    let err = project.build(&ws.settings(), &ws.out(), &tools).unwrap_err();
    assert!(matches!(err, stowage::Error::MissingInput { .. }));
}
