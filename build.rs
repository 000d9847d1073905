// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Common argument: installer file
fn file_arg() -> Arg {
    Arg::new("file")
        .short('f')
        .long("file")
        .value_name("INSTALLER")
        .required(true)
        .help("Installer file")
}

fn build_cli() -> Command {
    Command::new("stowage")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Stowage Contributors")
        .about("Build self-extracting installers for container-based applications")
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level (RUST_LOG takes precedence)"),
        )
        .subcommand(
            Command::new("build")
                .about("Build an installer from a project directory")
                .arg(
                    Arg::new("project")
                        .short('p')
                        .long("project")
                        .default_value(".")
                        .help("Directory holding stowage.toml"),
                )
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .default_value("dist")
                        .help("Output directory for the installer"),
                )
                .arg(
                    Arg::new("compression_level")
                        .short('l')
                        .long("compression-level")
                        .help("Deflate level for archive entries and image layers (0-9)"),
                )
                .arg(
                    Arg::new("installer_stub")
                        .long("installer-stub")
                        .value_name("PATH")
                        .help("Installer stub executable placed in front of the archive"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade an existing installation in place")
                .arg(file_arg())
                .arg(
                    Arg::new("install_path")
                        .short('i')
                        .long("install-path")
                        .help("Installation directory"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show identity and file inventory of an installer")
                .arg(file_arg())
                .arg(
                    Arg::new("format")
                        .long("format")
                        .value_parser(["text", "json"])
                        .default_value("text")
                        .help("Output format"),
                ),
        )
}

fn render(cmd: Command, path: &Path) -> Result<(), String> {
    let mut buffer = Vec::new();
    Man::new(cmd)
        .render(&mut buffer)
        .map_err(|e| format!("Failed to render man page: {}", e))?;
    fs::write(path, buffer).map_err(|e| format!("Failed to write man page: {}", e))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man_path = man_dir.join("stowage.1");
    if let Err(e) = render(build_cli(), &man_path) {
        println!("cargo:warning={}", e);
    }
}
