// src/images/mod.rs

//! Container image handling
//!
//! Build side: [`repackage`] turns a flat image tarball into an `.untar`
//! tree with gzip-compressed layers, backed by a [`DiskLayerCache`].
//! Runtime side: [`import_packaged_images`] streams those trees back into
//! the container runtime.

mod cache;
pub mod import;
mod repackage;

pub use cache::{CacheStats, DiskLayerCache};
pub use import::{import_packaged_images, raw_size, CtrImporter, ImageImporter, ImportStream};
pub use repackage::{repackage, untar_dir_for, DirectorySink, LayerSink};

/// Where packaged image tarballs live, relative to the install root
pub const IMAGES_DIR: &str = "data/agent/images";

/// True for targets that must go through the repackager
pub fn is_image_tarball(target: &str) -> bool {
    target.starts_with("data/agent/images/") && target.ends_with(".tar")
}
