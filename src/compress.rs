use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Component, Path};
use tar::Archive;
use tracing::debug;

use crate::error::{Error, IoContext, Result};

/// Extracts a .tar.gz file into `dest_dir`, refusing entries that escape it.
pub fn extract_tar_gz(source_file: &Path, dest_dir: &Path) -> Result<()> {
    if !source_file.exists() {
        return Err(Error::io(
            source_file,
            std::io::Error::new(std::io::ErrorKind::NotFound, "archive not found"),
        ));
    }

    fs::create_dir_all(dest_dir).at(dest_dir)?;
    let file = File::open(source_file).at(source_file)?;
    let reader = BufReader::new(file);
    let decompressor = GzDecoder::new(reader);
    let mut archive = Archive::new(decompressor);

    for entry in archive.entries().at(source_file)? {
        let mut entry = entry.at(source_file)?;
        let rel = entry.path().at(source_file)?.into_owned();
        // Prevent directory traversal.
        if rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
        {
            return Err(Error::io(
                source_file,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("archive entry escapes destination: {}", rel.display()),
                ),
            ));
        }
        entry.unpack_in(dest_dir).at(dest_dir.join(&rel))?;
    }

    Ok(())
}

/// Extracts `tarball` into `dest_dir` unless `tree` (the directory the archive
/// unpacks to) already exists. Returns whether extraction happened.
pub fn extract_if_missing(tarball: &Path, dest_dir: &Path, tree: &Path) -> Result<bool> {
    if tree.is_dir() {
        debug!(tree = %tree.display(), "source already extracted");
        return Ok(false);
    }
    extract_tar_gz(tarball, dest_dir)?;
    Ok(true)
}
