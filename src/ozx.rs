use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::Error;
use crate::metadata::NGFF_VERSION;

const ROOT_METADATA: &str = "zarr.json";

/// Archive comment marking an OME-Zarr ZIP whose root `zarr.json` comes first.
pub fn ozx_comment() -> String {
    serde_json::json!({
        "ome": {
            "version": NGFF_VERSION,
            "zipFile": {"centralDirectory": {"jsonFirst": true}}
        }
    })
    .to_string()
}

/// `foo.ome.zarr` -> `foo.ozx`.
pub fn default_ozx_path(zarr_dir: &Path) -> PathBuf {
    let name = zarr_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(".ome.zarr")
        .or_else(|| name.strip_suffix(".zarr"))
        .unwrap_or(&name);
    zarr_dir.with_file_name(format!("{stem}.ozx"))
}

/// Write every file under `zarr_dir` into an uncompressed ZIP at `ozx_path`.
pub fn package_ozx(zarr_dir: impl AsRef<Path>, ozx_path: impl AsRef<Path>) -> crate::Result<PathBuf> {
    let zarr_dir = zarr_dir.as_ref();
    let ozx_path = ozx_path.as_ref();
    if !zarr_dir.join(ROOT_METADATA).is_file() {
        return Err(Error::general(format!(
            "{} is not a Zarr V3 hierarchy (no {ROOT_METADATA})",
            zarr_dir.display()
        )));
    }

    let mut entries = Vec::new();
    collect_files(zarr_dir, zarr_dir, &mut entries)?;
    // root metadata first, then lexicographic
    entries.sort_by(|a, b| {
        (a.as_str() != ROOT_METADATA, a.as_str()).cmp(&(b.as_str() != ROOT_METADATA, b.as_str()))
    });

    let mut zip = ZipWriter::new(BufWriter::new(File::create(ozx_path)?));
    for name in &entries {
        let path = zarr_dir.join(name);
        let size = std::fs::metadata(&path)?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(size >= u64::from(u32::MAX));
        zip.start_file(name.as_str(), options).map_err(Error::wrap)?;
        std::io::copy(&mut File::open(&path)?, &mut zip)?;
    }
    zip.set_comment(ozx_comment());
    let mut inner = zip.finish().map_err(Error::wrap)?;
    inner.flush()?;
    log::info!(
        "packaged {} files from {} into {}",
        entries.len(),
        zarr_dir.display(),
        ozx_path.display()
    );
    Ok(ozx_path.to_path_buf())
}

/// Relative `/`-separated paths of all files below `dir`.
fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> crate::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
            continue;
        }
        let relative = path.strip_prefix(root).map_err(Error::wrap)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        out.push(name);
    }
    Ok(())
}
