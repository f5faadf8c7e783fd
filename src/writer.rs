use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{ArrayD, s};
use zarrs::array::ArrayBuilder;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::GroupBuilder;
use zarrs::storage::ReadableWritableListableStorage;

use crate::Error;
use crate::codec::Compression;
use crate::image::{Image, Pixel, with_pixels};
use crate::metadata::{
    Axis, CoordinateTransformation, Dataset, Multiscale, OmeAttributes, Omero, OmeroChannel,
    Window,
};

/// Dimension names of every written array.
pub const DIMENSION_NAMES: [&str; 5] = ["t", "c", "z", "y", "x"];

pub const DEFAULT_CHUNK_SIZE: u64 = 1024;

/// Naming and pyramid defaults of the two supported output conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Flavor {
    /// `<stem>_ngff.ome.zarr`, scale factors 1, 2, 4, 8.
    #[default]
    NgffZarr,
    /// `<stem>.ome.zarr`, scale factors 1, 2, 4, 8, 16.
    OmeZarr,
}

impl Flavor {
    pub fn default_scale_factors(self) -> Vec<usize> {
        match self {
            Flavor::NgffZarr => vec![1, 2, 4, 8],
            Flavor::OmeZarr => vec![1, 2, 4, 8, 16],
        }
    }

    fn image_suffix(self) -> &'static str {
        match self {
            Flavor::NgffZarr => "_ngff.ome.zarr",
            Flavor::OmeZarr => ".ome.zarr",
        }
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavor::NgffZarr => write!(f, "ngff-zarr"),
            Flavor::OmeZarr => write!(f, "ome-zarr"),
        }
    }
}

/// Options shared by the image and plate writers.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    pub flavor: Flavor,
    /// Downsampling factors per level; `None` uses the flavor default.
    pub scale_factors: Option<Vec<usize>>,
    pub compression: Compression,
    /// Maximum chunk length along `y` and `x`.
    pub chunk_size: u64,
    /// Replace an existing output instead of failing.
    pub overwrite: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            flavor: Flavor::default(),
            scale_factors: None,
            compression: Compression::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            overwrite: false,
        }
    }
}

impl WriteOptions {
    /// Level factors, ascending, starting at 1.
    pub fn levels(&self) -> Vec<usize> {
        let factors = self
            .scale_factors
            .clone()
            .unwrap_or_else(|| self.flavor.default_scale_factors());
        normalize_scales(factors)
    }
}

/// Parse `[2,4,8]` or `2,4,8`.
pub fn parse_scales(text: &str) -> crate::Result<Vec<usize>> {
    let inner = text.trim();
    let inner = inner
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(inner);
    if inner.trim().is_empty() {
        return Err(Error::general("no scale factors given"));
    }
    inner
        .split(',')
        .map(|item| {
            let item = item.trim();
            match item.parse::<usize>() {
                Ok(n) if n > 0 => Ok(n),
                _ => Err(Error::general(format!(
                    "invalid scale factor '{item}', expected a positive integer"
                ))),
            }
        })
        .collect()
}

/// Sort, deduplicate and make sure the full resolution level is present.
pub fn normalize_scales(mut factors: Vec<usize>) -> Vec<usize> {
    factors.retain(|&f| f > 0);
    factors.push(1);
    factors.sort_unstable();
    factors.dedup();
    factors
}

/// `<dir>/<stem><suffix>` for the given input file.
pub(crate) fn sibling_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    input.with_file_name(format!("{stem}{suffix}"))
}

/// Default image output next to `czi_path` for the given flavor.
pub fn default_output_path(czi_path: &Path, flavor: Flavor) -> PathBuf {
    sibling_path(czi_path, flavor.image_suffix())
}

/// Fail if `path` exists, or remove it when `overwrite` is set.
pub(crate) fn prepare_output(path: &Path, overwrite: bool) -> crate::Result<()> {
    if !path.exists() {
        return Ok(());
    }
    if !overwrite {
        return Err(Error::OutputExists(path.to_path_buf()));
    }
    log::warn!("removing existing output {}", path.display());
    if path.is_dir() {
        std::fs::remove_dir_all(path)?;
    } else {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

pub(crate) fn open_store(path: &Path) -> crate::Result<ReadableWritableListableStorage> {
    std::fs::create_dir_all(path)?;
    let store = FilesystemStore::new(path).map_err(Error::wrap)?;
    Ok(Arc::new(store))
}

/// Join a node path and a child name, both without a trailing slash.
pub(crate) fn node_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    format!("{parent}/{child}")
}

/// Write `image` (TCZYX) as a multiscale OME-Zarr at `zarr_path`.
///
/// Returns the path written.
pub fn write_omezarr(
    image: &Image,
    zarr_path: impl AsRef<Path>,
    options: &WriteOptions,
) -> crate::Result<PathBuf> {
    let zarr_path = zarr_path.as_ref();
    image.ensure_tczyx()?;
    prepare_output(zarr_path, options.overwrite)?;
    log::info!("writing {image} to {}", zarr_path.display());
    let store = open_store(zarr_path)?;
    write_image_group(&store, "/", image, options)?;
    Ok(zarr_path.to_path_buf())
}

/// Write a multiscale image group at `group_path` within `store`.
pub(crate) fn write_image_group(
    store: &ReadableWritableListableStorage,
    group_path: &str,
    image: &Image,
    options: &WriteOptions,
) -> crate::Result<Multiscale> {
    image.ensure_tczyx()?;
    let shape = image.shape();
    let (height, width) = (shape[3], shape[4]);
    let scale = image.scale;

    let mut datasets = Vec::new();
    for factor in options.levels() {
        if factor > height || factor > width {
            log::warn!(
                "skipping level with factor {factor}: image is only {height}x{width} pixels"
            );
            continue;
        }
        let level = image.downsample(factor)?;
        let path = datasets.len().to_string();
        let array_path = node_path(group_path, &path);
        log::debug!("writing level {path} {level} to {array_path}");
        with_pixels!(level.data(), a => write_array(store, &array_path, a, options)?);
        datasets.push(Dataset {
            path,
            coordinate_transformations: vec![CoordinateTransformation::Scale {
                scale: vec![
                    1.0,
                    1.0,
                    scale.z,
                    scale.y * factor as f64,
                    scale.x * factor as f64,
                ],
            }],
        });
    }

    let multiscale = Multiscale {
        name: image.name.clone(),
        axes: Axis::tczyx(),
        datasets,
        kind: Some("mean".to_string()),
    };
    let mut attributes = OmeAttributes::image(multiscale.clone(), Some(omero(image)?))
        .to_attributes()?;
    attributes.insert(
        "czi2zarr".to_string(),
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "compression": options.compression,
        }),
    );
    GroupBuilder::new()
        .attributes(attributes)
        .build(store.clone(), group_path)
        .map_err(Error::wrap)?
        .store_metadata()
        .map_err(Error::wrap)?;
    Ok(multiscale)
}

fn omero(image: &Image) -> crate::Result<Omero> {
    let channels = image
        .channel_ranges()?
        .into_iter()
        .enumerate()
        .map(|(idx, (min, max))| {
            let info = image.channels.get(idx);
            OmeroChannel {
                label: info.map_or_else(|| format!("CH{}", idx + 1), |c| c.name.clone()),
                color: info.map_or_else(|| "FFFFFF".to_string(), |c| c.color.clone()),
                window: Window {
                    min,
                    max,
                    start: min,
                    end: max,
                },
                active: true,
            }
        })
        .collect();
    Ok(Omero { channels })
}

fn write_array<T: Pixel>(
    store: &ReadableWritableListableStorage,
    array_path: &str,
    data: &ArrayD<T>,
    options: &WriteOptions,
) -> crate::Result<()> {
    let shape: Vec<u64> = data.shape().iter().map(|&n| n as u64).collect();
    let chunk_size = options.chunk_size.max(1);
    let chunk_shape = vec![
        1,
        1,
        1,
        shape[3].min(chunk_size),
        shape[4].min(chunk_size),
    ];

    let mut builder = ArrayBuilder::new(
        shape.clone(),
        chunk_shape,
        T::data_type(),
        T::fill_value(),
    );
    if let Some(codec) = options.compression.to_bytes_to_bytes_codec()? {
        builder.bytes_to_bytes_codecs(vec![codec]);
    }
    let array = builder
        .dimension_names(DIMENSION_NAMES.into())
        .build(store.clone(), array_path)
        .map_err(Error::wrap)?;
    array.store_metadata().map_err(Error::wrap)?;

    let (height, width) = (shape[3], shape[4]);
    for (t, c, z) in plane_indices(data.shape()) {
        let plane: Vec<T> = data.slice(s![t, c, z, .., ..]).iter().copied().collect();
        let (t, c, z) = (t as u64, c as u64, z as u64);
        array
            .store_array_subset(
                &[t..t + 1, c..c + 1, z..z + 1, 0..height, 0..width],
                &plane,
            )
            .map_err(Error::wrap)?;
    }
    Ok(())
}

fn plane_indices(shape: &[usize]) -> impl Iterator<Item = (usize, usize, usize)> {
    let (nt, nc, nz) = (shape[0], shape[1], shape[2]);
    (0..nt).flat_map(move |t| (0..nc).flat_map(move |c| (0..nz).map(move |z| (t, c, z))))
}
