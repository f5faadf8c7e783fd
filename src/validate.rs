use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use zarrs::array::Array;
use zarrs::filesystem::FilesystemStore;
use zarrs::group::Group;
use zarrs::storage::ReadableListableStorage;

use crate::Error;
use crate::metadata::{Axis, AxisType, Multiscale, OmeAttributes};
use crate::writer::node_path;

/// Overview of a validated plate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlateSummary {
    pub name: Option<String>,
    pub rows: usize,
    pub columns: usize,
    /// Well paths, e.g. `B/4`.
    pub wells: Vec<String>,
    /// Total number of field images across all wells.
    pub field_count: usize,
}

fn open(path: &Path) -> crate::Result<ReadableListableStorage> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let store = FilesystemStore::new(path).map_err(Error::wrap)?;
    Ok(Arc::new(store))
}

fn read_ome(store: &ReadableListableStorage, path: &str) -> crate::Result<OmeAttributes> {
    let group = Group::open(store.clone(), path)
        .map_err(|e| Error::validation(format!("cannot open group {path}: {e}")))?;
    let attributes = OmeAttributes::from_attributes(group.attributes())?;
    if attributes.ome.version.is_empty() {
        return Err(Error::validation(format!("{path}: empty ome.version")));
    }
    Ok(attributes)
}

/// Validate a single multiscale image at `path`.
pub fn validate_image(path: impl AsRef<Path>) -> crate::Result<Multiscale> {
    let store = open(path.as_ref())?;
    let multiscale = check_image(&store, "/")?;
    log::info!(
        "{} is a valid OME-Zarr image with {} levels",
        path.as_ref().display(),
        multiscale.datasets.len()
    );
    Ok(multiscale)
}

/// Validate an HCS plate at `path` and every image in it.
pub fn validate_plate(path: impl AsRef<Path>) -> crate::Result<PlateSummary> {
    let store = open(path.as_ref())?;
    let plate = read_ome(&store, "/")?
        .ome
        .plate
        .ok_or_else(|| Error::validation("root group has no plate metadata"))?;

    check_unique(plate.rows.iter().map(|r| r.name.as_str()), "row")?;
    check_unique(plate.columns.iter().map(|c| c.name.as_str()), "column")?;
    if plate.wells.is_empty() {
        return Err(Error::validation("plate has no wells"));
    }

    let mut field_count = 0;
    for well in &plate.wells {
        let row = plate.rows.get(well.row_index).ok_or_else(|| {
            Error::validation(format!("well {} has row index out of range", well.path))
        })?;
        let column = plate.columns.get(well.column_index).ok_or_else(|| {
            Error::validation(format!("well {} has column index out of range", well.path))
        })?;
        let expected = format!("{}/{}", row.name, column.name);
        if well.path != expected {
            return Err(Error::validation(format!(
                "well path {} does not match its indices ({expected})",
                well.path
            )));
        }
        let well_path = format!("/{}", well.path);
        let images = read_ome(&store, &well_path)?
            .ome
            .well
            .ok_or_else(|| Error::validation(format!("{well_path} has no well metadata")))?
            .images;
        if images.is_empty() {
            return Err(Error::validation(format!("{well_path} has no images")));
        }
        for image in &images {
            check_image(&store, &node_path(&well_path, &image.path))?;
        }
        field_count += images.len();
    }

    let summary = PlateSummary {
        name: plate.name,
        rows: plate.rows.len(),
        columns: plate.columns.len(),
        wells: plate.wells.into_iter().map(|w| w.path).collect(),
        field_count,
    };
    log::info!(
        "{} is a valid OME-Zarr plate: {} wells, {} fields",
        path.as_ref().display(),
        summary.wells.len(),
        summary.field_count
    );
    Ok(summary)
}

fn check_image(store: &ReadableListableStorage, group_path: &str) -> crate::Result<Multiscale> {
    let multiscales = read_ome(store, group_path)?
        .ome
        .multiscales
        .ok_or_else(|| Error::validation(format!("{group_path} has no multiscales")))?;
    let multiscale = multiscales
        .into_iter()
        .next()
        .ok_or_else(|| Error::validation(format!("{group_path} has empty multiscales")))?;
    check_axes(&multiscale.axes)?;
    if multiscale.datasets.is_empty() {
        return Err(Error::validation(format!("{group_path} has no datasets")));
    }
    for dataset in &multiscale.datasets {
        let array_path = node_path(group_path, &dataset.path);
        let array = Array::open(store.clone(), &array_path)
            .map_err(|e| Error::validation(format!("cannot open array {array_path}: {e}")))?;
        if array.dimensionality() != multiscale.axes.len() {
            return Err(Error::validation(format!(
                "{array_path} has {} dimensions but {} axes are declared",
                array.dimensionality(),
                multiscale.axes.len()
            )));
        }
        if dataset.coordinate_transformations.is_empty() {
            return Err(Error::validation(format!(
                "{array_path} has no coordinate transformations"
            )));
        }
        for transform in &dataset.coordinate_transformations {
            if transform.len() != multiscale.axes.len() {
                return Err(Error::validation(format!(
                    "{array_path} transformation has {} entries for {} axes",
                    transform.len(),
                    multiscale.axes.len()
                )));
            }
        }
    }
    Ok(multiscale)
}

fn check_axes(axes: &[Axis]) -> crate::Result<()> {
    if !(2..=5).contains(&axes.len()) {
        return Err(Error::validation(format!(
            "expected 2 to 5 axes, got {}",
            axes.len()
        )));
    }
    check_unique(axes.iter().map(|a| a.name.as_str()), "axis")?;
    let count = |t: AxisType| axes.iter().filter(|a| a.axis_type == Some(t)).count();
    if count(AxisType::Time) > 1 || count(AxisType::Channel) > 1 {
        return Err(Error::validation("more than one time or channel axis"));
    }
    let space = count(AxisType::Space);
    if !(2..=3).contains(&space) {
        return Err(Error::validation(format!(
            "expected 2 or 3 space axes, got {space}"
        )));
    }
    // time, then channel (or untyped), then space
    let rank = |a: &Axis| match a.axis_type {
        Some(AxisType::Time) => 0,
        Some(AxisType::Channel) | None => 1,
        Some(AxisType::Space) => 2,
    };
    if axes.windows(2).any(|w| rank(&w[0]) > rank(&w[1])) {
        return Err(Error::validation(
            "axes must be ordered time, channel, space",
        ));
    }
    Ok(())
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, what: &str) -> crate::Result<()> {
    let mut seen = HashSet::new();
    let mut count = 0;
    for name in names {
        count += 1;
        if !seen.insert(name) {
            return Err(Error::validation(format!("duplicate {what} name '{name}'")));
        }
    }
    if count == 0 {
        return Err(Error::validation(format!("no {what} names")));
    }
    Ok(())
}
