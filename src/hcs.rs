//! Writing a multi-scene CZI as an HCS plate: plate / row / column (well) / field.
use std::path::{Path, PathBuf};

use zarrs::group::GroupBuilder;
use zarrs::storage::ReadableWritableListableStorage;

use crate::Error;
use crate::czi::CziFile;
use crate::metadata::{
    Acquisition, OmeAttributes, Plate, PlateColumn, PlateRow, PlateWell, Well, WellImage,
};
use crate::writer::{WriteOptions, node_path, open_store, prepare_output, sibling_path};

/// Standard plate layouts as (rows, columns), smallest first.
pub const STANDARD_PLATES: [(usize, usize); 7] = [
    (2, 3),
    (3, 4),
    (4, 6),
    (6, 8),
    (8, 12),
    (16, 24),
    (32, 48),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HcsOptions {
    pub write: WriteOptions,
    /// Output path; defaults to `<stem>_HCSplate.ome.zarr` next to the input.
    pub output: Option<PathBuf>,
    /// Defaults to the CZI file stem.
    pub plate_name: Option<String>,
    pub rows: Option<usize>,
    pub columns: Option<usize>,
}

pub fn default_plate_path(czi_path: &Path) -> PathBuf {
    sibling_path(czi_path, "_HCSplate.ome.zarr")
}

/// Zero-based row and column of a well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WellPosition {
    pub row: usize,
    pub column: usize,
}

impl WellPosition {
    pub fn row_name(&self) -> String {
        row_name(self.row)
    }

    pub fn column_name(&self) -> String {
        (self.column + 1).to_string()
    }

    /// `<row>/<column>`, e.g. `B/4`.
    pub fn path(&self) -> String {
        format!("{}/{}", self.row_name(), self.column_name())
    }
}

/// Parse a well name such as `B4` or `AA12`.
pub fn parse_well_name(name: &str) -> Option<WellPosition> {
    let name = name.trim();
    let split = name.find(|c: char| !c.is_ascii_alphabetic())?;
    let (letters, digits) = name.split_at(split);
    if letters.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let row = letters
        .chars()
        .try_fold(0usize, |acc, c| {
            let value = (c.to_ascii_uppercase() as u8 - b'A') as usize + 1;
            acc.checked_mul(26)?.checked_add(value)
        })?
        .checked_sub(1)?;
    let column = digits.parse::<usize>().ok()?.checked_sub(1)?;
    Some(WellPosition { row, column })
}

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn row_name(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

/// Number of rows and columns of the plate holding `wells`.
///
/// Explicit dimensions must hold every well. Otherwise the smallest standard plate that
/// does is used, falling back to the exact extent.
pub fn plate_geometry(
    wells: &[WellPosition],
    rows: Option<usize>,
    columns: Option<usize>,
) -> crate::Result<(usize, usize)> {
    let needed_rows = wells.iter().map(|w| w.row + 1).max().unwrap_or(1);
    let needed_columns = wells.iter().map(|w| w.column + 1).max().unwrap_or(1);
    match (rows, columns) {
        (Some(r), Some(c)) => {
            if r < needed_rows || c < needed_columns {
                return Err(Error::general(format!(
                    "plate of {r}x{c} cannot hold wells up to {}",
                    WellPosition {
                        row: needed_rows - 1,
                        column: needed_columns - 1
                    }
                    .path()
                )));
            }
            Ok((r, c))
        }
        (None, None) => Ok(STANDARD_PLATES
            .iter()
            .copied()
            .find(|&(r, c)| r >= needed_rows && c >= needed_columns)
            .unwrap_or((needed_rows, needed_columns))),
        _ => Err(Error::general(
            "plate rows and columns must be given together",
        )),
    }
}

/// A well and the scenes imaged in it, in field order.
#[derive(Debug, Clone, PartialEq)]
pub struct WellScenes {
    pub name: String,
    pub position: WellPosition,
    pub scenes: Vec<usize>,
}

/// Group the scenes of `czi` into wells.
pub fn group_scenes(czi: &CziFile) -> crate::Result<Vec<WellScenes>> {
    let scenes = czi.scenes();
    if czi.scene_count().is_none() || scenes.is_empty() {
        return Err(Error::NotAPlate);
    }
    let mut wells: Vec<WellScenes> = Vec::new();
    for scene in scenes {
        let info = czi.metadata().scene(scene);
        let name = info
            .and_then(|i| i.well_name())
            .ok_or_else(|| Error::general(format!("scene {scene} has no well name")))?;
        if let Some(well) = wells.iter_mut().find(|w| w.name == name) {
            well.scenes.push(scene);
            continue;
        }
        let position = match info.map(|i| (i.row_index, i.column_index)) {
            Some((Some(row), Some(column))) => WellPosition { row, column },
            _ => parse_well_name(name).ok_or_else(|| {
                Error::general(format!("cannot place well '{name}' of scene {scene}"))
            })?,
        };
        wells.push(WellScenes {
            name: name.to_string(),
            position,
            scenes: vec![scene],
        });
    }
    wells.sort_by_key(|w| w.position);
    for pair in wells.windows(2) {
        if pair[0].position == pair[1].position {
            return Err(Error::general(format!(
                "wells '{}' and '{}' share position {}",
                pair[0].name,
                pair[1].name,
                pair[0].position.path()
            )));
        }
    }
    Ok(wells)
}

/// Convert every scene of a CZI plate acquisition into an HCS OME-Zarr.
///
/// Returns the path written.
pub fn convert_czi_to_hcs(
    czi_path: impl AsRef<Path>,
    options: &HcsOptions,
) -> crate::Result<PathBuf> {
    let czi_path = czi_path.as_ref();
    let mut czi = CziFile::open(czi_path)?;
    let wells = group_scenes(&czi)?;
    let positions: Vec<WellPosition> = wells.iter().map(|w| w.position).collect();
    let (n_rows, n_columns) = plate_geometry(&positions, options.rows, options.columns)?;
    let field_count = wells.iter().map(|w| w.scenes.len()).max().unwrap_or(0);
    let plate_name = options.plate_name.clone().unwrap_or_else(|| {
        czi_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plate".to_string())
    });
    log::info!(
        "plate '{plate_name}': {} wells on a {n_rows}x{n_columns} plate, up to {field_count} fields per well",
        wells.len()
    );

    let output = options
        .output
        .clone()
        .unwrap_or_else(|| default_plate_path(czi_path));
    prepare_output(&output, options.write.overwrite)?;
    let store = open_store(&output)?;

    let plate = Plate {
        name: Some(plate_name.clone()),
        rows: (0..n_rows).map(|r| PlateRow { name: row_name(r) }).collect(),
        columns: (0..n_columns)
            .map(|c| PlateColumn {
                name: (c + 1).to_string(),
            })
            .collect(),
        wells: wells
            .iter()
            .map(|w| PlateWell {
                path: w.position.path(),
                row_index: w.position.row,
                column_index: w.position.column,
            })
            .collect(),
        field_count: Some(field_count),
        acquisitions: vec![Acquisition {
            id: 0,
            name: Some(plate_name),
            maximumfieldcount: Some(field_count),
        }],
    };
    write_group(&store, "/", OmeAttributes::plate(plate).to_attributes()?)?;

    let mut row_groups: Vec<usize> = positions.iter().map(|p| p.row).collect();
    row_groups.dedup();
    for row in row_groups {
        write_group(&store, &format!("/{}", row_name(row)), Default::default())?;
    }

    for well in &wells {
        let well_path = format!("/{}", well.position.path());
        log::info!(
            "well {} ({}): scenes {:?}",
            well.name,
            well.position.path(),
            well.scenes
        );
        let images = (0..well.scenes.len())
            .map(|field| WellImage {
                path: field.to_string(),
                acquisition: Some(0),
            })
            .collect();
        write_group(
            &store,
            &well_path,
            OmeAttributes::well(Well { images }).to_attributes()?,
        )?;
        for (field, &scene) in well.scenes.iter().enumerate() {
            let image = czi.read_scene(Some(scene))?;
            log::info!("scene {scene} -> {well_path}/{field}: {image}");
            crate::writer::write_image_group(
                &store,
                &node_path(&well_path, &field.to_string()),
                &image,
                &options.write,
            )?;
        }
    }
    Ok(output)
}

fn write_group(
    store: &ReadableWritableListableStorage,
    path: &str,
    attributes: serde_json::Map<String, serde_json::Value>,
) -> crate::Result<()> {
    GroupBuilder::new()
        .attributes(attributes)
        .build(store.clone(), path)
        .map_err(Error::wrap)?
        .store_metadata()
        .map_err(Error::wrap)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn well(row: usize, column: usize) -> WellPosition {
        WellPosition { row, column }
    }

    #[test]
    fn parses_well_names() {
        assert_eq!(parse_well_name("B4"), Some(well(1, 3)));
        assert_eq!(parse_well_name("a1"), Some(well(0, 0)));
        assert_eq!(parse_well_name("AA12"), Some(well(26, 11)));
        assert_eq!(parse_well_name("B0"), None);
        assert_eq!(parse_well_name("4B"), None);
        assert_eq!(parse_well_name("B"), None);
        assert_eq!(parse_well_name("Scene 1"), None);
    }

    #[test]
    fn row_names() {
        assert_eq!(row_name(0), "A");
        assert_eq!(row_name(25), "Z");
        assert_eq!(row_name(26), "AA");
        assert_eq!(well(7, 11).path(), "H/12");
    }

    #[test]
    fn picks_smallest_standard_plate() {
        assert_eq!(plate_geometry(&[well(1, 3)], None, None).unwrap(), (3, 4));
        assert_eq!(plate_geometry(&[well(2, 4)], None, None).unwrap(), (4, 6));
        assert_eq!(plate_geometry(&[well(1, 9)], None, None).unwrap(), (8, 12));
        assert_eq!(plate_geometry(&[well(20, 2)], None, None).unwrap(), (32, 48));
        assert_eq!(plate_geometry(&[well(40, 0)], None, None).unwrap(), (41, 1));
    }

    #[test]
    fn explicit_geometry_must_fit() {
        assert_eq!(
            plate_geometry(&[well(1, 3)], Some(2), Some(4)).unwrap(),
            (2, 4)
        );
        assert!(plate_geometry(&[well(1, 3)], Some(2), Some(3)).is_err());
        assert!(plate_geometry(&[well(1, 3)], Some(2), None).is_err());
    }
}
