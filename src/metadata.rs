use serde::{Deserialize, Serialize};

pub const NGFF_VERSION: &str = "0.5";

/// The `{"ome": {...}}` envelope of a group's attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OmeAttributes {
    pub ome: OmeMetadata,
}

/// Contents of the `ome` key.
///
/// Exactly one of `multiscales`, `plate` or `well` is expected on a given group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OmeMetadata {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiscales: Option<Vec<Multiscale>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub omero: Option<Omero>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<Plate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub well: Option<Well>,
}

impl OmeMetadata {
    fn empty() -> Self {
        Self {
            version: NGFF_VERSION.to_string(),
            multiscales: None,
            omero: None,
            plate: None,
            well: None,
        }
    }
}

impl OmeAttributes {
    pub fn image(multiscale: Multiscale, omero: Option<Omero>) -> Self {
        Self {
            ome: OmeMetadata {
                multiscales: Some(vec![multiscale]),
                omero,
                ..OmeMetadata::empty()
            },
        }
    }

    pub fn plate(plate: Plate) -> Self {
        Self {
            ome: OmeMetadata {
                plate: Some(plate),
                ..OmeMetadata::empty()
            },
        }
    }

    pub fn well(well: Well) -> Self {
        Self {
            ome: OmeMetadata {
                well: Some(well),
                ..OmeMetadata::empty()
            },
        }
    }

    /// Serialize into a group attribute map.
    pub fn to_attributes(&self) -> crate::Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(crate::Error::general("OME metadata is not a JSON object")),
        }
    }

    /// Parse from a group attribute map.
    pub fn from_attributes(
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> crate::Result<Self> {
        let ome = attributes
            .get("ome")
            .ok_or_else(|| crate::Error::validation("group attributes have no 'ome' key"))?;
        Ok(Self {
            ome: serde_json::from_value(ome.clone())?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AxisType {
    Time,
    Channel,
    Space,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Axis {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub axis_type: Option<AxisType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Axis {
    pub fn new(name: &str, axis_type: AxisType, unit: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            axis_type: Some(axis_type),
            unit: unit.map(str::to_string),
        }
    }

    /// The `t, c, z, y, x` axes written for every image.
    pub fn tczyx() -> Vec<Axis> {
        vec![
            Axis::new("t", AxisType::Time, None),
            Axis::new("c", AxisType::Channel, None),
            Axis::new("z", AxisType::Space, Some("micrometer")),
            Axis::new("y", AxisType::Space, Some("micrometer")),
            Axis::new("x", AxisType::Space, Some("micrometer")),
        ]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum CoordinateTransformation {
    Scale { scale: Vec<f64> },
    Translation { translation: Vec<f64> },
}

impl CoordinateTransformation {
    /// Number of axes this transformation covers.
    pub fn len(&self) -> usize {
        match self {
            Self::Scale { scale } => scale.len(),
            Self::Translation { translation } => translation.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub path: String,
    pub coordinate_transformations: Vec<CoordinateTransformation>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Multiscale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub axes: Vec<Axis>,
    pub datasets: Vec<Dataset>,
    /// Downsampling method, free text.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Window {
    pub min: f64,
    pub max: f64,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OmeroChannel {
    pub label: String,
    /// Hex `RRGGBB`.
    pub color: String,
    pub window: Window,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Omero {
    pub channels: Vec<OmeroChannel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlateRow {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlateColumn {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlateWell {
    /// `<row>/<column>`.
    pub path: String,
    pub row_index: usize,
    pub column_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Acquisition {
    pub id: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximumfieldcount: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub rows: Vec<PlateRow>,
    pub columns: Vec<PlateColumn>,
    pub wells: Vec<PlateWell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acquisitions: Vec<Acquisition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WellImage {
    /// Field index as a string.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquisition: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Well {
    pub images: Vec<WellImage>,
}

impl From<Multiscale> for OmeAttributes {
    fn from(value: Multiscale) -> Self {
        Self::image(value, None)
    }
}

impl From<Plate> for OmeAttributes {
    fn from(value: Plate) -> Self {
        Self::plate(value)
    }
}

impl From<Well> for OmeAttributes {
    fn from(value: Well) -> Self {
        Self::well(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn image_attributes_layout() {
        let multiscale = Multiscale {
            name: Some("img".into()),
            axes: Axis::tczyx(),
            datasets: vec![Dataset {
                path: "0".into(),
                coordinate_transformations: vec![CoordinateTransformation::Scale {
                    scale: vec![1.0, 1.0, 1.0, 0.5, 0.5],
                }],
            }],
            kind: None,
        };
        let value = serde_json::to_value(OmeAttributes::from(multiscale)).unwrap();
        assert_eq!(value["ome"]["version"], json!("0.5"));
        let ms = &value["ome"]["multiscales"][0];
        assert_eq!(ms["axes"][0], json!({"name": "t", "type": "time"}));
        assert_eq!(
            ms["axes"][4],
            json!({"name": "x", "type": "space", "unit": "micrometer"})
        );
        assert_eq!(
            ms["datasets"][0]["coordinateTransformations"][0],
            json!({"type": "scale", "scale": [1.0, 1.0, 1.0, 0.5, 0.5]})
        );
        assert!(value["ome"].get("plate").is_none());
    }

    #[test]
    fn plate_attributes_layout() {
        let plate = Plate {
            name: Some("plate".into()),
            rows: vec![PlateRow { name: "A".into() }],
            columns: vec![PlateColumn { name: "1".into() }],
            wells: vec![PlateWell {
                path: "A/1".into(),
                row_index: 0,
                column_index: 0,
            }],
            field_count: Some(2),
            acquisitions: vec![],
        };
        let map = OmeAttributes::from(plate.clone()).to_attributes().unwrap();
        assert_eq!(
            map["ome"]["plate"]["wells"][0],
            json!({"path": "A/1", "rowIndex": 0, "columnIndex": 0})
        );
        let back = OmeAttributes::from_attributes(&map).unwrap();
        assert_eq!(back.ome.plate, Some(plate));
    }

    #[test]
    fn missing_ome_key_is_a_validation_error() {
        let map = serde_json::Map::new();
        assert!(matches!(
            OmeAttributes::from_attributes(&map),
            Err(crate::Error::Validation(_))
        ));
    }
}
