use std::fmt;

use roxmltree::{Document, Node};

/// Physical pixel size in micrometers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalScale {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for PhysicalScale {
    fn default() -> Self {
        Self {
            x: 1.0,
            y: 1.0,
            z: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelInfo {
    pub name: String,
    /// Hex `RRGGBB`.
    pub color: String,
}

/// A scene entry. In plate acquisitions every scene is one field of view in a well.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneInfo {
    pub index: usize,
    pub name: Option<String>,
    pub array_name: Option<String>,
    pub shape_name: Option<String>,
    pub row_index: Option<usize>,
    pub column_index: Option<usize>,
}

impl SceneInfo {
    /// Name of the well this scene belongs to, if the metadata says.
    pub fn well_name(&self) -> Option<&str> {
        [&self.array_name, &self.shape_name, &self.name]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .find(|s| !s.is_empty())
    }
}

/// Sizes declared in `Information/Image`. Any may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclaredSizes {
    pub x: Option<usize>,
    pub y: Option<usize>,
    pub c: Option<usize>,
    pub z: Option<usize>,
    pub t: Option<usize>,
    pub s: Option<usize>,
    pub m: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CziMetadata {
    pub sizes: DeclaredSizes,
    pub pixel_type: Option<String>,
    pub scale: PhysicalScale,
    pub channels: Vec<ChannelInfo>,
    pub scenes: Vec<SceneInfo>,
    pub acquisition_date: Option<String>,
}

impl CziMetadata {
    pub fn from_xml(xml: &str) -> crate::Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();
        let Some(metadata) = child(root, "Metadata") else {
            log::warn!("CZI XML has no Metadata element");
            return Ok(Self::default());
        };
        let image = descend(metadata, &["Information", "Image"]);

        let size = |name: &str| image.and_then(|n| child_text(n, name)).and_then(parse_usize);
        let sizes = DeclaredSizes {
            x: size("SizeX"),
            y: size("SizeY"),
            c: size("SizeC"),
            z: size("SizeZ"),
            t: size("SizeT"),
            s: size("SizeS"),
            m: size("SizeM"),
        };
        let pixel_type = image
            .and_then(|n| child_text(n, "PixelType"))
            .map(str::to_string);
        let acquisition_date = image
            .and_then(|n| child_text(n, "AcquisitionDateAndTime"))
            .map(str::to_string);

        Ok(Self {
            sizes,
            pixel_type,
            scale: parse_scaling(metadata),
            channels: parse_channels(metadata),
            scenes: parse_scenes(metadata),
            acquisition_date,
        })
    }

    pub fn scene(&self, index: usize) -> Option<&SceneInfo> {
        self.scenes.iter().find(|s| s.index == index)
    }

    /// Overview of the declared image, as shown by `czi2zarr info`.
    pub fn summary(&self, file_name: &str) -> Summary {
        let sizes = &self.sizes;
        let dimensions = [
            ('S', sizes.s),
            ('T', sizes.t),
            ('C', sizes.c),
            ('Z', sizes.z),
            ('M', sizes.m),
            ('Y', sizes.y),
            ('X', sizes.x),
        ]
        .iter()
        .filter(|(_, v)| v.is_some())
        .map(|(d, _)| *d)
        .collect();
        Summary {
            file_name: file_name.to_string(),
            dimensions,
            pixel_type: self.pixel_type.clone(),
            scenes: sizes.s.unwrap_or(self.scenes.len()),
            size_x: sizes.x,
            size_y: sizes.y,
            channels: self.channels.iter().map(|c| c.name.clone()).collect(),
            z_slices: sizes.z.unwrap_or(1),
            time_points: sizes.t.unwrap_or(1),
            scale: self.scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub file_name: String,
    /// Dimension letters, e.g. `STCZYX`.
    pub dimensions: String,
    pub pixel_type: Option<String>,
    pub scenes: usize,
    pub size_x: Option<usize>,
    pub size_y: Option<usize>,
    pub channels: Vec<String>,
    pub z_slices: usize,
    pub time_points: usize,
    pub scale: PhysicalScale,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unknown = |v: Option<usize>| v.map_or_else(|| "?".to_string(), |v| v.to_string());
        writeln!(f, "File:        {}", self.file_name)?;
        writeln!(f, "Dimensions:  {}", self.dimensions)?;
        if let Some(pixel_type) = &self.pixel_type {
            writeln!(f, "Pixel type:  {pixel_type}")?;
        }
        writeln!(f, "Scenes:      {}", self.scenes)?;
        writeln!(f, "Size X:      {}", unknown(self.size_x))?;
        writeln!(f, "Size Y:      {}", unknown(self.size_y))?;
        writeln!(
            f,
            "Channels:    {} ({})",
            self.channels.len(),
            self.channels.join(", ")
        )?;
        writeln!(f, "Z-slices:    {}", self.z_slices)?;
        writeln!(f, "Time points: {}", self.time_points)?;
        write!(
            f,
            "Scaling:     x={} y={} z={} micrometer",
            self.scale.x, self.scale.y, self.scale.z
        )
    }
}

fn parse_scaling(metadata: Node<'_, '_>) -> PhysicalScale {
    let mut scale = PhysicalScale::default();
    let Some(items) = descend(metadata, &["Scaling", "Items"]) else {
        return scale;
    };
    for distance in elements(items, "Distance") {
        let Some(value) = child_text(distance, "Value").and_then(|v| v.parse::<f64>().ok()) else {
            continue;
        };
        if value <= 0.0 || !value.is_finite() {
            continue;
        }
        // stored in meters
        let micrometers = value * 1e6;
        match distance.attribute("Id") {
            Some("X") => scale.x = micrometers,
            Some("Y") => scale.y = micrometers,
            Some("Z") => scale.z = micrometers,
            _ => {}
        }
    }
    scale
}

fn parse_channels(metadata: Node<'_, '_>) -> Vec<ChannelInfo> {
    let Some(channels) = descend(
        metadata,
        &["Information", "Image", "Dimensions", "Channels"],
    ) else {
        return Vec::new();
    };
    let display = descend(metadata, &["DisplaySetting", "Channels"]);

    elements(channels, "Channel")
        .enumerate()
        .map(|(idx, channel)| {
            let id = channel.attribute("Id");
            let name = channel
                .attribute("Name")
                .or_else(|| child_text(channel, "Fluor"))
                .map_or_else(|| format!("CH{}", idx + 1), str::to_string);
            let by_id = display.and_then(|d| {
                elements(d, "Channel").find(|c| id.is_some() && c.attribute("Id") == id)
            });
            // display entries without ids are matched by position
            let by_position = display
                .filter(|d| elements(*d, "Channel").all(|c| c.attribute("Id").is_none()))
                .and_then(|d| elements(d, "Channel").nth(idx));
            let color = by_id
                .and_then(|c| child_text(c, "Color"))
                .and_then(parse_color)
                .or_else(|| child_text(channel, "Color").and_then(parse_color))
                .or_else(|| {
                    by_position
                        .and_then(|c| child_text(c, "Color"))
                        .and_then(parse_color)
                })
                .unwrap_or_else(|| "FFFFFF".to_string());
            ChannelInfo { name, color }
        })
        .collect()
}

fn parse_scenes(metadata: Node<'_, '_>) -> Vec<SceneInfo> {
    let Some(scenes) = descend(
        metadata,
        &["Information", "Image", "Dimensions", "S", "Scenes"],
    ) else {
        return Vec::new();
    };
    elements(scenes, "Scene")
        .enumerate()
        .map(|(position, scene)| {
            let shape = child(scene, "Shape");
            SceneInfo {
                index: scene
                    .attribute("Index")
                    .and_then(parse_usize)
                    .unwrap_or(position),
                name: scene.attribute("Name").map(str::to_string),
                array_name: child_text(scene, "ArrayName").map(str::to_string),
                shape_name: shape.and_then(|s| s.attribute("Name")).map(str::to_string),
                row_index: shape
                    .and_then(|s| child_text(s, "RowIndex"))
                    .and_then(parse_usize),
                column_index: shape
                    .and_then(|s| child_text(s, "ColumnIndex"))
                    .and_then(parse_usize),
            }
        })
        .collect()
}

/// `#AARRGGBB` or `#RRGGBB` to `RRGGBB`.
fn parse_color(text: &str) -> Option<String> {
    let hex = text.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match hex.len() {
        8 => Some(hex[2..].to_ascii_uppercase()),
        6 => Some(hex.to_ascii_uppercase()),
        _ => None,
    }
}

fn parse_usize(text: &str) -> Option<usize> {
    text.trim().parse().ok()
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn descend<'a, 'input>(node: Node<'a, 'input>, path: &[&str]) -> Option<Node<'a, 'input>> {
    path.iter().try_fold(node, |n, name| child(n, name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

impl fmt::Display for DeclaredSizes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in [
            ("S", self.s),
            ("T", self.t),
            ("C", self.c),
            ("Z", self.z),
            ("M", self.m),
            ("Y", self.y),
            ("X", self.x),
        ] {
            if let Some(v) = value {
                if !first {
                    write!(f, ", ")?;
                }
                first = false;
                write!(f, "{name}: {v}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XML: &str = r##"<?xml version="1.0"?>
<ImageDocument>
  <Metadata>
    <Information>
      <Image>
        <SizeX>512</SizeX>
        <SizeY>256</SizeY>
        <SizeC>2</SizeC>
        <SizeS>2</SizeS>
        <PixelType>Gray16</PixelType>
        <AcquisitionDateAndTime>2024-05-01T10:00:00Z</AcquisitionDateAndTime>
        <Dimensions>
          <Channels>
            <Channel Id="Channel:0" Name="DAPI"><Color>#FF0000FF</Color></Channel>
            <Channel Id="Channel:1" Name="GFP"/>
          </Channels>
          <S>
            <Scenes>
              <Scene Index="0" Name="P1">
                <ArrayName>B4</ArrayName>
                <Shape Name="B4"><ColumnIndex>3</ColumnIndex><RowIndex>1</RowIndex></Shape>
              </Scene>
              <Scene Index="1" Name="P2">
                <Shape Name="C5"/>
              </Scene>
            </Scenes>
          </S>
        </Dimensions>
      </Image>
    </Information>
    <Scaling>
      <Items>
        <Distance Id="X"><Value>6.5E-07</Value></Distance>
        <Distance Id="Y"><Value>6.5E-07</Value></Distance>
        <Distance Id="Z"><Value>0</Value></Distance>
      </Items>
    </Scaling>
    <DisplaySetting>
      <Channels>
        <Channel Id="Channel:1"><Color>#FF00FF00</Color></Channel>
      </Channels>
    </DisplaySetting>
  </Metadata>
</ImageDocument>"##;

    #[test]
    fn parses_sizes_and_scaling() {
        let md = CziMetadata::from_xml(XML).unwrap();
        assert_eq!(md.sizes.x, Some(512));
        assert_eq!(md.sizes.c, Some(2));
        assert_eq!(md.sizes.z, None);
        assert_eq!(md.pixel_type.as_deref(), Some("Gray16"));
        assert!((md.scale.x - 0.65).abs() < 1e-9);
        // zero Z distance keeps the default
        assert_eq!(md.scale.z, 1.0);
        assert_eq!(md.acquisition_date.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn parses_channels_with_display_colors() {
        let md = CziMetadata::from_xml(XML).unwrap();
        assert_eq!(md.channels.len(), 2);
        assert_eq!(md.channels[0].name, "DAPI");
        assert_eq!(md.channels[0].color, "0000FF");
        assert_eq!(md.channels[1].color, "00FF00");
    }

    #[test]
    fn display_colors_without_ids_match_by_position() {
        let md = CziMetadata::from_xml(
            r#"<ImageDocument><Metadata>
              <Information><Image><Dimensions><Channels>
                <Channel Id="Channel:0" Name="A"/>
                <Channel Id="Channel:1" Name="B"><Color>#FFFF0000</Color></Channel>
                <Channel Id="Channel:2" Name="C"/>
              </Channels></Dimensions></Image></Information>
              <DisplaySetting><Channels>
                <Channel><Color>#FF00FFFF</Color></Channel>
                <Channel><Color>#FF00FF00</Color></Channel>
              </Channels></DisplaySetting>
            </Metadata></ImageDocument>"#,
        )
        .unwrap();
        let colors: Vec<_> = md.channels.iter().map(|c| c.color.as_str()).collect();
        // a channel's own colour wins over the positional entry
        assert_eq!(colors, ["00FFFF", "FF0000", "FFFFFF"]);
    }

    #[test]
    fn parses_scenes() {
        let md = CziMetadata::from_xml(XML).unwrap();
        assert_eq!(md.scenes.len(), 2);
        let first = md.scene(0).unwrap();
        assert_eq!(first.well_name(), Some("B4"));
        assert_eq!(first.row_index, Some(1));
        assert_eq!(first.column_index, Some(3));
        assert_eq!(md.scene(1).unwrap().well_name(), Some("C5"));
    }

    #[test]
    fn missing_metadata_is_default() {
        let md = CziMetadata::from_xml("<ImageDocument/>").unwrap();
        assert_eq!(md, CziMetadata::default());
    }

    #[test]
    fn summarizes_declared_image() {
        let md = CziMetadata::from_xml(XML).unwrap();
        let summary = md.summary("plate.czi");
        assert_eq!(summary.dimensions, "SCYX");
        assert_eq!(summary.scenes, 2);
        assert_eq!(summary.z_slices, 1);
        assert_eq!(summary.channels, vec!["DAPI", "GFP"]);
        let text = summary.to_string();
        assert!(text.contains("Size X:      512"));
        assert!(text.contains("Channels:    2 (DAPI, GFP)"));
    }

    #[test]
    fn displays_declared_sizes() {
        let md = CziMetadata::from_xml(XML).unwrap();
        assert_eq!(md.sizes.to_string(), "S: 2, C: 2, Y: 256, X: 512");
    }
}
