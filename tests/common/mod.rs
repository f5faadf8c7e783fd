//! Synthetic CZI files for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

pub const GRAY8: i32 = 0;
pub const GRAY16: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    Raw,
    Zstd0,
    /// Zstd1 with hi/lo byte packing.
    Zstd1HiLo,
    /// Written as JPEG-XR; the payload is garbage.
    JpgXr,
}

/// One subblock: a single YX plane at a position in the image.
#[derive(Debug, Clone)]
pub struct Tile {
    pub scene: Option<i32>,
    pub t: i32,
    pub c: i32,
    pub z: i32,
    pub m: Option<i32>,
    pub x: i32,
    pub y: i32,
    pub width: usize,
    pub height: usize,
    /// Little-endian pixel bytes.
    pub data: Vec<u8>,
    pub pixel_type: i32,
    pub encoding: Encoding,
}

impl Tile {
    pub fn u16(x: i32, y: i32, width: usize, height: usize, pixels: &[u16]) -> Self {
        assert_eq!(pixels.len(), width * height);
        Self {
            scene: None,
            t: 0,
            c: 0,
            z: 0,
            m: None,
            x,
            y,
            width,
            height,
            data: pixels.iter().flat_map(|p| p.to_le_bytes()).collect(),
            pixel_type: GRAY16,
            encoding: Encoding::Raw,
        }
    }

    pub fn u8(x: i32, y: i32, width: usize, height: usize, pixels: &[u8]) -> Self {
        assert_eq!(pixels.len(), width * height);
        Self {
            data: pixels.to_vec(),
            pixel_type: GRAY8,
            ..Self::u16(x, y, width, height, &vec![0; width * height])
        }
    }

    pub fn scene(mut self, scene: i32) -> Self {
        self.scene = Some(scene);
        self
    }

    pub fn channel(mut self, c: i32) -> Self {
        self.c = c;
        self
    }

    pub fn z(mut self, z: i32) -> Self {
        self.z = z;
        self
    }

    pub fn mosaic(mut self, m: i32) -> Self {
        self.m = Some(m);
        self
    }

    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    fn payload(&self) -> (i32, Vec<u8>) {
        match self.encoding {
            Encoding::Raw => (0, self.data.clone()),
            Encoding::Zstd0 => (5, zstd::encode_all(self.data.as_slice(), 3).unwrap()),
            Encoding::Zstd1HiLo => {
                let mut packed: Vec<u8> = self.data.iter().step_by(2).copied().collect();
                packed.extend(self.data.iter().skip(1).step_by(2));
                let mut out = vec![3, 1, 1];
                out.extend(zstd::encode_all(packed.as_slice(), 3).unwrap());
                (6, out)
            }
            Encoding::JpgXr => (4, vec![0xFF; 16]),
        }
    }

    fn entry(&self, file_position: i64, compression: i32) -> Vec<u8> {
        let mut dims: Vec<(u8, i32, i32)> = vec![
            (b'X', self.x, self.width as i32),
            (b'Y', self.y, self.height as i32),
            (b'C', self.c, 1),
            (b'Z', self.z, 1),
            (b'T', self.t, 1),
        ];
        if let Some(s) = self.scene {
            dims.push((b'S', s, 1));
        }
        if let Some(m) = self.m {
            dims.push((b'M', m, 1));
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"DV");
        out.extend_from_slice(&self.pixel_type.to_le_bytes());
        out.extend_from_slice(&file_position.to_le_bytes());
        out.extend_from_slice(&0i32.to_le_bytes());
        out.extend_from_slice(&compression.to_le_bytes());
        out.push(0);
        out.extend_from_slice(&[0; 5]);
        out.extend_from_slice(&(dims.len() as i32).to_le_bytes());
        for (name, start, size) in dims {
            out.extend_from_slice(&[name, 0, 0, 0]);
            out.extend_from_slice(&start.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
            out.extend_from_slice(&0f32.to_le_bytes());
            out.extend_from_slice(&size.to_le_bytes());
        }
        out
    }
}

/// A scene entry of the XML metadata.
#[derive(Debug, Clone)]
pub struct SceneXml {
    pub name: String,
    pub well: Option<String>,
    pub row_column: Option<(usize, usize)>,
}

impl SceneXml {
    pub fn well(name: &str, well: &str) -> Self {
        Self {
            name: name.to_string(),
            well: Some(well.to_string()),
            row_column: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CziBuilder {
    pub tiles: Vec<Tile>,
    pub channels: Vec<(String, String)>,
    pub scenes: Vec<SceneXml>,
    /// Pixel size in micrometers.
    pub pixel_size: Option<f64>,
}

fn segment(id: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 16];
    out[..id.len()].copy_from_slice(id.as_bytes());
    let size = payload.len() as i64;
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn pad(bytes: &mut Vec<u8>, len: usize) {
    if bytes.len() < len {
        bytes.resize(len, 0);
    }
}

impl CziBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tile(mut self, tile: Tile) -> Self {
        self.tiles.push(tile);
        self
    }

    pub fn channel(mut self, name: &str, color: &str) -> Self {
        self.channels.push((name.to_string(), color.to_string()));
        self
    }

    pub fn scene(mut self, scene: SceneXml) -> Self {
        self.scenes.push(scene);
        self
    }

    pub fn pixel_size(mut self, micrometers: f64) -> Self {
        self.pixel_size = Some(micrometers);
        self
    }

    pub fn xml(&self) -> String {
        let mut channels = String::new();
        let mut display = String::new();
        for (idx, (name, color)) in self.channels.iter().enumerate() {
            channels.push_str(&format!(
                r#"<Channel Id="Channel:{idx}" Name="{name}"/>"#
            ));
            display.push_str(&format!(
                r#"<Channel Id="Channel:{idx}"><Color>{color}</Color></Channel>"#
            ));
        }
        let mut scenes = String::new();
        for (idx, scene) in self.scenes.iter().enumerate() {
            let array_name = scene
                .well
                .as_ref()
                .map(|w| format!("<ArrayName>{w}</ArrayName>"))
                .unwrap_or_default();
            let indices = scene
                .row_column
                .map(|(r, c)| format!("<RowIndex>{r}</RowIndex><ColumnIndex>{c}</ColumnIndex>"))
                .unwrap_or_default();
            scenes.push_str(&format!(
                r#"<Scene Index="{idx}" Name="{}">{array_name}<Shape Name="{}">{indices}</Shape></Scene>"#,
                scene.name,
                scene.well.as_deref().unwrap_or("")
            ));
        }
        let scaling = self
            .pixel_size
            .map(|um| {
                let m = um * 1e-6;
                format!(
                    r#"<Scaling><Items><Distance Id="X"><Value>{m:e}</Value></Distance><Distance Id="Y"><Value>{m:e}</Value></Distance></Items></Scaling>"#
                )
            })
            .unwrap_or_default();
        let size_s = if self.scenes.is_empty() {
            String::new()
        } else {
            format!("<SizeS>{}</SizeS>", self.scenes.len())
        };
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<ImageDocument><Metadata><Information><Image>{size_s}<SizeC>{}</SizeC><PixelType>Gray16</PixelType><Dimensions><Channels>{channels}</Channels><S><Scenes>{scenes}</Scenes></S></Dimensions></Image></Information>{scaling}<DisplaySetting><Channels>{display}</Channels></DisplaySetting></Metadata></ImageDocument>"#,
            self.channels.len().max(1)
        )
    }

    pub fn build(&self) -> Vec<u8> {
        const FILE_HEADER_SIZE: usize = 32 + 512;
        let mut body = Vec::new();
        let mut entries = Vec::new();

        for tile in &self.tiles {
            let position = (FILE_HEADER_SIZE + body.len()) as i64;
            let (compression, data) = tile.payload();
            let entry = tile.entry(position, compression);
            let mut payload = Vec::new();
            payload.extend_from_slice(&0i32.to_le_bytes());
            payload.extend_from_slice(&0i32.to_le_bytes());
            payload.extend_from_slice(&(data.len() as i64).to_le_bytes());
            payload.extend_from_slice(&entry);
            pad(&mut payload, 256.max(16 + entry.len()));
            payload.extend_from_slice(&data);
            body.extend(segment("ZISRAWSUBBLOCK", &payload));
            entries.push(entry);
        }

        let metadata_position = (FILE_HEADER_SIZE + body.len()) as i64;
        let xml = self.xml();
        let mut payload = Vec::new();
        payload.extend_from_slice(&(xml.len() as i32).to_le_bytes());
        payload.extend_from_slice(&0i32.to_le_bytes());
        pad(&mut payload, 256);
        payload.extend_from_slice(xml.as_bytes());
        body.extend(segment("ZISRAWMETADATA", &payload));

        let directory_position = (FILE_HEADER_SIZE + body.len()) as i64;
        let mut payload = Vec::new();
        payload.extend_from_slice(&(entries.len() as i32).to_le_bytes());
        pad(&mut payload, 128);
        for entry in &entries {
            payload.extend_from_slice(entry);
        }
        body.extend(segment("ZISRAWDIRECTORY", &payload));

        let mut header = Vec::new();
        header.extend_from_slice(&1i32.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&[0; 8]);
        header.extend_from_slice(&[1; 16]);
        header.extend_from_slice(&[1; 16]);
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&directory_position.to_le_bytes());
        header.extend_from_slice(&metadata_position.to_le_bytes());
        header.extend_from_slice(&0i32.to_le_bytes());
        header.extend_from_slice(&0i64.to_le_bytes());
        pad(&mut header, 512);

        let mut out = segment("ZISRAWFILE", &header);
        assert_eq!(out.len(), FILE_HEADER_SIZE);
        out.extend(body);
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, self.build()).unwrap();
        path
    }
}

pub fn setup() -> tempfile::TempDir {
    env_logger::try_init().ok();
    tempfile::tempdir().unwrap()
}

/// `width * height` values starting at `offset`.
pub fn ramp(width: usize, height: usize, offset: u16) -> Vec<u16> {
    (0..(width * height) as u16).map(|v| v + offset).collect()
}
