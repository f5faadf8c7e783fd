//! Reader for the ZISRAW container used by CZI files.

pub mod directory;
pub mod metadata;
pub mod segment;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, IxDyn, s};

use self::directory::{DirectoryEntry, PixelType};
use self::metadata::{CziMetadata, Summary};
use self::segment::{
    DIRECTORY_FIXED_SIZE, FileHeader, METADATA_FIXED_SIZE, SEGMENT_HEADER_SIZE,
    SUBBLOCK_MIN_FIXED_SIZE, SegmentHeader, SegmentKind, SubBlockSizes,
};
use crate::Error;
use crate::codec::decode_subblock;
use crate::image::{Image, Pixel, STCZYX};

/// Start and length of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub size: usize,
}

impl Interval {
    pub fn end(&self) -> i64 {
        self.start + self.size as i64
    }

    fn union(self, other: Interval) -> Interval {
        let start = self.start.min(other.start);
        let end = self.end().max(other.end());
        Interval {
            start,
            size: (end - start) as usize,
        }
    }
}

/// Extent of a set of subblocks, per dimension letter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundingBox {
    dims: BTreeMap<char, Interval>,
}

impl BoundingBox {
    fn from_entries<'a>(entries: impl IntoIterator<Item = &'a DirectoryEntry>) -> Self {
        let mut dims: BTreeMap<char, Interval> = BTreeMap::new();
        for entry in entries {
            for d in &entry.dimensions {
                let interval = Interval {
                    start: i64::from(d.start),
                    size: d.size as usize,
                };
                dims.entry(d.dimension)
                    .and_modify(|i| *i = i.union(interval))
                    .or_insert(interval);
            }
        }
        Self { dims }
    }

    pub fn get(&self, dim: char) -> Option<Interval> {
        self.dims.get(&dim).copied()
    }

    /// Length of `dim`; absent dimensions have length one.
    pub fn size(&self, dim: char) -> usize {
        self.get(dim).map_or(1, |i| i.size)
    }

    pub fn start(&self, dim: char) -> i64 {
        self.get(dim).map_or(0, |i| i.start)
    }

    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }
}

/// An open CZI file: header, subblock directory and parsed XML metadata.
pub struct CziFile {
    path: PathBuf,
    reader: BufReader<File>,
    header: FileHeader,
    entries: Vec<DirectoryEntry>,
    xml: String,
    metadata: CziMetadata,
}

impl CziFile {
    pub fn open(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let mut reader = BufReader::new(File::open(path)?);

        let header_bytes = read_segment(&mut reader, 0, SegmentKind::FileHeader)?;
        let header = FileHeader::from_bytes(&header_bytes)?;
        log::debug!(
            "CZI version {}.{}, directory at {}, metadata at {}",
            header.major,
            header.minor,
            header.directory_position,
            header.metadata_position
        );

        if header.directory_position == 0 {
            return Err(Error::invalid_czi("file has no subblock directory"));
        }
        let directory_bytes =
            read_segment(&mut reader, header.directory_position, SegmentKind::Directory)?;
        let mut fixed = segment::ByteReader::new(&directory_bytes);
        let count = segment::non_negative(fixed.i32()?.into(), "directory entry count")?;
        let body = directory_bytes
            .get(DIRECTORY_FIXED_SIZE..)
            .ok_or_else(|| Error::invalid_czi("truncated directory segment"))?;
        let entries = directory::read_entries(body, count)?;
        if entries.is_empty() {
            return Err(Error::invalid_czi("subblock directory is empty"));
        }

        let xml = if header.metadata_position == 0 {
            log::warn!("{} has no metadata segment", path.display());
            String::new()
        } else {
            read_metadata_xml(&mut reader, header.metadata_position)?
        };
        let metadata = if xml.is_empty() {
            CziMetadata::default()
        } else {
            CziMetadata::from_xml(&xml)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            header,
            entries,
            xml,
            metadata,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn metadata(&self) -> &CziMetadata {
        &self.metadata
    }

    /// The raw XML metadata document.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    /// Metadata overview, completed from the subblock directory where the XML is silent.
    pub fn summary(&self) -> Summary {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut summary = self.metadata.summary(&name);
        let bbox = self.bounding_box();
        let dims: String = "STCZMYX"
            .chars()
            .filter(|&d| bbox.get(d).is_some())
            .collect();
        if !dims.is_empty() {
            summary.dimensions = dims;
        }
        summary.size_x = summary.size_x.or(bbox.get('X').map(|i| i.size));
        summary.size_y = summary.size_y.or(bbox.get('Y').map(|i| i.size));
        if self.metadata.sizes.s.is_none() {
            summary.scenes = self.scenes().len();
        }
        if self.metadata.sizes.z.is_none() {
            summary.z_slices = bbox.size('Z');
        }
        if self.metadata.sizes.t.is_none() {
            summary.time_points = bbox.size('T');
        }
        summary
    }

    fn full_resolution(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().filter(|e| e.is_full_resolution())
    }

    /// Extent of all full resolution subblocks.
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_entries(self.full_resolution())
    }

    /// Number of scenes, or `None` if the file has no `S` dimension.
    pub fn scene_count(&self) -> Option<usize> {
        let bbox = self.bounding_box();
        bbox.get('S').map(|i| (i.end().max(0)) as usize)
    }

    /// Scene indices present in the subblock directory, ascending.
    pub fn scenes(&self) -> Vec<usize> {
        let mut scenes: Vec<usize> = self.full_resolution().filter_map(|e| e.scene()).collect();
        scenes.sort_unstable();
        scenes.dedup();
        scenes
    }

    /// Extent of one scene's full resolution subblocks.
    pub fn scene_bounding_box(&self, scene: Option<usize>) -> crate::Result<BoundingBox> {
        let entries: Vec<&DirectoryEntry> = self
            .full_resolution()
            .filter(|e| scene.is_none() || e.scene() == scene)
            .collect();
        if entries.is_empty() {
            return Err(Error::SceneOutOfRange {
                scene: scene.unwrap_or(0),
                count: self.scene_count().unwrap_or(1),
            });
        }
        Ok(BoundingBox::from_entries(entries))
    }

    /// Pixel type shared by all full resolution subblocks.
    pub fn pixel_type(&self) -> crate::Result<PixelType> {
        let mut types = self.full_resolution().map(|e| e.pixel_type);
        let first = types
            .next()
            .ok_or_else(|| Error::invalid_czi("no full resolution subblocks"))?;
        if let Some(other) = types.find(|&t| t != first) {
            return Err(Error::Unsupported(format!(
                "mixed pixel types {first} and {other}"
            )));
        }
        Ok(first)
    }

    fn resolve_scene(&self, scene: Option<usize>) -> crate::Result<Option<usize>> {
        match (self.scene_count(), scene) {
            (None, None) => Ok(None),
            (None, Some(0)) => Ok(None),
            (None, Some(s)) => Err(Error::SceneOutOfRange { scene: s, count: 1 }),
            (Some(_), None) => Ok(Some(0)),
            (Some(count), Some(s)) if s < count => Ok(Some(s)),
            (Some(count), Some(s)) => Err(Error::SceneOutOfRange { scene: s, count }),
        }
    }

    /// Read the selected scenes as an `STCZYX` image.
    ///
    /// Scenes are placed at the origin of a canvas large enough for the biggest one.
    pub fn read_6d(&mut self, scenes: RangeInclusive<usize>) -> crate::Result<Image> {
        let selected = scenes
            .map(|s| self.resolve_scene(Some(s)))
            .collect::<crate::Result<Vec<_>>>()?;
        if selected.is_empty() {
            return Err(Error::general("empty scene range"));
        }
        let data = match self.pixel_type()? {
            PixelType::Gray8 => u8::into_data(self.read_planes::<u8>(&selected)?),
            PixelType::Gray16 => u16::into_data(self.read_planes::<u16>(&selected)?),
            PixelType::Gray32Float => f32::into_data(self.read_planes::<f32>(&selected)?),
            other => {
                return Err(Error::Unsupported(format!("pixel type {other}")));
            }
        };
        let mut image = Image::new(data, &STCZYX)?;
        image.scale = self.metadata.scale;
        image.channels = self.metadata.channels.clone();
        Ok(image)
    }

    /// Read one scene as a `TCZYX` image. `None` selects the first scene.
    pub fn read_scene(&mut self, scene: Option<usize>) -> crate::Result<Image> {
        let resolved = self.resolve_scene(scene)?;
        let index = resolved.unwrap_or(0);
        let mut image = self.read_6d(index..=index)?.squeeze('S')?;
        image.name = resolved
            .and_then(|s| self.metadata.scene(s))
            .and_then(|s| s.name.clone())
            .or_else(|| {
                self.path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            });
        Ok(image)
    }

    fn read_planes<T: Pixel>(&mut self, scenes: &[Option<usize>]) -> crate::Result<ArrayD<T>> {
        let whole = self.bounding_box();
        let boxes = scenes
            .iter()
            .map(|&s| self.scene_bounding_box(s))
            .collect::<crate::Result<Vec<_>>>()?;
        let height = boxes.iter().map(|b| b.size('Y')).max().unwrap_or(1);
        let width = boxes.iter().map(|b| b.size('X')).max().unwrap_or(1);
        let shape = [
            scenes.len(),
            whole.size('T'),
            whole.size('C'),
            whole.size('Z'),
            height,
            width,
        ];
        log::debug!("allocating STCZYX canvas {shape:?}");
        let mut canvas = ArrayD::<T>::from_elem(IxDyn(&shape), T::default());

        for (slot, (&scene, bbox)) in scenes.iter().zip(&boxes).enumerate() {
            let mut tiles: Vec<DirectoryEntry> = self
                .full_resolution()
                .filter(|e| scene.is_none() || e.scene() == scene)
                .cloned()
                .collect();
            // later mosaic tiles are drawn on top
            tiles.sort_by_key(|e| e.start('M'));
            for entry in &tiles {
                let (tile_w, tile_h) = entry.stored_shape();
                let plane = self.read_subblock::<T>(entry, tile_w, tile_h)?;
                let index = |dim: char| (i64::from(entry.start(dim)) - whole.start(dim)) as usize;
                let (t, c, z) = (index('T'), index('C'), index('Z'));
                let y0 = (i64::from(entry.start('Y')) - bbox.start('Y')) as usize;
                let x0 = (i64::from(entry.start('X')) - bbox.start('X')) as usize;
                let y1 = (y0 + tile_h).min(height);
                let x1 = (x0 + tile_w).min(width);
                if y0 >= y1 || x0 >= x1 {
                    continue;
                }
                let source = ndarray::ArrayView2::from_shape((tile_h, tile_w), plane.as_slice())
                    .map_err(Error::wrap)?;
                canvas
                    .slice_mut(s![slot, t, c, z, y0..y1, x0..x1])
                    .assign(&source.slice(s![..y1 - y0, ..x1 - x0]));
            }
        }
        Ok(canvas)
    }

    fn read_subblock<T: Pixel>(
        &mut self,
        entry: &DirectoryEntry,
        width: usize,
        height: usize,
    ) -> crate::Result<Vec<T>> {
        let bytes_per_pixel = entry.pixel_type.bytes_per_pixel();
        if bytes_per_pixel != size_of::<T>() {
            return Err(Error::Unsupported(format!(
                "pixel type {} read as {}",
                entry.pixel_type,
                T::DTYPE
            )));
        }
        let payload = read_segment(&mut self.reader, entry.file_position, SegmentKind::SubBlock)?;
        let sizes = SubBlockSizes::from_bytes(&payload)?;
        let fixed = SUBBLOCK_MIN_FIXED_SIZE.max(16 + entry.size_in_bytes());
        let data_start = fixed + sizes.metadata_size;
        let data_end = data_start + sizes.data_size;
        if data_end + sizes.attachment_size > payload.len() {
            return Err(Error::invalid_czi(format!(
                "subblock at {} extends past its segment",
                entry.file_position
            )));
        }
        let data = &payload[data_start..data_end];
        let expected = width * height * bytes_per_pixel;
        let raw = decode_subblock(entry.compression, entry.pixel_type, data, expected)?;
        Ok(raw
            .chunks_exact(bytes_per_pixel)
            .map(T::from_le_slice)
            .collect())
    }
}

impl std::fmt::Debug for CziFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CziFile")
            .field("path", &self.path)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Read the payload of the `kind` segment at `position`.
fn read_segment<R: Read + Seek>(
    reader: &mut R,
    position: u64,
    kind: SegmentKind,
) -> crate::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(position))?;
    let mut raw = [0u8; SEGMENT_HEADER_SIZE];
    reader
        .read_exact(&mut raw)
        .map_err(|e| Error::invalid_czi(format!("cannot read segment at {position}: {e}")))?;
    let header = SegmentHeader::from_bytes(&raw)?;
    header.expect(kind)?;
    let size = header.payload_size();
    let mut payload = Vec::new();
    reader.by_ref().take(size).read_to_end(&mut payload)?;
    if (payload.len() as u64) < size {
        return Err(Error::invalid_czi(format!(
            "truncated '{}' segment at {position}: {} of {size} bytes",
            header.id,
            payload.len()
        )));
    }
    Ok(payload)
}

fn read_metadata_xml<R: Read + Seek>(reader: &mut R, position: u64) -> crate::Result<String> {
    let payload = read_segment(reader, position, SegmentKind::Metadata)?;
    let mut fixed = segment::ByteReader::new(&payload);
    let xml_size = segment::non_negative(fixed.i32()?.into(), "metadata XML size")?;
    let xml = payload
        .get(METADATA_FIXED_SIZE..METADATA_FIXED_SIZE + xml_size)
        .ok_or_else(|| Error::invalid_czi("metadata XML extends past its segment"))?;
    let xml = String::from_utf8_lossy(xml);
    Ok(xml.trim_end_matches('\0').to_string())
}
