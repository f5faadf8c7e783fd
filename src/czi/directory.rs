use std::fmt;

use super::segment::ByteReader;
use crate::Error;

/// Size of the fixed part of a `DV` directory entry, before its dimension entries.
pub(crate) const ENTRY_FIXED_SIZE: usize = 32;
/// Size of one dimension entry inside a directory entry.
pub(crate) const DIMENSION_ENTRY_SIZE: usize = 20;

/// Pixel types defined by the CZI format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelType {
    Gray8,
    Gray16,
    Gray32Float,
    Bgr24,
    Bgr48,
    Bgr96Float,
    Bgra32,
    Gray64ComplexFloat,
    Bgr192ComplexFloat,
    Gray32,
    Gray64,
}

impl PixelType {
    pub fn from_code(code: i32) -> crate::Result<Self> {
        let out = match code {
            0 => Self::Gray8,
            1 => Self::Gray16,
            2 => Self::Gray32Float,
            3 => Self::Bgr24,
            4 => Self::Bgr48,
            8 => Self::Bgr96Float,
            9 => Self::Bgra32,
            10 => Self::Gray64ComplexFloat,
            11 => Self::Bgr192ComplexFloat,
            12 => Self::Gray32,
            13 => Self::Gray64,
            n => return Err(Error::invalid_czi(format!("unknown pixel type {n}"))),
        };
        Ok(out)
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Gray8 => 0,
            Self::Gray16 => 1,
            Self::Gray32Float => 2,
            Self::Bgr24 => 3,
            Self::Bgr48 => 4,
            Self::Bgr96Float => 8,
            Self::Bgra32 => 9,
            Self::Gray64ComplexFloat => 10,
            Self::Bgr192ComplexFloat => 11,
            Self::Gray32 => 12,
            Self::Gray64 => 13,
        }
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Gray16 => 2,
            Self::Gray32Float | Self::Gray32 | Self::Bgra32 => 4,
            Self::Bgr24 => 3,
            Self::Bgr48 => 6,
            Self::Gray64ComplexFloat | Self::Gray64 => 8,
            Self::Bgr96Float => 12,
            Self::Bgr192ComplexFloat => 24,
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Subblock compression schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlockCompression {
    Uncompressed,
    Jpg,
    Lzw,
    JpgXr,
    /// A bare zstd frame.
    Zstd0,
    /// A small header followed by a zstd frame; 16 bit data may be hi/lo byte packed.
    Zstd1,
    Other(i32),
}

impl SubBlockCompression {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Uncompressed,
            1 => Self::Jpg,
            2 => Self::Lzw,
            4 => Self::JpgXr,
            5 => Self::Zstd0,
            6 => Self::Zstd1,
            n => Self::Other(n),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Uncompressed => 0,
            Self::Jpg => 1,
            Self::Lzw => 2,
            Self::JpgXr => 4,
            Self::Zstd0 => 5,
            Self::Zstd1 => 6,
            Self::Other(n) => n,
        }
    }
}

/// One axis of a subblock's position in the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DimensionEntry {
    /// Single-letter dimension name, e.g. `X`, `C`, `S`.
    pub dimension: char,
    pub start: i32,
    pub size: u32,
    pub start_coordinate: f32,
    /// Size of the stored data; differs from `size` for pyramid subblocks.
    pub stored_size: u32,
}

impl DimensionEntry {
    fn read(reader: &mut ByteReader<'_>) -> crate::Result<Self> {
        let name = reader.array::<4>()?;
        let dimension = char::from(name[0]);
        if !dimension.is_ascii_alphabetic() {
            return Err(Error::invalid_czi(format!(
                "invalid dimension name {name:?}"
            )));
        }
        let start = reader.i32()?;
        let size = reader.i32()?;
        let start_coordinate = reader.f32()?;
        let stored_size = reader.i32()?;
        Ok(Self {
            dimension,
            start,
            size: u32::try_from(size)
                .map_err(|_| Error::invalid_czi(format!("negative size on {dimension}")))?,
            start_coordinate,
            stored_size: u32::try_from(stored_size)
                .map_err(|_| Error::invalid_czi(format!("negative stored size on {dimension}")))?,
        })
    }
}

/// A `DV` directory entry: where a subblock lives and what it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub pixel_type: PixelType,
    pub file_position: u64,
    pub file_part: i32,
    pub compression: SubBlockCompression,
    pub pyramid_type: u8,
    pub dimensions: Vec<DimensionEntry>,
}

impl DirectoryEntry {
    pub(crate) fn read(reader: &mut ByteReader<'_>) -> crate::Result<Self> {
        let schema = reader.array::<2>()?;
        if &schema != b"DV" {
            return Err(Error::invalid_czi(format!(
                "unsupported directory entry schema {:?}",
                String::from_utf8_lossy(&schema)
            )));
        }
        let pixel_type = PixelType::from_code(reader.i32()?)?;
        let file_position = reader.u64()?;
        let file_part = reader.i32()?;
        let compression = SubBlockCompression::from_code(reader.i32()?);
        let pyramid_type = reader.u8()?;
        reader.skip(5)?; // spare
        let dimension_count = reader.i32()?;
        let dimension_count = usize::try_from(dimension_count)
            .map_err(|_| Error::invalid_czi("negative dimension count"))?;
        let dimensions = (0..dimension_count)
            .map(|_| DimensionEntry::read(reader))
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self {
            pixel_type,
            file_position,
            file_part,
            compression,
            pyramid_type,
            dimensions,
        })
    }

    /// Encoded size of this entry.
    pub fn size_in_bytes(&self) -> usize {
        ENTRY_FIXED_SIZE + self.dimensions.len() * DIMENSION_ENTRY_SIZE
    }

    pub fn dimension(&self, name: char) -> Option<&DimensionEntry> {
        self.dimensions.iter().find(|d| d.dimension == name)
    }

    /// Start index on `name`, zero when the axis is absent.
    pub fn start(&self, name: char) -> i32 {
        self.dimension(name).map_or(0, |d| d.start)
    }

    pub fn scene(&self) -> Option<usize> {
        self.dimension('S').and_then(|d| usize::try_from(d.start).ok())
    }

    /// Width and height of the stored pixel data.
    pub fn stored_shape(&self) -> (usize, usize) {
        let stored = |name| self.dimension(name).map_or(1, |d| d.stored_size as usize);
        (stored('X'), stored('Y'))
    }

    /// Full resolution subblocks are those not produced by the pyramid.
    pub fn is_full_resolution(&self) -> bool {
        if self.pyramid_type != 0 {
            return false;
        }
        ['X', 'Y'].iter().all(|&name| {
            self.dimension(name)
                .is_none_or(|d| d.size == d.stored_size)
        })
    }
}

/// Parse the body of a `ZISRAWDIRECTORY` segment (after the fixed part).
pub(crate) fn read_entries(bytes: &[u8], count: usize) -> crate::Result<Vec<DirectoryEntry>> {
    let mut reader = ByteReader::new(bytes);
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let entry = DirectoryEntry::read(&mut reader)?;
        entries.push(entry);
    }
    log::debug!(
        "read {} directory entries from {} bytes",
        entries.len(),
        reader.offset()
    );
    Ok(entries)
}
