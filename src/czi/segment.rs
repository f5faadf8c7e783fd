//! Segment-level layout of the ZISRAW container.
//!
//! All integers are little-endian. Every segment begins with a 32 byte header
//! holding a NUL-padded ASCII id and the allocated/used sizes of the payload.

use crate::Error;

pub(crate) const SEGMENT_HEADER_SIZE: usize = 32;
pub(crate) const SEGMENT_ID_SIZE: usize = 16;

/// Size of the fixed part of a metadata segment before the XML starts.
pub(crate) const METADATA_FIXED_SIZE: usize = 256;
/// Size of the fixed part of a directory segment before the entries start.
pub(crate) const DIRECTORY_FIXED_SIZE: usize = 128;
/// Minimum size of the fixed part of a subblock segment.
pub(crate) const SUBBLOCK_MIN_FIXED_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    FileHeader,
    Directory,
    SubBlock,
    Metadata,
    AttachmentDirectory,
    Attachment,
    Deleted,
    Unknown,
}

impl SegmentKind {
    pub(crate) fn from_id(id: &str) -> Self {
        match id {
            "ZISRAWFILE" => Self::FileHeader,
            "ZISRAWDIRECTORY" => Self::Directory,
            "ZISRAWSUBBLOCK" => Self::SubBlock,
            "ZISRAWMETADATA" => Self::Metadata,
            "ZISRAWATTDIR" => Self::AttachmentDirectory,
            "ZISRAWATTACH" => Self::Attachment,
            "DELETED" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmentHeader {
    pub id: String,
    pub kind: SegmentKind,
    pub allocated_size: u64,
    pub used_size: u64,
}

impl SegmentHeader {
    pub(crate) fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let raw_id = reader.take(SEGMENT_ID_SIZE)?;
        let end = raw_id.iter().position(|&b| b == 0).unwrap_or(raw_id.len());
        let id = std::str::from_utf8(&raw_id[..end])
            .map_err(|_| Error::invalid_czi("segment id is not ASCII"))?
            .to_string();
        let allocated_size = reader.u64()?;
        let used_size = reader.u64()?;
        let kind = SegmentKind::from_id(&id);
        Ok(Self {
            id,
            kind,
            allocated_size,
            used_size,
        })
    }

    /// Number of payload bytes to read; a zero used size means "same as allocated".
    pub(crate) fn payload_size(&self) -> u64 {
        if self.used_size == 0 {
            self.allocated_size
        } else {
            self.used_size
        }
    }

    pub(crate) fn expect(&self, kind: SegmentKind) -> crate::Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(Error::invalid_czi(format!(
                "expected {kind:?} segment, found '{}'",
                self.id
            )))
        }
    }
}

/// Contents of the `ZISRAWFILE` segment.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub major: i32,
    pub minor: i32,
    pub primary_file_guid: [u8; 16],
    pub file_guid: [u8; 16],
    pub file_part: i32,
    pub directory_position: u64,
    pub metadata_position: u64,
    pub update_pending: bool,
    pub attachment_directory_position: u64,
}

impl FileHeader {
    pub(crate) fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let major = reader.i32()?;
        let minor = reader.i32()?;
        reader.skip(8)?; // reserved
        let primary_file_guid = reader.array::<16>()?;
        let file_guid = reader.array::<16>()?;
        let file_part = reader.i32()?;
        let directory_position = reader.u64()?;
        let metadata_position = reader.u64()?;
        let update_pending = reader.i32()? != 0;
        let attachment_directory_position = reader.u64()?;
        Ok(Self {
            major,
            minor,
            primary_file_guid,
            file_guid,
            file_part,
            directory_position,
            metadata_position,
            update_pending,
            attachment_directory_position,
        })
    }
}

/// Fixed part of a `ZISRAWSUBBLOCK` segment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SubBlockSizes {
    pub metadata_size: usize,
    pub attachment_size: usize,
    pub data_size: usize,
}

impl SubBlockSizes {
    pub(crate) fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let metadata_size = reader.i32()?;
        let attachment_size = reader.i32()?;
        let data_size = reader.i64()?;
        Ok(Self {
            metadata_size: non_negative(metadata_size.into(), "subblock metadata size")?,
            attachment_size: non_negative(attachment_size.into(), "subblock attachment size")?,
            data_size: non_negative(data_size, "subblock data size")?,
        })
    }
}

pub(crate) fn non_negative(value: i64, what: &str) -> crate::Result<usize> {
    usize::try_from(value).map_err(|_| Error::invalid_czi(format!("negative {what}: {value}")))
}

/// Little-endian cursor over a byte slice.
///
/// Every read is bounds checked and reports truncation as an invalid CZI file.
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn take(&mut self, n: usize) -> crate::Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                Error::invalid_czi(format!(
                    "truncated data: wanted {n} bytes at offset {}, have {}",
                    self.offset,
                    self.bytes.len()
                ))
            })?;
        let out = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(out)
    }

    pub(crate) fn skip(&mut self, n: usize) -> crate::Result<()> {
        self.take(n).map(|_| ())
    }

    pub(crate) fn array<const N: usize>(&mut self) -> crate::Result<[u8; N]> {
        self.take(N)?.try_into().map_err(Error::wrap)
    }

    pub(crate) fn u8(&mut self) -> crate::Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub(crate) fn i32(&mut self) -> crate::Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub(crate) fn i64(&mut self) -> crate::Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> crate::Result<u64> {
        let value = self.i64()?;
        u64::try_from(value).map_err(|_| Error::invalid_czi(format!("negative offset {value}")))
    }

    pub(crate) fn f32(&mut self) -> crate::Result<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(id: &str, allocated: i64, used: i64) -> Vec<u8> {
        let mut out = vec![0u8; SEGMENT_ID_SIZE];
        out[..id.len()].copy_from_slice(id.as_bytes());
        out.extend_from_slice(&allocated.to_le_bytes());
        out.extend_from_slice(&used.to_le_bytes());
        out
    }

    #[test]
    fn parses_segment_header() {
        let header = SegmentHeader::from_bytes(&header_bytes("ZISRAWSUBBLOCK", 512, 300)).unwrap();
        assert_eq!(header.kind, SegmentKind::SubBlock);
        assert_eq!(header.allocated_size, 512);
        assert_eq!(header.payload_size(), 300);
    }

    #[test]
    fn zero_used_size_falls_back_to_allocated() {
        let header = SegmentHeader::from_bytes(&header_bytes("ZISRAWMETADATA", 1024, 0)).unwrap();
        assert_eq!(header.payload_size(), 1024);
    }

    #[test]
    fn unknown_ids_are_kept() {
        let header = SegmentHeader::from_bytes(&header_bytes("SOMETHING", 32, 32)).unwrap();
        assert_eq!(header.kind, SegmentKind::Unknown);
        assert_eq!(header.id, "SOMETHING");
        assert!(header.expect(SegmentKind::Directory).is_err());
    }

    #[test]
    fn truncated_reads_fail() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert!(reader.i32().is_err());
        let mut reader = ByteReader::new(&[1, 0, 0, 0]);
        assert_eq!(reader.i32().unwrap(), 1);
        assert_eq!(reader.offset(), 4);
    }

    #[test]
    fn negative_sizes_are_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(-1i32).to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes.extend_from_slice(&0i64.to_le_bytes());
        assert!(SubBlockSizes::from_bytes(&bytes).is_err());
    }
}
