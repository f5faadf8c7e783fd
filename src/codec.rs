use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zarrs::array::codec::{GzipCodec, ZstdCodec};

use crate::Error;
use crate::czi::directory::{PixelType, SubBlockCompression};

/// Decode the pixel payload of a subblock into raw little-endian pixels.
///
/// `expected_len` is the byte length of the stored plane; anything else is an error.
pub(crate) fn decode_subblock(
    compression: SubBlockCompression,
    pixel_type: PixelType,
    data: &[u8],
    expected_len: usize,
) -> crate::Result<Vec<u8>> {
    let decoded = match compression {
        SubBlockCompression::Uncompressed => {
            if data.len() < expected_len {
                return Err(Error::invalid_czi(format!(
                    "subblock holds {} bytes, expected {expected_len}",
                    data.len()
                )));
            }
            data[..expected_len].to_vec()
        }
        SubBlockCompression::Zstd0 => zstd_decode(data)?,
        SubBlockCompression::Zstd1 => {
            let header = Zstd1Header::from_bytes(data)?;
            let raw = zstd_decode(&data[header.size..])?;
            if header.hi_lo_packed {
                if pixel_type != PixelType::Gray16 {
                    return Err(Error::Unsupported(format!(
                        "hi/lo byte packing on {pixel_type} data"
                    )));
                }
                unpack_hi_lo(&raw)?
            } else {
                raw
            }
        }
        c => {
            return Err(Error::Unsupported(format!(
                "subblock compression {c:?}"
            )));
        }
    };
    if decoded.len() != expected_len {
        return Err(Error::invalid_czi(format!(
            "decoded subblock has {} bytes, expected {expected_len}",
            decoded.len()
        )));
    }
    Ok(decoded)
}

fn zstd_decode(data: &[u8]) -> crate::Result<Vec<u8>> {
    zstd::decode_all(data)
        .map_err(|e| Error::invalid_czi(format!("zstd decompression failed: {e}")))
}

/// Header preceding the zstd frame in `Zstd1` subblocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Zstd1Header {
    /// Header length including the size byte itself.
    size: usize,
    hi_lo_packed: bool,
}

impl Zstd1Header {
    fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let Some(&size) = bytes.first() else {
            return Err(Error::invalid_czi("empty zstd1 subblock"));
        };
        let size = usize::from(size);
        if size == 0 || size > bytes.len() {
            return Err(Error::invalid_czi(format!("invalid zstd1 header size {size}")));
        }
        let mut hi_lo_packed = false;
        let mut offset = 1;
        while offset < size {
            match bytes[offset] {
                // chunk type 1: one byte of flags
                1 if offset + 1 < size => {
                    hi_lo_packed = bytes[offset + 1] & 1 == 1;
                    offset += 2;
                }
                n => {
                    return Err(Error::invalid_czi(format!(
                        "invalid zstd1 header chunk {n}"
                    )));
                }
            }
        }
        Ok(Self { size, hi_lo_packed })
    }
}

/// Undo hi/lo byte packing: all low bytes come first, then all high bytes.
fn unpack_hi_lo(packed: &[u8]) -> crate::Result<Vec<u8>> {
    if packed.len() % 2 != 0 {
        return Err(Error::invalid_czi("hi/lo packed data has odd length"));
    }
    let half = packed.len() / 2;
    let (lo, hi) = packed.split_at(half);
    Ok(lo.iter().zip(hi).flat_map(|(&l, &h)| [l, h]).collect())
}

/// Chunk compression of the written Zarr arrays.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Compression {
    /// Uncompressed.
    Raw,
    Gzip {
        /// Default 5. Must be in the range 0..=9.
        #[serde(default = "default_gzip_level")]
        level: u32,
    },
    Zstd {
        /// Default 5.
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
}

impl Default for Compression {
    fn default() -> Self {
        Self::Zstd {
            level: default_zstd_level(),
        }
    }
}

fn default_gzip_level() -> u32 {
    5
}

fn default_zstd_level() -> i32 {
    5
}

impl Compression {
    /// Convert to a bytes-to-bytes codec; `None` for raw output.
    pub fn to_bytes_to_bytes_codec(
        &self,
    ) -> crate::Result<Option<Arc<dyn zarrs_codec::BytesToBytesCodecTraits>>> {
        match self {
            Compression::Raw => Ok(None),
            Compression::Gzip { level } => Ok(Some(Arc::new(
                GzipCodec::new(*level).map_err(crate::Error::wrap)?,
            ))),
            Compression::Zstd { level } => {
                if !(-7..=22).contains(level) {
                    return Err(crate::Error::general(format!(
                        "invalid zstd compression level {level}"
                    )));
                }
                Ok(Some(Arc::new(ZstdCodec::new((*level).into(), false))))
            }
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    /// `raw`, `gzip`, `gzip:<level>`, `zstd` or `zstd:<level>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, level) = match s.split_once(':') {
            Some((name, level)) => (name, Some(level)),
            None => (s, None),
        };
        let bad_level = |l: &str| Error::general(format!("invalid compression level '{l}'"));
        match (name.trim().to_ascii_lowercase().as_str(), level) {
            ("raw" | "none", None) => Ok(Self::Raw),
            ("gzip", None) => Ok(Self::Gzip {
                level: default_gzip_level(),
            }),
            ("gzip", Some(l)) => {
                let level = l.trim().parse().map_err(|_| bad_level(l))?;
                if level > 9 {
                    return Err(bad_level(l));
                }
                Ok(Self::Gzip { level })
            }
            ("zstd", None) => Ok(Self::Zstd {
                level: default_zstd_level(),
            }),
            ("zstd", Some(l)) => Ok(Self::Zstd {
                level: l.trim().parse().map_err(|_| bad_level(l))?,
            }),
            _ => Err(Error::general(format!(
                "unknown compression '{s}', expected raw, gzip[:level] or zstd[:level]"
            ))),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Raw => write!(f, "raw"),
            Compression::Gzip { level } => write!(f, "gzip:{level}"),
            Compression::Zstd { level } => write!(f, "zstd:{level}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unpacks_hi_lo_bytes() {
        // two u16 values: 0x0201, 0x0403
        let packed = [0x01, 0x03, 0x02, 0x04];
        assert_eq!(unpack_hi_lo(&packed).unwrap(), vec![0x01, 0x02, 0x03, 0x04]);
        assert!(unpack_hi_lo(&[1, 2, 3]).is_err());
    }

    #[test]
    fn parses_zstd1_header() {
        assert_eq!(
            Zstd1Header::from_bytes(&[1, 0xAA]).unwrap(),
            Zstd1Header {
                size: 1,
                hi_lo_packed: false
            }
        );
        assert_eq!(
            Zstd1Header::from_bytes(&[3, 1, 1, 0xAA]).unwrap(),
            Zstd1Header {
                size: 3,
                hi_lo_packed: true
            }
        );
        assert!(Zstd1Header::from_bytes(&[]).is_err());
        assert!(Zstd1Header::from_bytes(&[3, 7, 0]).is_err());
    }

    #[test]
    fn decodes_zstd1_hi_lo() {
        let values: Vec<u16> = vec![1, 258, 65535, 4096];
        let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut packed: Vec<u8> = raw.iter().step_by(2).copied().collect();
        packed.extend(raw.iter().skip(1).step_by(2));
        let mut payload = vec![3, 1, 1];
        payload.extend(zstd::encode_all(packed.as_slice(), 3).unwrap());

        let decoded = decode_subblock(
            SubBlockCompression::Zstd1,
            PixelType::Gray16,
            &payload,
            raw.len(),
        )
        .unwrap();
        assert_eq!(decoded, raw);
    }

    #[test]
    fn hi_lo_packing_is_only_for_gray16() {
        let mut payload = vec![3, 1, 1];
        payload.extend(zstd::encode_all([0u8; 8].as_slice(), 3).unwrap());
        let err = decode_subblock(
            SubBlockCompression::Zstd1,
            PixelType::Gray32Float,
            &payload,
            8,
        );
        assert!(matches!(err, Err(Error::Unsupported(_))));
    }

    #[test]
    fn default_compression_is_zstd() {
        assert_eq!(Compression::default(), Compression::Zstd { level: 5 });
    }

    #[test]
    fn uncompressed_length_is_checked() {
        let err = decode_subblock(
            SubBlockCompression::Uncompressed,
            PixelType::Gray8,
            &[1, 2],
            4,
        );
        assert!(err.is_err());
    }

    #[test]
    fn jpgxr_is_unsupported() {
        let err = decode_subblock(SubBlockCompression::JpgXr, PixelType::Gray8, &[0], 1);
        assert!(matches!(err, Err(Error::Unsupported(_))));
    }

    #[test]
    fn parses_compression_names() {
        assert_eq!("raw".parse::<Compression>().unwrap(), Compression::Raw);
        assert_eq!(
            "gzip:7".parse::<Compression>().unwrap(),
            Compression::Gzip { level: 7 }
        );
        assert_eq!(
            "ZSTD".parse::<Compression>().unwrap(),
            Compression::Zstd { level: 5 }
        );
        assert!("gzip:12".parse::<Compression>().is_err());
        assert!("lz4".parse::<Compression>().is_err());
        assert_eq!(Compression::Gzip { level: 3 }.to_string(), "gzip:3");
    }

    #[test]
    fn builds_codecs() {
        assert!(Compression::Raw.to_bytes_to_bytes_codec().unwrap().is_none());
        assert!(Compression::default().to_bytes_to_bytes_codec().unwrap().is_some());
        assert!(
            Compression::Zstd { level: 40 }
                .to_bytes_to_bytes_codec()
                .is_err()
        );
    }
}
