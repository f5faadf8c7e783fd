use std::fmt;

use ndarray::{Array5, ArrayD, Axis, Ix5, s};
use zarrs::array::{DataType, ElementOwned, FillValue, data_type};

use crate::Error;
use crate::czi::metadata::{ChannelInfo, PhysicalScale};

/// Axis order written to OME-Zarr.
pub const TCZYX: [char; 5] = ['T', 'C', 'Z', 'Y', 'X'];
/// Axis order of a multi-scene read.
pub const STCZYX: [char; 6] = ['S', 'T', 'C', 'Z', 'Y', 'X'];

/// Element types that can be read from CZI subblocks and written to Zarr.
pub trait Pixel:
    ElementOwned + Copy + Default + PartialOrd + Send + Sync + fmt::Debug + 'static
{
    const DTYPE: &'static str;

    fn data_type() -> DataType;

    fn fill_value() -> FillValue;

    /// Decode one little-endian element; `bytes` has exactly `size_of::<Self>()` bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn to_f64(self) -> f64;

    fn from_f64(value: f64) -> Self;

    fn into_data(array: ArrayD<Self>) -> PixelData;
}

macro_rules! impl_integer_pixel {
    ($t:ty, $variant:ident, $dtype:literal, $zarr:ident) => {
        impl Pixel for $t {
            const DTYPE: &'static str = $dtype;

            fn data_type() -> DataType {
                data_type::$zarr()
            }

            fn fill_value() -> FillValue {
                FillValue::from(0 as $t)
            }

            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }

            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            fn from_f64(value: f64) -> Self {
                // `as` saturates
                value.round() as $t
            }

            fn into_data(array: ArrayD<Self>) -> PixelData {
                PixelData::$variant(array)
            }
        }
    };
}

impl_integer_pixel!(u8, U8, "uint8", uint8);
impl_integer_pixel!(u16, U16, "uint16", uint16);

impl Pixel for f32 {
    const DTYPE: &'static str = "float32";

    fn data_type() -> DataType {
        data_type::float32()
    }

    fn fill_value() -> FillValue {
        FillValue::from(0f32)
    }

    fn from_le_slice(bytes: &[u8]) -> Self {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(bytes);
        f32::from_le_bytes(buf)
    }

    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn from_f64(value: f64) -> Self {
        value as f32
    }

    fn into_data(array: ArrayD<Self>) -> PixelData {
        PixelData::F32(array)
    }
}

/// Pixel array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U8(ArrayD<u8>),
    U16(ArrayD<u16>),
    F32(ArrayD<f32>),
}

/// Run `$body` with `$array` bound to the typed array inside a [`PixelData`].
macro_rules! with_pixels {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            $crate::image::PixelData::U8($array) => $body,
            $crate::image::PixelData::U16($array) => $body,
            $crate::image::PixelData::F32($array) => $body,
        }
    };
}
pub(crate) use with_pixels;

impl PixelData {
    pub fn shape(&self) -> &[usize] {
        with_pixels!(self, a => a.shape())
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Self::U8(_) => u8::DTYPE,
            Self::U16(_) => u16::DTYPE,
            Self::F32(_) => f32::DTYPE,
        }
    }
}

/// A labelled pixel array plus the physical metadata needed to describe it.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    data: PixelData,
    dims: Vec<char>,
    pub scale: PhysicalScale,
    pub channels: Vec<ChannelInfo>,
    pub name: Option<String>,
}

impl Image {
    pub fn new(data: PixelData, dims: &[char]) -> crate::Result<Self> {
        if data.shape().len() != dims.len() {
            return Err(Error::general(format!(
                "array has {} dimensions but {} labels were given",
                data.shape().len(),
                dims.len()
            )));
        }
        Ok(Self {
            data,
            dims: dims.to_vec(),
            scale: PhysicalScale::default(),
            channels: Vec::new(),
            name: None,
        })
    }

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn into_data(self) -> PixelData {
        self.data
    }

    pub fn dims(&self) -> &[char] {
        &self.dims
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn dtype(&self) -> &'static str {
        self.data.dtype()
    }

    /// Size of the axis labelled `dim`.
    pub fn size(&self, dim: char) -> Option<usize> {
        self.axis(dim).map(|i| self.shape()[i])
    }

    fn axis(&self, dim: char) -> Option<usize> {
        self.dims.iter().position(|&d| d == dim)
    }

    /// Remove a length-one axis.
    pub fn squeeze(self, dim: char) -> crate::Result<Self> {
        let axis = self
            .axis(dim)
            .ok_or_else(|| Error::general(format!("image has no {dim} axis")))?;
        let len = self.shape()[axis];
        if len != 1 {
            return Err(Error::general(format!(
                "cannot squeeze axis {dim} of length {len}"
            )));
        }
        let data = match self.data {
            PixelData::U8(a) => PixelData::U8(a.index_axis_move(Axis(axis), 0)),
            PixelData::U16(a) => PixelData::U16(a.index_axis_move(Axis(axis), 0)),
            PixelData::F32(a) => PixelData::F32(a.index_axis_move(Axis(axis), 0)),
        };
        let mut dims = self.dims;
        dims.remove(axis);
        Ok(Self {
            data,
            dims,
            scale: self.scale,
            channels: self.channels,
            name: self.name,
        })
    }

    pub(crate) fn ensure_tczyx(&self) -> crate::Result<()> {
        if self.dims == TCZYX {
            Ok(())
        } else {
            Err(Error::general(format!(
                "expected a TCZYX image, got {}",
                self.dims.iter().collect::<String>()
            )))
        }
    }

    /// Block-mean downsampling of the `y` and `x` axes of a TCZYX image.
    ///
    /// Edge blocks that extend past the image are averaged over the pixels they cover.
    pub fn downsample(&self, factor: usize) -> crate::Result<Self> {
        self.ensure_tczyx()?;
        if factor == 0 {
            return Err(Error::general("downsampling factor must be positive"));
        }
        let data = if factor == 1 {
            self.data.clone()
        } else {
            with_pixels!(&self.data, a => {
                let a5 = a.view().into_dimensionality::<Ix5>().map_err(Error::wrap)?;
                Pixel::into_data(block_mean(a5, factor).into_dyn())
            })
        };
        Ok(Self {
            data,
            dims: self.dims.clone(),
            scale: self.scale,
            channels: self.channels.clone(),
            name: self.name.clone(),
        })
    }

    /// Per-channel (min, max) over a TCZYX image.
    pub fn channel_ranges(&self) -> crate::Result<Vec<(f64, f64)>> {
        self.ensure_tczyx()?;
        let ranges: Vec<(f64, f64)> = with_pixels!(&self.data, a => {
            a.axis_iter(Axis(1))
                .map(|channel| {
                    channel.iter().fold(None, |acc: Option<(f64, f64)>, &v| {
                        let v = v.to_f64();
                        if v.is_nan() {
                            return acc;
                        }
                        Some(match acc {
                            Some((lo, hi)) => (lo.min(v), hi.max(v)),
                            None => (v, v),
                        })
                    })
                    .unwrap_or((0.0, 0.0))
                })
                .collect()
        });
        Ok(ranges)
    }
}

fn block_mean<T: Pixel>(a: ndarray::ArrayView5<'_, T>, factor: usize) -> Array5<T> {
    let (t, c, z, y, x) = a.dim();
    let out_y = y.div_ceil(factor);
    let out_x = x.div_ceil(factor);
    Array5::from_shape_fn((t, c, z, out_y, out_x), |(it, ic, iz, iy, ix)| {
        let y0 = iy * factor;
        let x0 = ix * factor;
        let block = a.slice(s![
            it,
            ic,
            iz,
            y0..(y0 + factor).min(y),
            x0..(x0 + factor).min(x)
        ]);
        let sum: f64 = block.iter().map(|v| v.to_f64()).sum();
        T::from_f64(sum / block.len() as f64)
    })
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: String = self.dims.iter().collect();
        write!(f, "{dims} {:?} {}", self.shape(), self.dtype())
    }
}
