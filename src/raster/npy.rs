//! NPY array codec.
//!
//! Reads format versions 1.0 to 3.0 with little-endian numeric dtypes in C
//! order and writes version 1.0 `<f8` arrays. Values are widened to `f64`.

use std::path::Path;

use crate::error::RasterError;
use crate::raster::Raster;

const MAGIC: &[u8] = b"\x93NUMPY";
/// Header plus preamble is padded to a multiple of this.
const ALIGN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    Bool,
    I1,
    I2,
    I4,
    I8,
    U1,
    U2,
    U4,
    U8,
    F4,
    F8,
}

impl Dtype {
    fn parse(descr: &str) -> Result<Self, RasterError> {
        let unsupported = || RasterError::UnsupportedDtype(descr.to_string());
        let (order, code) = descr.split_at_checked(1).ok_or_else(unsupported)?;
        let dtype = match code {
            "b1" => Self::Bool,
            "i1" => Self::I1,
            "u1" => Self::U1,
            "i2" => Self::I2,
            "i4" => Self::I4,
            "i8" => Self::I8,
            "u2" => Self::U2,
            "u4" => Self::U4,
            "u8" => Self::U8,
            "f4" => Self::F4,
            "f8" => Self::F8,
            _ => return Err(unsupported()),
        };
        match order {
            "<" | "=" => Ok(dtype),
            "|" if dtype.width() == 1 => Ok(dtype),
            ">" if dtype.width() == 1 => Ok(dtype),
            _ => Err(unsupported()),
        }
    }

    fn width(self) -> usize {
        match self {
            Self::Bool | Self::I1 | Self::U1 => 1,
            Self::I2 | Self::U2 => 2,
            Self::I4 | Self::U4 | Self::F4 => 4,
            Self::I8 | Self::U8 | Self::F8 => 8,
        }
    }

    fn decode(self, b: &[u8]) -> f64 {
        match self {
            Self::Bool => f64::from(u8::from(b[0] != 0)),
            Self::I1 => f64::from(b[0] as i8),
            Self::U1 => f64::from(b[0]),
            Self::I2 => f64::from(i16::from_le_bytes([b[0], b[1]])),
            Self::U2 => f64::from(u16::from_le_bytes([b[0], b[1]])),
            Self::I4 => f64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::U4 => f64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::F4 => f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            Self::I8 => i64::from_le_bytes(eight(b)) as f64,
            Self::U8 => u64::from_le_bytes(eight(b)) as f64,
            Self::F8 => f64::from_le_bytes(eight(b)),
        }
    }
}

fn eight(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&b[..8]);
    out
}

/// Decode an in-memory NPY file. `source` names it in errors.
pub fn decode(bytes: &[u8], source: &Path) -> Result<Raster, RasterError> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err(RasterError::BadMagic(source.to_path_buf()));
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err(RasterError::Truncated {
                    expected: 12,
                    actual: bytes.len(),
                });
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        _ => return Err(RasterError::UnsupportedVersion { major, minor }),
    };

    let data_start = header_start + header_len;
    let header = bytes
        .get(header_start..data_start)
        .ok_or(RasterError::Truncated {
            expected: data_start,
            actual: bytes.len(),
        })?;
    let header = std::str::from_utf8(header)
        .map_err(|e| RasterError::Header(format!("header is not text: {e}")))?;

    let descr = header_str(header, "descr")?;
    let dtype = Dtype::parse(descr)?;
    if header_bool(header, "fortran_order")? {
        return Err(RasterError::FortranOrder);
    }
    let shape = header_shape(header)?;

    let count: usize = shape.iter().product();
    let expected = count * dtype.width();
    let body = &bytes[data_start..];
    if body.len() < expected {
        return Err(RasterError::Truncated {
            expected,
            actual: body.len(),
        });
    }
    let data = body[..expected]
        .chunks_exact(dtype.width())
        .map(|chunk| dtype.decode(chunk))
        .collect();
    Raster::new(shape, data)
}

/// Encode as a version 1.0 `<f8` C-order NPY file.
pub fn encode(raster: &Raster) -> Vec<u8> {
    let shape = match raster.shape() {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {shape}, }}");
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + raster.len() * 8);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    // Headers produced here are far below the u16 limit.
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in raster.data() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn read(path: &Path) -> Result<Raster, RasterError> {
    let bytes = std::fs::read(path).map_err(|source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode(&bytes, path)
}

pub fn write(path: &Path, raster: &Raster) -> Result<(), RasterError> {
    std::fs::write(path, encode(raster)).map_err(|source| RasterError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Text following `'key':` in the header dict.
fn header_value<'a>(header: &'a str, key: &str) -> Result<&'a str, RasterError> {
    let needle = format!("'{key}':");
    let at = header
        .find(&needle)
        .ok_or_else(|| RasterError::Header(format!("missing key '{key}'")))?;
    Ok(header[at + needle.len()..].trim_start())
}

fn header_str<'a>(header: &'a str, key: &str) -> Result<&'a str, RasterError> {
    let value = header_value(header, key)?;
    let bad = || RasterError::Header(format!("'{key}' is not a string"));
    let quote = value.chars().next().filter(|c| *c == '\'' || *c == '"').ok_or_else(bad)?;
    let rest = &value[1..];
    let end = rest.find(quote).ok_or_else(bad)?;
    Ok(&rest[..end])
}

fn header_bool(header: &str, key: &str) -> Result<bool, RasterError> {
    let value = header_value(header, key)?;
    if value.starts_with("True") {
        Ok(true)
    } else if value.starts_with("False") {
        Ok(false)
    } else {
        Err(RasterError::Header(format!("'{key}' is not a boolean")))
    }
}

fn header_shape(header: &str) -> Result<Vec<usize>, RasterError> {
    let value = header_value(header, "shape")?;
    let bad = || RasterError::Header("'shape' is not a tuple".to_string());
    let inner = value.strip_prefix('(').ok_or_else(bad)?;
    let end = inner.find(')').ok_or_else(bad)?;
    inner[..end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse()
                .map_err(|_| RasterError::Header(format!("bad dimension '{s}'")))
        })
        .collect()
}
