//! In-memory rasters and their on-disk codec.
//!
//! A `Raster` is a dense C-order array of `f64`. Multi-band images are
//! band-first: `(bands, height, width)`.

pub mod npy;

use std::path::Path;

use crate::error::RasterError;

#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Raster {
    pub fn new(shape: Vec<usize>, data: Vec<f64>) -> Result<Self, RasterError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(RasterError::ShapeMismatch {
                expected: shape,
                actual: vec![data.len()],
            });
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    /// Stack equally sized `(h, w)` planes into `(n, h, w)`.
    pub fn stack(planes: &[Raster]) -> Result<Self, RasterError> {
        let first = planes.first().ok_or_else(|| RasterError::Dimensions {
            expected: 2,
            actual: Vec::new(),
        })?;
        let (h, w) = first.dims2()?;
        let mut data = Vec::with_capacity(planes.len() * h * w);
        for plane in planes {
            if plane.shape != first.shape {
                return Err(RasterError::ShapeMismatch {
                    expected: first.shape.clone(),
                    actual: plane.shape.clone(),
                });
            }
            data.extend_from_slice(&plane.data);
        }
        Ok(Self {
            shape: vec![planes.len(), h, w],
            data,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RasterError> {
        npy::read(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), RasterError> {
        npy::write(path, self)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(h, w)` of a 2-D raster.
    pub fn dims2(&self) -> Result<(usize, usize), RasterError> {
        match self.shape[..] {
            [h, w] => Ok((h, w)),
            _ => Err(RasterError::Dimensions {
                expected: 2,
                actual: self.shape.clone(),
            }),
        }
    }

    /// `(bands, h, w)`; a 2-D raster is a single band.
    pub fn band_dims(&self) -> Result<(usize, usize, usize), RasterError> {
        match self.shape[..] {
            [h, w] => Ok((1, h, w)),
            [n, h, w] => Ok((n, h, w)),
            _ => Err(RasterError::Dimensions {
                expected: 3,
                actual: self.shape.clone(),
            }),
        }
    }

    /// Zero-based band plane as a slice.
    pub fn band(&self, index: usize) -> Result<&[f64], RasterError> {
        let (n, h, w) = self.band_dims()?;
        if index >= n {
            return Err(RasterError::ShapeMismatch {
                expected: vec![index + 1, h, w],
                actual: self.shape.clone(),
            });
        }
        let plane = h * w;
        Ok(&self.data[index * plane..(index + 1) * plane])
    }

    /// Zero-based band plane as an owned `(h, w)` raster.
    pub fn band_raster(&self, index: usize) -> Result<Raster, RasterError> {
        let (_, h, w) = self.band_dims()?;
        Ok(Raster {
            shape: vec![h, w],
            data: self.band(index)?.to_vec(),
        })
    }
}
