use std::{error::Error, fmt, ops::Range};

use serde::{Deserialize, Serialize};

/// A dense row-major `f32` tensor.
///
/// For datasets the first dimension is the sample dimension, a tensor of shape
/// `[n, a, b]` holds `n` samples of `a * b` values each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

/// A tensor as read off the wire, before its data is checked against its shape.
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = ShapeErr;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Self::new(raw.shape, raw.data)
    }
}

/// Returned when a tensor's data doesn't fit its shape, or two shapes disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeErr {
    pub expected: Vec<usize>,
    pub got: Vec<usize>,
}

impl fmt::Display for ShapeErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shape mismatch: expected {:?}, got {:?}",
            self.expected, self.got
        )
    }
}

impl Error for ShapeErr {}

impl Tensor {
    /// Creates a new `Tensor`.
    ///
    /// # Arguments
    /// * `shape` - The dimensions of the tensor.
    /// * `data` - The flat row-major values.
    ///
    /// # Returns
    /// The tensor, or a `ShapeErr` if `data.len()` isn't the product of `shape`.
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeErr> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ShapeErr {
                expected: shape,
                got: vec![data.len()],
            });
        }

        Ok(Self { shape, data })
    }

    /// Creates a rank 2 tensor from equally sized rows.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self, ShapeErr> {
        let width = rows.first().map(Vec::len).unwrap_or_default();
        let mut data = Vec::with_capacity(rows.len() * width);

        for row in rows {
            if row.len() != width {
                return Err(ShapeErr {
                    expected: vec![width],
                    got: vec![row.len()],
                });
            }
            data.extend_from_slice(row);
        }

        Self::new(vec![rows.len(), width], data)
    }

    /// A tensor of the given shape filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// The amount of samples, the size of the first dimension (0 for a scalar).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or_default()
    }

    /// The amount of values per sample.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Copies the samples in `range` into a new tensor with the same trailing dimensions.
    ///
    /// # Panics
    /// If `range` is out of `0..self.rows()`.
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        let row_len = self.row_len();
        let data = self.data[range.start * row_len..range.end * row_len].to_vec();

        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = range.len();
        }

        Self { shape, data }
    }

    /// Stacks tensors along the sample dimension.
    ///
    /// # Returns
    /// The concatenation, or a `ShapeErr` if the trailing dimensions disagree. An empty
    /// input yields `None`.
    pub fn concat_rows(parts: &[&Tensor]) -> Option<Result<Self, ShapeErr>> {
        let first = parts.first()?;
        let trailing = &first.shape[1.min(first.shape.len())..];

        let mut rows = 0;
        let mut data = Vec::new();
        for part in parts {
            let other = &part.shape[1.min(part.shape.len())..];
            if other != trailing {
                return Some(Err(ShapeErr {
                    expected: trailing.to_vec(),
                    got: other.to_vec(),
                }));
            }

            rows += part.rows();
            data.extend_from_slice(&part.data);
        }

        let mut shape = vec![rows];
        shape.extend_from_slice(trailing);
        Some(Self::new(shape, data))
    }

    /// Builds a new tensor by gathering the samples at `indices`, in order.
    ///
    /// # Panics
    /// If any index is out of `0..self.rows()`.
    pub fn gather_rows(&self, indices: &[usize]) -> Self {
        let row_len = self.row_len();
        let mut data = Vec::with_capacity(indices.len() * row_len);

        for &i in indices {
            data.extend_from_slice(&self.data[i * row_len..(i + 1) * row_len]);
        }

        let mut shape = self.shape.clone();
        if let Some(first) = shape.first_mut() {
            *first = indices.len();
        }

        Self { shape, data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_data_that_does_not_fit() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn decoding_checks_data_against_shape() {
        let t: Tensor = serde_json::from_str(r#"{"shape":[2],"data":[2.0,4.0]}"#).unwrap();
        assert_eq!(t.data(), &[2.0, 4.0]);

        let err = serde_json::from_str::<Tensor>(r#"{"shape":[2],"data":[10.0]}"#).unwrap_err();
        assert!(err.to_string().contains("shape mismatch"));
    }

    #[test]
    fn slices_and_gathers_whole_samples() {
        let t = Tensor::from_rows(&[vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]]).unwrap();
        assert_eq!(t.rows(), 3);
        assert_eq!(t.row_len(), 2);

        let s = t.slice_rows(1..3);
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.data(), &[2.0, 3.0, 4.0, 5.0]);

        let g = t.gather_rows(&[2, 0, 2]);
        assert_eq!(g.shape(), &[3, 2]);
        assert_eq!(g.data(), &[4.0, 5.0, 0.0, 1.0, 4.0, 5.0]);
    }

    #[test]
    fn concatenates_along_samples() {
        let a = Tensor::from_rows(&[vec![1.0, 2.0]]).unwrap();
        let b = Tensor::from_rows(&[vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();

        let c = Tensor::concat_rows(&[&a, &b]).unwrap().unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let narrow = Tensor::zeros(vec![1, 3]);
        assert!(Tensor::concat_rows(&[&a, &narrow]).unwrap().is_err());
        assert!(Tensor::concat_rows(&[]).is_none());
    }
}
