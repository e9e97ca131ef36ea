//! # SafeTensors Weight Store
//!
//! Reads a `.safetensors` file and converts every tensor to an `f32` `ndarray`.
//! Layers pull their parameters out of the store by name with [`WeightStore::take_matrix`]
//! and [`WeightStore::take_vector`], which check the shape the layer expects.
//!
//! Half-precision checkpoints (`F16`, `BF16`) are widened to `f32` on load.

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};
use safetensors::{Dtype, SafeTensorError, SafeTensors};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug)]
pub enum WeightsError {
    Io(io::Error),
    SafeTensors(SafeTensorError),
    UnsupportedDtype { name: String, dtype: String },
    MissingTensor(String),
    ShapeMismatch { name: String, expected: Vec<usize>, actual: Vec<usize> },
    Corrupt(String),
}

impl std::fmt::Display for WeightsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightsError::Io(e) => write!(f, "IO error reading weights: {}", e),
            WeightsError::SafeTensors(e) => write!(f, "Invalid SafeTensors data: {}", e),
            WeightsError::UnsupportedDtype { name, dtype } => {
                write!(f, "Tensor '{}' has unsupported dtype {}", name, dtype)
            }
            WeightsError::MissingTensor(name) => write!(f, "Tensor '{}' not found in weights", name),
            WeightsError::ShapeMismatch { name, expected, actual } => write!(
                f,
                "Tensor '{}' has shape {:?}, expected {:?}",
                name, actual, expected
            ),
            WeightsError::Corrupt(s) => write!(f, "Corrupt tensor data: {}", s),
        }
    }
}

impl std::error::Error for WeightsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WeightsError::Io(e) => Some(e),
            WeightsError::SafeTensors(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WeightsError {
    fn from(err: io::Error) -> Self {
        WeightsError::Io(err)
    }
}

impl From<SafeTensorError> for WeightsError {
    fn from(err: SafeTensorError) -> Self {
        WeightsError::SafeTensors(err)
    }
}

#[derive(Debug, Default)]
pub struct WeightStore {
    tensors: HashMap<String, ArrayD<f32>>,
}

impl WeightStore {
    pub fn from_file(path: &Path) -> Result<Self, WeightsError> {
        let bytes = fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WeightsError> {
        let safetensors = SafeTensors::deserialize(bytes)?;
        let mut tensors = HashMap::new();
        for (name, view) in safetensors.tensors() {
            let data = decode_tensor_data(&name, view.dtype(), view.data())?;
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
                .map_err(|e| WeightsError::Corrupt(format!("{}: {}", name, e)))?;
            tensors.insert(name, array);
        }
        Ok(Self { tensors })
    }

    pub fn from_tensors(tensors: HashMap<String, ArrayD<f32>>) -> Self {
        Self { tensors }
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Names not consumed by any layer yet.
    pub fn remaining_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tensors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn take(&mut self, name: &str, expected: &[usize]) -> Result<ArrayD<f32>, WeightsError> {
        let tensor = self
            .tensors
            .remove(name)
            .ok_or_else(|| WeightsError::MissingTensor(name.to_string()))?;
        if tensor.shape() != expected {
            return Err(WeightsError::ShapeMismatch {
                name: name.to_string(),
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }
        Ok(tensor)
    }

    pub fn take_matrix(&mut self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>, WeightsError> {
        self.take(name, &[rows, cols])?
            .into_dimensionality::<Ix2>()
            .map_err(|e| WeightsError::Corrupt(format!("{}: {}", name, e)))
    }

    pub fn take_vector(&mut self, name: &str, len: usize) -> Result<Array1<f32>, WeightsError> {
        self.take(name, &[len])?
            .into_dimensionality::<Ix1>()
            .map_err(|e| WeightsError::Corrupt(format!("{}: {}", name, e)))
    }
}

fn decode_tensor_data(name: &str, dtype: Dtype, data: &[u8]) -> Result<Vec<f32>, WeightsError> {
    match dtype {
        Dtype::F32 => Ok(f32_from_le_bytes(data)),
        Dtype::F16 => Ok(data
            .chunks_exact(2)
            .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect()),
        Dtype::BF16 => Ok(data
            .chunks_exact(2)
            .map(|c| bf16_to_f32(u16::from_le_bytes([c[0], c[1]])))
            .collect()),
        other => Err(WeightsError::UnsupportedDtype {
            name: name.to_string(),
            dtype: format!("{:?}", other),
        }),
    }
}

fn f32_from_le_bytes(data: &[u8]) -> Vec<f32> {
    // Zero-copy view when the buffer happens to be aligned.
    if cfg!(target_endian = "little") {
        if let Ok(floats) = bytemuck::try_cast_slice::<u8, f32>(data) {
            return floats.to_vec();
        }
    }
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn bf16_to_f32(bits: u16) -> f32 {
    f32::from_bits((bits as u32) << 16)
}

pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 0x1) as u32;
    let exponent = ((bits >> 10) & 0x1f) as u32;
    let fraction = (bits & 0x3ff) as u32;

    let out = if exponent == 0 {
        if fraction == 0 {
            sign << 31
        } else {
            // Subnormal: renormalize into an f32 normal.
            let mut e: u32 = 127 - 15 + 1;
            let mut f = fraction;
            while f & 0x400 == 0 {
                f <<= 1;
                e -= 1;
            }
            (sign << 31) | (e << 23) | ((f & 0x3ff) << 13)
        }
    } else if exponent == 0x1f {
        (sign << 31) | 0x7f80_0000 | (fraction << 13)
    } else {
        (sign << 31) | ((exponent + 127 - 15) << 23) | (fraction << 13)
    };
    f32::from_bits(out)
}
