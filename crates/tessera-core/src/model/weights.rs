//! Realization of staged weight bytes on a compute device.

use super::arena::WeightArena;
use super::directory::TensorDesc;
use crate::error::Result;
use candle_core::quantized::{ggml_file::qtensor_from_ggml, QMatMul, QTensor};
use candle_core::{Device, Tensor};
use std::sync::Arc;

/// Decode one tensor's slot into a backend quantized tensor.
///
/// Block layouts are read in place by the backend, so the bytes are first
/// copied into 8-byte aligned storage.
pub fn qtensor(desc: &TensorDesc, arena: &WeightArena, device: &Device) -> Result<QTensor> {
    let bytes = arena.slot(desc.offset, desc.nbytes)?;
    let mut staged = vec![0u64; bytes.len().div_ceil(8)];
    let raw = &mut bytemuck::cast_slice_mut::<u64, u8>(&mut staged)[..bytes.len()];
    raw.copy_from_slice(bytes);
    Ok(qtensor_from_ggml(desc.ttype.to_backend()?, raw, desc.shape(), device)?)
}

/// Dense f32 tensor with the descriptor's row-major shape.
pub fn dense(desc: &TensorDesc, arena: &WeightArena, device: &Device) -> Result<Tensor> {
    Ok(qtensor(desc, arena, device)?.dequantize(device)?)
}

/// Matrix for `x @ W^T`, kept quantized when the storage type is quantized.
pub fn matmul(desc: &TensorDesc, arena: &WeightArena, device: &Device) -> Result<QMatMul> {
    Ok(QMatMul::from_arc(Arc::new(qtensor(desc, arena, device)?))?)
}
