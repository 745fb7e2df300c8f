//! GELU feed-forward block.
//!
//! # Formula
//!
//! `MLP(x) = gelu(x @ up_proj^T) @ down_proj^T`
//!
//! GELU uses the tanh approximation.

use crate::error::Result;
use candle_core::quantized::QMatMul;
use candle_core::{Device, Module, Tensor};

/// Two-layer MLP with a 4x hidden expansion.
#[derive(Debug, Clone)]
pub struct GeluMlp {
    /// hidden -> 4·hidden
    up_proj: QMatMul,
    /// 4·hidden -> hidden
    down_proj: QMatMul,
}

impl GeluMlp {
    /// Create from (possibly quantized) projections.
    pub fn new(up_proj: QMatMul, down_proj: QMatMul) -> Self {
        Self { up_proj, down_proj }
    }

    /// Create from dense `[out, in]` weights (for testing).
    pub fn from_dense(up_proj: Tensor, down_proj: Tensor) -> Self {
        Self {
            up_proj: QMatMul::Tensor(up_proj),
            down_proj: QMatMul::Tensor(down_proj),
        }
    }

    /// Random weights (for testing).
    pub fn random(hidden_size: usize, device: &Device) -> Result<Self> {
        let up = Tensor::randn(0.0f32, 0.02, (4 * hidden_size, hidden_size), device)?;
        let down = Tensor::randn(0.0f32, 0.02, (hidden_size, 4 * hidden_size), device)?;
        Ok(Self::from_dense(up, down))
    }

    /// Forward pass over `[tokens, hidden_size]`.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let up = self.up_proj.forward(x)?;
        let activated = up.gelu()?;
        Ok(self.down_proj.forward(&activated)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn mlp_forward_shape() {
        let mlp = GeluMlp::random(16, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, (3, 16), &Device::Cpu).unwrap();
        assert_eq!(mlp.forward(&x).unwrap().dims(), &[3, 16]);
    }

    #[test]
    fn zero_weights_give_zero_output() {
        let up = Tensor::zeros((32, 8), DType::F32, &Device::Cpu).unwrap();
        let down = Tensor::zeros((8, 32), DType::F32, &Device::Cpu).unwrap();
        let mlp = GeluMlp::from_dense(up, down);
        let x = Tensor::randn(0.0f32, 1.0, (2, 8), &Device::Cpu).unwrap();
        let sum: f32 = mlp
            .forward(&x)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(sum < 1e-6);
    }

    #[test]
    fn gelu_is_tanh_approximation() {
        let x = Tensor::new(&[-1.0f32, 0.0, 1.0, 2.0], &Device::Cpu).unwrap();
        let got: Vec<f32> = x.gelu().unwrap().to_vec1().unwrap();
        let expect = |v: f32| {
            0.5 * v * (1.0 + ((2.0f32 / std::f32::consts::PI).sqrt() * (v + 0.044715 * v.powi(3))).tanh())
        };
        for (g, v) in got.iter().zip([-1.0f32, 0.0, 1.0, 2.0]) {
            assert!((g - expect(v)).abs() < 1e-4);
        }
    }
}
