//! Tensor element types and block-quantized encodings.
//!
//! Checkpoints store every tensor with a ggml type code. Quantized types pack
//! a fixed number of elements (the block size) into a fixed number of bytes
//! (the type size), so the byte size of a tensor is
//! `n_elements / block_size * type_size`.
//!
//! # Supported Formats
//!
//! | Code | Type  | Block | Bytes/block |
//! |------|-------|-------|-------------|
//! | 0    | F32   | 1     | 4           |
//! | 1    | F16   | 1     | 2           |
//! | 2    | Q4_0  | 32    | 18          |
//! | 3    | Q4_1  | 32    | 20          |
//! | 6    | Q5_0  | 32    | 22          |
//! | 7    | Q5_1  | 32    | 24          |
//! | 8    | Q8_0  | 32    | 34          |
//! | 9    | Q8_1  | 32    | 40          |
//! | 10   | Q2_K  | 256   | 84          |
//! | 11   | Q3_K  | 256   | 110         |
//! | 12   | Q4_K  | 256   | 144         |
//! | 13   | Q5_K  | 256   | 176         |
//! | 14   | Q6_K  | 256   | 210         |
//! | 15   | Q8_K  | 256   | 292         |

use crate::error::{Result, TesseraError};
use candle_core::quantized::GgmlDType;

/// Multiplier separating the storage type from the quantization version in `ftype`.
pub const QNT_VERSION_FACTOR: i32 = 1000;

/// Newest quantization version stamp this reader understands.
pub const QNT_VERSION: i32 = 2;

/// Element type of a stored tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GgmlType {
    /// 32-bit float.
    F32,
    /// 16-bit float.
    F16,
    /// 4-bit, one f16 scale per 32 elements.
    Q4_0,
    /// 4-bit, f16 scale and min per 32 elements.
    Q4_1,
    /// 5-bit, one f16 scale per 32 elements.
    Q5_0,
    /// 5-bit, f16 scale and min per 32 elements.
    Q5_1,
    /// 8-bit, one f16 scale per 32 elements.
    Q8_0,
    /// 8-bit, f32 scale and sum per 32 elements (activation type).
    Q8_1,
    /// 2-bit k-quant super-blocks.
    Q2K,
    /// 3-bit k-quant super-blocks.
    Q3K,
    /// 4-bit k-quant super-blocks.
    Q4K,
    /// 5-bit k-quant super-blocks.
    Q5K,
    /// 6-bit k-quant super-blocks.
    Q6K,
    /// 8-bit k-quant super-blocks (activation type).
    Q8K,
}

impl GgmlType {
    /// Decode a type code from a tensor record.
    pub fn from_code(code: i32) -> Result<Self> {
        let ty = match code {
            0 => Self::F32,
            1 => Self::F16,
            2 => Self::Q4_0,
            3 => Self::Q4_1,
            6 => Self::Q5_0,
            7 => Self::Q5_1,
            8 => Self::Q8_0,
            9 => Self::Q8_1,
            10 => Self::Q2K,
            11 => Self::Q3K,
            12 => Self::Q4K,
            13 => Self::Q5K,
            14 => Self::Q6K,
            15 => Self::Q8K,
            other => {
                return Err(TesseraError::format(format!("unknown tensor type code {other}")))
            }
        };
        Ok(ty)
    }

    /// Type code written to tensor records.
    pub fn code(&self) -> i32 {
        match self {
            Self::F32 => 0,
            Self::F16 => 1,
            Self::Q4_0 => 2,
            Self::Q4_1 => 3,
            Self::Q5_0 => 6,
            Self::Q5_1 => 7,
            Self::Q8_0 => 8,
            Self::Q8_1 => 9,
            Self::Q2K => 10,
            Self::Q3K => 11,
            Self::Q4K => 12,
            Self::Q5K => 13,
            Self::Q6K => 14,
            Self::Q8K => 15,
        }
    }

    /// Elements per block.
    pub fn block_size(&self) -> usize {
        match self {
            Self::F32 | Self::F16 => 1,
            Self::Q4_0 | Self::Q4_1 | Self::Q5_0 | Self::Q5_1 | Self::Q8_0 | Self::Q8_1 => 32,
            Self::Q2K | Self::Q3K | Self::Q4K | Self::Q5K | Self::Q6K | Self::Q8K => 256,
        }
    }

    /// Bytes per block.
    pub fn type_size(&self) -> usize {
        match self {
            Self::F32 => 4,
            Self::F16 => 2,
            Self::Q4_0 => 18,
            Self::Q4_1 => 20,
            Self::Q5_0 => 22,
            Self::Q5_1 => 24,
            Self::Q8_0 => 34,
            Self::Q8_1 => 40,
            Self::Q2K => 84,
            Self::Q3K => 110,
            Self::Q4K => 144,
            Self::Q5K => 176,
            Self::Q6K => 210,
            Self::Q8K => 292,
        }
    }

    /// Whether the type packs elements into quantized blocks.
    pub fn is_quantized(&self) -> bool {
        !matches!(self, Self::F32 | Self::F16)
    }

    /// Bytes needed to store `n_elements` of this type.
    ///
    /// Sizes derived from a checkpoint header are untrusted; a product that
    /// does not fit in `usize` is a format error.
    pub fn nbytes(&self, n_elements: usize) -> Result<usize> {
        n_elements
            .checked_mul(self.type_size())
            .map(|bytes| bytes / self.block_size())
            .ok_or_else(|| {
                TesseraError::format(format!("{n_elements} {self} elements overflow the address space"))
            })
    }

    /// Short display name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::Q4_0 => "q4_0",
            Self::Q4_1 => "q4_1",
            Self::Q5_0 => "q5_0",
            Self::Q5_1 => "q5_1",
            Self::Q8_0 => "q8_0",
            Self::Q8_1 => "q8_1",
            Self::Q2K => "q2_k",
            Self::Q3K => "q3_k",
            Self::Q4K => "q4_k",
            Self::Q5K => "q5_k",
            Self::Q6K => "q6_k",
            Self::Q8K => "q8_k",
        }
    }

    /// Backend dtype used to materialize tensors of this type.
    ///
    /// `Q8_1` is only ever an activation type and has no weight layout on the
    /// backend side.
    pub fn to_backend(&self) -> Result<GgmlDType> {
        let dtype = match self {
            Self::F32 => GgmlDType::F32,
            Self::F16 => GgmlDType::F16,
            Self::Q4_0 => GgmlDType::Q4_0,
            Self::Q4_1 => GgmlDType::Q4_1,
            Self::Q5_0 => GgmlDType::Q5_0,
            Self::Q5_1 => GgmlDType::Q5_1,
            Self::Q8_0 => GgmlDType::Q8_0,
            Self::Q2K => GgmlDType::Q2K,
            Self::Q3K => GgmlDType::Q3K,
            Self::Q4K => GgmlDType::Q4K,
            Self::Q5K => GgmlDType::Q5K,
            Self::Q6K => GgmlDType::Q6K,
            Self::Q8K => GgmlDType::Q8K,
            Self::Q8_1 => {
                return Err(TesseraError::format("q8_1 is not a weight storage type"));
            }
        };
        Ok(dtype)
    }
}

impl std::fmt::Display for GgmlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The packed `ftype` header field: storage type plus quantization version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    /// Storage type selector (`ftype % 1000`).
    pub base: i32,
    /// Quantization version stamp (`ftype / 1000`).
    pub qnt_version: i32,
}

impl FileType {
    /// Split a raw header value.
    pub fn from_raw(raw: i32) -> Result<Self> {
        if raw < 0 {
            return Err(TesseraError::format(format!("bad ftype value {raw}")));
        }
        let qnt_version = raw / QNT_VERSION_FACTOR;
        if qnt_version > QNT_VERSION {
            return Err(TesseraError::format(format!(
                "unsupported quantization version {qnt_version}"
            )));
        }
        Ok(Self {
            base: raw % QNT_VERSION_FACTOR,
            qnt_version,
        })
    }

    /// Raw header value.
    pub fn raw(&self) -> i32 {
        self.qnt_version * QNT_VERSION_FACTOR + self.base
    }

    /// Element type of the large weight matrices.
    pub fn weight_type(&self) -> Result<GgmlType> {
        let ty = match self.base {
            0 => GgmlType::F32,
            1 => GgmlType::F16,
            2 => GgmlType::Q4_0,
            3 => GgmlType::Q4_1,
            7 => GgmlType::Q8_0,
            8 => GgmlType::Q5_0,
            9 => GgmlType::Q5_1,
            10 => GgmlType::Q2K,
            11 => GgmlType::Q3K,
            12 => GgmlType::Q4K,
            13 => GgmlType::Q5K,
            14 => GgmlType::Q6K,
            other => {
                return Err(TesseraError::format(format!("bad ftype value {other}")));
            }
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_roundtrip() {
        for code in [0, 1, 2, 3, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15] {
            assert_eq!(GgmlType::from_code(code).unwrap().code(), code);
        }
    }

    #[test]
    fn removed_and_unknown_codes_rejected() {
        for code in [4, 5, 16, -1, 99] {
            assert!(matches!(
                GgmlType::from_code(code),
                Err(TesseraError::InvalidFormat(_))
            ));
        }
    }

    #[test]
    fn block_packing_sizes() {
        assert_eq!(GgmlType::F32.nbytes(8).unwrap(), 32);
        assert_eq!(GgmlType::F16.nbytes(8).unwrap(), 16);
        assert_eq!(GgmlType::Q4_0.nbytes(64).unwrap(), 36);
        assert_eq!(GgmlType::Q8_0.nbytes(32).unwrap(), 34);
        assert_eq!(GgmlType::Q6K.nbytes(512).unwrap(), 420);
    }

    #[test]
    fn oversized_tensor_is_format_error() {
        assert!(matches!(
            GgmlType::F32.nbytes(1 << 62),
            Err(TesseraError::InvalidFormat(_))
        ));
    }

    #[test]
    fn ftype_splits_version() {
        let ft = FileType::from_raw(2002).unwrap();
        assert_eq!(ft.base, 2);
        assert_eq!(ft.qnt_version, 2);
        assert_eq!(ft.raw(), 2002);
        assert_eq!(ft.weight_type().unwrap(), GgmlType::Q4_0);
    }

    #[test]
    fn ftype_mapping() {
        let expect = [
            (0, GgmlType::F32),
            (1, GgmlType::F16),
            (3, GgmlType::Q4_1),
            (7, GgmlType::Q8_0),
            (8, GgmlType::Q5_0),
            (9, GgmlType::Q5_1),
            (14, GgmlType::Q6K),
        ];
        for (raw, ty) in expect {
            assert_eq!(FileType::from_raw(raw).unwrap().weight_type().unwrap(), ty);
        }
    }

    #[test]
    fn bad_ftype_is_not_defaulted() {
        // 4 was "mostly q4_1, some f16" and has no single weight type.
        assert!(FileType::from_raw(4).unwrap().weight_type().is_err());
        assert!(FileType::from_raw(5).unwrap().weight_type().is_err());
        assert!(FileType::from_raw(-1).is_err());
        assert!(FileType::from_raw(3001).is_err());
    }

    #[test]
    fn q8_1_has_no_backend_layout() {
        assert!(GgmlType::Q8_1.to_backend().is_err());
        assert!(GgmlType::Q4K.to_backend().is_ok());
    }
}
