//! Tensor directory.
//!
//! Every tensor the model owns is declared here before a single record is
//! read from the checkpoint. Descriptors live in an append-only arena and are
//! addressed by [`TensorId`]; the name index only covers tensors that may be
//! filled from the file.

use crate::error::{Result, TesseraError};
use crate::format::MAX_RANK;
use crate::quantization::GgmlType;
use std::collections::HashMap;

/// Index of a tensor descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TensorId(usize);

impl TensorId {
    /// Position in declaration order.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Device placement of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Host memory.
    Host,
    /// The accelerator, when one is available.
    Offloaded,
}

/// Declared geometry and storage of one tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDesc {
    /// Canonical name.
    pub name: String,
    /// Element type.
    pub ttype: GgmlType,
    /// Dimensions in ggml order (innermost first), padded with 1.
    pub ne: [usize; MAX_RANK],
    /// Exact byte size of the data.
    pub nbytes: usize,
    /// Byte offset in the weight arena (only meaningful when `loadable`).
    pub offset: usize,
    /// Device the tensor is realized on.
    pub placement: Placement,
    /// Whether checkpoint records may fill this tensor.
    pub loadable: bool,
}

impl TensorDesc {
    /// Total element count.
    pub fn n_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Row-major shape (outermost first) with trailing unit dims removed.
    pub fn shape(&self) -> Vec<usize> {
        if self.ne[1] == 1 {
            vec![self.ne[0]]
        } else {
            vec![self.ne[1], self.ne[0]]
        }
    }
}

/// Name-addressable registry of declared tensors.
#[derive(Debug, Clone, Default)]
pub struct TensorDirectory {
    tensors: Vec<TensorDesc>,
    by_name: HashMap<String, TensorId>,
}

impl TensorDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a descriptor. Loadable tensors become resolvable by name.
    pub fn declare(&mut self, desc: TensorDesc) -> Result<TensorId> {
        if self.tensors.iter().any(|t| t.name == desc.name) {
            return Err(TesseraError::InvalidInput(format!(
                "tensor '{}' declared twice",
                desc.name
            )));
        }
        let id = TensorId(self.tensors.len());
        if desc.loadable {
            self.by_name.insert(desc.name.clone(), id);
        }
        self.tensors.push(desc);
        Ok(id)
    }

    /// Resolve a checkpoint record name.
    pub fn lookup(&self, name: &str) -> Option<TensorId> {
        self.by_name.get(name).copied()
    }

    /// Descriptor for an id handed out by this directory.
    pub fn get(&self, id: TensorId) -> &TensorDesc {
        &self.tensors[id.0]
    }

    /// Descriptor by name, including internal tensors.
    pub fn find(&self, name: &str) -> Option<&TensorDesc> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Descriptors in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (TensorId, &TensorDesc)> {
        self.tensors
            .iter()
            .enumerate()
            .map(|(i, desc)| (TensorId(i), desc))
    }

    /// Number of declared tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether nothing has been declared.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, loadable: bool) -> TensorDesc {
        TensorDesc {
            name: name.to_string(),
            ttype: GgmlType::F32,
            ne: [4, 1],
            nbytes: 16,
            offset: 0,
            placement: Placement::Host,
            loadable,
        }
    }

    #[test]
    fn declared_tensors_resolve_by_name() {
        let mut dir = TensorDirectory::new();
        let a = dir.declare(desc("a", true)).unwrap();
        let b = dir.declare(desc("b", true)).unwrap();
        assert_eq!(dir.lookup("a"), Some(a));
        assert_eq!(dir.lookup("b"), Some(b));
        assert_eq!(dir.get(b).name, "b");
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn internal_tensors_are_not_resolvable() {
        let mut dir = TensorDirectory::new();
        dir.declare(desc("memory_k", false)).unwrap();
        assert_eq!(dir.lookup("memory_k"), None);
        assert!(dir.find("memory_k").is_some());
    }

    #[test]
    fn duplicate_declaration_rejected() {
        let mut dir = TensorDirectory::new();
        dir.declare(desc("a", true)).unwrap();
        assert!(dir.declare(desc("a", false)).is_err());
    }

    #[test]
    fn shape_is_row_major() {
        let mut d = desc("w", true);
        d.ne = [8, 24];
        assert_eq!(d.shape(), vec![24, 8]);
        assert_eq!(d.n_elements(), 192);
        d.ne = [8, 1];
        assert_eq!(d.shape(), vec![8]);
    }
}
