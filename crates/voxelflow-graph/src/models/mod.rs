//! Graph data models.
//!
//! - [`CsrGraph`]: Compressed Sparse Row adjacency over unit indices
//! - [`UnitIndex`], [`FieldId`], [`ComponentId`]: interned index types

pub mod csr;
pub mod node;

pub use csr::{CsrGraph, CsrGraphBuilder};
pub use node::{ComponentId, FieldId, UnitIndex};
