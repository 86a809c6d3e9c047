//! Input schema for the merged customer table
//!
//! This module owns the input contract: column-name normalization, cell
//! coercion, and conversion of raw JSON rows into a `CustomerTable`.

mod adapter;
mod values;

pub use adapter::*;
pub use values::*;
