//! Reading and writing feature tables and weights relations.

pub mod table;
pub mod weights;

pub use table::{read_table, write_table};
pub use weights::{read_weights, WeightsRelation};
