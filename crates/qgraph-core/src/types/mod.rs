//! Core data model: tagged values and the columnar frame.

mod frame;
mod value;

pub use frame::{Frame, JoinKind};
pub use value::{DataKind, Value};
