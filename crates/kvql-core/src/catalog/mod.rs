//! Entity catalog for kvql.
//!
//! The catalog stores entity definitions: name, key prefix and the backend
//! options that select a structure type.

mod catalog;
mod entity;

pub use catalog::Catalog;
pub use entity::EntityDef;
