//! IRC wire messages: parsing, construction, serialization.

mod nom_parser;
pub mod tags;
mod types;

pub use self::types::{Message, Tag, MAX_PARAMS};
