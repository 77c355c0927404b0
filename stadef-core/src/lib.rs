//! Stadef Core - Station Definition Types
//!
//! Pure data structures for versioned station metadata: entities and their
//! presence states, faceting definitions, request descriptors, configuration
//! and the error hierarchy. Caching and repository logic live in
//! `stadef-storage`.

mod config;
mod entities;
mod enums;
mod error;
mod facet;
mod identity;
mod request;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use facet::*;
pub use identity::*;
pub use request::*;
