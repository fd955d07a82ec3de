//! Trellis Configuration
//!
//! Declarative configuration specs and their expansion into concrete,
//! identity-stamped variants.
//!
//! # Core Concepts
//!
//! - [`ConfigSpec`]: ordered map of literal, nested, and [`Dynamic`] entries
//! - [`expand`]: Cartesian product over every dynamic leaf
//! - [`Variant`]: one immutable configuration with a stable [`ConfigId`]
//! - [`BindPath`]: dotted path into a variant for parameter binding
//! - [`ConfigSource`]: supplier of specs (inline, YAML, JSON)
//!
//! # Example
//!
//! ```rust
//! use trellis_config::{expand, ConfigSpec, Dynamic};
//!
//! let spec = ConfigSpec::new()
//!     .dynamic("model", Dynamic::of(["a", "b"]))
//!     .dynamic("temp", Dynamic::of([1, 2]));
//!
//! let variants = expand(&spec).unwrap();
//! assert_eq!(variants.len(), 4);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod expand;
pub mod path;
pub mod source;
pub mod spec;
pub mod variant;

// Re-exports
pub use error::ConfigError;
pub use expand::{expand, expand_all, product_size};
pub use path::BindPath;
pub use source::{
    merge_variants, specs_from_document, ConfigSource, InlineSource, JsonSource, MergeMode,
    YamlSource,
};
pub use spec::{ConfigSpec, Dynamic, SpecEntry, DYNAMIC_MARKER, RANGE_MARKER};
pub use variant::{canonical_json, ConfigId, Variant, CONFIG_ID_FIELD, DEFAULT_CONFIG_ID};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with configuration specs
    pub use crate::{
        expand, BindPath, ConfigError, ConfigId, ConfigSource, ConfigSpec, Dynamic, Variant,
        YamlSource,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
