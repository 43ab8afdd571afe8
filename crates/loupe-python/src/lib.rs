//! Python semantic analysis for loupe.
//!
//! The engine behind definition/type queries and validation diagnostics for
//! Python codebases built on a registry-style framework (logical entities
//! merged by registered name):
//!
//! - [`syntax`]: the error-tolerant parser seam (tree-sitter)
//! - [`builder`]: one walk per file, tree in, fragment out
//! - [`resolver`]: lazy reference resolution with cycle/depth protection
//! - [`cache`]: content-addressed fragment persistence
//! - [`callbind`]: call-site argument binding validation
//! - [`registry`], [`domain`], [`fields`]: framework-convention analyzers
//! - [`engine`]: the facade consumers talk to

pub mod builder;
pub mod cache;
pub mod callbind;
pub mod domain;
pub mod engine;
pub mod fields;
pub mod registry;
pub mod resolver;
pub mod syntax;

pub use engine::{CancelToken, Engine, ResolveAnswer};
pub use resolver::{Context, Resolution, Resolver};
