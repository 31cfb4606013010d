//! Core types for the warrant rule compiler.
//!
//! A specification of typed fact schemas and production rules is loaded from
//! a parsed document tree ([`source`]), validated into a [`model`], and
//! compiled into per-position incremental [`plan`]s. The runtime data types
//! ([`fact`], [`lifecycle`]) and the [`store::InferenceStore`] trait live here
//! so that code generators and engines depend only on this crate.

pub mod error;
pub mod expr;
pub mod fact;
pub mod grammar;
pub mod lifecycle;
pub mod model;
pub mod plan;
pub mod source;
pub mod store;
pub mod value;

pub use error::{Error, Location, Result, SpecErrorKind, SpecificationError};
pub use model::{CompileOptions, Specification};
pub use value::{FieldType, Value};
