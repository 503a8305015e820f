//! Core domain model
//!
//! This module defines the declaration-level data structures: names,
//! documents, ports and bindings, steps, runtime environments, and the
//! validated pipeline facade.

pub mod document;
pub mod environment;
pub mod name;
pub mod pipeline;
pub mod port;
pub mod step;

pub use document::*;
pub use environment::*;
pub use name::*;
pub use pipeline::*;
pub use port::*;
pub use step::*;
