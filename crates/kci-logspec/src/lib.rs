//! Finite-state-machine log parsing engine.
//!
//! A parser is a graph of named states connected by transitions; each
//! state optionally consumes a prefix of the remaining log text and each
//! transition is a predicate over the data accumulated so far. The first
//! transition whose predicate returns true wins; the parser stops when no
//! transition fires. See `parser` for the engine and `kbuild`,
//! `linux_kernel` and `baseline` for the domain-specific error extractors
//! built on top of it.

pub mod baseline;
pub mod error;
pub mod kbuild;
pub mod linux_kernel;
pub mod parser;

pub use error::LogspecError;
pub use parser::{Graph, ParserDefs, ParserError, Registry, StateOutput};
