//! Protocol buffers runtime core.
//!
//! Schemas are built from mutable definitions in [`def`] and frozen into
//! immutable views. Handler tables in [`handlers`] attach callbacks to the
//! fields of a frozen message, and a [`sink::Sink`] delivers parse events
//! to them. The [`decoder`] compiles handler tables into bytecode and runs
//! it over streaming input; the [`encoder`] is a sink that writes the
//! binary wire format back out.

#![warn(missing_docs)]

pub use self::{error::*, status::*, symtab::SymbolTable};

pub mod decoder;
pub mod def;
pub mod encoder;
pub mod handlers;
pub mod refcounted;
pub mod sink;
pub mod symtab;
pub mod wire;

mod error;
mod status;

#[cfg(test)]
mod testing;
