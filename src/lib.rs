//! An interpreter for hierarchical state charts.\
//! \
//! Reads State Chart XML (SCXML) according to the W3C recommendation into a
//! validated, optimized document and interprets it with the SCXML step
//! semantics: microsteps, macrosteps, exit/entry sets, transition conflict
//! resolution, eventless chaining and history restoration.
//!
//! Documents are immutable after validation and can be shared by many
//! concurrently running [interpreter::StateChart] values. Two drivers exist
//! on top of the same step function: the synchronous pure-value API in
//! [executor] and an actor loop with delayed-send scheduling.

extern crate core;

pub mod common;
pub mod configuration;
pub mod datamodel;
pub mod document;
pub mod evaluator;
pub mod executable_content;
pub mod executor;
pub mod expression_engine;
pub mod hierarchy;
pub mod interpreter;
pub mod logging;
pub mod reader;

#[cfg(test)]
mod tests;
