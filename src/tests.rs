//! Integration-style tests over the full pipeline: reader, hierarchy cache,
//! interpreter and runtime drivers.

#[cfg(feature = "xml")]
mod test_interpreter;
#[cfg(feature = "xml")]
mod test_runtime;
