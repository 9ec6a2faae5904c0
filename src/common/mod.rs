//! # Common Utilities
//!
//! Types that exist across all phases: buffer traits and the small set of
//! language types that pass through multiple stages unaltered, like the way
//! identifiers go from the tokenizer to the evaluator's scopes unaltered.
//!
//! As the different phases should be isolated as much as possible, this
//! module is kept small to avoid heavy coupling.

pub mod multiphase;
pub mod peekable_buffer;
