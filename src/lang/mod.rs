//! # Cinder host-facing language
//!
//! This module defines everything a host program touches when it builds a
//! program: expression nodes, scratch slots and variables, subroutine
//! definitions, and the value types that tie them together. The bytecode
//! compiler consumes these and turns them into a block graph.
//!
//! ## Documentation conventions
//!
//! - Stack effects are written as `( before -- after )`.
//! - `slot#N` denotes scratch slot `N`.

pub mod expr;
pub mod scratch;
pub mod scratch_var;
pub mod subroutine;
pub mod types;
pub mod value;
