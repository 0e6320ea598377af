//! # Code
//!
//! Machine code generation: redirect jumps and relocated trampolines

pub mod x64;
