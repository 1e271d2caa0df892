//! # CLI Command Implementations
//!
//! Each subcommand of `vmr-codeflow` lives in its own file, with an `Args`
//! struct derived using `clap` where it takes arguments and an `execute`
//! function calling into the `vmr_codeflow` library.

pub mod backflow;
pub mod flow;
pub mod forwardflow;
pub mod manifest;
pub mod mappings;
pub mod notices;
pub mod scan;
