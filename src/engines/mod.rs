//! Speech synthesis engines.
//!
//! This module contains implementations of [`SynthesisEngine`](crate::SynthesisEngine).
//!
//! # Available Engines
//!
//! Enable engines via Cargo features:
//! - `command` - any external synthesis program driven through an argument
//!   template (defaults to the Coqui `tts` CLI with XTTS v2)

#[cfg(feature = "command")]
pub mod command;
