//! Container and metadata format handling
//!
//! Everything that reads or writes structured text and container bytes:
//! the restricted RIFF/WAV codec with its GUANO extension, the recording
//! comment grammar, the per-operation filename rules, and the header-driven
//! CSV column reader used by the GPS sync planner.

pub mod comment;
pub mod csv;
pub mod filename;
pub mod wav;

pub use filename::{FilenameParts, Operation};
pub use wav::{Guano, WavHeader};
