//! Stream codecs
//!
//! The only codec in this toolkit is the trigger-compression scheme used
//! by the recorders' amplitude-threshold mode.

pub mod trigger;

pub use trigger::{Segment, SegmentType};
