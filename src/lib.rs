//! Server GC join analysis: per-stage join durations, stage and phase timelines, and
//! aggregate statistics catalogs over trace events.

mod aggregate;
mod catalog;
mod config;
mod cursor;
mod error;
mod event;
mod failable;
mod join_stats;
pub mod logging;
mod phases;
mod replay;
mod timeline;

pub use aggregate::*;
pub use catalog::*;
pub use config::*;
pub use cursor::*;
pub use error::*;
pub use event::*;
pub use failable::*;
pub use join_stats::*;
pub use phases::*;
pub use replay::*;
pub use timeline::*;
