//! CalFlow Environment Abstraction Layer
//!
//! Everything the reconstruction core consumes from the outside world lives
//! here, so the core never touches files or configuration formats directly:
//! - Event records (`EventRecord`, `CaloHitRecord`, `TrackRecord`)
//! - Event sources (`EventSource`, in-memory and file-backed)
//! - The binary event file format (`EventFileWriter`, `EventFileReader`)
//! - Pipeline settings (`PipelineSettings`, `AlgorithmConfig`)
//!
//! # Example
//!
//! ```ignore
//! use calflow_env::{EventFileReader, EventSource, PipelineSettings};
//!
//! let settings = PipelineSettings::load("pipeline.json")?;
//! let mut source = EventFileReader::open("events.cfe")?;
//! while let Some(event) = source.next_event()? {
//!     reconstruction.load_event(&event)?;
//! }
//! ```

mod codec;
mod error;
mod settings;
mod source;
mod types;

pub use codec::{EventFileReader, EventFileWriter, FILE_MAGIC, FORMAT_VERSION};
pub use error::EnvError;
pub use settings::{AlgorithmConfig, DetectorSettings, PipelineSettings};
pub use source::{EventSource, MemoryEventSource};
pub use types::{CaloHitRecord, EventRecord, HitKind, TrackRecord, TrackRelation};
