//! CalFlow Deterministic Simulation Harness
//!
//! Generates calorimeter events from a single 64-bit seed, runs them through
//! the reconstruction pipeline and checks the core invariants after every
//! event.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  particles  ┌──────────────┐  EventRecord  ┌──────────────────┐
//! │ ScenarioId │────────────►│ ShowerOracle │──────────────►│  Reconstruction  │
//! └────────────┘             │ (ChaCha8Rng) │               │ (standard or     │
//!                            └──────────────┘               │  JSON pipeline)  │
//!                                                           └────────┬─────────┘
//!                                          pfos, invariants, truth   │
//!                            ┌──────────────┐◄───────────────────────┘
//!                            │ScenarioRunner│──► ScenarioMetrics / SimExport
//!                            └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use calflow_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let runner = ScenarioRunner::new(42, 100);
//! let result = runner.run(ScenarioId::FragmentShower)?;
//! assert!(result.passed);
//! ```

mod error;
mod exporter;
mod oracle;
mod runner;
pub mod scenarios;

pub use error::SimError;
pub use exporter::{EventFrame, PfoSummary, SimExport};
pub use oracle::{
    GeneratedEvent, OracleConfig, ParticleKind, ParticleSpec, ShowerOracle, TrueParticle, PION_MASS,
};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
