pub mod breakout;
pub mod catalog;
pub mod config;
pub mod data_source;
pub mod error;
pub mod imbalance;
pub mod logging;
pub mod models;
pub mod narrative;
pub mod range;
pub mod scorer;
pub mod session;
pub mod store;
pub mod volume;

// Re-exports for convenience
pub use breakout::{Breakout, BreakoutDirection, BreakoutStrength, detect_breakout};
pub use catalog::InstrumentCatalog;
pub use config::{ScannerConfig, ScoringConfig};
pub use error::ScoringError;
pub use imbalance::{ImbalanceDirection, ImbalanceHistory, ImbalanceReading, StackState, StackedImbalance};
pub use models::{Candle, Instrument, Interval, OrderFlow, ScoredBar};
pub use range::{DataQuality, RangeTracker, ReferenceRange, establish_range};
pub use scorer::{Action, Signal, classify};
pub use session::{BarInput, InstrumentSession, SessionReport, scan_session, scan_universe};
pub use volume::{SpikeLevel, VolumeBaseline, VolumeSpike};
