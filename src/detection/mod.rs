pub mod aggregator;
pub mod bus;
pub mod config;
pub mod controller;
pub mod signal;

pub use aggregator::{confidence_for, DetectionAggregate, SignalAggregator};
pub use bus::{EventBus, SignalSink, AD_BLOCKER_DETECTED};
pub use config::DetectionConfig;
pub use controller::{Delivery, DetectionController, ProbeSet};
pub use signal::{AdBlockerDetectedEvent, DetectionMethod, DetectionSignal};
