pub mod producer_probe;

pub use producer_probe::{ProbeOutcome, ProbeStatus, ProducerProbe};
