pub mod file_store;
pub mod gate;
pub mod ports;
pub mod trigger;

pub use file_store::FileContentStore;
pub use gate::{GateOp, GatePredicate, GateRule};
pub use ports::ContentStore;
pub use trigger::{TrainingDrain, TrainingTrigger};
