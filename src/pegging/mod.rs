pub mod controller;
pub mod scale;

pub use controller::{PegOutcome, PeggingController};
pub use scale::{ScaleFunction, ScalePoint};
