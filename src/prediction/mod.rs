pub mod engine;
pub mod features;
pub mod linear;
pub mod ports;

pub use engine::PredictionEngine;
pub use features::FeatureBuilder;
pub use linear::{LinearModel, LinearModelLoader};
pub use ports::{Model, ModelLoader};
