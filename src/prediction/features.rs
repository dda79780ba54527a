use std::sync::Arc;

use crate::{
    config::FeatureSource,
    sensors::ReadingCache,
    types::{FeatureVector, SensorReading, unix_seconds},
};

/// Builds the model input for one triggering reading.
///
/// Sources without a `source_id` read the triggering reading; sources with
/// one read the latest cached reading of that source. Absent values are 0.0.
#[derive(Clone)]
pub struct FeatureBuilder {
    sources: Vec<FeatureSource>,
    cache: Arc<ReadingCache>,
}

impl FeatureBuilder {
    pub fn new(sources: Vec<FeatureSource>, cache: Arc<ReadingCache>) -> Self {
        Self { sources, cache }
    }

    pub fn dimensions(&self) -> usize {
        self.sources.len()
    }

    pub fn build(&self, reading: &SensorReading) -> FeatureVector {
        self.sources
            .iter()
            .map(|source| match source {
                FeatureSource::ObservedAt => unix_seconds(reading.observed_at),
                FeatureSource::Field {
                    field,
                    source_id: None,
                } => reading.field(field).unwrap_or(0.0),
                FeatureSource::Field {
                    field,
                    source_id: Some(source_id),
                } if *source_id == reading.source_id => reading.field(field).unwrap_or(0.0),
                FeatureSource::Field {
                    field,
                    source_id: Some(source_id),
                } => self
                    .cache
                    .get(source_id)
                    .and_then(|cached| cached.field(field))
                    .unwrap_or(0.0),
            })
            .collect::<Vec<_>>()
            .into()
    }
}
