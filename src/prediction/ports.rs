use std::sync::Arc;

use async_trait::async_trait;

use crate::error::HubError;

/// A loaded predictive model. Inference is synchronous and side-effect free.
pub trait Model: Send + Sync {
    fn infer(&self, vector: &[f64]) -> Result<f64, HubError>;
}

#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn Model>, HubError>;
}
