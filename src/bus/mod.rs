pub mod dispatcher;
pub mod types;

pub use dispatcher::{
    BusDrain, DEFAULT_QUEUE_CAPACITY, DrainOutcome, EventBus, EventHandler, Subscription,
    SubscriptionId,
};
pub use types::{HubEvent, PegChange, Topic, TrainingTriggered};
