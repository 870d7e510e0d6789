mod capabilities;
mod events;
mod ids;
mod record;

pub use capabilities::QueueCapabilities;
pub use events::DeliveryEvent;
pub use ids::{LeaseToken, MessageId};
pub use record::{Delivery, DeliveryStatus, MessageRecord, NackOutcome};
