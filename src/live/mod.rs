//! Live views: subscriber registry, drop-policy queues and fan-out

pub mod broadcast;
pub mod queue;
pub mod registry;
pub mod render;

pub use broadcast::{Broadcaster, PublishReport};
pub use queue::{event_queue, EventReceiver, EventSender, Frame, Offer};
pub use registry::{Subscriber, SubscriberId, Subscription, SubscriptionRegistry, Transport};
pub use render::{EventRenderer, HtmlEventRenderer, SSE_HEARTBEAT};

/// Frames buffered per subscriber before new events are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
