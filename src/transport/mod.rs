//! Publish/subscribe and request/response plumbing.
//!
//! The publisher only depends on the [`Publisher`] and
//! [`TransformBroadcaster`] traits. [`ChannelBus`] is the in-process
//! implementation built on crossbeam channels; a real middleware binding
//! implements the same traits.

pub mod bus;
pub mod channel;
pub mod service;

pub use bus::ChannelBus;
pub use channel::{ChannelPublisher, Subscription};
pub use service::{ServeOutcome, ServiceClient, ServiceError, ServiceServer, service_channel};

use crate::msgs::TransformStamped;

/// Best-effort sender of messages of type `M` on one topic.
pub trait Publisher<M>: Send + Sync {
    /// Deliver `msg` to every current subscriber. Never fails; undeliverable
    /// messages are dropped.
    fn publish(&self, msg: &M);

    fn num_subscribers(&self) -> usize;

    fn topic(&self) -> &str;
}

/// Sink for coordinate frame transforms.
pub trait TransformBroadcaster: Send + Sync {
    fn send_transform(&self, transform: &TransformStamped);

    fn send_transforms(&self, transforms: &[TransformStamped]) {
        for tf in transforms {
            self.send_transform(tf);
        }
    }
}
