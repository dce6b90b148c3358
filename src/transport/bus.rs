//! In-process message bus with named topics and services.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::channel::{ChannelPublisher, Subscription};
use super::service::{ServiceClient, ServiceServer, service_channel};

/// Queue depth used when a topic is created by a subscriber.
const DEFAULT_QUEUE_SIZE: usize = 10;

/// Pending calls a service accepts before clients block.
const SERVICE_CAPACITY: usize = 16;

type Entry = Arc<dyn Any + Send + Sync>;

/// Registry of typed topics and services, shared by publishers and subscribers.
#[derive(Default)]
pub struct ChannelBus {
    topics: Mutex<HashMap<String, Entry>>,
    services: Mutex<HashMap<String, Entry>>,
}

impl ChannelBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the publisher of `topic`, creating it if needed.
    ///
    /// An existing publisher takes over `queue_size` for subscribers attached
    /// afterwards. Re-advertising a topic with another message type replaces it.
    pub fn advertise<M>(&self, topic: &str, queue_size: usize) -> Arc<ChannelPublisher<M>>
    where
        M: Clone + Send + 'static,
    {
        let mut topics = self.topics.lock();
        if let Some(existing) = topics.get(topic) {
            match existing.clone().downcast::<ChannelPublisher<M>>() {
                Ok(publisher) => {
                    if publisher.queue_size() != queue_size.max(1) {
                        debug!(
                            "Topic '{}' queue size {} -> {}",
                            topic,
                            publisher.queue_size(),
                            queue_size
                        );
                        publisher.set_queue_size(queue_size);
                    }
                    return publisher;
                }
                Err(_) => warn!("Topic '{}' re-advertised with a different type", topic),
            }
        }
        let publisher = Arc::new(ChannelPublisher::new(topic, queue_size));
        topics.insert(topic.to_string(), publisher.clone());
        publisher
    }

    /// Subscribe to `topic`. Returns `None` if the topic carries another type.
    ///
    /// A topic nobody advertised yet is created with a default queue depth.
    /// Subscribe after advertising to get the advertised depth.
    pub fn subscribe<M>(&self, topic: &str) -> Option<Subscription<M>>
    where
        M: Clone + Send + 'static,
    {
        let entry = self
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| {
                Arc::new(ChannelPublisher::<M>::new(topic, DEFAULT_QUEUE_SIZE)) as Entry
            })
            .clone();
        entry
            .downcast::<ChannelPublisher<M>>()
            .ok()
            .map(|publisher| publisher.subscribe())
    }

    /// Register the service `name` and return its server end.
    pub fn advertise_service<Req, Resp>(&self, name: &str) -> ServiceServer<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let (client, server) = service_channel::<Req, Resp>(name, SERVICE_CAPACITY);
        let previous = self
            .services
            .lock()
            .insert(name.to_string(), Arc::new(client));
        if previous.is_some() {
            warn!("Service '{}' re-advertised, replacing previous server", name);
        }
        server
    }

    /// Client for the service `name`, if advertised with matching types.
    pub fn service_client<Req, Resp>(&self, name: &str) -> Option<ServiceClient<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let entry = self.services.lock().get(name)?.clone();
        entry
            .downcast::<ServiceClient<Req, Resp>>()
            .ok()
            .map(|client| (*client).clone())
    }
}
