//! Synchronous request/response over crossbeam channels.
//!
//! Each call carries its own single-slot reply channel, so a
//! [`ServiceClient`] blocks until the [`ServiceServer`] answers, the server
//! goes away, or the call times out.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::warn;

/// Why a service call produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The handler rejected the request.
    Failed(String),
    /// No server is attached to the service.
    Unavailable(String),
    /// The server did not answer in time.
    Timeout(String),
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Failed(msg) => write!(f, "Service call failed: {}", msg),
            ServiceError::Unavailable(name) => write!(f, "Service '{}' unavailable", name),
            ServiceError::Timeout(name) => write!(f, "Service '{}' timed out", name),
        }
    }
}

impl std::error::Error for ServiceError {}

struct Call<Req, Resp> {
    request: Req,
    reply: Sender<Result<Resp, ServiceError>>,
}

/// Create a connected client/server pair for the service `name`.
///
/// `capacity` bounds the number of pending calls.
pub fn service_channel<Req, Resp>(
    name: impl Into<String>,
    capacity: usize,
) -> (ServiceClient<Req, Resp>, ServiceServer<Req, Resp>) {
    let name = name.into();
    let (tx, rx) = bounded(capacity.max(1));
    (
        ServiceClient {
            name: name.clone(),
            calls: tx,
        },
        ServiceServer { name, calls: rx },
    )
}

pub struct ServiceClient<Req, Resp> {
    name: String,
    calls: Sender<Call<Req, Resp>>,
}

impl<Req, Resp> Clone for ServiceClient<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            calls: self.calls.clone(),
        }
    }
}

impl<Req, Resp> ServiceClient<Req, Resp> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send `request` and block until the server responds.
    pub fn call(&self, request: Req) -> Result<Resp, ServiceError> {
        let reply = self.send(request)?;
        reply
            .recv()
            .map_err(|_| ServiceError::Unavailable(self.name.clone()))?
    }

    /// Like [`call`](Self::call) but gives up after `timeout`.
    pub fn call_timeout(&self, request: Req, timeout: Duration) -> Result<Resp, ServiceError> {
        let reply = self.send(request)?;
        match reply.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ServiceError::Timeout(self.name.clone())),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ServiceError::Unavailable(self.name.clone()))
            }
        }
    }

    fn send(&self, request: Req) -> Result<Receiver<Result<Resp, ServiceError>>, ServiceError> {
        let (reply, reply_rx) = bounded(1);
        self.calls
            .send(Call { request, reply })
            .map_err(|_| ServiceError::Unavailable(self.name.clone()))?;
        Ok(reply_rx)
    }
}

/// Result of waiting for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// A request was answered with a response.
    Responded,
    /// A request was answered with a failure.
    Rejected,
    /// No request arrived within the timeout.
    Idle,
    /// Every client is gone.
    Disconnected,
}

pub struct ServiceServer<Req, Resp> {
    name: String,
    calls: Receiver<Call<Req, Resp>>,
}

impl<Req, Resp> ServiceServer<Req, Resp> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for a request and answer it with `handler`.
    pub fn serve_one<F, E>(&self, timeout: Duration, handler: F) -> ServeOutcome
    where
        F: FnOnce(&Req) -> Result<Resp, E>,
        E: std::fmt::Display,
    {
        let call = match self.calls.recv_timeout(timeout) {
            Ok(call) => call,
            Err(RecvTimeoutError::Timeout) => return ServeOutcome::Idle,
            Err(RecvTimeoutError::Disconnected) => return ServeOutcome::Disconnected,
        };

        let (result, outcome) = match handler(&call.request) {
            Ok(resp) => (Ok(resp), ServeOutcome::Responded),
            Err(e) => {
                warn!("Service '{}' rejected request: {}", self.name, e);
                (
                    Err(ServiceError::Failed(e.to_string())),
                    ServeOutcome::Rejected,
                )
            }
        };

        // The caller may have timed out already.
        let _ = call.reply.send(result);
        outcome
    }
}
