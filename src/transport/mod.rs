//! The broker client as seen by the sender and receiver.
//!
//! The stress loops only talk to these traits; [`amqp`] implements them over amiquip and
//! the integration tests implement them in memory.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use log::{error, warn};

use crate::error::TransportError;

pub mod amqp;
pub mod connector;
mod confirms;

/// A stress message. Only the identifier matters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
}

impl Message {
    pub fn new(id: impl Into<String>) -> Self {
        Message { id: id.into() }
    }

    pub fn with_index(index: u64) -> Self {
        Message::new(index.to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// Runs once the broker has confirmed a published message.
pub type AckCallback = Box<dyn FnOnce(Message) + Send + 'static>;

/// Outbound half of a broker connection.
pub trait Publisher {
    /// Hand `message` to the broker without waiting for it to be confirmed.
    ///
    /// `on_ack` runs on another thread when the confirmation arrives, possibly after
    /// later messages have been confirmed. It never runs if the broker rejects the message.
    fn publish(&mut self, message: Message, on_ack: AckCallback) -> Result<(), TransportError>;
}

/// What to tell the broker about a delivery once it was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// done with it, remove it from the queue
    Complete,
    /// put it back for redelivery
    Abandon,
}

/// Where a transport fault reported to a handler happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionPhase {
    Receive,
    Complete,
    Abandon,
}

impl fmt::Display for ExceptionPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let phase = match self {
            ExceptionPhase::Receive => "RECEIVE",
            ExceptionPhase::Complete => "COMPLETE",
            ExceptionPhase::Abandon => "ABANDON",
        };
        f.write_str(phase)
    }
}

/// Callback side of a subscription.
pub trait MessageHandler: Send {
    fn on_message(&mut self, message: &Message) -> Settlement;

    /// A fault outside `on_message`, such as a failed settle or the consumer going away.
    fn notify_exception(&mut self, phase: ExceptionPhase, fault: &TransportError);
}

/// Inbound half of a broker connection.
pub trait Subscriber {
    /// Start delivering to `handler` on a dedicated worker thread.
    fn subscribe(self, handler: Box<dyn MessageHandler>) -> Result<Subscription, TransportError>;
}

/// A broker connection that hands out one publisher or subscriber.
pub trait Transport {
    type Publisher: Publisher;
    type Subscriber: Subscriber;

    fn publisher(&mut self) -> Result<Self::Publisher, TransportError>;
    fn subscriber(&mut self) -> Result<Self::Subscriber, TransportError>;

    /// Tear down the connection. Workers started from it stop on their own afterwards.
    fn close(self) -> Result<(), TransportError>;
}

/// Handle on a running delivery worker.
pub struct Subscription {
    worker: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(worker: JoinHandle<()>) -> Self {
        Subscription {
            worker: Some(worker),
        }
    }

    /// wait for the worker to finish
    pub fn join(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("delivery worker panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// Run `handler` for one delivery, turning a panic into [`Settlement::Abandon`] so the
/// worker survives it.
pub fn dispatch(handler: &mut dyn MessageHandler, message: &Message) -> Settlement {
    match panic::catch_unwind(AssertUnwindSafe(|| handler.on_message(message))) {
        Ok(settlement) => settlement,
        Err(payload) => {
            error!(
                "handler panicked on message {}: {}",
                message.id(),
                panic_message(payload.as_ref())
            );
            warn!("abandoning message {}", message.id());
            Settlement::Abandon
        }
    }
}
