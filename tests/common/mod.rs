//! In-memory transport for driving the send and receive loops without a broker.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;

use mq_stress::transport::{
    dispatch, AckCallback, Message, MessageHandler, Publisher, Settlement, Subscriber,
    Subscription, Transport,
};
use mq_stress::{Shutdown, TransportError};

/// What the fake broker saw.
#[derive(Default)]
pub struct BrokerState {
    pub published: Mutex<Vec<String>>,
    pub settled: Mutex<Vec<(String, Settlement)>>,
    pub closed: Mutex<bool>,
}

#[derive(Default)]
pub struct Loopback {
    state: Arc<BrokerState>,
    inbox: Vec<Message>,
    stop: Option<(usize, Shutdown)>,
    max_ack_delay_ms: u64,
    ack_workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// messages the subscriber will deliver, in order
    pub fn deliver(mut self, ids: &[&str]) -> Self {
        self.inbox = ids.iter().map(|id| Message::new(*id)).collect();
        self
    }

    /// trigger `shutdown` after `count` publishes, or after `count` deliveries
    pub fn stop_after(mut self, count: usize, shutdown: &Shutdown) -> Self {
        self.stop = Some((count, shutdown.clone()));
        self
    }

    /// confirm each publish after a random delay below this bound
    pub fn ack_jitter(mut self, max_ms: u64) -> Self {
        self.max_ack_delay_ms = max_ms;
        self
    }

    pub fn state(&self) -> Arc<BrokerState> {
        Arc::clone(&self.state)
    }
}

pub struct LoopbackPublisher {
    state: Arc<BrokerState>,
    stop: Option<(usize, Shutdown)>,
    max_ack_delay_ms: u64,
    ack_workers: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Publisher for LoopbackPublisher {
    fn publish(&mut self, message: Message, on_ack: AckCallback) -> Result<(), TransportError> {
        let count = {
            let mut published = self.state.published.lock().unwrap();
            published.push(message.id().to_owned());
            published.len()
        };

        let delay = if self.max_ack_delay_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0, self.max_ack_delay_ms)
        };
        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(delay));
            on_ack(message);
        });
        self.ack_workers.lock().unwrap().push(worker);

        if let Some((limit, shutdown)) = &self.stop {
            if count >= *limit {
                shutdown.trigger();
            }
        }
        Ok(())
    }
}

pub struct LoopbackSubscriber {
    state: Arc<BrokerState>,
    inbox: Vec<Message>,
    stop: Option<(usize, Shutdown)>,
}

impl Subscriber for LoopbackSubscriber {
    fn subscribe(self, mut handler: Box<dyn MessageHandler>) -> Result<Subscription, TransportError> {
        let worker = thread::spawn(move || {
            for (n, message) in self.inbox.iter().enumerate() {
                let settlement = dispatch(handler.as_mut(), message);
                self.state
                    .settled
                    .lock()
                    .unwrap()
                    .push((message.id().to_owned(), settlement));

                if let Some((limit, shutdown)) = &self.stop {
                    if n + 1 >= *limit {
                        shutdown.trigger();
                    }
                }
            }
        });
        Ok(Subscription::new(worker))
    }
}

impl Transport for Loopback {
    type Publisher = LoopbackPublisher;
    type Subscriber = LoopbackSubscriber;

    fn publisher(&mut self) -> Result<LoopbackPublisher, TransportError> {
        Ok(LoopbackPublisher {
            state: Arc::clone(&self.state),
            stop: self.stop.clone(),
            max_ack_delay_ms: self.max_ack_delay_ms,
            ack_workers: Arc::clone(&self.ack_workers),
        })
    }

    fn subscriber(&mut self) -> Result<LoopbackSubscriber, TransportError> {
        Ok(LoopbackSubscriber {
            state: Arc::clone(&self.state),
            inbox: std::mem::take(&mut self.inbox),
            stop: self.stop.clone(),
        })
    }

    /// waits for every outstanding confirmation before reporting closed
    fn close(self) -> Result<(), TransportError> {
        let workers: Vec<_> = self.ack_workers.lock().unwrap().drain(..).collect();
        for worker in workers {
            worker.join().unwrap();
        }
        *self.state.closed.lock().unwrap() = true;
        Ok(())
    }
}
