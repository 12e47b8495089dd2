//! AMQP 0-9-1 transport over amiquip.
//!
//! Publishing uses publisher confirms: every message is parked in [`PendingConfirms`]
//! under its delivery tag and a listener thread runs the ack callbacks as confirms come
//! in. Consuming uses manual acks with a prefetch of one, on a dedicated worker thread.

use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use amiquip::{
    AmqpProperties, Auth, Channel, Confirm, Connection, ConnectionOptions, ConnectionTuning,
    Consumer, ConsumerMessage, ConsumerOptions, Exchange, Publish, QueueDeclareOptions,
};
use log::{debug, info, trace, warn};

use super::confirms::PendingConfirms;
use super::connector;
use super::{
    dispatch, AckCallback, ExceptionPhase, Message, MessageHandler, Publisher, Settlement,
    Subscriber, Subscription, Transport,
};
use crate::config::BrokerSettings;
use crate::error::TransportError;
use crate::proxy::RouteSelector;

// consts
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HEARTBEAT_SECS: u16 = 60;
const PREFETCH: u16 = 1;
const PERSISTENT_DELIVERY: u8 = 2;

fn lock(pending: &Mutex<PendingConfirms>) -> MutexGuard<'_, PendingConfirms> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn spawn_worker<F>(name: &str, body: F) -> Result<thread::JoinHandle<()>, TransportError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_owned())
        .spawn(body)
        .map_err(|e| TransportError::WorkerStart(e.to_string()))
}

fn declare_queue(channel: &Channel, queue: &str) -> Result<(), TransportError> {
    let options = QueueDeclareOptions {
        durable: true,
        ..QueueDeclareOptions::default()
    };
    channel.queue_declare(queue, options)?;
    Ok(())
}

pub struct AmqpTransport {
    connection: Connection,
    queue: String,
}

impl AmqpTransport {
    /// Open a connection to the broker, routed through `selector`.
    pub fn connect(
        broker: &BrokerSettings,
        queue: &str,
        selector: &dyn RouteSelector,
    ) -> Result<Self, TransportError> {
        let endpoint = broker.endpoint();
        let stream = connector::open_stream(selector, endpoint, CONNECT_TIMEOUT)?;
        let stream = mio::net::TcpStream::from_stream(stream).map_err(|source| {
            TransportError::Connect {
                target: endpoint.to_string(),
                source,
            }
        })?;

        let options = ConnectionOptions::<Auth>::default()
            .auth(Auth::Plain {
                username: broker.username.clone(),
                password: broker.password.clone(),
            })
            .virtual_host(broker.virtual_host.clone())
            .heartbeat(HEARTBEAT_SECS);

        // Open connection.
        let mut connection =
            Connection::insecure_open_stream(stream, options, ConnectionTuning::default())?;
        info!(
            "AMQP session open on {} (vhost '{}')",
            endpoint, broker.virtual_host
        );

        let blocked = connection.listen_for_connection_blocked()?;
        spawn_worker("broker-notifications", move || {
            for notification in blocked.iter() {
                warn!("broker flow control: {:?}", notification);
            }
        })?;

        Ok(AmqpTransport {
            connection,
            queue: queue.to_owned(),
        })
    }
}

impl Transport for AmqpTransport {
    type Publisher = AmqpPublisher;
    type Subscriber = AmqpSubscriber;

    fn publisher(&mut self) -> Result<AmqpPublisher, TransportError> {
        // Open a channel - None says let the library choose the channel ID.
        let channel = self.connection.open_channel(None)?;
        declare_queue(&channel, &self.queue)?;
        channel.enable_publisher_confirms()?;
        let confirms = channel.listen_for_publisher_confirms()?;

        let pending = Arc::new(Mutex::new(PendingConfirms::default()));
        let listener_pending = Arc::clone(&pending);
        spawn_worker("publish-confirms", move || {
            for confirm in confirms.iter() {
                let (payload, acked) = match confirm {
                    Confirm::Ack(payload) => (payload, true),
                    Confirm::Nack(payload) => (payload, false),
                };
                let settled = lock(&listener_pending).take(payload.delivery_tag, payload.multiple);
                for (message, on_ack) in settled {
                    if acked {
                        on_ack(message);
                    } else {
                        warn!("broker rejected message {}", message.id());
                    }
                }
            }
            debug!("confirm listener stopped");
        })?;

        Ok(AmqpPublisher {
            channel,
            queue: self.queue.clone(),
            pending,
            next_tag: 0,
        })
    }

    fn subscriber(&mut self) -> Result<AmqpSubscriber, TransportError> {
        let channel = self.connection.open_channel(None)?;
        Ok(AmqpSubscriber {
            channel,
            queue: self.queue.clone(),
        })
    }

    fn close(self) -> Result<(), TransportError> {
        info!("Closing AMQP connection");
        self.connection.close()?;
        Ok(())
    }
}

pub struct AmqpPublisher {
    channel: Channel,
    queue: String,
    pending: Arc<Mutex<PendingConfirms>>,
    // delivery tags count up from 1 once confirms are enabled
    next_tag: u64,
}

impl Publisher for AmqpPublisher {
    fn publish(&mut self, message: Message, on_ack: AckCallback) -> Result<(), TransportError> {
        self.next_tag += 1;
        let tag = self.next_tag;
        let properties = AmqpProperties::default()
            .with_message_id(message.id().to_owned())
            .with_delivery_mode(PERSISTENT_DELIVERY);

        // park the callback before publishing so the confirm cannot overtake it
        let in_flight = {
            let mut pending = lock(&self.pending);
            pending.insert(tag, message, on_ack);
            pending.len()
        };

        let exchange = Exchange::direct(&self.channel);
        if let Err(e) = exchange.publish(Publish::with_properties(
            b"",
            self.queue.clone(),
            properties,
        )) {
            lock(&self.pending).remove(tag);
            return Err(e.into());
        }
        trace!("published delivery tag {} ({} awaiting confirm)", tag, in_flight);
        Ok(())
    }
}

pub struct AmqpSubscriber {
    channel: Channel,
    queue: String,
}

fn start_consumer<'a>(channel: &'a Channel, queue: &str) -> Result<Consumer<'a>, TransportError> {
    channel.qos(0, PREFETCH, false)?;
    declare_queue(channel, queue)?;
    // Start a consumer; acks are manual so every delivery must be settled.
    Ok(channel.basic_consume(queue, ConsumerOptions::default())?)
}

fn message_of(delivery: &amiquip::Delivery) -> Message {
    match delivery.properties.message_id() {
        Some(id) => Message::new(id.to_string()),
        None => {
            warn!("delivery {} carries no message id", delivery.delivery_tag());
            Message::new("")
        }
    }
}

impl Subscriber for AmqpSubscriber {
    fn subscribe(self, mut handler: Box<dyn MessageHandler>) -> Result<Subscription, TransportError> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        let worker = spawn_worker("receiver-worker", move || {
            let AmqpSubscriber { channel, queue } = self;
            let consumer = match start_consumer(&channel, &queue) {
                Ok(consumer) => {
                    let _ = ready_tx.send(Ok(()));
                    consumer
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            info!("Waiting for messages from queue '{}'", queue);

            for delivery in consumer.receiver().iter() {
                match delivery {
                    ConsumerMessage::Delivery(delivery) => {
                        let message = message_of(&delivery);
                        match dispatch(handler.as_mut(), &message) {
                            Settlement::Complete => {
                                if let Err(e) = consumer.ack(delivery) {
                                    handler.notify_exception(ExceptionPhase::Complete, &e.into());
                                }
                            }
                            Settlement::Abandon => {
                                if let Err(e) = consumer.nack(delivery, true) {
                                    handler.notify_exception(ExceptionPhase::Abandon, &e.into());
                                }
                            }
                        }
                    }
                    other => {
                        let fault = TransportError::ConsumerEnded(format!("{:?}", other));
                        handler.notify_exception(ExceptionPhase::Receive, &fault);
                        break;
                    }
                }
            }

            drop(consumer);
            if let Err(e) = channel.close() {
                debug!("receive channel close: {}", e);
            }
        })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Subscription::new(worker)),
            Ok(Err(reason)) => {
                Subscription::new(worker).join();
                Err(TransportError::WorkerStart(reason))
            }
            Err(_) => {
                Subscription::new(worker).join();
                Err(TransportError::WorkerStart(
                    "receiver worker exited before subscribing".to_owned(),
                ))
            }
        }
    }
}
