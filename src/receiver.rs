//! Receive side: log every delivered message and settle it.

use std::sync::Arc;

use log::{trace, warn};

use crate::ack_log::AckLog;
use crate::error::TransportError;
use crate::record::LogRecord;
use crate::transport::{
    ExceptionPhase, Message, MessageHandler, Settlement, Subscriber, Subscription,
};

/// Writes a `received` record per delivery and completes it.
///
/// Duplicate deliveries are logged again; nothing here deduplicates.
pub struct LoggingHandler {
    log: Arc<AckLog>,
}

impl LoggingHandler {
    pub fn new(log: Arc<AckLog>) -> Self {
        LoggingHandler { log }
    }
}

impl MessageHandler for LoggingHandler {
    fn on_message(&mut self, message: &Message) -> Settlement {
        trace!("message {} received", message.id());
        self.log.write(&LogRecord::received(message.id()));
        Settlement::Complete
    }

    fn notify_exception(&mut self, phase: ExceptionPhase, fault: &TransportError) {
        warn!("{}-{}", phase, fault);
    }
}

/// Attach a [`LoggingHandler`] to `subscriber`; deliveries flow until the transport closes.
pub fn register<S: Subscriber>(
    subscriber: S,
    log: Arc<AckLog>,
) -> Result<Subscription, TransportError> {
    subscriber.subscribe(Box::new(LoggingHandler::new(log)))
}
