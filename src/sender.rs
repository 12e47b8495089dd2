//! Send loop: one message per interval, acknowledgments logged as they come back.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::ack_log::AckLog;
use crate::record::LogRecord;
use crate::shutdown::Shutdown;
use crate::transport::{Message, Publisher};

/// pause between two publishes
pub const SEND_INTERVAL: Duration = Duration::from_secs(30);

pub struct Sender<P> {
    publisher: P,
    log: Arc<AckLog>,
    shutdown: Shutdown,
    interval: Duration,
    first_index: u64,
}

impl<P: Publisher> Sender<P> {
    pub fn new(publisher: P, log: Arc<AckLog>, shutdown: Shutdown) -> Self {
        Sender {
            publisher,
            log,
            shutdown,
            interval: SEND_INTERVAL,
            first_index: 0,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Publish until shutdown or until the counter runs out. Returns how many messages
    /// were handed to the publisher.
    ///
    /// The loop never waits for confirmations; each one writes its own record from the
    /// publisher's confirm thread, in whatever order they arrive.
    pub fn run(&mut self) -> u64 {
        info!("Sending a message every {:?}", self.interval);
        let mut index = self.first_index;
        let mut sent = 0;

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            let message = Message::with_index(index);
            let log = Arc::clone(&self.log);
            let on_ack = Box::new(move |message: Message| {
                debug!("message {} acknowledged", message.id());
                log.write(&LogRecord::acknowledged(message.id()));
            });
            match self.publisher.publish(message, on_ack) {
                Ok(()) => {
                    sent += 1;
                    debug!("message {} published", index);
                }
                Err(e) => error!("publishing message {} had failed: {}", index, e),
            }

            index = match index.checked_add(1) {
                Some(next) => next,
                None => {
                    info!("message counter exhausted, stopping");
                    break;
                }
            };

            if self.shutdown.wait_timeout(self.interval) {
                break;
            }
        }

        info!("Send loop stopped after {} messages", sent);
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::AckCallback;
    use std::fs;
    use tempfile::TempDir;

    /// acks synchronously; triggers shutdown after `stop_after` publishes
    struct Immediate {
        ids: Vec<String>,
        shutdown: Shutdown,
        stop_after: usize,
        fail_on: Option<&'static str>,
    }

    impl Publisher for Immediate {
        fn publish(&mut self, message: Message, on_ack: AckCallback) -> Result<(), TransportError> {
            self.ids.push(message.id().to_owned());
            if self.ids.len() >= self.stop_after {
                self.shutdown.trigger();
            }
            if Some(message.id()) == self.fail_on {
                return Err(TransportError::NoRoute("broker".to_owned()));
            }
            on_ack(message);
            Ok(())
        }
    }

    fn sender(dir: &TempDir, stop_after: usize, fail_on: Option<&'static str>) -> Sender<Immediate> {
        let shutdown = Shutdown::new();
        let log = Arc::new(AckLog::open(dir.path().join("sender.log")).unwrap());
        let publisher = Immediate {
            ids: Vec::new(),
            shutdown: shutdown.clone(),
            stop_after,
            fail_on,
        };
        Sender::new(publisher, log, shutdown).interval(Duration::from_millis(1))
    }

    #[test]
    fn ids_count_up_from_zero() {
        let dir = TempDir::new().unwrap();
        let mut sender = sender(&dir, 5, None);
        assert_eq!(sender.run(), 5);
        assert_eq!(sender.publisher.ids, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn failed_publish_does_not_stop_the_loop() {
        let dir = TempDir::new().unwrap();
        let mut sender = sender(&dir, 3, Some("1"));
        assert_eq!(sender.run(), 2);
        assert_eq!(sender.publisher.ids.len(), 3);
        sender.log.close();

        let content = fs::read_to_string(sender.log.path()).unwrap();
        let ids: Vec<String> = content
            .lines()
            .map(|l| l.parse::<LogRecord>().unwrap().id)
            .collect();
        assert_eq!(ids, vec!["0", "2"]);
    }

    #[test]
    fn stops_when_counter_is_exhausted() {
        let dir = TempDir::new().unwrap();
        let mut sender = sender(&dir, usize::MAX, None);
        sender.first_index = u64::MAX - 1;
        assert_eq!(sender.run(), 2);
        assert_eq!(
            sender.publisher.ids,
            vec![(u64::MAX - 1).to_string(), u64::MAX.to_string()]
        );
    }

    #[test]
    fn does_nothing_when_already_shut_down() {
        let dir = TempDir::new().unwrap();
        let mut sender = sender(&dir, 1, None);
        sender.shutdown.trigger();
        assert_eq!(sender.run(), 0);
    }
}
