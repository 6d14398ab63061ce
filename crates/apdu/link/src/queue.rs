//! Bounded single-producer/single-consumer fragment queue
//!
//! The radio callback is the producer and must never wait on the engine, so a full queue
//! drops by default. The consumer is a dedicated worker that drains packets one at a time.

use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded};
use nexum_apdu_core::TransportError;
use tracing::{debug, trace, warn};

use crate::config::{LinkConfig, OverflowPolicy};

/// Result of handing a packet to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The packet is waiting for the consumer
    Queued,
    /// The queue was full and the packet was discarded
    Dropped,
}

/// A bounded packet queue, split into its two ends with [`FragmentQueue::split`]
#[derive(Debug)]
pub struct FragmentQueue {
    producer: FragmentProducer,
    consumer: FragmentConsumer,
}

impl FragmentQueue {
    /// Create a queue sized and configured from `config`
    pub fn new(config: &LinkConfig) -> Self {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        Self {
            producer: FragmentProducer {
                sender,
                capacity,
                overflow: config.overflow,
            },
            consumer: FragmentConsumer { receiver, capacity },
        }
    }

    /// Separate the producer and consumer ends
    pub fn split(self) -> (FragmentProducer, FragmentConsumer) {
        (self.producer, self.consumer)
    }
}

/// Producer end, owned by the link callback
#[derive(Debug)]
pub struct FragmentProducer {
    sender: Sender<Bytes>,
    capacity: usize,
    overflow: OverflowPolicy,
}

impl FragmentProducer {
    /// Enqueue one packet according to the overflow policy
    ///
    /// Returns [`TransportError::Closed`] once the consumer is gone.
    pub fn push(&self, packet: &[u8]) -> Result<PushOutcome, TransportError> {
        let packet = Bytes::copy_from_slice(packet);
        match self.overflow {
            OverflowPolicy::Drop => match self.sender.try_send(packet) {
                Ok(()) => {}
                Err(TrySendError::Full(packet)) => {
                    warn!(
                        length = packet.len(),
                        capacity = self.capacity,
                        "Fragment queue full, dropping packet"
                    );
                    return Ok(PushOutcome::Dropped);
                }
                Err(TrySendError::Disconnected(_)) => return Err(TransportError::Closed),
            },
            OverflowPolicy::Block => {
                self.sender
                    .send(packet)
                    .map_err(|_| TransportError::Closed)?;
            }
        }

        let free = self.capacity.saturating_sub(self.sender.len());
        if free < self.capacity / 2 {
            debug!(free, capacity = self.capacity, "Fragment queue less than half free");
        }
        Ok(PushOutcome::Queued)
    }

    /// Packets currently waiting
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    /// Whether no packet is waiting
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }
}

/// Consumer end, drained by one worker
#[derive(Debug)]
pub struct FragmentConsumer {
    receiver: Receiver<Bytes>,
    capacity: usize,
}

impl FragmentConsumer {
    /// Block until a packet arrives; `None` once the producer is dropped and the queue is empty
    pub fn recv(&self) -> Option<Bytes> {
        let packet = self.receiver.recv().ok()?;
        self.note_backlog();
        Some(packet)
    }

    /// Block for at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, TransportError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(packet) => {
                self.note_backlog();
                Ok(packet)
            }
            Err(RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    /// Take a packet if one is waiting
    pub fn try_recv(&self) -> Option<Bytes> {
        self.receiver.try_recv().ok()
    }

    /// Discard every waiting packet, returning how many were dropped
    pub fn drain(&self) -> usize {
        self.receiver.try_iter().count()
    }

    fn note_backlog(&self) {
        let waiting = self.receiver.len();
        if waiting > self.capacity / 2 {
            debug!(waiting, capacity = self.capacity, "Fragment queue backlog");
        } else {
            trace!(waiting, "Fragment dequeued");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_drop_policy_discards_when_full() {
        let config = LinkConfig::new().with_queue_capacity(2);
        let (producer, consumer) = FragmentQueue::new(&config).split();

        assert_eq!(producer.push(&hex!("8001")).unwrap(), PushOutcome::Queued);
        assert_eq!(producer.push(&hex!("0002")).unwrap(), PushOutcome::Queued);
        assert_eq!(producer.push(&hex!("4003")).unwrap(), PushOutcome::Dropped);
        assert_eq!(producer.len(), 2);

        assert_eq!(consumer.try_recv().unwrap().as_ref(), &hex!("8001"));
        assert_eq!(consumer.try_recv().unwrap().as_ref(), &hex!("0002"));
        assert!(consumer.try_recv().is_none());
    }

    #[test]
    fn test_consumer_stops_when_producer_dropped() {
        let (producer, consumer) = FragmentQueue::new(&LinkConfig::default()).split();
        producer.push(&hex!("C09000")).unwrap();
        drop(producer);

        assert_eq!(consumer.recv().unwrap().as_ref(), &hex!("C09000"));
        assert!(consumer.recv().is_none());
        assert_eq!(
            consumer.recv_timeout(Duration::from_millis(10)),
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn test_push_after_consumer_dropped() {
        let (producer, consumer) = FragmentQueue::new(&LinkConfig::default()).split();
        drop(consumer);
        assert_eq!(producer.push(&hex!("C0")), Err(TransportError::Closed));
    }

    #[test]
    fn test_recv_timeout() {
        let (_producer, consumer) = FragmentQueue::new(&LinkConfig::default()).split();
        assert_eq!(
            consumer.recv_timeout(Duration::from_millis(5)),
            Err(TransportError::Timeout)
        );
    }

    #[test]
    fn test_block_policy_waits_for_consumer() {
        let config = LinkConfig::new()
            .with_queue_capacity(1)
            .with_overflow(OverflowPolicy::Block);
        let (producer, consumer) = FragmentQueue::new(&config).split();

        let worker = std::thread::spawn(move || {
            let mut received = Vec::new();
            while let Some(packet) = consumer.recv() {
                received.push(packet);
            }
            received
        });

        for byte in 0..5u8 {
            assert_eq!(producer.push(&[byte]).unwrap(), PushOutcome::Queued);
        }
        drop(producer);

        let received = worker.join().unwrap();
        assert_eq!(received.len(), 5);
        assert_eq!(received[4].as_ref(), &[4]);
    }
}
