//! In-process stand-ins for the broker, used by tests and by local runs with
//! Kafka disabled.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use crate::infrastructure::kafka_abstraction::{
    ConsumerControl, DeliveryReport, EventBusKafkaError, InboundRecord, KafkaProducerTrait,
    OutboundMessage, TopicPartition,
};

/// Records every produced message and hands out increasing offsets.
#[derive(Debug, Default)]
pub struct InMemoryKafkaProducer {
    sent: Mutex<Vec<OutboundMessage>>,
    next_offset: AtomicI64,
    failing: AtomicBool,
}

impl InMemoryKafkaProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every send fails with a producer error.
    pub fn fail_sends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn sent_to(&self, topic: &str) -> Vec<OutboundMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// The produced messages as consumable records, in send order.
    pub fn as_records(&self, topic: &str) -> Vec<InboundRecord> {
        self.sent_to(topic)
            .into_iter()
            .enumerate()
            .map(|(offset, message)| InboundRecord {
                topic: message.topic,
                partition: 0,
                offset: offset as i64,
                key: message.key,
                payload: Some(message.payload),
                headers: message.headers,
                timestamp: None,
            })
            .collect()
    }
}

#[async_trait]
impl KafkaProducerTrait for InMemoryKafkaProducer {
    async fn publish_binary_event(
        &self,
        message: &OutboundMessage,
    ) -> Result<DeliveryReport, EventBusKafkaError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventBusKafkaError::Producer(format!(
                "broker unavailable for {}",
                message.topic
            )));
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| EventBusKafkaError::Producer("in-memory log poisoned".to_string()))?;
        sent.push(message.clone());
        let offset = self.next_offset.fetch_add(1, Ordering::SeqCst);
        Ok(DeliveryReport {
            partition: 0,
            offset,
        })
    }
}

/// Flow-control calls recorded in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCall {
    Pause(TopicPartition),
    Resume(TopicPartition),
    Seek(TopicPartition, i64),
    Commit(TopicPartition, i64),
    Stop,
}

#[derive(Debug, Default)]
pub struct RecordingConsumerControl {
    calls: Mutex<Vec<ControlCall>>,
    paused: Mutex<HashMap<TopicPartition, bool>>,
    stopped: AtomicBool,
    failing_pauses: AtomicBool,
}

impl RecordingConsumerControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `pause` fail, as for a partition revoked mid-retry.
    pub fn fail_pauses(&self, failing: bool) {
        self.failing_pauses.store(failing, Ordering::SeqCst);
    }

    fn push(&self, call: ControlCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    pub fn calls(&self) -> Vec<ControlCall> {
        self.calls
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn commits(&self) -> Vec<(TopicPartition, i64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ControlCall::Commit(tp, offset) => Some((tp, offset)),
                _ => None,
            })
            .collect()
    }

    pub fn is_paused(&self, tp: &TopicPartition) -> bool {
        self.paused
            .lock()
            .map(|paused| paused.get(tp).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    fn set_paused(&self, tp: &TopicPartition, value: bool) {
        if let Ok(mut paused) = self.paused.lock() {
            paused.insert(tp.clone(), value);
        }
    }
}

impl ConsumerControl for RecordingConsumerControl {
    fn pause(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError> {
        if self.failing_pauses.load(Ordering::SeqCst) {
            return Err(EventBusKafkaError::Consumer(format!("{} is not assigned", tp)));
        }
        self.set_paused(tp, true);
        self.push(ControlCall::Pause(tp.clone()));
        Ok(())
    }

    fn resume(&self, tp: &TopicPartition) -> Result<(), EventBusKafkaError> {
        self.set_paused(tp, false);
        self.push(ControlCall::Resume(tp.clone()));
        Ok(())
    }

    fn seek(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError> {
        self.push(ControlCall::Seek(tp.clone(), offset));
        Ok(())
    }

    fn commit(&self, tp: &TopicPartition, offset: i64) -> Result<(), EventBusKafkaError> {
        self.push(ControlCall::Commit(tp.clone(), offset));
        Ok(())
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.push(ControlCall::Stop);
        }
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
