//! An open batch accumulating elements for one partition key.

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::descriptor::BatchingDescriptor;
use super::flow_control::FlowPermit;
use super::settings::BatchingSettings;
use crate::error::Result;

pub(super) type ResultSender<D> = oneshot::Sender<Result<<D as BatchingDescriptor>::ElementResult>>;

pub(super) struct Batch<D: BatchingDescriptor> {
    pub(super) id: u64,
    pub(super) key: D::PartitionKey,
    pub(super) created_at: Instant,
    elements: Vec<D::Element>,
    senders: Vec<ResultSender<D>>,
    permits: Vec<FlowPermit>,
    byte_size: u64,
}

impl<D: BatchingDescriptor> Batch<D> {
    pub(super) fn new(id: u64, key: D::PartitionKey) -> Self {
        Self {
            id,
            key,
            created_at: Instant::now(),
            elements: Vec::new(),
            senders: Vec::new(),
            permits: Vec::new(),
            byte_size: 0,
        }
    }

    pub(super) fn push(&mut self, element: D::Element, bytes: u64, sender: ResultSender<D>, permit: FlowPermit) {
        self.elements.push(element);
        self.senders.push(sender);
        self.permits.push(permit);
        self.byte_size += bytes;
    }

    pub(super) fn len(&self) -> usize {
        self.elements.len()
    }

    pub(super) fn byte_size(&self) -> u64 {
        self.byte_size
    }

    pub(super) fn is_full(&self, settings: &BatchingSettings) -> bool {
        settings.element_count_threshold.is_some_and(|n| self.len() >= n)
            || settings.request_byte_threshold.is_some_and(|b| self.byte_size >= b)
    }

    pub(super) fn into_parts(self) -> (Vec<D::Element>, Vec<ResultSender<D>>, Vec<FlowPermit>) {
        (self.elements, self.senders, self.permits)
    }
}
