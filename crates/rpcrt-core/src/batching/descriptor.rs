//! How elements merge into one wire request and results split back out.

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::Result;

pub trait BatchingDescriptor: Send + Sync + 'static {
    /// One logical request added by a caller.
    type Element: Send + 'static;
    /// Per-element result handed back to the caller.
    type ElementResult: Send + 'static;
    /// Merged wire request.
    type Request: Send + 'static;
    type Response: Send + 'static;
    /// Elements with equal keys may share a batch.
    type PartitionKey: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    fn partition_key(&self, element: &Self::Element) -> Self::PartitionKey;

    /// Merge `elements`, in append order, into one request.
    fn build_request(&self, key: &Self::PartitionKey, elements: Vec<Self::Element>) -> Self::Request;

    /// Split a batch response into per-element results in append order.
    /// Elements without a result fail with `INTERNAL`.
    fn split_response(&self, response: Self::Response, element_count: usize) -> Vec<Result<Self::ElementResult>>;

    /// Size charged against the byte threshold and flow limits.
    fn count_bytes(&self, element: &Self::Element) -> u64;
}
