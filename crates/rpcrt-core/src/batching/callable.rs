//! Exposes a [`Batcher`] as a unary callable over single elements.

use futures::future::BoxFuture;

use super::batcher::Batcher;
use super::descriptor::BatchingDescriptor;
use crate::callable::{CallContext, UnaryCallable};
use crate::error::Result;

pub struct BatchingCallable<D: BatchingDescriptor> {
    batcher: Batcher<D>,
}

impl<D: BatchingDescriptor> BatchingCallable<D> {
    pub fn new(batcher: Batcher<D>) -> Self {
        Self { batcher }
    }

    pub fn batcher(&self) -> &Batcher<D> {
        &self.batcher
    }
}

impl<D: BatchingDescriptor> UnaryCallable<D::Element, D::ElementResult> for BatchingCallable<D> {
    fn call(&self, element: D::Element, _context: CallContext) -> BoxFuture<'static, Result<D::ElementResult>> {
        let batcher = self.batcher.clone();
        Box::pin(async move {
            let key = batcher.descriptor().partition_key(&element);
            batcher.add(key, element).await?.await
        })
    }
}
