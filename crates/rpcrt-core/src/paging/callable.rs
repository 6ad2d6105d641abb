//! Unary callable returning a [`PagedResponse`].

use std::sync::Arc;

use futures::future::BoxFuture;

use super::descriptor::PagedListDescriptor;
use super::page::{PageFetch, PageSource, PagedResponse};
use crate::callable::{CallContext, UnaryCallable};
use crate::error::Result;

pub struct PagedCallable<D: PagedListDescriptor> {
    source: PageSource<D>,
    page_size: Option<u32>,
}

impl<D: PagedListDescriptor> PagedCallable<D> {
    pub fn new(callable: Arc<dyn UnaryCallable<D::Request, D::Response>>, descriptor: Arc<D>) -> Self {
        Self {
            source: PageSource { callable, descriptor },
            page_size: None,
        }
    }

    /// Page size for requests that do not set one.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

impl<D: PagedListDescriptor> UnaryCallable<D::Request, PagedResponse<D>> for PagedCallable<D> {
    fn call(&self, request: D::Request, context: CallContext) -> BoxFuture<'static, Result<PagedResponse<D>>> {
        let descriptor = &self.source.descriptor;
        let request = match self.page_size {
            Some(size) if descriptor.extract_page_size(&request).is_none() => {
                descriptor.inject_page_size(&request, size)
            }
            _ => request,
        };
        let fetch = PageFetch {
            source: self.source.clone(),
            request,
            context,
        };
        Box::pin(async move { fetch.run().await.map(PagedResponse::new) })
    }
}
