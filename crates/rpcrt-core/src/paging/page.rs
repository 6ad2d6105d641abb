//! Pages and the lazy streams built over them.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use super::descriptor::PagedListDescriptor;
use crate::callable::{CallContext, UnaryCallable};
use crate::error::Result;

pub(super) struct PageSource<D: PagedListDescriptor> {
    pub(super) callable: Arc<dyn UnaryCallable<D::Request, D::Response>>,
    pub(super) descriptor: Arc<D>,
}

impl<D: PagedListDescriptor> Clone for PageSource<D> {
    fn clone(&self) -> Self {
        Self {
            callable: Arc::clone(&self.callable),
            descriptor: Arc::clone(&self.descriptor),
        }
    }
}

/// A not-yet-issued page request.
pub(super) struct PageFetch<D: PagedListDescriptor> {
    pub(super) source: PageSource<D>,
    pub(super) request: D::Request,
    pub(super) context: CallContext,
}

impl<D: PagedListDescriptor> PageFetch<D> {
    pub(super) async fn run(self) -> Result<Page<D>> {
        let response = self
            .source
            .callable
            .call(self.request.clone(), self.context.clone())
            .await?;
        let descriptor = &self.source.descriptor;
        let next_page_token = descriptor.extract_next_token(&response);
        let values = descriptor.extract_resources(response);
        Ok(Page {
            values,
            next_page_token,
            request: self.request,
            context: self.context,
            source: self.source,
        })
    }
}

/// One page of a list call.
pub struct Page<D: PagedListDescriptor> {
    values: Vec<D::Resource>,
    next_page_token: String,
    request: D::Request,
    context: CallContext,
    source: PageSource<D>,
}

impl<D: PagedListDescriptor> Page<D> {
    pub fn values(&self) -> &[D::Resource] {
        &self.values
    }

    pub fn into_values(self) -> Vec<D::Resource> {
        self.values
    }

    pub fn next_page_token(&self) -> &str {
        &self.next_page_token
    }

    pub fn has_next_page(&self) -> bool {
        !self.next_page_token.is_empty()
    }

    /// Request that produced this page.
    pub fn request(&self) -> &D::Request {
        &self.request
    }

    /// Fetch the following page; `None` on the last page.
    pub async fn next_page(&self) -> Result<Option<Page<D>>> {
        match self.next_fetch() {
            Some(fetch) => fetch.run().await.map(Some),
            None => Ok(None),
        }
    }

    fn next_fetch(&self) -> Option<PageFetch<D>> {
        self.has_next_page().then(|| PageFetch {
            source: self.source.clone(),
            request: self
                .source
                .descriptor
                .inject_token(&self.request, &self.next_page_token),
            context: self.context.clone(),
        })
    }
}

enum Step<D: PagedListDescriptor> {
    Yield(Page<D>),
    Fetch(PageFetch<D>),
    Done,
}

/// Response of a paged call: the first page, plus lazy iteration over the
/// rest. Iteration consumes the response and cannot be restarted.
pub struct PagedResponse<D: PagedListDescriptor> {
    first: Page<D>,
}

impl<D: PagedListDescriptor> PagedResponse<D> {
    pub(super) fn new(first: Page<D>) -> Self {
        Self { first }
    }

    pub fn page(&self) -> &Page<D> {
        &self.first
    }

    pub fn into_page(self) -> Page<D> {
        self.first
    }

    /// Every page, fetching each one only when the stream is polled past the
    /// previous page. A failed fetch is yielded and ends the stream.
    pub fn iterate_pages(self) -> BoxStream<'static, Result<Page<D>>> {
        stream::unfold(Step::Yield(self.first), |step| async move {
            let page = match step {
                Step::Done => return None,
                Step::Yield(page) => page,
                Step::Fetch(fetch) => match fetch.run().await {
                    Ok(page) => page,
                    Err(e) => return Some((Err(e), Step::Done)),
                },
            };
            let next = page.next_fetch().map_or(Step::Done, Step::Fetch);
            Some((Ok(page), next))
        })
        .boxed()
    }

    /// Every resource across all pages, in order.
    pub fn iterate_all(self) -> BoxStream<'static, Result<D::Resource>> {
        self.iterate_pages()
            .map_ok(|page| stream::iter(page.into_values().into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}
