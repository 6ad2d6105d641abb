//! Token and resource accessors for one list method.

pub trait PagedListDescriptor: Send + Sync + 'static {
    type Request: Clone + Send + Sync + 'static;
    type Response: Send + 'static;
    type Resource: Send + 'static;

    /// Copy of `request` asking for the page after `token`.
    fn inject_token(&self, request: &Self::Request, token: &str) -> Self::Request;

    fn inject_page_size(&self, request: &Self::Request, page_size: u32) -> Self::Request;

    fn extract_page_size(&self, request: &Self::Request) -> Option<u32>;

    /// Token of the following page; empty on the last page.
    fn extract_next_token(&self, response: &Self::Response) -> String;

    fn extract_resources(&self, response: Self::Response) -> Vec<Self::Resource>;
}
