//! Paged list calls.
//!
//! Each page fetch is an ordinary call through the wrapped callable, so it
//! goes through retry and the channel pool like any other call.

mod callable;
mod descriptor;
mod page;


pub use callable::PagedCallable;
pub use descriptor::PagedListDescriptor;
pub use page::{Page, PagedResponse};
