//! Client-side RPC execution runtime.
//!
//! Sits between generated client stubs and a transport: a pool of channels
//! with load-based resizing, retrying unary and server-streaming calls,
//! request batching under flow control, paged list iteration and
//! long-running operation polling. Every adapter is a [`UnaryCallable`]
//! wrapping the next one, down to [`pool::ChannelCallable`] on top of the
//! [`pool::ChannelPool`].

pub mod batching;
pub mod callable;
pub mod clock;
pub mod config;
pub mod error;
pub mod future;
pub mod logging;
pub mod longrunning;
pub mod paging;
pub mod pool;
pub mod retry;
pub mod streaming;
pub mod transport;

pub use callable::{CallContext, UnaryCallSettings, UnaryCallable};
pub use error::{Code, Result, RpcError, Status};
pub use future::ApiFuture;
pub use streaming::{ResponseStream, ServerStreamingCallSettings, ServerStreamingCallable};
