//! End-to-end: adapters stacked on a channel pool over an in-memory server.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use futures::TryStreamExt;
use tempfile::tempdir;

use common::memory_server::{MemoryServer, Reply};
use rpcrt_core::batching::{BatchingDescriptor, BatchingSettings, FlowControlSettings};
use rpcrt_core::callable::{
    batching_call, fn_callable, long_running_call, paged_call, retrying_server_streaming_call,
    retrying_unary_call,
};
use rpcrt_core::longrunning::{OperationSnapshot, OperationsClient};
use rpcrt_core::paging::PagedListDescriptor;
use rpcrt_core::pool::{ChannelCallable, ChannelPool, ChannelPoolSettings, ChannelStreamingCallable};
use rpcrt_core::retry::RetrySettings;
use rpcrt_core::streaming::ServerStreamingCallable;
use rpcrt_core::transport::MethodDescriptor;
use rpcrt_core::{CallContext, Code, Result, RpcError, Status, UnaryCallSettings, UnaryCallable};

fn pool(server: &Arc<MemoryServer>, size: usize) -> ChannelPool {
    ChannelPool::create(ChannelPoolSettings::statically_sized(size), server.factory(), None).unwrap()
}

fn raw(pool: &ChannelPool, method: &str) -> Arc<dyn UnaryCallable<Vec<u8>, Vec<u8>>> {
    Arc::new(ChannelCallable::new(pool.clone(), MethodDescriptor::unary(method)))
}

/// Typed callable on top of a byte-level one.
fn codec<Req, Resp>(
    inner: Arc<dyn UnaryCallable<Vec<u8>, Vec<u8>>>,
    encode: fn(&Req) -> Vec<u8>,
    decode: fn(Vec<u8>) -> Result<Resp>,
) -> Arc<dyn UnaryCallable<Req, Resp>>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    Arc::new(fn_callable(move |req: Req, ctx: CallContext| {
        let pending = inner.call(encode(&req), ctx);
        async move { decode(pending.await?) }
    }))
}

fn utf8(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|e| RpcError::status(Code::Internal, e.to_string()))
}

fn fast_retries(max_attempts: u32) -> UnaryCallSettings {
    UnaryCallSettings::new(
        RetrySettings {
            total_timeout: Duration::from_secs(30),
            initial_retry_delay: Duration::from_millis(10),
            retry_delay_multiplier: 2.0,
            max_retry_delay: Duration::from_millis(100),
            max_attempts,
            ..RetrySettings::default()
        },
        [Code::Unavailable],
    )
}

fn unavailable() -> Status {
    Status::new(Code::Unavailable, "try again")
}

#[tokio::test(start_paused = true)]
async fn unary_call_retries_through_the_pool() {
    let failures = AtomicUsize::new(2);
    let server = MemoryServer::new(move |_method, request| {
        let left = failures.load(Ordering::SeqCst);
        if left > 0 {
            failures.store(left - 1, Ordering::SeqCst);
            return Reply::error(unavailable());
        }
        Reply::ok(request)
    });
    let pool = pool(&server, 2);
    let callable = retrying_unary_call(raw(&pool, "test.Echo/Say"), &fast_retries(5)).unwrap();

    let resp = callable.call(b"hello".to_vec(), CallContext::default()).await.unwrap();
    assert_eq!(resp, b"hello");
    assert_eq!(server.calls("test.Echo/Say"), 3);
    assert_eq!(pool.outstanding_rpcs(), 0);
}

#[tokio::test(start_paused = true)]
async fn unary_call_reports_exhausted_retries() {
    let server = MemoryServer::new(|_, _| Reply::error(unavailable()));
    let pool = pool(&server, 1);
    let callable = retrying_unary_call(raw(&pool, "test.Echo/Say"), &fast_retries(3)).unwrap();

    let err = callable.call(b"x".to_vec(), CallContext::default()).await.unwrap_err();
    match &err {
        RpcError::RetriesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.last_error().and_then(RpcError::code), Some(Code::Unavailable));
    assert_eq!(server.calls("test.Echo/Say"), 3);
}

#[derive(Debug, Clone, Default)]
struct ListBooks {
    page_token: String,
    page_size: Option<u32>,
}

struct BookPage {
    books: Vec<String>,
    next_page_token: String,
}

struct BooksDescriptor;

impl PagedListDescriptor for BooksDescriptor {
    type Request = ListBooks;
    type Response = BookPage;
    type Resource = String;

    fn inject_token(&self, request: &ListBooks, token: &str) -> ListBooks {
        ListBooks {
            page_token: token.to_string(),
            ..request.clone()
        }
    }

    fn inject_page_size(&self, request: &ListBooks, page_size: u32) -> ListBooks {
        ListBooks {
            page_size: Some(page_size),
            ..request.clone()
        }
    }

    fn extract_page_size(&self, request: &ListBooks) -> Option<u32> {
        request.page_size
    }

    fn extract_next_token(&self, response: &BookPage) -> String {
        response.next_page_token.clone()
    }

    fn extract_resources(&self, response: BookPage) -> Vec<String> {
        response.books
    }
}

fn encode_list(req: &ListBooks) -> Vec<u8> {
    format!("{};{}", req.page_token, req.page_size.unwrap_or(0)).into_bytes()
}

fn decode_page(bytes: Vec<u8>) -> Result<BookPage> {
    let text = utf8(bytes)?;
    let (books, next) = text.split_once('|').unwrap_or((&text, ""));
    Ok(BookPage {
        books: books.split(',').filter(|b| !b.is_empty()).map(str::to_string).collect(),
        next_page_token: next.to_string(),
    })
}

/// Seven books, `page_size` per page (10 when unset); the token is the next index.
fn serve_books(request: Vec<u8>) -> Reply {
    let text = String::from_utf8(request).unwrap();
    let (token, size) = text.split_once(';').unwrap();
    let start: usize = token.parse().unwrap_or(0);
    let size = match size.parse::<usize>().unwrap() {
        0 => 10,
        n => n,
    };
    let end = (start + size).min(7);
    let books: Vec<String> = (start..end).map(|i| format!("book-{i}")).collect();
    let next = if end < 7 { end.to_string() } else { String::new() };
    Reply::ok(format!("{}|{}", books.join(","), next))
}

#[tokio::test]
async fn paged_list_walks_every_page() {
    let server = MemoryServer::new(|_, request| serve_books(request));
    let pool = pool(&server, 2);
    let list = codec(raw(&pool, "test.Library/ListBooks"), encode_list, decode_page);
    let paged = paged_call(list, Arc::new(BooksDescriptor)).with_page_size(3);

    let response = paged.call(ListBooks::default(), CallContext::default()).await.unwrap();
    assert_eq!(response.page().values(), ["book-0", "book-1", "book-2"]);
    assert!(response.page().has_next_page());
    assert_eq!(server.calls("test.Library/ListBooks"), 1);

    let all: Vec<String> = response.iterate_all().try_collect().await.unwrap();
    assert_eq!(all.len(), 7);
    assert_eq!(all.last().map(String::as_str), Some("book-6"));
    assert_eq!(server.calls("test.Library/ListBooks"), 3);
}

#[tokio::test(start_paused = true)]
async fn server_stream_restarts_before_first_message() {
    let attempts = AtomicUsize::new(0);
    let server = MemoryServer::new(move |_, _| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Reply::error(unavailable());
        }
        Reply::stream([b"a".to_vec(), b"b".to_vec(), b"c".to_vec()], Status::ok())
    });
    let pool = pool(&server, 1);
    let inner: Arc<dyn ServerStreamingCallable<Vec<u8>, Vec<u8>>> = Arc::new(ChannelStreamingCallable::new(
        pool.clone(),
        MethodDescriptor::server_streaming("test.Feed/Watch"),
    ));
    let streaming = retrying_server_streaming_call(inner, &fast_retries(5).into()).unwrap();

    let items: Vec<Vec<u8>> = streaming
        .call(b"feed".to_vec(), CallContext::default())
        .try_collect()
        .await
        .unwrap();
    assert_eq!(items, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert_eq!(server.calls("test.Feed/Watch"), 2);
    assert_eq!(pool.outstanding_rpcs(), 0);
}

struct DoublerDescriptor;

impl BatchingDescriptor for DoublerDescriptor {
    type Element = u32;
    type ElementResult = u32;
    type Request = Vec<u32>;
    type Response = Vec<u32>;
    type PartitionKey = ();

    fn partition_key(&self, _: &u32) {}

    fn build_request(&self, _: &(), elements: Vec<u32>) -> Vec<u32> {
        elements
    }

    fn split_response(&self, response: Vec<u32>, _: usize) -> Vec<Result<u32>> {
        response.into_iter().map(Ok).collect()
    }

    fn count_bytes(&self, _: &u32) -> u64 {
        4
    }
}

fn encode_numbers(numbers: &Vec<u32>) -> Vec<u8> {
    numbers.iter().map(u32::to_string).collect::<Vec<_>>().join(",").into_bytes()
}

fn decode_numbers(bytes: Vec<u8>) -> Result<Vec<u32>> {
    utf8(bytes)?
        .split(',')
        .map(|n| n.parse().map_err(|_| RpcError::status(Code::Internal, "bad number")))
        .collect()
}

#[tokio::test]
async fn batched_elements_share_one_request() {
    let server = MemoryServer::new(|_, request| {
        let numbers = decode_numbers(request).unwrap();
        let doubled: Vec<u32> = numbers.into_iter().map(|n| n * 2).collect();
        Reply::ok(encode_numbers(&doubled))
    });
    let pool = pool(&server, 1);
    let send = codec(raw(&pool, "test.Math/DoubleAll"), encode_numbers, decode_numbers);
    let settings = BatchingSettings {
        element_count_threshold: Some(3),
        request_byte_threshold: None,
        delay_threshold: None,
        flow_control: FlowControlSettings::default(),
    };
    let batching = batching_call(send, Arc::new(DoublerDescriptor), settings).unwrap();

    let results = join_all((1..=3).map(|n| batching.call(n, CallContext::default()))).await;
    let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, vec![2, 4, 6]);
    assert_eq!(server.calls("test.Math/DoubleAll"), 1);
}

/// Polls `test.Jobs/Get` over the pool.
struct JobsClient {
    get: Arc<dyn UnaryCallable<Vec<u8>, Vec<u8>>>,
}

impl OperationsClient for JobsClient {
    fn get_operation(&self, name: &str) -> BoxFuture<'static, Result<OperationSnapshot>> {
        let name = name.to_string();
        let pending = self.get.call(name.clone().into_bytes(), CallContext::default());
        Box::pin(async move {
            let body = utf8(pending.await?)?;
            Ok(match body.strip_prefix("done:") {
                Some(result) => OperationSnapshot::succeeded(name, result.as_bytes().to_vec()),
                None => OperationSnapshot::pending(name),
            })
        })
    }

    fn cancel_operation(&self, _name: &str) -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn job_request(req: &Vec<u8>) -> Vec<u8> {
    req.clone()
}

fn started_job(bytes: Vec<u8>) -> Result<OperationSnapshot> {
    Ok(OperationSnapshot::pending(utf8(bytes)?))
}

#[tokio::test(start_paused = true)]
async fn long_running_operation_polls_until_done() {
    let polls = AtomicUsize::new(0);
    let server = MemoryServer::new(move |method, _| match method {
        "test.Jobs/Start" => Reply::ok("jobs/42"),
        _ if polls.fetch_add(1, Ordering::SeqCst) < 2 => Reply::ok("running"),
        _ => Reply::ok("done:report"),
    });
    let pool = pool(&server, 1);
    let start = codec(raw(&pool, "test.Jobs/Start"), job_request, started_job);
    let client = Arc::new(JobsClient {
        get: raw(&pool, "test.Jobs/Get"),
    });
    let poll_settings = RetrySettings {
        total_timeout: Duration::from_secs(60),
        initial_retry_delay: Duration::from_millis(500),
        retry_delay_multiplier: 1.5,
        max_retry_delay: Duration::from_secs(5),
        max_attempts: 0,
        ..RetrySettings::default()
    };
    let jobs = long_running_call(start, client, poll_settings).unwrap();

    let result = jobs.call(b"build".to_vec(), CallContext::default()).await.unwrap();
    assert_eq!(result, b"report");
    assert_eq!(server.calls("test.Jobs/Start"), 1);
    assert_eq!(server.calls("test.Jobs/Get"), 3);
}

#[tokio::test(start_paused = true)]
async fn runtime_built_from_config_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
            [retry]
            initial_delay_ms = 10
            max_delay_ms = 50
            max_attempts = 2
            retryable_codes = ["UNAVAILABLE"]

            [pool]
            min_channel_count = 3
            max_channel_count = 3
            initial_channel_count = 3
        "#,
    )
    .unwrap();
    let cfg = rpcrt_core::config::load_from_path(&path).unwrap();

    let server = MemoryServer::new(|_, _| Reply::error(unavailable()));
    let pool = ChannelPool::create(cfg.pool_settings().unwrap(), server.factory(), None).unwrap();
    assert_eq!(server.channels_created(), 3);

    let callable = retrying_unary_call(raw(&pool, "test.Echo/Say"), &cfg.unary_call_settings().unwrap()).unwrap();
    let err = callable.call(b"x".to_vec(), CallContext::default()).await.unwrap_err();
    assert!(matches!(err, RpcError::RetriesExhausted { attempts: 2, .. }));
    assert_eq!(server.calls("test.Echo/Say"), 2);

    pool.shutdown();
    assert_eq!(server.channels_shut_down(), 3);
}
