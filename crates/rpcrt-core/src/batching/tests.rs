use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::*;
use crate::callable::{fn_callable, CallContext, UnaryCallable};
use crate::error::{Code, Result, RpcError};

/// Doubles every number; one partition per topic.
struct DoublingDescriptor;

impl BatchingDescriptor for DoublingDescriptor {
    type Element = (String, u32);
    type ElementResult = u32;
    type Request = Vec<u32>;
    type Response = Vec<u32>;
    type PartitionKey = String;

    fn partition_key(&self, element: &Self::Element) -> String {
        element.0.clone()
    }

    fn build_request(&self, _key: &String, elements: Vec<Self::Element>) -> Vec<u32> {
        elements.into_iter().map(|(_, n)| n).collect()
    }

    fn split_response(&self, response: Vec<u32>, _count: usize) -> Vec<Result<u32>> {
        response.into_iter().map(Ok).collect()
    }

    fn count_bytes(&self, _element: &Self::Element) -> u64 {
        4
    }
}

#[derive(Default)]
struct Recorder {
    requests: Mutex<Vec<Vec<u32>>>,
}

fn doubling_backend(recorder: Arc<Recorder>) -> Arc<dyn UnaryCallable<Vec<u32>, Vec<u32>>> {
    Arc::new(fn_callable(move |req: Vec<u32>, _ctx: CallContext| {
        recorder.requests.lock().unwrap().push(req.clone());
        async move { Ok::<Vec<u32>, RpcError>(req.into_iter().map(|n| n * 2).collect()) }
    }))
}

fn settings(count: Option<usize>, delay: Option<Duration>) -> BatchingSettings {
    BatchingSettings {
        element_count_threshold: count,
        request_byte_threshold: None,
        delay_threshold: delay,
        flow_control: FlowControlSettings::default(),
    }
}

fn element(topic: &str, n: u32) -> (String, u32) {
    (topic.to_string(), n)
}

#[tokio::test]
async fn third_element_flushes_and_results_come_back_in_order() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        settings(Some(3), None),
    )
    .unwrap();
    let key = "t".to_string();
    let a = batcher.add(key.clone(), element("t", 1)).await.unwrap();
    let b = batcher.add(key.clone(), element("t", 2)).await.unwrap();
    assert!(recorder.requests.lock().unwrap().is_empty());
    let c = batcher.add(key, element("t", 3)).await.unwrap();

    assert_eq!(a.await.unwrap(), 2);
    assert_eq!(b.await.unwrap(), 4);
    assert_eq!(c.await.unwrap(), 6);
    assert_eq!(*recorder.requests.lock().unwrap(), vec![vec![1, 2, 3]]);
}

#[tokio::test(start_paused = true)]
async fn delay_threshold_sends_a_partial_batch() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        settings(Some(100), Some(Duration::from_millis(10))),
    )
    .unwrap();
    let result = batcher.add("t".into(), element("t", 5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(recorder.requests.lock().unwrap().is_empty());
    assert_eq!(result.await.unwrap(), 10);
    assert_eq!(recorder.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn partition_keys_get_separate_batches() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        settings(Some(2), None),
    )
    .unwrap();
    let a1 = batcher.add("a".into(), element("a", 1)).await.unwrap();
    let b1 = batcher.add("b".into(), element("b", 10)).await.unwrap();
    let a2 = batcher.add("a".into(), element("a", 2)).await.unwrap();
    assert_eq!(a1.await.unwrap(), 2);
    assert_eq!(a2.await.unwrap(), 4);
    assert_eq!(*recorder.requests.lock().unwrap(), vec![vec![1, 2]]);

    batcher.flush().await;
    assert_eq!(b1.await.unwrap(), 20);
    assert_eq!(recorder.requests.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn wire_failure_reaches_every_element() {
    let backend: Arc<dyn UnaryCallable<Vec<u32>, Vec<u32>>> =
        Arc::new(fn_callable(|_req: Vec<u32>, _ctx: CallContext| async {
            Err::<Vec<u32>, _>(RpcError::status(Code::Unavailable, "backend down"))
        }));
    let batcher = Batcher::new(Arc::new(DoublingDescriptor), backend, settings(Some(2), None)).unwrap();
    let a = batcher.add("t".into(), element("t", 1)).await.unwrap();
    let b = batcher.add("t".into(), element("t", 2)).await.unwrap();
    assert_eq!(a.await.unwrap_err().code(), Some(Code::Unavailable));
    assert_eq!(b.await.unwrap_err().code(), Some(Code::Unavailable));
}

#[tokio::test]
async fn short_response_fails_the_missing_elements() {
    let backend: Arc<dyn UnaryCallable<Vec<u32>, Vec<u32>>> =
        Arc::new(fn_callable(|_req: Vec<u32>, _ctx: CallContext| async { Ok::<Vec<u32>, RpcError>(vec![7]) }));
    let batcher = Batcher::new(Arc::new(DoublingDescriptor), backend, settings(Some(2), None)).unwrap();
    let a = batcher.add("t".into(), element("t", 1)).await.unwrap();
    let b = batcher.add("t".into(), element("t", 2)).await.unwrap();
    assert_eq!(a.await.unwrap(), 7);
    assert_eq!(b.await.unwrap_err().code(), Some(Code::Internal));
}

#[tokio::test]
async fn byte_threshold_flushes() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        BatchingSettings {
            request_byte_threshold: Some(8),
            ..settings(None, None)
        },
    )
    .unwrap();
    let _a = batcher.add("t".into(), element("t", 1)).await.unwrap();
    let b = batcher.add("t".into(), element("t", 2)).await.unwrap();
    assert_eq!(b.await.unwrap(), 4);
    assert_eq!(*recorder.requests.lock().unwrap(), vec![vec![1, 2]]);
}

#[tokio::test]
async fn throwing_flow_control_rejects_until_permits_return() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        BatchingSettings {
            flow_control: FlowControlSettings {
                max_outstanding_element_count: Some(2),
                max_outstanding_request_bytes: None,
                limit_exceeded_behavior: LimitExceededBehavior::ThrowException,
            },
            ..settings(Some(2), None)
        },
    )
    .unwrap();
    let _a = batcher.add("x".into(), element("x", 1)).await.unwrap();
    let _b = batcher.add("y".into(), element("y", 2)).await.unwrap();
    let err = batcher.add("z".into(), element("z", 3)).await.unwrap_err();
    assert!(matches!(
        err,
        RpcError::FlowControl(FlowControlError::MaxOutstandingElementCountReached { limit: 2 })
    ));

    batcher.flush().await;
    assert_eq!(batcher.flow_controller().outstanding(), (0, 0));
    let c = batcher.add("z".into(), element("z", 3)).await.unwrap();
    batcher.flush().await;
    assert_eq!(c.await.unwrap(), 6);
}

#[tokio::test(start_paused = true)]
async fn blocking_flow_control_waits_for_a_batch_to_settle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let backend: Arc<dyn UnaryCallable<Vec<u32>, Vec<u32>>> =
        Arc::new(fn_callable(move |req: Vec<u32>, _ctx: CallContext| {
            c.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<Vec<u32>, RpcError>(req)
            }
        }));
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        backend,
        BatchingSettings {
            flow_control: FlowControlSettings {
                max_outstanding_element_count: Some(1),
                max_outstanding_request_bytes: None,
                limit_exceeded_behavior: LimitExceededBehavior::Block,
            },
            ..settings(Some(1), None)
        },
    )
    .unwrap();
    let first = batcher.add("t".into(), element("t", 1)).await.unwrap();
    let second = {
        let batcher = batcher.clone();
        tokio::spawn(async move { batcher.add("t".into(), element("t", 2)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second.is_finished());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    assert_eq!(first.await.unwrap(), 1);
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.await.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn blocked_add_sends_open_batches_instead_of_waiting_forever() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        BatchingSettings {
            flow_control: FlowControlSettings {
                max_outstanding_element_count: Some(2),
                max_outstanding_request_bytes: None,
                limit_exceeded_behavior: LimitExceededBehavior::Block,
            },
            ..settings(None, None)
        },
    )
    .unwrap();
    let hour = Duration::from_secs(3600);
    let key = "t".to_string();
    let a = tokio::time::timeout(hour, batcher.add(key.clone(), element("t", 1)))
        .await
        .unwrap()
        .unwrap();
    let b = tokio::time::timeout(hour, batcher.add(key.clone(), element("t", 2)))
        .await
        .unwrap()
        .unwrap();
    assert!(recorder.requests.lock().unwrap().is_empty());

    let c = tokio::time::timeout(hour, batcher.add(key, element("t", 3)))
        .await
        .expect("add blocked on capacity held by its own open batch")
        .unwrap();
    assert_eq!(*recorder.requests.lock().unwrap(), vec![vec![1, 2]]);
    assert_eq!(a.await.unwrap(), 2);
    assert_eq!(b.await.unwrap(), 4);

    batcher.flush().await;
    assert_eq!(c.await.unwrap(), 6);
    assert_eq!(*recorder.requests.lock().unwrap(), vec![vec![1, 2], vec![3]]);
}

#[tokio::test]
async fn close_sends_pending_work_and_rejects_new_elements() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        settings(Some(10), None),
    )
    .unwrap();
    let pending = batcher.add("t".into(), element("t", 4)).await.unwrap();
    batcher.close().await;
    assert_eq!(pending.await.unwrap(), 8);
    assert!(matches!(
        batcher.add("t".into(), element("t", 1)).await,
        Err(RpcError::BatcherClosed)
    ));
}

#[tokio::test]
async fn batching_callable_derives_partition_key() {
    let recorder = Arc::new(Recorder::default());
    let batcher = Batcher::new(
        Arc::new(DoublingDescriptor),
        doubling_backend(Arc::clone(&recorder)),
        settings(Some(2), None),
    )
    .unwrap();
    let callable = Arc::new(BatchingCallable::new(batcher));
    let one = callable.call(element("k", 1), CallContext::default());
    let two = callable.call(element("k", 2), CallContext::default());
    let (one, two) = tokio::join!(one, two);
    assert_eq!(one.unwrap(), 2);
    assert_eq!(two.unwrap(), 4);
    assert_eq!(recorder.requests.lock().unwrap().len(), 1);
}
