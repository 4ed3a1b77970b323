//! Resumption behaviour against a scripted in-memory transport

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use resumio_core::{
    BlockingDownload, ByteRange, DownloadError, DownloadEvent, DownloadSettings, RangeRequest,
    ResumableStream, Segment, Transport,
};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

const OBJECT_SIZE: usize = 1000;
const CHUNK_SIZE: usize = 100;
const VERSION: &str = "\"v1\"";

fn object() -> Vec<u8> {
    (0..OBJECT_SIZE).map(|i| (i % 251) as u8).collect()
}

/// How the transport answers one fetch
#[derive(Debug, Clone)]
enum Plan {
    /// Serve the requested range, failing with a reset after `fail_after` chunks
    Serve { fail_after: Option<usize> },
    /// Serve `after` chunks and then end cleanly
    Truncate { after: usize },
    /// Serve the whole object regardless of the requested range
    IgnoreRange,
    /// Reject the version condition
    Reject,
    /// Serve a different version, ignoring the condition
    Changed,
    /// Serve without a version token
    Unversioned,
    /// Fail to establish the request
    Unavailable,
    /// Never answer
    Stall,
}

struct ScriptedTransport {
    data: Vec<u8>,
    plans: Mutex<VecDeque<Plan>>,
    requests: Mutex<Vec<RangeRequest>>,
}

impl ScriptedTransport {
    fn new(plans: Vec<Plan>) -> Arc<Self> {
        Arc::new(Self {
            data: object(),
            plans: Mutex::new(plans.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<RangeRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(&self, request: &RangeRequest) -> Result<Segment, DownloadError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };
        let plan = self
            .plans
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Plan::Serve { fail_after: None });
        if matches!(plan, Plan::Stall) {
            return futures::future::pending().await;
        }

        let start = (request.range.start as usize).min(self.data.len());
        let end = match request.range.count {
            Some(count) => (start + count as usize).min(self.data.len()),
            None => self.data.len(),
        };
        let slice = match plan {
            Plan::IgnoreRange => &self.data[..],
            _ => &self.data[start..end],
        };
        let mut chunks: Vec<Result<Bytes, DownloadError>> = slice
            .chunks(CHUNK_SIZE)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        let mut version = Some(VERSION.to_string());
        match plan {
            Plan::Serve { fail_after: None } | Plan::IgnoreRange | Plan::Stall => {}
            Plan::Serve {
                fail_after: Some(n),
            } => {
                chunks.truncate(n);
                chunks.push(Err(DownloadError::Interrupted(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    format!("reset #{}", call),
                ))));
            }
            Plan::Truncate { after } => chunks.truncate(after),
            Plan::Reject => {
                return Err(DownloadError::VersionMismatch {
                    expected: request.if_match.clone().unwrap_or_default(),
                    actual: Some("\"v2\"".to_string()),
                })
            }
            Plan::Changed => version = Some("\"v2\"".to_string()),
            Plan::Unversioned => version = None,
            Plan::Unavailable => {
                return Err(DownloadError::ServerError {
                    status: 503,
                    message: "Service Unavailable".to_string(),
                })
            }
        }

        Ok(Segment::new(version, stream::iter(chunks).boxed())
            .with_total_size(Some(self.data.len() as u64)))
    }
}

async fn open(
    transport: &Arc<ScriptedTransport>,
    range: ByteRange,
    max_retries: u32,
) -> ResumableStream {
    let settings = DownloadSettings::with_max_retries(max_retries);
    ResumableStream::open(transport.clone(), range, &settings)
        .await
        .expect("first fetch succeeds")
}

/// Read until the stream ends, returning the bytes and the terminal error, if any
async fn drain(stream: &mut ResumableStream) -> (Vec<u8>, Option<DownloadError>) {
    let mut data = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(chunk) => data.extend_from_slice(&chunk),
            Err(e) => return (data, Some(e)),
        }
    }
    (data, None)
}

#[tokio::test]
async fn delivers_uninterrupted_stream_unchanged() {
    let transport = ScriptedTransport::new(vec![]);
    let mut stream = open(&transport, ByteRange::full(), 3).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object());
    assert_eq!(stream.offset(), OBJECT_SIZE as u64);
    assert_eq!(stream.attempts(), 0);
    assert!(stream.is_done());

    let requests = transport.requests();
    assert_eq!(requests, vec![RangeRequest::initial(ByteRange::full())]);
}

#[tokio::test]
async fn resumes_after_failure_at_chunk_three() {
    let transport = ScriptedTransport::new(vec![
        Plan::Serve {
            fail_after: Some(3),
        },
        Plan::Serve { fail_after: None },
    ]);
    let mut stream = open(&transport, ByteRange::full(), 2).await;

    let mut delivered = Vec::new();
    for _ in 0..3 {
        let chunk = assert_ok!(stream.next().await.unwrap());
        delivered.extend_from_slice(&chunk);
    }
    assert_eq!(delivered.len(), 300);
    assert_eq!(stream.offset(), 300);

    let (rest, error) = drain(&mut stream).await;
    assert!(error.is_none());
    delivered.extend_from_slice(&rest);

    assert_eq!(delivered, object());
    assert_eq!(stream.attempts(), 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].if_match, None);
    assert_eq!(requests[1].range, ByteRange::from_offset(300));
    assert_eq!(requests[1].if_match.as_deref(), Some(VERSION));
}

#[tokio::test]
async fn single_failure_at_any_point_has_no_gap_or_duplicate() {
    for fail_after in 0..10 {
        let transport = ScriptedTransport::new(vec![Plan::Serve {
            fail_after: Some(fail_after),
        }]);
        let mut stream = open(&transport, ByteRange::segment(0, OBJECT_SIZE as u64), 1).await;

        let (data, error) = drain(&mut stream).await;
        assert!(error.is_none(), "failure after chunk {}", fail_after);
        assert_eq!(data, object(), "failure after chunk {}", fail_after);

        let resumed_at = ((fail_after * CHUNK_SIZE).min(OBJECT_SIZE)) as u64;
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(
            requests[1].range,
            ByteRange::segment(resumed_at, OBJECT_SIZE as u64 - resumed_at)
        );
    }
}

#[tokio::test]
async fn failure_after_the_last_byte_completes() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(10),
    }]);
    let mut stream = open(&transport, ByteRange::segment(0, OBJECT_SIZE as u64), 1).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object());
    assert_eq!(stream.attempts(), 0);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn resumes_within_a_bounded_sub_range() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(2),
    }]);
    let mut stream = open(&transport, ByteRange::segment(150, 500), 2).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object()[150..650].to_vec());
    assert_eq!(stream.offset(), 650);
    assert_eq!(stream.remaining(), Some(0));
    assert_eq!(transport.requests()[1].range, ByteRange::segment(350, 300));
}

#[tokio::test]
async fn exhausted_budget_surfaces_last_error() {
    let failing = Plan::Serve {
        fail_after: Some(1),
    };
    let transport = ScriptedTransport::new(vec![failing.clone(), failing.clone(), failing]);
    let mut stream = open(&transport, ByteRange::full(), 2).await;

    let (data, error) = drain(&mut stream).await;
    let error = error.expect("download fails");
    assert!(matches!(error, DownloadError::Interrupted(_)));
    assert!(error.to_string().contains("reset #3"), "{}", error);
    assert_eq!(data, object()[..300].to_vec());
    assert_eq!(stream.attempts(), 2);
    assert_eq!(transport.requests().len(), 3);

    // Terminal: nothing more is produced
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn version_mismatch_is_fatal_regardless_of_budget() {
    let transport = ScriptedTransport::new(vec![
        Plan::Serve {
            fail_after: Some(4),
        },
        Plan::Reject,
    ]);
    let mut stream = open(&transport, ByteRange::full(), 5).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.expect("download fails").is_version_mismatch());
    assert_eq!(data.len(), 400);
    assert_eq!(stream.attempts(), 1);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn changed_version_on_resume_is_detected() {
    let transport = ScriptedTransport::new(vec![
        Plan::Serve {
            fail_after: Some(2),
        },
        Plan::Changed,
    ]);
    let mut stream = open(&transport, ByteRange::full(), 5).await;

    let (data, error) = drain(&mut stream).await;
    match error {
        Some(DownloadError::VersionMismatch { expected, actual }) => {
            assert_eq!(expected, VERSION);
            assert_eq!(actual.as_deref(), Some("\"v2\""));
        }
        other => panic!("expected version mismatch, got {:?}", other),
    }
    assert_eq!(data.len(), 200);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn refetch_failure_is_surfaced_immediately() {
    let transport = ScriptedTransport::new(vec![
        Plan::Serve {
            fail_after: Some(1),
        },
        Plan::Unavailable,
    ]);
    let mut stream = open(&transport, ByteRange::full(), 5).await;

    let (_, error) = drain(&mut stream).await;
    assert!(matches!(
        error,
        Some(DownloadError::ServerError { status: 503, .. })
    ));
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn cancellation_stops_between_chunks() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(5),
    }]);
    let mut stream = open(&transport, ByteRange::full(), 3).await;

    let mut chunks = 0;
    for _ in 0..3 {
        assert_ok!(stream.next().await.unwrap());
        chunks += 1;
    }
    stream.cancel();

    let error = assert_err!(stream.next().await.unwrap());
    assert!(matches!(error, DownloadError::Cancelled));
    assert!(stream.next().await.is_none());
    assert_eq!(chunks, 3);
    assert_eq!(stream.offset(), 300);
    assert_eq!(transport.requests().len(), 1);
}

/// Cancel `stream` from another task as soon as it starts resuming
fn cancel_on_resume(stream: &ResumableStream, mut event_rx: broadcast::Receiver<DownloadEvent>) {
    let cancel = stream.cancel_handle();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            if matches!(event, DownloadEvent::Resuming { .. }) {
                cancel.cancel();
                break;
            }
        }
    });
}

#[tokio::test]
async fn cancellation_interrupts_the_backoff_delay() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(2),
    }]);
    let settings = DownloadSettings {
        max_retries: 3,
        retry_delay_ms: 60_000,
        ..DownloadSettings::default()
    };
    let (event_tx, event_rx) = broadcast::channel(64);
    let mut stream = ResumableStream::open(transport.clone(), ByteRange::full(), &settings)
        .await
        .expect("first fetch succeeds")
        .with_events(event_tx);
    cancel_on_resume(&stream, event_rx);

    let (data, error) = drain(&mut stream).await;
    assert!(matches!(error, Some(DownloadError::Cancelled)));
    assert_eq!(data.len(), 200);
    assert_eq!(stream.attempts(), 1);
    assert!(stream.is_done());
    assert!(stream.next().await.is_none());

    // The resumption never reached the transport
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn cancellation_interrupts_a_pending_refetch() {
    let transport = ScriptedTransport::new(vec![
        Plan::Serve {
            fail_after: Some(3),
        },
        Plan::Stall,
    ]);
    let (event_tx, event_rx) = broadcast::channel(64);
    let mut stream = open(&transport, ByteRange::full(), 3)
        .await
        .with_events(event_tx);
    cancel_on_resume(&stream, event_rx);

    let (data, error) = drain(&mut stream).await;
    assert!(matches!(error, Some(DownloadError::Cancelled)));
    assert_eq!(data, object()[..300].to_vec());
    assert_eq!(stream.offset(), 300);
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn truncated_segment_is_resumed() {
    let transport = ScriptedTransport::new(vec![Plan::Truncate { after: 4 }]);
    let mut stream = open(&transport, ByteRange::segment(0, OBJECT_SIZE as u64), 1).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object());
    assert_eq!(transport.requests()[1].range, ByteRange::segment(400, 600));
}

#[tokio::test]
async fn open_ended_range_short_of_the_object_size_is_resumed() {
    let transport = ScriptedTransport::new(vec![Plan::Truncate { after: 4 }]);
    let mut stream = open(&transport, ByteRange::full(), 3).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object());
    assert_eq!(stream.attempts(), 1);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].range, ByteRange::from_offset(400));
    assert_eq!(requests[1].if_match.as_deref(), Some(VERSION));
}

#[tokio::test]
async fn open_ended_range_at_the_object_size_completes() {
    let transport = ScriptedTransport::new(vec![]);
    let mut stream = open(&transport, ByteRange::from_offset(600), 3).await;

    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data, object()[600..].to_vec());
    assert_eq!(stream.attempts(), 0);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn disabled_retries_pass_the_raw_stream_through() {
    let transport = ScriptedTransport::new(vec![Plan::Truncate { after: 4 }]);
    let mut stream = open(&transport, ByteRange::segment(0, OBJECT_SIZE as u64), 0).await;
    let (data, error) = drain(&mut stream).await;
    assert!(error.is_none());
    assert_eq!(data.len(), 400);

    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(2),
    }]);
    let mut stream = open(&transport, ByteRange::full(), 0).await;
    let (data, error) = drain(&mut stream).await;
    assert!(matches!(error, Some(DownloadError::Interrupted(_))));
    assert_eq!(data.len(), 200);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn extra_bytes_are_an_invariant_violation() {
    let transport = ScriptedTransport::new(vec![Plan::IgnoreRange]);
    let mut stream = open(&transport, ByteRange::segment(0, 450), 3).await;

    let (data, error) = drain(&mut stream).await;
    assert!(matches!(error, Some(DownloadError::InvariantViolation(_))));
    assert_eq!(data.len(), 400);
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn first_response_must_carry_a_version() {
    let transport = ScriptedTransport::new(vec![Plan::Unversioned]);
    let settings = DownloadSettings::with_max_retries(3);
    let result = ResumableStream::open(transport.clone(), ByteRange::full(), &settings).await;
    assert!(matches!(result, Err(DownloadError::MissingVersionToken)));
}

#[tokio::test]
async fn empty_range_is_rejected_without_a_request() {
    let transport = ScriptedTransport::new(vec![]);
    let settings = DownloadSettings::with_max_retries(3);
    let result = ResumableStream::open(transport.clone(), ByteRange::segment(10, 0), &settings).await;
    assert!(matches!(result, Err(DownloadError::InvalidRange(_))));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn reports_lifecycle_events() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(3),
    }]);
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let mut stream = open(&transport, ByteRange::full(), 2)
        .await
        .with_events(event_tx);
    let id = stream.id();

    let (_, error) = drain(&mut stream).await;
    assert!(error.is_none());

    let mut events = Vec::new();
    while let Ok(event) = event_rx.try_recv() {
        if !matches!(event, DownloadEvent::Progress { .. }) {
            events.push(event);
        }
    }

    assert_eq!(events.len(), 3);
    assert!(matches!(
        &events[0],
        DownloadEvent::Started { offset: 0, remaining: None, version, total_size: Some(1000), .. }
            if version == VERSION
    ));
    assert!(matches!(
        &events[1],
        DownloadEvent::Resuming { attempt: 1, offset: 300, .. }
    ));
    assert_eq!(events[2], DownloadEvent::Completed { id, offset: 1000 });
}

#[tokio::test]
async fn copy_to_writes_the_whole_object() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(6),
    }]);
    let mut stream = open(&transport, ByteRange::full(), 1).await;

    let mut sink: Vec<u8> = Vec::new();
    let written = assert_ok!(stream.copy_to(&mut sink).await);
    assert_eq!(written, OBJECT_SIZE as u64);
    assert_eq!(sink, object());
}

#[test]
fn blocking_read_resumes_into_sink() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(3),
    }]);
    let settings = DownloadSettings::with_max_retries(2);
    let mut download = BlockingDownload::open(transport.clone(), ByteRange::full(), &settings)
        .expect("first fetch succeeds");

    let mut sink = Vec::new();
    let written = download.read(&mut sink).expect("download succeeds");
    assert_eq!(written, OBJECT_SIZE as u64);
    assert_eq!(sink, object());
    assert_eq!(download.stream().attempts(), 1);
}

#[test]
fn blocking_read_keeps_partial_bytes_on_error() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(3),
    }]);
    let settings = DownloadSettings::with_max_retries(0);
    let mut download = BlockingDownload::open(transport.clone(), ByteRange::full(), &settings)
        .expect("first fetch succeeds");

    let mut sink = Vec::new();
    let error = download.read(&mut sink).unwrap_err();
    assert!(matches!(error, DownloadError::Interrupted(_)));
    assert_eq!(sink, object()[..300].to_vec());
}

#[test]
fn blocking_reader_implements_read() {
    let transport = ScriptedTransport::new(vec![Plan::Serve {
        fail_after: Some(7),
    }]);
    let settings = DownloadSettings::with_max_retries(1);
    let download = BlockingDownload::open(transport.clone(), ByteRange::segment(100, 800), &settings)
        .expect("first fetch succeeds");

    let mut reader = download.into_reader();
    let mut small = [0u8; 7];
    reader.read_exact(&mut small).unwrap();
    assert_eq!(&small[..], &object()[100..107]);

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, object()[107..900].to_vec());
}
