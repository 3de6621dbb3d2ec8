mod common;

use std::sync::Once;
use std::time::Duration;

use prost::Message as _;
use tonic::Status;

use common::{STREAM, ScriptedWriteApi};
use parkinghose::runner::{self, RunOptions, run_channel};
use parkinghose::types::{
    AppendRowsResponse, BatchCommitWriteStreamsResponse, RowError, StorageError, WriteStreamType,
};
use parkinghose::{Args, CustomerRecord, Error, RowGenerator, TableRef, WriteChannel, WriteMode};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("parkinghose=debug"))
            .with_test_writer()
            .try_init();
    });
}

fn table() -> TableRef {
    TableRef::new("proj", "parking", "customers")
}

async fn open(api: ScriptedWriteApi, mode: WriteMode) -> WriteChannel<ScriptedWriteApi> {
    WriteChannel::open(api, table(), mode)
        .await
        .expect("open channel")
}

fn sample_row() -> Vec<u8> {
    CustomerRecord::new("2024-05-01 10:00:00", "Ada Lovelace", "AB12 CDE")
        .encode_row()
        .unwrap()
}

fn options(sleep_ms: u64, count: Option<u64>, max_consecutive_failures: u32) -> RunOptions {
    RunOptions {
        sleep: Duration::from_millis(sleep_ms),
        count,
        max_consecutive_failures,
    }
}

#[tokio::test]
async fn open_creates_committed_stream_for_table() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let channel = open(api, WriteMode::Committed).await;
    assert_eq!(channel.stream_name(), STREAM);
    assert_eq!(channel.next_offset(), 0);

    let calls = calls.lock().unwrap();
    assert_eq!(
        calls.created,
        [(
            "projects/proj/datasets/parking/tables/customers".to_string(),
            WriteStreamType::Committed
        )]
    );
}

#[tokio::test]
async fn open_fails_when_table_is_missing() {
    init_logging();
    let api = ScriptedWriteApi::new().failing_create(Status::not_found("Table not found").into());

    let err = WriteChannel::open(api, table(), WriteMode::Committed)
        .await
        .err()
        .expect("open must fail");
    assert!(err.is_fatal());
    assert!(err.to_string().contains("Table not found"));
}

#[tokio::test]
async fn open_rejects_stream_without_name() {
    init_logging();
    let api = ScriptedWriteApi::new().with_stream_name("");
    let result = WriteChannel::open(api, table(), WriteMode::Committed).await;
    assert!(matches!(result, Err(Error::Protocol(_))));
}

#[tokio::test]
async fn offsets_start_at_zero_and_increase_by_one() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    for expected in 0..5u64 {
        let ack = channel.send(&sample_row()).await.unwrap();
        assert_eq!(ack.offset, expected);
        assert!(!ack.duplicate);
    }
    assert_eq!(channel.next_offset(), 5);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.offsets(), [0, 1, 2, 3, 4]);
    assert!(calls.appends.iter().all(|r| r.write_stream == STREAM));
}

#[tokio::test]
async fn schema_travels_only_until_first_ack() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.send(&sample_row()).await.unwrap();
    channel.send(&sample_row()).await.unwrap();

    let calls = calls.lock().unwrap();
    let descriptor = calls.appends[0]
        .writer_schema()
        .and_then(|s| s.proto_descriptor.as_ref())
        .expect("first append declares the schema");
    assert_eq!(descriptor.name(), "CustomerRecord");
    let fields: Vec<_> = descriptor.field.iter().map(|f| f.name()).collect();
    assert_eq!(fields, ["when", "name", "licenseplate"]);
    assert!(calls.appends[1].writer_schema().is_none());
}

#[tokio::test]
async fn serialized_row_decodes_to_customer_record() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.send(&sample_row()).await.unwrap();

    let calls = calls.lock().unwrap();
    let rows = calls.appends[0].serialized_rows();
    assert_eq!(rows.len(), 1);
    let record = CustomerRecord::decode(rows[0].as_slice()).unwrap();
    assert_eq!(record.name(), "Ada Lovelace");
    assert_eq!(record.licenseplate(), "AB12 CDE");
    assert_eq!(record.when(), "2024-05-01 10:00:00");
}

#[tokio::test]
async fn in_band_already_exists_counts_as_acknowledged() {
    init_logging();
    let api = ScriptedWriteApi::new().then_append(Ok(AppendRowsResponse::rejected(
        6,
        "offset 0 already exists",
    )));

    let mut channel = open(api, WriteMode::Committed).await;
    let first = channel.send(&sample_row()).await.unwrap();
    assert_eq!(first.offset, 0);
    assert!(first.duplicate);
    assert_eq!(channel.next_offset(), 1);

    let second = channel.send(&sample_row()).await.unwrap();
    assert_eq!(second.offset, 1);
    assert!(!second.duplicate);
}

#[tokio::test]
async fn duplicate_after_acknowledged_rows_advances_from_its_offset() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Ok(AppendRowsResponse::acknowledged(0)))
        .then_append(Ok(AppendRowsResponse::acknowledged(1)))
        .then_append(Ok(AppendRowsResponse::rejected(6, "offset 2 already exists")));
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.send(&sample_row()).await.unwrap();
    channel.send(&sample_row()).await.unwrap();

    let dup = channel.send(&sample_row()).await.unwrap();
    assert_eq!(dup.offset, 2);
    assert!(dup.duplicate);
    assert_eq!(channel.next_offset(), 3);

    let next = channel.send(&sample_row()).await.unwrap();
    assert_eq!(next.offset, 3);
    assert!(!next.duplicate);
    assert_eq!(calls.lock().unwrap().offsets(), [0, 1, 2, 3]);
}

#[tokio::test]
async fn already_exists_status_counts_as_acknowledged() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Err(Status::already_exists("row already written").into()));

    let mut channel = open(api, WriteMode::Committed).await;
    let ack = channel.send(&sample_row()).await.unwrap();
    assert!(ack.duplicate);
    assert_eq!(channel.next_offset(), 1);
}

#[tokio::test]
async fn rejected_append_keeps_offset() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Ok(AppendRowsResponse::rejected(
            11,
            "offset beyond end of stream",
        )))
        .then_append(Err(Status::unavailable("backend unavailable").into()));
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;

    let err = channel.send(&sample_row()).await.unwrap_err();
    assert!(matches!(err, Error::Append { offset: 0, code: 11, .. }));
    assert!(err.is_fatal());
    assert_eq!(channel.next_offset(), 0);

    let err = channel.send(&sample_row()).await.unwrap_err();
    assert!(!err.is_fatal());
    assert_eq!(channel.next_offset(), 0);

    // nothing was acknowledged yet, so the schema is still attached
    let ack = channel.send(&sample_row()).await.unwrap();
    assert_eq!(ack.offset, 0);
    let calls = calls.lock().unwrap();
    assert_eq!(calls.offsets(), [0, 0, 0]);
    assert!(calls.appends[2].writer_schema().is_some());
}

#[tokio::test]
async fn row_errors_are_reported_as_invalid_argument() {
    init_logging();
    let api = ScriptedWriteApi::new().then_append(Ok(AppendRowsResponse {
        row_errors: vec![RowError {
            index: 0,
            code: 1,
            message: "bad plate".into(),
        }],
        ..Default::default()
    }));

    let mut channel = open(api, WriteMode::Committed).await;
    match channel.send(&sample_row()).await {
        Err(Error::Append { code, message, .. }) => {
            assert_eq!(code, 3);
            assert!(message.contains("bad plate"));
        }
        other => panic!("expected append error, got {other:?}"),
    }
    assert_eq!(channel.next_offset(), 0);
}

#[tokio::test]
async fn mismatched_ack_offset_is_a_protocol_error() {
    init_logging();
    let api = ScriptedWriteApi::new().then_append(Ok(AppendRowsResponse::acknowledged(41)));

    let mut channel = open(api, WriteMode::Committed).await;
    assert!(matches!(
        channel.send(&sample_row()).await,
        Err(Error::Protocol(_))
    ));
    assert_eq!(channel.next_offset(), 0);
}

#[tokio::test]
async fn close_without_sends_finalizes_empty_stream() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    let summary = channel.close().await.unwrap();
    assert_eq!(summary.stream_name, STREAM);
    assert_eq!(summary.row_count, 0);
    assert!(summary.commit_time.is_none());

    let calls = calls.lock().unwrap();
    assert!(calls.appends.is_empty());
    assert!(calls.commits.is_empty());
}

#[tokio::test]
async fn closing_twice_finalizes_once() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.send(&sample_row()).await.unwrap();
    let first = channel.close().await.unwrap();
    let second = channel.close().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.row_count, 1);
    assert_eq!(calls.lock().unwrap().finalized, [STREAM]);
}

#[tokio::test]
async fn send_after_close_is_refused_locally() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.close().await.unwrap();
    assert!(channel.is_closed());
    assert!(matches!(
        channel.send(&sample_row()).await,
        Err(Error::ChannelClosed)
    ));
    assert!(calls.lock().unwrap().appends.is_empty());
}

#[tokio::test]
async fn pending_stream_is_committed_on_close() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Pending).await;
    channel.send(&sample_row()).await.unwrap();
    channel.send(&sample_row()).await.unwrap();
    let summary = channel.close().await.unwrap();

    assert_eq!(summary.row_count, 2);
    assert_eq!(summary.commit_time.as_deref(), Some("2026-10-19T08:00:05Z"));
    let calls = calls.lock().unwrap();
    assert_eq!(calls.created[0].1, WriteStreamType::Pending);
    assert_eq!(
        calls.commits,
        [(
            "projects/proj/datasets/parking/tables/customers".to_string(),
            vec![STREAM.to_string()]
        )]
    );
}

#[tokio::test]
async fn failed_commit_is_reported() {
    init_logging();
    let api = ScriptedWriteApi::new().then_commit(Ok(BatchCommitWriteStreamsResponse {
        commit_time: None,
        stream_errors: vec![StorageError {
            code: 2,
            entity: STREAM.to_string(),
            error_message: "stream was not finalized".into(),
        }],
    }));

    let mut channel = open(api, WriteMode::Pending).await;
    assert!(matches!(channel.close().await, Err(Error::Protocol(_))));
    assert!(channel.is_closed());
}

#[tokio::test]
async fn close_after_failed_commit_only_retries_the_commit() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_commit(Err(Status::unavailable("commit backend unavailable").into()));
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Pending).await;
    channel.send(&sample_row()).await.unwrap();

    let err = channel.close().await.unwrap_err();
    assert!(!err.is_fatal());
    assert!(matches!(
        channel.send(&sample_row()).await,
        Err(Error::ChannelClosed)
    ));

    let summary = channel.close().await.unwrap();
    assert_eq!(summary.row_count, 1);
    assert_eq!(summary.commit_time.as_deref(), Some("2026-10-19T08:00:05Z"));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.finalized, [STREAM]);
    assert_eq!(calls.commits.len(), 2);
}

#[tokio::test]
async fn close_after_failed_finalize_finalizes_again() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_finalize(Err(Status::unavailable("finalize backend unavailable").into()));
    let calls = api.calls();

    let mut channel = open(api, WriteMode::Committed).await;
    channel.send(&sample_row()).await.unwrap();

    assert!(channel.close().await.is_err());
    let summary = channel.close().await.unwrap();
    assert_eq!(summary.row_count, 1);
    assert_eq!(calls.lock().unwrap().finalized, [STREAM, STREAM]);
}

#[tokio::test]
async fn run_streams_about_one_row_per_tick_until_interrupted() {
    init_logging();
    let api = ScriptedWriteApi::new();
    let calls = api.calls();

    let channel = open(api, WriteMode::Committed).await;
    let summary = run_channel(
        channel,
        RowGenerator::new(),
        options(100, None, 3),
        tokio::time::sleep(Duration::from_millis(1050)),
    )
    .await
    .unwrap();

    assert!(
        (9..=11).contains(&summary.sent),
        "expected roughly ten rows, got {}",
        summary.sent
    );
    assert_eq!(summary.next_offset, summary.sent);
    assert_eq!(calls.lock().unwrap().appends.len() as u64, summary.sent);
    assert_eq!(summary.closed.map(|c| c.row_count), Some(summary.sent));
}

#[tokio::test]
async fn run_stops_after_count_rows() {
    init_logging();
    let channel = open(ScriptedWriteApi::new(), WriteMode::Committed).await;
    let summary = run_channel(
        channel,
        RowGenerator::seeded(42),
        options(1, Some(3), 3),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.sent, 3);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.closed.unwrap().row_count, 3);
}

#[tokio::test]
async fn unavailable_server_gets_same_row_at_same_offset() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Err(Status::unavailable("backend unavailable").into()));
    let calls = api.calls();

    let channel = open(api, WriteMode::Committed).await;
    let summary = run_channel(
        channel,
        RowGenerator::seeded(7),
        options(5, Some(2), 3),
        std::future::pending(),
    )
    .await
    .unwrap();

    assert_eq!(summary.sent, 2);
    assert_eq!(summary.next_offset, 2);
    assert_eq!(summary.closed.map(|c| c.row_count), Some(2));

    let calls = calls.lock().unwrap();
    assert_eq!(calls.offsets(), [0, 0, 1]);
    assert_eq!(
        calls.appends[0].serialized_rows(),
        calls.appends[1].serialized_rows(),
        "the failed row must be resent unchanged"
    );
    assert_ne!(
        calls.appends[1].serialized_rows(),
        calls.appends[2].serialized_rows()
    );
    assert!(calls.appends[1].writer_schema().is_some());
    assert!(calls.appends[2].writer_schema().is_none());
}

#[tokio::test]
async fn persistent_outage_becomes_fatal_and_stream_is_still_closed() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Err(Status::unavailable("down").into()))
        .then_append(Err(Status::unavailable("down").into()))
        .then_append(Err(Status::unavailable("down").into()));
    let calls = api.calls();

    let channel = open(api, WriteMode::Committed).await;
    let err = run_channel(
        channel,
        RowGenerator::seeded(7),
        options(5, None, 2),
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert!(
        matches!(&err, Error::Status(status) if status.code() == tonic::Code::Unavailable),
        "got {err:?}"
    );
    let calls = calls.lock().unwrap();
    assert_eq!(calls.appends.len(), 3);
    assert_eq!(calls.finalized, [STREAM]);
}

#[tokio::test]
async fn invalid_row_is_fatal_without_resend() {
    init_logging();
    let api = ScriptedWriteApi::new()
        .then_append(Ok(AppendRowsResponse::rejected(3, "Invalid proto schema")));
    let calls = api.calls();

    let channel = open(api, WriteMode::Committed).await;
    let err = run_channel(
        channel,
        RowGenerator::seeded(1),
        options(5, None, 3),
        std::future::pending(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, Error::Append { offset: 0, code: 3, .. }), "got {err:?}");
    assert_eq!(calls.lock().unwrap().appends.len(), 1);
}

#[tokio::test]
async fn run_fails_at_startup_without_credentials_file() {
    init_logging();
    let args = <Args as clap::Parser>::try_parse_from([
        "parkinghose",
        "-p",
        "proj",
        "-d",
        "parking",
        "-t",
        "customers",
        "--credentials",
        "/nonexistent/parkinghose-key.json",
        "--endpoint",
        "http://127.0.0.1:9",
    ])
    .unwrap();

    let err = runner::run(&args, std::future::pending())
        .await
        .err()
        .expect("startup must fail");
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
}
