use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use parkinghose::types::{
    AppendRowsRequest, AppendRowsResponse, BatchCommitWriteStreamsResponse,
    FinalizeWriteStreamResponse, WriteStream, WriteStreamType,
};
use parkinghose::{Error, TableRef, WriteApi};
use prost_types::Timestamp;

pub const STREAM: &str = "projects/proj/datasets/parking/tables/customers/streams/s1";

/// Commit time the default commit reply carries: 2026-10-19T08:00:05Z.
pub const COMMIT_SECONDS: i64 = 1_792_396_805;

/// Everything the channel asked of the server, in call order.
#[derive(Debug, Default)]
pub struct Calls {
    pub created: Vec<(String, WriteStreamType)>,
    pub appends: Vec<AppendRowsRequest>,
    pub finalized: Vec<String>,
    pub commits: Vec<(String, Vec<String>)>,
}

impl Calls {
    pub fn offsets(&self) -> Vec<i64> {
        self.appends.iter().filter_map(|r| r.offset).collect()
    }
}

/// In-memory `WriteApi` that plays back scripted replies.
///
/// Without a scripted reply, appends are acknowledged at the offset they
/// carry, finalize reports the rows acknowledged so far and commits succeed.
pub struct ScriptedWriteApi {
    stream_name: String,
    create: Option<Error>,
    appends: VecDeque<Result<AppendRowsResponse, Error>>,
    finalizes: VecDeque<Result<FinalizeWriteStreamResponse, Error>>,
    commits: VecDeque<Result<BatchCommitWriteStreamsResponse, Error>>,
    acknowledged: i64,
    calls: Arc<Mutex<Calls>>,
}

impl ScriptedWriteApi {
    pub fn new() -> Self {
        Self {
            stream_name: STREAM.to_string(),
            create: None,
            appends: VecDeque::new(),
            finalizes: VecDeque::new(),
            commits: VecDeque::new(),
            acknowledged: 0,
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<Mutex<Calls>> {
        self.calls.clone()
    }

    pub fn with_stream_name(mut self, name: &str) -> Self {
        self.stream_name = name.to_string();
        self
    }

    pub fn failing_create(mut self, err: Error) -> Self {
        self.create = Some(err);
        self
    }

    pub fn then_append(mut self, reply: Result<AppendRowsResponse, Error>) -> Self {
        self.appends.push_back(reply);
        self
    }

    pub fn then_finalize(mut self, reply: Result<FinalizeWriteStreamResponse, Error>) -> Self {
        self.finalizes.push_back(reply);
        self
    }

    pub fn then_commit(mut self, reply: Result<BatchCommitWriteStreamsResponse, Error>) -> Self {
        self.commits.push_back(reply);
        self
    }
}

impl WriteApi for ScriptedWriteApi {
    async fn create_write_stream(
        &mut self,
        table: &TableRef,
        stream_type: WriteStreamType,
    ) -> Result<WriteStream, Error> {
        self.calls
            .lock()
            .unwrap()
            .created
            .push((table.parent(), stream_type));
        if let Some(err) = self.create.take() {
            return Err(err);
        }
        let mut stream = WriteStream {
            name: self.stream_name.clone(),
            ..Default::default()
        };
        stream.set_stream_type(stream_type);
        Ok(stream)
    }

    async fn append_rows(
        &mut self,
        request: AppendRowsRequest,
    ) -> Result<AppendRowsResponse, Error> {
        let offset = request.offset.unwrap_or_default();
        self.calls.lock().unwrap().appends.push(request);
        match self.appends.pop_front() {
            Some(reply) => reply,
            None => {
                self.acknowledged += 1;
                Ok(AppendRowsResponse::acknowledged(offset))
            }
        }
    }

    async fn finalize_write_stream(
        &mut self,
        stream_name: &str,
    ) -> Result<FinalizeWriteStreamResponse, Error> {
        self.calls
            .lock()
            .unwrap()
            .finalized
            .push(stream_name.to_string());
        self.finalizes.pop_front().unwrap_or(Ok(FinalizeWriteStreamResponse {
            row_count: self.acknowledged,
        }))
    }

    async fn batch_commit_write_streams(
        &mut self,
        table: &TableRef,
        stream_names: &[String],
    ) -> Result<BatchCommitWriteStreamsResponse, Error> {
        self.calls
            .lock()
            .unwrap()
            .commits
            .push((table.parent(), stream_names.to_vec()));
        self.commits
            .pop_front()
            .unwrap_or(Ok(BatchCommitWriteStreamsResponse {
                commit_time: Some(Timestamp {
                    seconds: COMMIT_SECONDS,
                    nanos: 0,
                }),
                stream_errors: Vec::new(),
            }))
    }
}
