use std::future::Future;

use tokio::sync::mpsc;
use tonic::client::Grpc;
use tonic::codec::Streaming;
use tonic::transport::Channel;

use crate::config::TableRef;
use crate::errors::Error;
use crate::token::Authenticator;
use crate::types::{
    AppendRowsRequest, AppendRowsResponse, BatchCommitWriteStreamsResponse,
    FinalizeWriteStreamResponse, ProtoSchema, WriteStream, WriteStreamType,
};

mod impls;

pub const USER_AGENT: &str = concat!("parkinghose/", env!("CARGO_PKG_VERSION"));

/// The BigQuery Storage Write RPCs a [`crate::WriteChannel`] drives.
pub trait WriteApi {
    fn create_write_stream(
        &mut self,
        table: &TableRef,
        stream_type: WriteStreamType,
    ) -> impl Future<Output = Result<WriteStream, Error>>;

    /// Sends one request on the append connection and waits for its response.
    fn append_rows(
        &mut self,
        request: AppendRowsRequest,
    ) -> impl Future<Output = Result<AppendRowsResponse, Error>>;

    fn finalize_write_stream(
        &mut self,
        stream_name: &str,
    ) -> impl Future<Output = Result<FinalizeWriteStreamResponse, Error>>;

    fn batch_commit_write_streams(
        &mut self,
        table: &TableRef,
        stream_names: &[String],
    ) -> impl Future<Output = Result<BatchCommitWriteStreamsResponse, Error>>;
}

/// gRPC client for `google.cloud.bigquery.storage.v1.BigQueryWrite`.
pub struct BigQueryWriteClient {
    grpc: Grpc<Channel>,
    auth: Authenticator,
    trace_id: String,
    append: Option<AppendConnection>,
    /// Last schema declared on the append path, repeated on every new connection.
    writer_schema: Option<ProtoSchema>,
}

/// One open `AppendRows` call; responses arrive in request order.
struct AppendConnection {
    requests: mpsc::Sender<AppendRowsRequest>,
    responses: Streaming<AppendRowsResponse>,
}
