//! Messages of the `google.cloud.bigquery.storage.v1.BigQueryWrite` service.
//!
//! Field numbers follow `storage.proto`, `stream.proto` and `protobuf.proto`.
//! Only the fields this crate sets or reads are declared; prost skips the
//! rest when decoding.

use prost_types::{DescriptorProto, Timestamp};

/// `WriteStream.Type`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WriteStreamType {
    Unspecified = 0,
    /// Rows are readable as soon as they are acknowledged.
    Committed = 1,
    /// Rows become readable when the finalized stream is batch-committed.
    Pending = 2,
    Buffered = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WriteStream {
    /// `projects/{p}/datasets/{d}/tables/{t}/streams/{id}`
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(enumeration = "WriteStreamType", tag = "2")]
    pub stream_type: i32,
    #[prost(message, optional, tag = "3")]
    pub create_time: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub commit_time: Option<Timestamp>,
    #[prost(string, tag = "8")]
    pub location: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct CreateWriteStreamRequest {
    #[prost(string, tag = "1")]
    pub parent: String,
    #[prost(message, optional, tag = "2")]
    pub write_stream: Option<WriteStream>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoSchema {
    #[prost(message, optional, tag = "1")]
    pub proto_descriptor: Option<DescriptorProto>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoRows {
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub serialized_rows: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoData {
    #[prost(message, optional, tag = "1")]
    pub writer_schema: Option<ProtoSchema>,
    #[prost(message, optional, tag = "2")]
    pub rows: Option<ProtoRows>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AppendRowsRequest {
    #[prost(string, tag = "1")]
    pub write_stream: String,
    /// `google.protobuf.Int64Value`
    #[prost(message, optional, tag = "2")]
    pub offset: Option<i64>,
    #[prost(oneof = "append_rows_request::Rows", tags = "4")]
    pub rows: Option<append_rows_request::Rows>,
    #[prost(string, tag = "6")]
    pub trace_id: String,
}

pub mod append_rows_request {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Rows {
        #[prost(message, tag = "4")]
        ProtoRows(super::ProtoData),
    }
}

impl AppendRowsRequest {
    /// One serialized row at `offset`, optionally declaring the writer schema.
    pub fn single_row(
        write_stream: &str,
        offset: i64,
        row: &[u8],
        writer_schema: Option<ProtoSchema>,
    ) -> Self {
        Self {
            write_stream: write_stream.to_string(),
            offset: Some(offset),
            rows: Some(append_rows_request::Rows::ProtoRows(ProtoData {
                writer_schema,
                rows: Some(ProtoRows {
                    serialized_rows: vec![row.to_vec()],
                }),
            })),
            trace_id: String::new(),
        }
    }

    pub fn writer_schema(&self) -> Option<&ProtoSchema> {
        match &self.rows {
            Some(append_rows_request::Rows::ProtoRows(data)) => data.writer_schema.as_ref(),
            None => None,
        }
    }

    pub fn set_writer_schema(&mut self, schema: ProtoSchema) {
        if let Some(append_rows_request::Rows::ProtoRows(data)) = &mut self.rows {
            data.writer_schema = Some(schema);
        }
    }

    pub fn serialized_rows(&self) -> &[Vec<u8>] {
        match &self.rows {
            Some(append_rows_request::Rows::ProtoRows(ProtoData {
                rows: Some(rows), ..
            })) => &rows.serialized_rows,
            _ => &[],
        }
    }
}

/// `google.rpc.Status`
#[derive(Clone, PartialEq, prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct RowError {
    #[prost(int64, tag = "1")]
    pub index: i64,
    /// `RowError.RowErrorCode`; 1 is `FIELDS_ERROR`.
    #[prost(int32, tag = "2")]
    pub code: i32,
    #[prost(string, tag = "3")]
    pub message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct AppendRowsResponse {
    #[prost(oneof = "append_rows_response::Response", tags = "1, 2")]
    pub response: Option<append_rows_response::Response>,
    #[prost(message, repeated, tag = "4")]
    pub row_errors: Vec<RowError>,
    #[prost(string, tag = "5")]
    pub write_stream: String,
}

pub mod append_rows_response {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct AppendResult {
        /// `google.protobuf.Int64Value`
        #[prost(message, optional, tag = "1")]
        pub offset: Option<i64>,
    }

    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        AppendResult(AppendResult),
        #[prost(message, tag = "2")]
        Error(super::RpcStatus),
    }
}

impl AppendRowsResponse {
    pub fn acknowledged(offset: i64) -> Self {
        Self {
            response: Some(append_rows_response::Response::AppendResult(
                append_rows_response::AppendResult {
                    offset: Some(offset),
                },
            )),
            ..Default::default()
        }
    }

    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self {
            response: Some(append_rows_response::Response::Error(RpcStatus {
                code,
                message: message.into(),
            })),
            ..Default::default()
        }
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FinalizeWriteStreamRequest {
    #[prost(string, tag = "1")]
    pub name: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct FinalizeWriteStreamResponse {
    #[prost(int64, tag = "1")]
    pub row_count: i64,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchCommitWriteStreamsRequest {
    #[prost(string, tag = "1")]
    pub parent: String,
    #[prost(string, repeated, tag = "2")]
    pub write_streams: Vec<String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct StorageError {
    /// `StorageError.StorageErrorCode`
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub entity: String,
    #[prost(string, tag = "3")]
    pub error_message: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BatchCommitWriteStreamsResponse {
    #[prost(message, optional, tag = "1")]
    pub commit_time: Option<Timestamp>,
    #[prost(message, repeated, tag = "2")]
    pub stream_errors: Vec<StorageError>,
}

/// RFC 3339 rendering of a protobuf timestamp.
pub fn format_timestamp(ts: &Timestamp) -> String {
    match jiff::Timestamp::new(ts.seconds, ts.nanos) {
        Ok(t) => t.to_string(),
        Err(_) => format!("{}s", ts.seconds),
    }
}
