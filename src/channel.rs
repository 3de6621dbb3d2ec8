use tonic::Code;
use tracing::{debug, info, warn};

use crate::{
    client::{BigQueryWriteClient, WriteApi},
    config::{TableRef, WriteMode},
    errors::{Error, code},
    record::CustomerRecord,
    types::{
        AppendRowsRequest, AppendRowsResponse, WriteStreamType, append_rows_response,
        format_timestamp,
    },
};

/// Server acknowledgment of one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    pub offset: u64,
    /// The server already held a row at this offset.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSummary {
    pub stream_name: String,
    pub row_count: u64,
    /// RFC 3339; only set for PENDING streams.
    pub commit_time: Option<String>,
}

/// One write stream plus the offset of the next row to append.
///
/// The first append on a new stream carries offset 0 and every acknowledged
/// append moves the offset forward by exactly one, so the server can drop
/// resent rows.
pub struct WriteChannel<C = BigQueryWriteClient> {
    client: C,
    table: TableRef,
    stream_name: String,
    stream_type: WriteStreamType,
    next_offset: u64,
    schema_acknowledged: bool,
    accepting: bool,
    /// Row count of a finalize that already succeeded.
    finalized_rows: Option<u64>,
    closed: Option<CloseSummary>,
}

impl<C: WriteApi> WriteChannel<C> {
    pub async fn open(mut client: C, table: TableRef, mode: WriteMode) -> Result<Self, Error> {
        let stream = client
            .create_write_stream(&table, mode.stream_type())
            .await?;
        if stream.name.is_empty() {
            return Err(Error::Protocol(
                "create_write_stream returned a stream without a name".into(),
            ));
        }
        // an unset type falls back to the requested one
        let stream_type = match stream.stream_type() {
            WriteStreamType::Unspecified => mode.stream_type(),
            other => other,
        };
        info!("Stream created with name {}", stream.name);
        Ok(Self {
            client,
            table,
            stream_name: stream.name,
            stream_type,
            next_offset: 0,
            schema_acknowledged: false,
            accepting: true,
            finalized_rows: None,
            closed: None,
        })
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Offset the next append will carry.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn is_closed(&self) -> bool {
        !self.accepting
    }

    /// Appends one serialized row and waits for the acknowledgment.
    ///
    /// The offset only advances when the server acknowledges the row, either
    /// as new or as a duplicate of what it already holds at that offset.
    pub async fn send(&mut self, row: &[u8]) -> Result<AppendAck, Error> {
        if !self.accepting {
            return Err(Error::ChannelClosed);
        }

        let offset = self.next_offset;
        let wire_offset = i64::try_from(offset)
            .map_err(|_| Error::Protocol(format!("offset {offset} exceeds int64")))?;
        // Repeat the schema until the server has accepted a row with it.
        let writer_schema = (!self.schema_acknowledged).then(CustomerRecord::writer_schema);
        let request =
            AppendRowsRequest::single_row(&self.stream_name, wire_offset, row, writer_schema);

        debug!(
            "append rows: stream='{}' offset={} bytes={}",
            self.stream_name,
            offset,
            row.len()
        );
        let duplicate = match self.client.append_rows(request).await {
            Ok(resp) => self.check_response(offset, resp)?,
            Err(Error::Status(status)) if status.code() == Code::AlreadyExists => {
                warn!(
                    "append rows duplicate: stream='{}' offset={} message='{}'",
                    self.stream_name,
                    offset,
                    status.message()
                );
                true
            }
            Err(err) => return Err(err),
        };

        self.schema_acknowledged = true;
        self.next_offset = offset + 1;
        info!(
            "append rows ok: stream='{}' offset={} duplicate={}",
            self.stream_name, offset, duplicate
        );
        Ok(AppendAck { offset, duplicate })
    }

    /// Returns whether the response acknowledges a duplicate.
    fn check_response(&self, offset: u64, resp: AppendRowsResponse) -> Result<bool, Error> {
        if !resp.row_errors.is_empty() {
            let message = resp
                .row_errors
                .iter()
                .map(|e| format!("row {}: {} {}", e.index, e.code, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Append {
                offset,
                code: code::INVALID_ARGUMENT,
                message,
            });
        }

        match resp.response {
            Some(append_rows_response::Response::Error(status))
                if status.code == code::ALREADY_EXISTS =>
            {
                warn!(
                    "append rows duplicate: stream='{}' offset={} message='{}'",
                    self.stream_name, offset, status.message
                );
                Ok(true)
            }
            Some(append_rows_response::Response::Error(status)) => Err(Error::Append {
                offset,
                code: status.code,
                message: status.message,
            }),
            Some(append_rows_response::Response::AppendResult(result)) => match result.offset {
                Some(acked) if u64::try_from(acked).ok() != Some(offset) => Err(Error::Protocol(
                    format!("server acknowledged offset {acked} for a request at offset {offset}"),
                )),
                _ => Ok(false),
            },
            None => Err(Error::Protocol(format!(
                "empty append response for offset {offset}"
            ))),
        }
    }

    /// Finalizes the stream, then commits it if it is PENDING.
    ///
    /// Calling this again after a successful close returns the first result
    /// without contacting the server. After a failed commit the next call
    /// only retries the commit.
    pub async fn close(&mut self) -> Result<CloseSummary, Error> {
        if let Some(summary) = &self.closed {
            debug!("channel already closed: stream='{}'", self.stream_name);
            return Ok(summary.clone());
        }
        self.accepting = false;

        let row_count = match self.finalized_rows {
            Some(rows) => rows,
            None => {
                let finalized = self.client.finalize_write_stream(&self.stream_name).await?;
                let rows = u64::try_from(finalized.row_count).map_err(|_| {
                    Error::Protocol(format!(
                        "finalize reported {} rows for '{}'",
                        finalized.row_count, self.stream_name
                    ))
                })?;
                self.finalized_rows = Some(rows);
                rows
            }
        };

        let commit_time = match self.stream_type {
            WriteStreamType::Pending => {
                let committed = self
                    .client
                    .batch_commit_write_streams(&self.table, &[self.stream_name.clone()])
                    .await?;
                if let Some(err) = committed.stream_errors.first() {
                    return Err(Error::Protocol(format!(
                        "commit of '{}' failed: {} {}",
                        err.entity, err.code, err.error_message
                    )));
                }
                committed.commit_time.as_ref().map(format_timestamp)
            }
            _ => None,
        };

        let summary = CloseSummary {
            stream_name: self.stream_name.clone(),
            row_count,
            commit_time,
        };
        info!("Stream closed.");
        self.closed = Some(summary.clone());
        Ok(summary)
    }
}
