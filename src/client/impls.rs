use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::{ClientTlsConfig, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    client::{AppendConnection, BigQueryWriteClient, USER_AGENT, WriteApi},
    config::{Credentials, TableRef},
    errors::Error,
    token::Authenticator,
    types::{
        AppendRowsRequest, AppendRowsResponse, BatchCommitWriteStreamsRequest,
        BatchCommitWriteStreamsResponse, CreateWriteStreamRequest, FinalizeWriteStreamRequest,
        FinalizeWriteStreamResponse, WriteStream, WriteStreamType,
    },
};

const CREATE_WRITE_STREAM: &str =
    "/google.cloud.bigquery.storage.v1.BigQueryWrite/CreateWriteStream";
const APPEND_ROWS: &str = "/google.cloud.bigquery.storage.v1.BigQueryWrite/AppendRows";
const FINALIZE_WRITE_STREAM: &str =
    "/google.cloud.bigquery.storage.v1.BigQueryWrite/FinalizeWriteStream";
const BATCH_COMMIT_WRITE_STREAMS: &str =
    "/google.cloud.bigquery.storage.v1.BigQueryWrite/BatchCommitWriteStreams";

/// Routing header the Google front end uses to pick the backend.
const REQUEST_PARAMS: &str = "x-goog-request-params";

/// Requests buffered ahead of the server on the append connection.
const APPEND_QUEUE: usize = 4;

impl BigQueryWriteClient {
    /// Create a new BigQueryWriteClient
    /// # Arguments
    /// * `endpoint` - Storage Write API host; a bare host gets `https://`
    /// * `credentials` - Service account key or pre-issued access token
    ///
    /// The connection is made lazily on the first call, so this must run
    /// inside a tokio runtime but does not touch the network.
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self, Error> {
        let endpoint = normalize_endpoint(endpoint);
        let mut channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| Error::Config(format!("Invalid endpoint URL '{}': {}", endpoint, e)))?
            .user_agent(USER_AGENT)?;
        if endpoint.starts_with("https://") {
            channel = channel.tls_config(ClientTlsConfig::new().with_webpki_roots())?;
        }
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            grpc: Grpc::new(channel.connect_lazy()),
            auth: Authenticator::new(http, credentials),
            trace_id: format!("parkinghose:{}", Uuid::new_v4()),
            append: None,
            writer_schema: None,
        })
    }

    /// Wraps `message` with the bearer token and routing header.
    async fn authorized<T>(&mut self, message: T, routing: &str) -> Result<Request<T>, Error> {
        let token = self.auth.bearer().await?;
        let mut request = Request::new(message);
        let metadata = request.metadata_mut();
        metadata.insert("authorization", ascii(&format!("Bearer {token}"), "bearer token")?);
        metadata.insert(REQUEST_PARAMS, ascii(routing, "routing header")?);
        Ok(request)
    }

    /// One unary call; an `UNAUTHENTICATED` reply refreshes the token and
    /// resends once.
    async fn unary<Req, Resp>(
        &mut self,
        operation: &str,
        method: &'static str,
        routing: String,
        message: Req,
    ) -> Result<Resp, Error>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut reauthenticated = false;
        loop {
            let request = self.authorized(message.clone(), &routing).await?;
            self.grpc.ready().await?;
            let result = self
                .grpc
                .unary(
                    request,
                    PathAndQuery::from_static(method),
                    ProstCodec::<Req, Resp>::default(),
                )
                .await;
            match result {
                Ok(response) => return Ok(response.into_inner()),
                Err(status) if status.code() == Code::Unauthenticated => {
                    self.auth
                        .on_unauthenticated(operation, status.message(), reauthenticated)
                        .await?;
                    reauthenticated = true;
                }
                Err(status) => {
                    error!(
                        "{} failed: code={:?} message='{}'",
                        operation,
                        status.code(),
                        status.message()
                    );
                    return Err(Error::Status(status));
                }
            }
        }
    }

    /// First request of a new append connection: it carries the trace id and,
    /// once any schema has been declared, the writer schema.
    fn opening_request(&self, request: &AppendRowsRequest) -> AppendRowsRequest {
        let mut first = request.clone();
        first.trace_id = self.trace_id.clone();
        if first.writer_schema().is_none()
            && let Some(schema) = &self.writer_schema
        {
            first.set_writer_schema(schema.clone());
        }
        first
    }

    async fn open_append(&mut self, request: &AppendRowsRequest) -> Result<(), Error> {
        let first = self.opening_request(request);
        let routing = format!(
            "write_stream={}",
            urlencoding::encode(&request.write_stream)
        );
        let (requests, queued) = mpsc::channel(APPEND_QUEUE);
        requests
            .send(first)
            .await
            .map_err(|_| Error::Protocol("append queue closed before opening".into()))?;

        let call = self.authorized(ReceiverStream::new(queued), &routing).await?;
        self.grpc.ready().await?;
        let responses = self
            .grpc
            .streaming(
                call,
                PathAndQuery::from_static(APPEND_ROWS),
                ProstCodec::<AppendRowsRequest, AppendRowsResponse>::default(),
            )
            .await?
            .into_inner();
        debug!("append connection opened: stream='{}'", request.write_stream);
        self.append = Some(AppendConnection {
            requests,
            responses,
        });
        Ok(())
    }

    async fn append_once(
        &mut self,
        request: &AppendRowsRequest,
    ) -> Result<AppendRowsResponse, Error> {
        match self.append.as_mut() {
            Some(conn) => conn
                .requests
                .send(request.clone())
                .await
                .map_err(|_| Status::unavailable("append connection closed"))?,
            None => self.open_append(request).await?,
        }
        let conn = self
            .append
            .as_mut()
            .ok_or_else(|| Error::Protocol("append connection missing".into()))?;
        match conn.responses.message().await? {
            Some(response) => Ok(response),
            None => Err(Status::unavailable("append connection ended by server").into()),
        }
    }
}

impl WriteApi for BigQueryWriteClient {
    async fn create_write_stream(
        &mut self,
        table: &TableRef,
        stream_type: WriteStreamType,
    ) -> Result<WriteStream, Error> {
        let parent = table.parent();
        let mut write_stream = WriteStream::default();
        write_stream.set_stream_type(stream_type);
        let request = CreateWriteStreamRequest {
            parent: parent.clone(),
            write_stream: Some(write_stream),
        };
        let stream: WriteStream = self
            .unary(
                "create_write_stream",
                CREATE_WRITE_STREAM,
                format!("parent={}", urlencoding::encode(&parent)),
                request,
            )
            .await?;
        info!(
            "write stream created: name='{}' type={:?}",
            stream.name,
            stream.stream_type()
        );
        Ok(stream)
    }

    async fn append_rows(
        &mut self,
        request: AppendRowsRequest,
    ) -> Result<AppendRowsResponse, Error> {
        if let Some(schema) = request.writer_schema() {
            self.writer_schema = Some(schema.clone());
        }
        let mut reauthenticated = false;
        loop {
            match self.append_once(&request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    // a failed call is finished; the next append opens a new one
                    self.append = None;
                    match err {
                        Error::Status(status) if status.code() == Code::Unauthenticated => {
                            self.auth
                                .on_unauthenticated(
                                    "append_rows",
                                    status.message(),
                                    reauthenticated,
                                )
                                .await?;
                            reauthenticated = true;
                        }
                        err => {
                            warn!("append rows failed: stream='{}': {}", request.write_stream, err);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    async fn finalize_write_stream(
        &mut self,
        stream_name: &str,
    ) -> Result<FinalizeWriteStreamResponse, Error> {
        // half-close the append call before finalizing
        self.append = None;
        let finalized: FinalizeWriteStreamResponse = self
            .unary(
                "finalize_write_stream",
                FINALIZE_WRITE_STREAM,
                format!("name={}", urlencoding::encode(stream_name)),
                FinalizeWriteStreamRequest {
                    name: stream_name.to_string(),
                },
            )
            .await?;
        info!(
            "write stream finalized: name='{}' rows={}",
            stream_name, finalized.row_count
        );
        Ok(finalized)
    }

    async fn batch_commit_write_streams(
        &mut self,
        table: &TableRef,
        stream_names: &[String],
    ) -> Result<BatchCommitWriteStreamsResponse, Error> {
        let parent = table.parent();
        let committed: BatchCommitWriteStreamsResponse = self
            .unary(
                "batch_commit_write_streams",
                BATCH_COMMIT_WRITE_STREAMS,
                format!("parent={}", urlencoding::encode(&parent)),
                BatchCommitWriteStreamsRequest {
                    parent: parent.clone(),
                    write_streams: stream_names.to_vec(),
                },
            )
            .await?;
        if committed.stream_errors.is_empty() {
            info!("write streams committed: table='{}'", parent);
        } else {
            warn!(
                "batch commit reported {} stream error(s) for '{}'",
                committed.stream_errors.len(),
                parent
            );
        }
        Ok(committed)
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

fn ascii(value: &str, what: &str) -> Result<MetadataValue<Ascii>, Error> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{what} is not valid request metadata")))
}
