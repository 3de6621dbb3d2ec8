//! The tick loop: sleep, generate one row, send it, log timing.

use std::future::Future;
use std::time::{Duration, Instant};

use jiff::Zoned;
use tracing::{error, info, warn};

use crate::{
    channel::{CloseSummary, WriteChannel},
    client::{BigQueryWriteClient, WriteApi},
    config::{Args, Credentials},
    errors::{Error, Severity},
    generator::RowGenerator,
};

/// Tick log timestamp: local time with six-digit microseconds.
pub const TICK_STAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S:%6f";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub sleep: Duration,
    pub count: Option<u64>,
    pub max_consecutive_failures: u32,
}

impl From<&Args> for RunOptions {
    fn from(args: &Args) -> Self {
        Self {
            sleep: Duration::from_millis(args.sleep),
            count: args.count,
            max_consecutive_failures: args.max_consecutive_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub stream_name: String,
    /// Rows the server acknowledged, duplicates included.
    pub sent: u64,
    pub duplicates: u64,
    pub next_offset: u64,
    pub closed: Option<CloseSummary>,
}

/// Loads credentials, opens the channel and streams until `shutdown` resolves.
///
/// Startup failures are returned before any stream exists.
pub async fn run<S>(args: &Args, shutdown: S) -> Result<RunSummary, Error>
where
    S: Future<Output = ()>,
{
    info!("Delay set to {}", args.sleep);
    info!(
        "Project is {}. Dataset is {}. Table is {}",
        args.project, args.dataset, args.table
    );

    let credentials = Credentials::load(args.credentials_source())?;
    let client = BigQueryWriteClient::new(&args.endpoint, credentials)?;
    let channel = WriteChannel::open(client, args.table_ref(), args.mode).await?;

    run_channel(channel, RowGenerator::new(), RunOptions::from(args), shutdown).await
}

/// Drives an already open channel, and closes it on every exit path.
pub async fn run_channel<C, S>(
    mut channel: WriteChannel<C>,
    mut generator: RowGenerator,
    options: RunOptions,
    shutdown: S,
) -> Result<RunSummary, Error>
where
    C: WriteApi,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let mut sent = 0u64;
    let mut duplicates = 0u64;
    let mut consecutive_failures = 0u32;
    // a row whose send failed recoverably; it is resent at the same offset
    let mut pending: Option<Vec<u8>> = None;

    let outcome: Result<(), Error> = loop {
        if let Some(limit) = options.count
            && sent >= limit
        {
            info!("sent {} row(s); stopping", sent);
            break Ok(());
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("interrupted; closing stream");
                break Ok(());
            }
            _ = tokio::time::sleep(options.sleep) => {}
        }

        let start = Instant::now();
        let row = match pending.take() {
            Some(row) => row,
            None => match generator.generate() {
                Ok(row) => row,
                Err(err) => break Err(err),
            },
        };

        match channel.send(&row).await {
            Ok(ack) => {
                consecutive_failures = 0;
                sent += 1;
                if ack.duplicate {
                    duplicates += 1;
                }
                info!(
                    "{} | Write took {}ms.",
                    tick_stamp(&Zoned::now()),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(err)
                if err.severity() == Severity::Recoverable
                    && consecutive_failures < options.max_consecutive_failures =>
            {
                consecutive_failures += 1;
                warn!(
                    "send failed ({}/{}), resending at offset {} next tick: {}",
                    consecutive_failures,
                    options.max_consecutive_failures,
                    channel.next_offset(),
                    err
                );
                pending = Some(row);
            }
            Err(err) => {
                error!(
                    "send failed at offset {}: {}",
                    channel.next_offset(),
                    err
                );
                break Err(err);
            }
        }
    };

    // Best effort: a failed close never masks the loop's own outcome.
    let closed = match channel.close().await {
        Ok(summary) => Some(summary),
        Err(err) => {
            warn!("closing stream '{}' failed: {}", channel.stream_name(), err);
            None
        }
    };

    outcome.map(|()| RunSummary {
        stream_name: channel.stream_name().to_string(),
        sent,
        duplicates,
        next_offset: channel.next_offset(),
        closed,
    })
}

fn tick_stamp(now: &Zoned) -> String {
    now.strftime(TICK_STAMP_FORMAT).to_string()
}
