//! CLI command implementations

use crate::config::default_config_path;
use crate::output::{file_name_from_url, format_bytes, print_output};
use crate::progress::DownloadProgress;
use crate::{ConfigAction, OutputFormat};
use anyhow::{anyhow, Result};
use console::style;
use resumio_core::{BlockingDownload, ReqwestTransport, ResumableStream};
use resumio_types::{ByteRange, DownloadEvent, DownloadSettings};
use serde::Serialize;
use std::fmt;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};

// ============================================================================
// Download Commands
// ============================================================================

/// Arguments of `resumio get`
pub struct GetRequest {
    pub url: String,
    pub out: Option<PathBuf>,
    pub start: u64,
    pub length: Option<u64>,
    pub blocking: bool,
}

impl GetRequest {
    fn range(&self) -> ByteRange {
        match self.length {
            Some(length) => ByteRange::segment(self.start, length),
            None => ByteRange::from_offset(self.start),
        }
    }
}

/// What a finished transfer reports
#[derive(Debug, Serialize)]
pub struct Transfer {
    pub bytes: u64,
    pub end_offset: u64,
    pub version: String,
    pub resumptions: u32,
}

impl Transfer {
    fn from_stream(bytes: u64, stream: &ResumableStream) -> Self {
        Self {
            bytes,
            end_offset: stream.offset(),
            version: stream.version().to_string(),
            resumptions: stream.attempts(),
        }
    }
}

/// Result of a finished download
#[derive(Debug, Serialize)]
pub struct GetSummary {
    pub url: String,
    pub path: PathBuf,
    #[serde(flatten)]
    pub transfer: Transfer,
}

impl fmt::Display for GetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} Saved {} to {}",
            style("✓").green().bold(),
            format_bytes(self.transfer.bytes),
            style(self.path.display()).cyan()
        )?;
        writeln!(f, "  Version: {}", self.transfer.version)?;
        write!(f, "  Resumptions: {}", self.transfer.resumptions)
    }
}

pub async fn get(request: GetRequest, settings: DownloadSettings, format: OutputFormat) -> Result<()> {
    let range = request.range();
    let path = request
        .out
        .clone()
        .unwrap_or_else(|| PathBuf::from(file_name_from_url(&request.url)));

    let label = path.display().to_string();
    let (event_tx, event_rx) = broadcast::channel(256);
    let progress = DownloadProgress::new(&label, matches!(format, OutputFormat::Json))
        .spawn(event_rx);

    let result = if request.blocking {
        get_blocking(request.url.clone(), range, settings, path.clone(), event_tx).await
    } else {
        get_async(&request.url, range, &settings, &path, event_tx).await
    };

    // The sender is gone once the download is, so this ends promptly
    let _ = progress.await;

    let summary = GetSummary {
        url: request.url,
        path,
        transfer: result?,
    };
    print_output(&summary, format)
}

async fn get_async(
    url: &str,
    range: ByteRange,
    settings: &DownloadSettings,
    path: &Path,
    event_tx: broadcast::Sender<DownloadEvent>,
) -> Result<Transfer> {
    let transport = Arc::new(ReqwestTransport::new(url, settings)?);
    let mut stream = ResumableStream::open(transport, range, settings)
        .await?
        .with_events(event_tx);

    let cancel = stream.cancel_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut file = tokio::fs::File::create(path).await?;
    let result = stream.copy_to(&mut file).await;
    ctrl_c.abort();

    Ok(Transfer::from_stream(result?, &stream))
}

async fn get_blocking(
    url: String,
    range: ByteRange,
    settings: DownloadSettings,
    path: PathBuf,
    event_tx: broadcast::Sender<DownloadEvent>,
) -> Result<Transfer> {
    let (cancel_tx, cancel_rx) = oneshot::channel();

    // The blocking download drives its own runtime, so it gets its own thread
    let worker = std::thread::spawn(move || -> Result<Transfer> {
        let transport = Arc::new(ReqwestTransport::new(&url, &settings)?);
        let mut download =
            BlockingDownload::open(transport, range, &settings)?.with_events(event_tx);
        let _ = cancel_tx.send(download.cancel_handle());

        let mut sink = BufWriter::new(std::fs::File::create(&path)?);
        let bytes = download.read(&mut sink)?;

        Ok(Transfer::from_stream(bytes, download.stream()))
    });

    let ctrl_c = cancel_rx.await.ok().map(|cancel| {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    });

    let joined = tokio::task::spawn_blocking(move || worker.join()).await?;
    if let Some(ctrl_c) = ctrl_c {
        ctrl_c.abort();
    }

    joined.map_err(|_| anyhow!("Download thread panicked"))?
}

// ============================================================================
// Config Commands
// ============================================================================

pub fn config_action(
    action: ConfigAction,
    settings: &DownloadSettings,
    format: OutputFormat,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(settings)?);
        }
        ConfigAction::Path => {
            let path = default_config_path()
                .ok_or_else(|| anyhow!("No configuration directory on this platform"))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "path": path })),
                OutputFormat::Human => println!("{}", path.display()),
            }
        }
    }
    Ok(())
}
