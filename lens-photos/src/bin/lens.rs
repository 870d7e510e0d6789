//! lens CLI
//!
//! Upload photos and read them back through the same context the worker
//! uses. Storage and queue backends come from `LENS__*` configuration.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures_util::{stream, StreamExt};
use lens_blob::ByteStream;
use lens_core::LensError;
use lens_photos::config::QueueBackendKind;
use lens_photos::photos::stored_filename;
use lens_photos::prelude::*;
use lens_photos::telemetry::init_tracing;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info};

const READ_BUFFER: usize = 64 * 1024;

/// lens: photo storage and thumbnails
#[derive(Parser, Debug)]
#[command(name = "lens", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store a photo and schedule its thumbnail.
    Upload {
        /// Image file to upload.
        path: PathBuf,
        /// Owning business id (24 hex digits).
        #[arg(long, env = "LENS_OWNER_ID")]
        owner: String,
        #[arg(long)]
        caption: Option<String>,
        /// Overrides the type guessed from the file extension.
        #[arg(long)]
        mimetype: Option<String>,
    },
    /// Print a photo's metadata.
    Info { id: String },
    /// Write an original's bytes to a file, or stdout.
    Fetch {
        id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write a photo's thumbnail to a file, or stdout.
    Thumb {
        id: String,
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// List an owner's photos.
    Owner { owner_id: String },
    /// Generate thumbnails for every pending message, then exit.
    Drain,
    /// List dead-lettered messages.
    DeadLetters,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = PhotosConfig::load()?;
    let ctx = AppContext::build(config).await?;
    let result = run(&ctx, cli.command).await;
    ctx.shutdown(Vec::new()).await;
    result
}

async fn run(ctx: &AppContext, command: Command) -> anyhow::Result<()> {
    let photos = ctx.photos();
    match command {
        Command::Upload {
            path,
            owner,
            caption,
            mimetype,
        } => {
            let mimetype = match mimetype.or_else(|| guess_mimetype(&path)) {
                Some(m) => m,
                None => anyhow::bail!("cannot tell the type of {}; pass --mimetype", path.display()),
            };
            let filename = stored_filename(&mimetype).unwrap_or_else(|| display_name(&path));
            let mut fields = UploadFields::new(owner, mimetype, filename);
            if let Some(caption) = caption {
                fields = fields.with_caption(caption);
            }

            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?;
            let response = photos
                .ingest(PhotoUpload::new(fields, file_stream(file)))
                .await
                .map_err(client_error)?;
            print_json(&response)?;

            // a process-local queue dies with this process
            if ctx.config.queue.backend == QueueBackendKind::Memory {
                drain(ctx).await?;
            }
            Ok(())
        }
        Command::Info { id } => {
            let info = photos.photo_info(&id).await.map_err(client_error)?;
            print_json(&info)
        }
        Command::Fetch { id, output } => {
            let media = photos.open_original(&id).await.map_err(client_error)?;
            write_media(media, output.as_deref()).await
        }
        Command::Thumb { id, output } => {
            let media = photos.open_thumbnail(&id).await.map_err(client_error)?;
            write_media(media, output.as_deref()).await
        }
        Command::Owner { owner_id } => {
            let list = photos.photos_by_owner(&owner_id).await.map_err(client_error)?;
            print_json(&list)
        }
        Command::Drain => drain(ctx).await,
        Command::DeadLetters => {
            let dead = ctx.queue.dead_letters(&ctx.config.queue.name).await?;
            let rows: Vec<_> = dead
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "messageId": r.id.to_string(),
                        "payload": String::from_utf8_lossy(&r.payload),
                        "attempts": r.attempts,
                        "lastError": r.last_error,
                    })
                })
                .collect();
            print_json(&rows)
        }
    }
}

async fn drain(ctx: &AppContext) -> anyhow::Result<()> {
    let worker = ctx.thumbnail_worker();
    let report = ctx.queue.drain(&ctx.config.queue.name, &worker).await?;
    info!(
        acked = report.acked,
        retried = report.retried,
        dead_lettered = report.dead_lettered,
        "Queue drained"
    );
    Ok(())
}

fn client_error(err: PipelineError) -> anyhow::Error {
    error!(error = %err, "Request failed");
    let client: LensError = err.to_client_error().sanitize_for_client();
    match serde_json::to_string_pretty(&client.to_json()) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{client}"),
    }
    client.into_anyhow()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn write_media(mut media: MediaStream, output: Option<&Path>) -> anyhow::Result<()> {
    let mut sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let mut written = 0u64;
    while let Some(chunk) = media.stream.next().await {
        let chunk = chunk?;
        sink.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    sink.flush().await?;
    info!(bytes = written, content_type = %media.content_type, "Media written");
    Ok(())
}

fn file_stream(file: tokio::fs::File) -> ByteStream {
    Box::pin(stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = vec![0u8; READ_BUFFER];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(file)))
            }
            Err(e) => Some((Err(e), None)),
        }
    }))
}

fn guess_mimetype(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg".to_string()),
        "png" => Some("image/png".to_string()),
        _ => None,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
