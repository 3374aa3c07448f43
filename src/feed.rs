use anyhow::{Context, Result};
use bytes::Bytes;
use log::{debug, error};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::source::Source;

/// Read size used when pumping from a reader.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Work for a spawned source task.
#[derive(Debug, Clone)]
pub enum FeedItem {
    Audio(Bytes),
    Metadata {
        song: String,
        artist: String,
        album: String,
    },
}

impl From<Bytes> for FeedItem {
    fn from(audio: Bytes) -> Self {
        FeedItem::Audio(audio)
    }
}

/// Copy `reader` into a connected `source` until end of input or until the
/// source stops. Returns the number of bytes handed to the source.
pub async fn pump<R, S>(reader: &mut R, source: &mut S) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    S: Source + ?Sized,
{
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    let mut total = 0u64;

    while source.is_started() {
        let n = reader
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read audio input after {total} bytes"))?;
        if n == 0 {
            debug!("Input exhausted after {} bytes", total);
            break;
        }
        source.write(&buf[..n]).await;
        total += n as u64;
    }

    Ok(total)
}

/// Move a connected source into its own task and feed it through a channel.
///
/// The task is the single writer for the source. It stops when the sender
/// is dropped or the source loses its connection, disconnects if still
/// started, and hands the source back through the join handle.
pub fn spawn<S>(mut source: S, capacity: usize) -> (mpsc::Sender<FeedItem>, JoinHandle<S>)
where
    S: Source + 'static,
{
    let (input_tx, mut input_rx) = mpsc::channel::<FeedItem>(capacity.max(1));

    let handle = tokio::spawn(async move {
        debug!("Source feed started");

        while let Some(item) = input_rx.recv().await {
            if !source.is_started() {
                error!("Source is no longer connected; stopping feed");
                break;
            }
            match item {
                FeedItem::Audio(chunk) => source.write(&chunk).await,
                FeedItem::Metadata {
                    song,
                    artist,
                    album,
                } => source.update_metadata(&song, &artist, &album).await,
            }
        }

        if source.is_started() {
            source.disconnect().await;
        }
        debug!("Source feed ended");
        source
    });

    (input_tx, handle)
}
