#![cfg(feature = "async")]

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::extract::{ExtractOptions, StreamKind};
use crate::filters::ReasonCounter;
use crate::framemeta::FrameMeta;
use crate::gpmf::Gpmd;
use crate::Error;

/// Item type of the extraction streams.
pub type StoreResult = Result<(StreamKind, FrameMeta), Error>;

/// Create a Tokio `Stream` of per-kind stores from a raw metadata buffer.
///
/// The buffer is decoded once on a blocking thread. Each requested pass
/// (GPS, then whatever `options.flags` enables) then runs on its own
/// `spawn_blocking` worker and sends its store over a bounded channel as soon
/// as it finishes, so stores arrive in completion order. A decode error is
/// sent once and ends the stream.
///
/// GPS rejection reasons are tallied in `rejections`.
pub fn stores_from_bytes(
    data: Vec<u8>,
    options: ExtractOptions,
    rejections: ReasonCounter,
    buffer: usize,
) -> ReceiverStream<StoreResult> {
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let gpmd = match Gpmd::parse(&data) {
            Ok(g) => Arc::new(g),
            Err(err) => {
                let _ = tx.blocking_send(Err(err));
                return;
            }
        };

        for kind in StreamKind::requested(options.flags) {
            let gpmd = Arc::clone(&gpmd);
            let options = options.clone();
            let rejections = rejections.clone();
            let tx = tx.clone();
            tokio::task::spawn_blocking(move || {
                let item = kind.load(&gpmd, &options, &rejections).map(|store| (kind, store));
                let _ = tx.blocking_send(item);
            });
        }
    });

    ReceiverStream::new(rx)
}

/// Like [`stores_from_bytes`], reading the buffer from a file first.
pub fn stores_from_path(
    path: impl Into<PathBuf>,
    options: ExtractOptions,
    rejections: ReasonCounter,
    buffer: usize,
) -> ReceiverStream<StoreResult> {
    let path = path.into();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    tokio::task::spawn_blocking(move || {
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(err) => {
                let _ = tx.blocking_send(Err(err.into()));
                return;
            }
        };

        let mut inner = stores_from_bytes(data, options, rejections, 1).into_inner();
        while let Some(item) = inner.blocking_recv() {
            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    ReceiverStream::new(rx)
}
