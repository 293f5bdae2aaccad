use crate::context::AppContext;
use crate::router;
use crate::subsystems::keys::ResourceKey;
use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::path::Path;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tripnest_core::ipc::{TripnestRequest, TripnestResponse};

pub async fn run_unix_server(
    socket_path: &str,
    ctx: AppContext,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let ctx = ctx.clone();
                let conn_shutdown = shutdown.resubscribe();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    // 4-byte little-endian length prefix + MessagePack payload
                    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
                    let mut framed_read = FramedRead::new(read, le_codec());
                    let mut framed_write = FramedWrite::new(write, le_codec());

                    while let Some(frame) = framed_read.next().await {
                        match frame {
                            Ok(bytes_mut) => {
                                let request: TripnestRequest = match rmp_serde::from_slice(&bytes_mut) {
                                    Ok(req) => req,
                                    Err(e) => {
                                        let resp = TripnestResponse::err(format!("Deserialization error: {}", e));
                                        let _ = send_response(&mut framed_write, &resp).await;
                                        continue;
                                    }
                                };

                                if let TripnestRequest::Watch { key } = request {
                                    // A watch owns the connection until the client goes away.
                                    stream_watch(
                                        &ctx,
                                        &key,
                                        &mut framed_read,
                                        &mut framed_write,
                                        conn_shutdown.resubscribe(),
                                    )
                                    .await;
                                    break;
                                }

                                let response = router::handle_request(request, &ctx).await;
                                if let Err(e) = send_response(&mut framed_write, &response).await {
                                    tracing::error!("Failed to send response: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        }
                    }
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn send_response<S>(sink: &mut S, response: &TripnestResponse) -> anyhow::Result<()>
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = rmp_serde::to_vec_named(response)?;
    sink.send(Bytes::from(bytes)).await?;
    Ok(())
}

/// Send the current entry, then one frame per state change. A closed or
/// failed client read ends the watch so the subscription is released.
async fn stream_watch<R, S>(
    ctx: &AppContext,
    key: &str,
    reader: &mut R,
    sink: &mut S,
    mut shutdown: broadcast::Receiver<()>,
) where
    R: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let subscription = key
        .parse::<ResourceKey>()
        .and_then(|k| ctx.subscribe_checked(&k));
    let mut sub = match subscription {
        Ok(sub) => sub,
        Err(e) => {
            let _ = send_response(sink, &TripnestResponse::from_error(&e)).await;
            return;
        }
    };
    tracing::debug!(key = %sub.key(), "Watch started");

    let mut entry = sub.current();
    'watch: loop {
        let frame = match serde_json::to_value(&entry) {
            Ok(v) => TripnestResponse::ok(v),
            Err(e) => TripnestResponse::err(e.to_string()),
        };
        if send_response(sink, &frame).await.is_err() {
            break;
        }
        loop {
            tokio::select! {
                next = sub.changed() => match next {
                    Some(e) => {
                        entry = e;
                        break;
                    }
                    None => break 'watch,
                },
                incoming = reader.next() => match incoming {
                    Some(Ok(_)) => {
                        tracing::debug!(key = %sub.key(), "Ignoring frame received during watch");
                    }
                    Some(Err(e)) => {
                        tracing::debug!(key = %sub.key(), "Watch connection error: {}", e);
                        break 'watch;
                    }
                    None => break 'watch,
                },
                _ = shutdown.recv() => break 'watch,
            }
        }
    }
    tracing::debug!(key = %sub.key(), "Watch ended");
}
