use crate::{router, AppContext};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use sightline_core::ipc::{SightlineRequest, SightlineResponse};
use std::path::Path;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

/// Serves length-prefixed MessagePack requests on a Unix socket until shutdown.
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
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    // 4-byte little-endian length prefix, MessagePack body
                    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
                    let mut framed_read = FramedRead::new(read, le_codec());
                    let mut framed_write = FramedWrite::new(write, le_codec());

                    while let Some(frame) = framed_read.next().await {
                        let bytes_mut = match frame {
                            Ok(b) => b,
                            Err(e) => {
                                tracing::error!("Frame error: {}", e);
                                break;
                            }
                        };

                        let response = match rmp_serde::from_slice::<SightlineRequest>(&bytes_mut) {
                            Ok(request) => router::handle_request(request, &ctx).await,
                            Err(e) => SightlineResponse::err_with_code(
                                "bad_request",
                                format!("Deserialization error: {}", e),
                            ),
                        };

                        match rmp_serde::to_vec_named(&response) {
                            Ok(resp_bytes) => {
                                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                                    tracing::error!("Failed to send response: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to serialize response: {}", e);
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

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::{MemoryStore, ProviderRegistry, SightlineConfig, SystemClock};
    use std::sync::Arc;
    use tokio::net::UnixStream;

    #[tokio::test]
    async fn test_ping_over_socket() {
        let socket = std::env::temp_dir().join(format!("sightline-test-{}.sock", uuid::Uuid::new_v4()));
        let socket_path = socket.to_string_lossy().to_string();
        let ctx = AppContext::new(
            Arc::new(MemoryStore::new()),
            ProviderRegistry::new(),
            Arc::new(SystemClock),
            SightlineConfig::in_memory(),
        );
        let (tx, _rx) = broadcast::channel(1);
        let server = tokio::spawn({
            let path = socket_path.clone();
            let shutdown = tx.subscribe();
            async move { run_unix_server(&path, ctx, shutdown).await }
        });

        let mut stream = None;
        for _ in 0..50 {
            if let Ok(s) = UnixStream::connect(&socket_path).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let (read, write) = stream.expect("server should accept connections").into_split();
        let codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
        let mut reader = FramedRead::new(read, codec());
        let mut writer = FramedWrite::new(write, codec());

        let req = rmp_serde::to_vec_named(&SightlineRequest::Ping).unwrap();
        writer.send(Bytes::from(req)).await.unwrap();
        let frame = reader.next().await.unwrap().unwrap();
        let resp: SightlineResponse = rmp_serde::from_slice(&frame).unwrap();
        assert!(resp.is_ok());

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!socket.exists());
    }
}
