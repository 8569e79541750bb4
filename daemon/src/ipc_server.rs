use crate::service::ServiceRequest;
use anyhow::Result;
use common::{Command, Response, ServiceError};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};

/// Accept connections on the already bound `listener` until `shutdown`.
pub async fn start(
    listener: std::os::unix::net::UnixListener,
    socket_path: PathBuf,
    service_tx: mpsc::UnboundedSender<ServiceRequest>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    listener.set_nonblocking(true)?;
    let listener = UnixListener::from_std(listener)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if shutdown.load(Ordering::SeqCst) || service_tx.is_closed() {
            break;
        }

        // Accept with a timeout so the exit flag is noticed
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let tx = service_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, tx).await {
                        log::debug!("Client connection ended: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => continue,
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

/// Answer each command line with one response line, in order.
async fn handle_client(
    stream: UnixStream,
    service_tx: mpsc::UnboundedSender<ServiceRequest>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let response = match serde_json::from_str::<Command>(line.trim()) {
            Ok(command) => handle_command(command, &service_tx).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(ServiceError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        // Fire-and-forget clients may be gone already
        let response_json = serde_json::to_string(&response)?;
        if writer.write_all(response_json.as_bytes()).await.is_err()
            || writer.write_all(b"\n").await.is_err()
            || writer.flush().await.is_err()
        {
            break;
        }

        line.clear();
    }

    Ok(())
}

async fn handle_command(
    command: Command,
    service_tx: &mpsc::UnboundedSender<ServiceRequest>,
) -> Response {
    log::debug!("Handling command: {:?}", command);

    let (reply_tx, reply_rx) = oneshot::channel();
    let request = ServiceRequest {
        command,
        reply: Some(reply_tx),
    };
    if service_tx.send(request).is_err() {
        return Response::Error(ServiceError::Unavailable(
            "service is shutting down".to_string(),
        ));
    }

    reply_rx.await.unwrap_or_else(|_| {
        Response::Error(ServiceError::Unavailable(
            "service stopped before replying".to_string(),
        ))
    })
}
