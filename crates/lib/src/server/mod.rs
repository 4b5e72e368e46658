//! Long-lived store server.
//!
//! The server owns one [`StoreController`] (and with it the store lock) and
//! serves newline-delimited JSON requests over TCP. Connections are handled
//! concurrently, but every request runs under the same mutex, so store
//! mutations happen one at a time in arrival order.

mod protocol;

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::InstallationContext;
use crate::controller::{StoreController, StoreError};

pub use protocol::{ErrorKind, ErrorResponse, Request, Response};

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);
/// Longest request line a client may send.
const MAX_REQUEST_BYTES: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("failed to bind store server to {addr}: {source}")]
  Bind {
    addr: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to connect to store server at {addr}: {source}")]
  Connect {
    addr: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("store server connection failed: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed store server message: {0}")]
  Protocol(#[from] serde_json::Error),

  #[error("store server closed the connection")]
  Disconnected,
}

/// Serves one store until shut down.
pub struct StoreServer {
  listener: TcpListener,
  controller: Arc<Mutex<StoreController>>,
  shutdown: Arc<watch::Sender<bool>>,
}

/// Requests a graceful stop of a running server from outside the protocol.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
  pub fn shutdown(&self) {
    self.0.send_replace(true);
  }
}

impl StoreServer {
  pub async fn bind(controller: StoreController, addr: SocketAddr) -> Result<Self, ServerError> {
    let listener = TcpListener::bind(addr)
      .await
      .map_err(|source| ServerError::Bind { addr, source })?;
    let (shutdown, _) = watch::channel(false);
    Ok(Self {
      listener,
      controller: Arc::new(Mutex::new(controller)),
      shutdown: Arc::new(shutdown),
    })
  }

  pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
    Ok(self.listener.local_addr()?)
  }

  pub fn shutdown_handle(&self) -> ShutdownHandle {
    ShutdownHandle(self.shutdown.clone())
  }

  /// Serves until Ctrl-C, SIGTERM or a `shutdown` request.
  pub async fn run(self) -> Result<(), ServerError> {
    self.run_until(os_signal()).await
  }

  /// Serves until `signal` resolves or a `shutdown` request arrives.
  ///
  /// Requests already running finish and get their response; idle
  /// connections are closed. Returns once every connection task is done, at
  /// which point the controller and the store lock are released.
  pub async fn run_until(self, signal: impl Future<Output = ()>) -> Result<(), ServerError> {
    let StoreServer {
      listener,
      controller,
      shutdown,
    } = self;

    let addr = listener.local_addr()?;
    info!(%addr, "store server listening");

    let mut stop = shutdown.subscribe();
    let mut connections = JoinSet::new();
    tokio::pin!(signal);

    loop {
      if *stop.borrow_and_update() {
        info!("shutdown requested");
        break;
      }

      tokio::select! {
        () = &mut signal => {
          info!("shutdown signal received");
          break;
        }
        _ = stop.changed() => continue,
        accepted = listener.accept() => match accepted {
          Ok((stream, peer)) => {
            debug!(%peer, "connection accepted");
            connections.spawn(serve_connection(stream, peer, controller.clone(), shutdown.clone()));
          }
          Err(e) => warn!(error = %e, "failed to accept connection"),
        },
        Some(joined) = connections.join_next(), if !connections.is_empty() => {
          log_connection_end(joined);
        }
      }
    }

    shutdown.send_replace(true);
    drop(listener);

    let remaining = connections.len();
    if remaining > 0 {
      debug!(connections = remaining, "waiting for connections to finish");
    }
    while let Some(joined) = connections.join_next().await {
      log_connection_end(joined);
    }

    info!("store server stopped");
    Ok(())
  }
}

fn log_connection_end(joined: Result<Result<(), ServerError>, tokio::task::JoinError>) {
  match joined {
    Ok(Ok(())) => {}
    Ok(Err(e)) => debug!(error = %e, "connection ended with error"),
    Err(e) => warn!(error = %e, "connection task failed"),
  }
}

async fn os_signal() {
  #[cfg(unix)]
  {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
      Ok(mut sigterm) => {
        tokio::select! {
          _ = tokio::signal::ctrl_c() => {}
          _ = sigterm.recv() => {}
        }
      }
      Err(e) => {
        warn!(error = %e, "failed to install SIGTERM handler");
        let _ = tokio::signal::ctrl_c().await;
      }
    }
  }

  #[cfg(not(unix))]
  {
    let _ = tokio::signal::ctrl_c().await;
  }
}

async fn serve_connection(
  stream: TcpStream,
  peer: SocketAddr,
  controller: Arc<Mutex<StoreController>>,
  shutdown: Arc<watch::Sender<bool>>,
) -> Result<(), ServerError> {
  let (reader, mut writer) = stream.into_split();
  let mut reader = BufReader::new(reader);
  let mut stop = shutdown.subscribe();

  loop {
    if *stop.borrow_and_update() {
      break;
    }

    // Only the wait for the next request is interruptible.
    let incoming = tokio::select! {
      incoming = next_request(&mut reader) => incoming?,
      _ = stop.changed() => continue,
    };
    let line = match incoming {
      Incoming::Line(line) => line,
      Incoming::Closed => break,
      Incoming::TooLong => {
        warn!(%peer, limit = MAX_REQUEST_BYTES, "request too long, closing connection");
        let response = Response::Error(ErrorResponse::bad_request(format!(
          "request exceeds {MAX_REQUEST_BYTES} bytes"
        )));
        write_message(&mut writer, &response).await?;
        break;
      }
    };
    if line.trim().is_empty() {
      continue;
    }

    let response = match serde_json::from_str::<Request>(&line) {
      Ok(Request::Shutdown) => {
        info!(%peer, "shutdown requested by client");
        shutdown.send_replace(true);
        Response::ShuttingDown
      }
      Ok(request) => dispatch(&controller, request).await,
      Err(e) => {
        debug!(%peer, error = %e, "bad request");
        Response::Error(ErrorResponse::bad_request(format!("invalid request: {e}")))
      }
    };

    write_message(&mut writer, &response).await?;
  }

  debug!(%peer, "connection closed");
  Ok(())
}

enum Incoming {
  Line(String),
  TooLong,
  Closed,
}

/// Reads the next request line, reading at most one byte past the limit.
async fn next_request(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Incoming> {
  let mut buf = Vec::new();
  let read = (&mut *reader)
    .take(MAX_REQUEST_BYTES + 1)
    .read_until(b'\n', &mut buf)
    .await?;
  if read == 0 {
    return Ok(Incoming::Closed);
  }
  if buf.last() != Some(&b'\n') && read as u64 > MAX_REQUEST_BYTES {
    return Ok(Incoming::TooLong);
  }
  Ok(Incoming::Line(String::from_utf8_lossy(&buf).into_owned()))
}

async fn dispatch(controller: &Mutex<StoreController>, request: Request) -> Response {
  let mut controller = controller.lock().await;
  handle(&mut controller, request).await
}

/// Runs one request against a controller and turns the outcome into a
/// response. Failures become [`Response::Error`].
pub async fn handle(controller: &mut StoreController, request: Request) -> Response {
  let result: Result<Response, StoreError> = match request {
    Request::Install { project, request } => match load_context(&project) {
      Ok(mut ctx) => controller.install(request, &mut ctx).await.map(Response::Installed),
      Err(e) => Err(e),
    },
    Request::Uninstall { project, names, save } => match load_context(&project) {
      Ok(mut ctx) => controller
        .uninstall(&names, &mut ctx, save)
        .await
        .map(Response::Uninstalled),
      Err(e) => Err(e),
    },
    Request::Status => Ok(Response::Status(controller.status())),
    Request::Prune { dry_run } => controller.prune(dry_run).await.map(Response::Pruned),
    Request::Shutdown => Ok(Response::ShuttingDown),
  };

  result.unwrap_or_else(|e| {
    warn!(error = %e, "request failed");
    Response::from(e)
  })
}

fn load_context(project: &Path) -> Result<InstallationContext, StoreError> {
  Ok(InstallationContext::load(project)?)
}

async fn write_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, message: &T) -> Result<(), ServerError> {
  let mut line = serde_json::to_vec(message)?;
  line.push(b'\n');
  writer.write_all(&line).await?;
  writer.flush().await?;
  Ok(())
}

/// A connection to a running store server.
pub struct StoreClient {
  lines: Lines<BufReader<OwnedReadHalf>>,
  writer: OwnedWriteHalf,
}

impl StoreClient {
  pub async fn connect(addr: SocketAddr) -> Result<Self, ServerError> {
    let stream = TcpStream::connect(addr)
      .await
      .map_err(|source| ServerError::Connect { addr, source })?;
    let (reader, writer) = stream.into_split();
    Ok(Self {
      lines: BufReader::new(reader).lines(),
      writer,
    })
  }

  /// Sends one request and waits for its response.
  pub async fn request(&mut self, request: &Request) -> Result<Response, ServerError> {
    write_message(&mut self.writer, request).await?;
    let line = self.lines.next_line().await?.ok_or(ServerError::Disconnected)?;
    Ok(serde_json::from_str(&line)?)
  }
}

/// Whether something accepts connections at `addr`.
pub async fn is_listening(addr: SocketAddr) -> bool {
  matches!(
    tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await,
    Ok(Ok(_))
  )
}
