//! HTTP front end for the annotated stream.
//!
//! Routes:
//! - `GET /` redirects to `/index.html`
//! - `GET /index.html` serves a small page embedding the stream
//! - `GET /stream.mjpg` serves `multipart/x-mixed-replace` until the client leaves
//!
//! The accept loop runs on its own thread and hands every connection to a
//! dedicated thread, so a client that stops reading only stalls its own writes.

mod http;
mod session;

use anyhow::{anyhow, Context, Result};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broadcast::FrameBroadcaster;

pub use session::{encode_part, ClientSession, SessionState, STREAM_BOUNDARY};

pub const INDEX_PATH: &str = "/index.html";
pub const STREAM_PATH: &str = "/stream.mjpg";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: String,
    pub page_title: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8000".to_string(),
            page_title: "Detection Stream".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for the accept loop to exit.
    ///
    /// Open streams notice the flag after their next frame; close the
    /// broadcaster to release them immediately.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    frames: Arc<FrameBroadcaster>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, frames: Arc<FrameBroadcaster>) -> Self {
        Self { cfg, frames }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(&self.cfg.addr)
            .with_context(|| format!("failed to bind stream server to '{}'", self.cfg.addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let page: Arc<str> = Arc::from(render_page(&self.cfg.page_title));
        let frames = self.frames;
        let join = std::thread::Builder::new()
            .name("stream-accept".to_string())
            .spawn(move || run_accept_loop(listener, page, frames, shutdown_thread))?;

        log::info!("stream server listening on http://{}{}", addr, INDEX_PATH);
        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

/// Source of accepted connections for the accept loop.
trait Accept {
    fn accept_client(&self) -> io::Result<(TcpStream, SocketAddr)>;
}

impl Accept for TcpListener {
    fn accept_client(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.accept()
    }
}

/// Runs until `shutdown` is set. Accept errors (fd exhaustion, aborted
/// handshakes) are logged and retried; they never end the loop.
fn run_accept_loop<A: Accept>(
    listener: A,
    page: Arc<str>,
    frames: Arc<FrameBroadcaster>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept_client() {
            Ok((stream, peer)) => {
                let page = page.clone();
                let frames = frames.clone();
                let shutdown = shutdown.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("stream-client-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, peer, &page, &frames, &shutdown)
                        {
                            log::warn!("stream client {} request rejected: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("stream client {} dropped, no worker thread: {}", peer, err);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => {
                log::warn!("stream server accept failed, retrying: {}", err);
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
        }
    }
    log::debug!("stream server accept loop stopped");
}

fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    page: &str,
    frames: &FrameBroadcaster,
    shutdown: &AtomicBool,
) -> Result<()> {
    // Accepted sockets may inherit the listener's non-blocking mode.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(http::REQUEST_READ_TIMEOUT))?;

    let request = match http::read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let _ = http::write_text(&mut stream, 400, "bad request\n");
            return Err(err);
        }
    };
    if request.method != "GET" {
        http::write_response(
            &mut stream,
            405,
            "text/plain; charset=utf-8",
            &[("Allow", "GET")],
            b"method not allowed\n",
        )?;
        return Ok(());
    }

    match request.path.as_str() {
        "/" => http::write_response(
            &mut stream,
            301,
            "text/plain; charset=utf-8",
            &[("Location", INDEX_PATH)],
            b"",
        ),
        INDEX_PATH => http::write_response(&mut stream, 200, "text/html", &[], page.as_bytes()),
        STREAM_PATH => {
            stream.set_read_timeout(None)?;
            let _ = stream.set_nodelay(true);
            serve_stream(stream, peer, &request, frames, shutdown);
            Ok(())
        }
        _ => http::write_text(&mut stream, 404, "not found\n"),
    }
}

fn serve_stream(
    mut stream: TcpStream,
    peer: SocketAddr,
    request: &http::HttpRequest,
    frames: &FrameBroadcaster,
    shutdown: &AtomicBool,
) {
    let agent = request
        .headers
        .get("user-agent")
        .map(String::as_str)
        .unwrap_or("-");
    log::info!("stream client {} connected ({})", peer, agent);

    let mut session = ClientSession::new(peer);
    match session.stream(&mut stream, frames, shutdown) {
        Ok(()) => log::info!(
            "stream client {} closed after {} frames",
            session.peer(),
            session.frames_sent()
        ),
        Err(err) => log::info!(
            "stream client {} removed after {} frames: {}",
            session.peer(),
            session.frames_sent(),
            err
        ),
    }
}

/// HTML page embedding the stream at the native frame size.
pub fn render_page(title: &str) -> String {
    let title = escape_html(title);
    format!(
        "<html>\n<head>\n<title>{title}</title>\n</head>\n<body>\n\
         <center><h1>{title}</h1></center>\n\
         <center><img src=\"{src}\" width=\"{width}\" height=\"{height}\"></center>\n\
         </body>\n</html>\n",
        title = title,
        src = STREAM_PATH.trim_start_matches('/'),
        width = crate::frame::FRAME_WIDTH,
        height = crate::frame::FRAME_HEIGHT,
    )
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
