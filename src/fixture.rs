//! Environments the adapters call into: an ephemeral local HTTP server and a
//! temporary directory of JSON sample files.
//!
//! A fixture is acquired before any timed work and released on every exit
//! path. [`with_fixture`] stops it after the body returns, and `Drop` covers
//! unwinding.

use std::convert::Infallible;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{BenchError, Result};
use crate::payload::{self, PayloadGenerator, SizeClass};

pub trait Fixture {
    /// Short description used in logs and errors.
    fn label(&self) -> &str;

    fn stop(self) -> Result<()>
    where
        Self: Sized;
}

/// Something that can stand up a fixture for a size class.
pub trait FixtureProvider {
    type Handle: Fixture;

    fn start(&self, size: SizeClass, compressed: bool) -> Result<Self::Handle>;
}

/// Run `body` against `fixture`, then stop it whether or not `body` succeeded.
/// A body error takes precedence over a teardown error.
pub fn with_fixture<F, T>(fixture: F, body: impl FnOnce(&F) -> Result<T>) -> Result<T>
where
    F: Fixture,
{
    let result = body(&fixture);
    let label = fixture.label().to_string();
    let stopped = fixture.stop();

    match (result, stopped) {
        (Ok(value), Ok(())) => Ok(value),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(teardown)) => {
            warn!(fixture = %label, error = %teardown, "teardown failed after case error");
            Err(e)
        }
        (Ok(_), Err(teardown)) => Err(teardown),
    }
}

/// Start a fixture from `provider` and scope `body` to its lifetime.
pub fn scoped<P, T>(
    provider: &P,
    size: SizeClass,
    compressed: bool,
    body: impl FnOnce(&P::Handle) -> Result<T>,
) -> Result<T>
where
    P: FixtureProvider,
{
    with_fixture(provider.start(size, compressed)?, body)
}

fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

#[derive(Clone, Copy, Debug)]
pub struct HttpFixtureConfig {
    pub size: SizeClass,
    /// Serve gzip when it makes the body smaller.
    pub compressed: bool,
    pub seed: u64,
    /// Runtime worker threads. Each connection is its own task, so this
    /// bounds CPU use rather than the number of open connections.
    pub handler_threads: usize,
}

impl HttpFixtureConfig {
    pub fn new(size: SizeClass, compressed: bool) -> Self {
        Self {
            size,
            compressed,
            seed: 0,
            handler_threads: 4,
        }
    }
}

/// The pre-rendered reply every request gets.
struct Document {
    body: Bytes,
    encoded: bool,
    served: AtomicU64,
}

impl Document {
    fn response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(self.body.clone()));
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if self.encoded {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        response
    }
}

/// Local HTTP/1.1 server answering every GET or POST with the same
/// pre-rendered document. Connections are kept alive and served
/// concurrently, one task each.
pub struct HttpFixture {
    label: String,
    addr: SocketAddr,
    runtime: Option<Runtime>,
    accept: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
    document: Arc<Document>,
    decoded_len: usize,
}

impl HttpFixture {
    pub fn start(config: &HttpFixtureConfig) -> Result<Self> {
        let label = format!(
            "http {}/{}",
            config.size.as_str(),
            if config.compressed { "gzip" } else { "identity" }
        );
        let setup = |reason: String| BenchError::Setup {
            fixture: label.clone(),
            reason,
        };

        let rendered = PayloadGenerator::new(config.seed)
            .document(config.size)
            .map_err(|e| setup(format!("cannot render payload: {e}")))?;
        let decoded_len = rendered.len();

        let mut encoded = false;
        let body = if config.compressed {
            let packed = gzip(&rendered).map_err(|e| setup(format!("gzip failed: {e}")))?;
            if packed.len() < rendered.len() {
                encoded = true;
                packed
            } else {
                debug!(
                    fixture = %label,
                    identity = rendered.len(),
                    gzip = packed.len(),
                    "gzip does not shrink payload, serving identity"
                );
                rendered
            }
        } else {
            rendered
        };
        let document = Arc::new(Document {
            body: Bytes::from(body),
            encoded,
            served: AtomicU64::new(0),
        });

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.handler_threads.max(1))
            .thread_name("fixture-http")
            .enable_io()
            .build()
            .map_err(|e| setup(format!("cannot start runtime: {e}")))?;

        let listener = std::net::TcpListener::bind("127.0.0.1:0")
            .map_err(|e| setup(format!("bind failed: {e}")))?;
        let addr = listener
            .local_addr()
            .map_err(|e| setup(format!("no local address: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| setup(format!("cannot make listener non-blocking: {e}")))?;
        let listener = {
            let _guard = runtime.enter();
            TcpListener::from_std(listener)
                .map_err(|e| setup(format!("cannot register listener: {e}")))?
        };

        let (shutdown, stop_rx) = oneshot::channel();
        let accept = runtime.spawn(accept_loop(listener, Arc::clone(&document), stop_rx));

        info!(
            fixture = %label,
            %addr,
            decoded = decoded_len,
            wire = document.body.len(),
            threads = config.handler_threads.max(1),
            "fixture listening"
        );
        Ok(Self {
            label,
            addr,
            runtime: Some(runtime),
            accept: Some(accept),
            shutdown: Some(shutdown),
            document,
            decoded_len,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.document.served.load(Ordering::Relaxed)
    }

    /// Size of the document before any content encoding.
    pub fn decoded_len(&self) -> usize {
        self.decoded_len
    }

    /// Size of the response body as sent.
    pub fn body_len(&self) -> usize {
        self.document.body.len()
    }

    /// Whether responses carry `Content-Encoding: gzip`.
    pub fn encoded(&self) -> bool {
        self.document.encoded
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(runtime) = self.runtime.take() else {
            return Ok(());
        };

        if let Some(stop) = self.shutdown.take() {
            // The accept loop also exits if the receiver is already gone.
            let _ = stop.send(());
        }
        let accepted = match self.accept.take() {
            Some(handle) => runtime.block_on(handle),
            None => Ok(()),
        };
        // Drops connection tasks still parked on idle keep-alive sockets.
        runtime.shutdown_timeout(Duration::from_secs(1));

        info!(fixture = %self.label, served = self.served(), "fixture stopped");
        accepted.map_err(|e| BenchError::Teardown {
            fixture: self.label.clone(),
            reason: format!("accept loop failed: {e}"),
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    document: Arc<Document>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(stream, Arc::clone(&document)));
                }
                Err(e) => warn!(error = %e, "fixture accept error"),
            },
        }
    }
}

async fn serve_connection(stream: TcpStream, document: Arc<Document>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "cannot disable nagle on fixture connection");
    }

    let service = service_fn(move |request: Request<Incoming>| {
        let document = Arc::clone(&document);
        async move {
            if let Err(e) = request.into_body().collect().await {
                debug!(error = %e, "failed to drain request body");
            }
            document.served.fetch_add(1, Ordering::Relaxed);
            Ok::<_, Infallible>(document.response())
        }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!(error = %e, "fixture connection ended with error");
    }
}

impl Fixture for HttpFixture {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(mut self) -> Result<()> {
        self.shutdown()
    }
}

impl Drop for HttpFixture {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(fixture = %self.label, error = %e, "fixture teardown failed");
        }
    }
}

/// Starts [`HttpFixture`]s with a fixed seed and handler pool size.
#[derive(Clone, Copy, Debug)]
pub struct HttpFixtureProvider {
    pub seed: u64,
    pub handler_threads: usize,
}

impl FixtureProvider for HttpFixtureProvider {
    type Handle = HttpFixture;

    fn start(&self, size: SizeClass, compressed: bool) -> Result<HttpFixture> {
        HttpFixture::start(&HttpFixtureConfig {
            size,
            compressed,
            seed: self.seed,
            handler_threads: self.handler_threads,
        })
    }
}

/// `small.json`, `medium.json` and `large.json` in a directory removed on stop.
pub struct SampleFiles {
    label: String,
    root: PathBuf,
    dir: Option<TempDir>,
}

impl SampleFiles {
    pub fn create(generator: &PayloadGenerator) -> Result<Self> {
        let setup = |reason: String| BenchError::Setup {
            fixture: "sample files".to_string(),
            reason,
        };

        let dir = TempDir::new().map_err(|e| setup(format!("cannot create temp dir: {e}")))?;
        payload::write_sample_files(dir.path(), generator)
            .map_err(|e| setup(format!("cannot write samples: {e}")))?;

        let root = dir.path().to_path_buf();
        debug!(dir = %root.display(), seed = generator.seed(), "sample files written");

        Ok(Self {
            label: format!("sample files {}", root.display()),
            root,
            dir: Some(dir),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, size: SizeClass) -> PathBuf {
        self.root.join(payload::sample_file_name(size))
    }

    pub fn read(&self, size: SizeClass) -> Result<Vec<u8>> {
        Ok(payload::read_sample_file(&self.root, size)?)
    }
}

impl Fixture for SampleFiles {
    fn label(&self) -> &str {
        &self.label
    }

    fn stop(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(|e| BenchError::Teardown {
                fixture: self.label.clone(),
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Sample files are plain JSON; `compressed` does not apply to them.
#[derive(Clone, Copy, Debug)]
pub struct SampleFileProvider {
    pub seed: u64,
}

impl FixtureProvider for SampleFileProvider {
    type Handle = SampleFiles;

    fn start(&self, _size: SizeClass, _compressed: bool) -> Result<SampleFiles> {
        SampleFiles::create(&PayloadGenerator::new(self.seed))
    }
}
