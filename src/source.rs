use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use crossbeam_channel as channel;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::BandwidthSnapshot;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const FEED_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("could not connect to {endpoint}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bandwidth stream from {endpoint} failed")]
    Stream {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("bandwidth stream from {endpoint} sent an undecodable report")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of one pull. `Exhausted` is a clean end of stream, never an error.
#[derive(Debug)]
pub enum Pull {
    Snapshot(BandwidthSnapshot),
    /// Nothing arrived within the wait period.
    Idle,
    Exhausted,
}

pub trait SampleSource {
    fn pull(&mut self, wait: Duration) -> Result<Pull, SourceError>;
}

pub type Feed = Result<BandwidthSnapshot, SourceError>;

/// Source fed by a producer thread over a channel. Dropping every sender
/// ends the stream.
pub struct ChannelSource {
    rx: channel::Receiver<Feed>,
    conn: Option<TcpStream>,
}

impl ChannelSource {
    pub fn new(rx: channel::Receiver<Feed>) -> Self {
        Self { rx, conn: None }
    }

    /// Bounded channel pair; the sender goes to the producer.
    pub fn bounded(cap: usize) -> (channel::Sender<Feed>, Self) {
        let (tx, rx) = channel::bounded(cap);
        (tx, Self::new(rx))
    }
}

impl SampleSource for ChannelSource {
    fn pull(&mut self, wait: Duration) -> Result<Pull, SourceError> {
        match self.rx.recv_timeout(wait) {
            Ok(Ok(snapshot)) => Ok(Pull::Snapshot(snapshot)),
            Ok(Err(err)) => Err(err),
            Err(channel::RecvTimeoutError::Timeout) => Ok(Pull::Idle),
            Err(channel::RecvTimeoutError::Disconnected) => Ok(Pull::Exhausted),
        }
    }
}

impl Drop for ChannelSource {
    fn drop(&mut self) {
        // unblocks the reader thread parked in read()
        if let Some(conn) = self.conn.take() {
            let _ = conn.shutdown(Shutdown::Both);
        }
    }
}

/// Request line sent once after connecting. An empty filter asks for every bucket.
pub fn request_line(buckets: &[String]) -> String {
    format!("BANDWIDTH {}\n", buckets.join(","))
}

/// Connects to a telemetry feed and streams its reports from a reader thread.
pub fn open_bandwidth_stream(endpoint: &str, buckets: &[String]) -> Result<ChannelSource, SourceError> {
    let connect_err = |source: std::io::Error| SourceError::Connect {
        endpoint: endpoint.to_string(),
        source,
    };

    let mut stream = connect(endpoint).map_err(connect_err)?;
    if let Err(e) = stream.set_nodelay(true) {
        warn!(?e, %endpoint, "Failed to set TCP_NODELAY");
    }
    stream
        .write_all(request_line(buckets).as_bytes())
        .map_err(connect_err)?;
    let reader = stream.try_clone().map_err(connect_err)?;
    info!(%endpoint, buckets = buckets.len(), "Connected to bandwidth feed");

    let (tx, mut source) = ChannelSource::bounded(FEED_BUFFER);
    source.conn = Some(stream);
    let endpoint_for_reader = endpoint.to_string();
    thread::spawn(move || read_reports(reader, endpoint_for_reader, tx));
    Ok(source)
}

fn connect(endpoint: &str) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in endpoint.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(?e, %addr, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "endpoint resolved to no addresses")
    }))
}

/// Decodes concatenated JSON reports until EOF, an error, or the consumer goes away.
pub(crate) fn read_reports<R: std::io::Read>(reader: R, endpoint: String, tx: channel::Sender<Feed>) {
    let reports = serde_json::Deserializer::from_reader(BufReader::new(reader))
        .into_iter::<BandwidthSnapshot>();
    for report in reports {
        let item = report.map_err(|e| {
            if e.is_io() || e.is_eof() {
                SourceError::Stream {
                    endpoint: endpoint.clone(),
                    source: e.into(),
                }
            } else {
                SourceError::Decode {
                    endpoint: endpoint.clone(),
                    source: e,
                }
            }
        });
        let failed = item.is_err();
        if tx.send(item).is_err() {
            debug!(%endpoint, "Feed consumer gone, stopping reader");
            return;
        }
        if failed {
            return;
        }
    }
    debug!(%endpoint, "Bandwidth feed closed by server");
}
