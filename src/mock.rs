use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::cli::Mock;
use crate::model::{BandwidthSnapshot, BucketStat};
use crate::source::{ChannelSource, Feed};

pub const DEFAULT_BUCKETS: [&str; 3] = ["archive", "logs", "media"];

/// Deterministic synthetic report for `tick`. Each bucket oscillates around
/// its own base rate below its limit.
pub fn synth_snapshot(buckets: &[String], tick: u64) -> BandwidthSnapshot {
    BandwidthSnapshot::from_pairs(buckets.iter().map(|name| {
        let seed = name.bytes().fold(7u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let limit = (1 + seed % 8) * 1024 * 1024;
        let base = limit as f64 * 0.4;
        let phase = (seed % 360) as f64;
        let current = base * (1.0 + 0.5 * (tick as f64 * 0.7 + phase).sin());
        (name.clone(), BucketStat::new(limit, current))
    }))
}

fn bucket_list(requested: &[String]) -> Vec<String> {
    if requested.is_empty() {
        DEFAULT_BUCKETS.iter().map(|b| b.to_string()).collect()
    } else {
        requested.to_vec()
    }
}

/// In-process synthetic feed. Ends after `count` reports when given.
pub fn spawn_mock_source(
    buckets: &[String],
    interval: Duration,
    count: Option<u64>,
    stop: Arc<AtomicBool>,
) -> ChannelSource {
    let buckets = bucket_list(buckets);
    let (tx, source) = ChannelSource::bounded(16);
    thread::spawn(move || {
        let mut tick = 0u64;
        while !stop.load(Ordering::Relaxed) && count.map_or(true, |c| tick < c) {
            let feed: Feed = Ok(synth_snapshot(&buckets, tick));
            if tx.send(feed).is_err() {
                break;
            }
            tick += 1;
            thread::sleep(interval);
        }
    });
    source
}

pub fn run_mock(mock: Mock) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }
    let listener = TcpListener::bind(mock.host)
        .with_context(|| format!("Binding mock feed at {}", mock.host))?;
    run_mock_with_shutdown(listener, mock, stop_flag)
}

/// Serves synthetic reports to every client until `stop_flag` is set.
pub(crate) fn run_mock_with_shutdown(listener: TcpListener, mock: Mock, stop_flag: Arc<AtomicBool>) -> Result<()> {
    listener
        .set_nonblocking(true)
        .context("Setting mock listener non-blocking mode")?;
    info!(host = %mock.host, interval_ms = mock.interval_ms, "Serving mock bandwidth feed");

    while !stop_flag.load(Ordering::Relaxed) {
        let (stream, addr) = match listener.accept() {
            Ok(conn) => conn,
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(e) => {
                warn!(?e, "Accept failed");
                continue;
            }
        };
        info!(%addr, "Accepted feed client");
        let mock = mock.clone();
        let stop = stop_flag.clone();
        thread::spawn(move || {
            if let Err(e) = serve_client(stream, &mock, &stop) {
                debug!(?e, %addr, "Feed client ended");
            }
            info!(%addr, "Closed feed client");
        });
    }
    info!("Shutting down mock feed");
    Ok(())
}

fn serve_client(stream: TcpStream, mock: &Mock, stop: &AtomicBool) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut line = String::new();
    BufReader::new(stream.try_clone()?)
        .read_line(&mut line)
        .context("Reading request line")?;
    let requested = parse_request(&line).context("Malformed request line")?;
    let buckets = if requested.is_empty() {
        bucket_list(&mock.buckets)
    } else {
        requested
    };

    let mut writer = stream;
    let mut tick = 0u64;
    while !stop.load(Ordering::Relaxed) && mock.count.map_or(true, |c| tick < c) {
        let report = serde_json::to_string(&synth_snapshot(&buckets, tick))?;
        writer.write_all(report.as_bytes())?;
        writer.write_all(b"\n")?;
        tick += 1;
        thread::sleep(Duration::from_millis(mock.interval_ms));
    }
    Ok(())
}

/// Parses `BANDWIDTH a,b` into bucket names.
pub(crate) fn parse_request(line: &str) -> Option<Vec<String>> {
    let rest = line.trim_end().strip_prefix("BANDWIDTH")?;
    Some(
        rest.trim()
            .split(',')
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect(),
    )
}
