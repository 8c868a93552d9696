use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cli::Watch;
use crate::mock::spawn_mock_source;
use crate::model::CycleContext;
use crate::refresh::{refresh_loop, report_failure};
use crate::render::{OutputMode, RenderConfig, Viewport};
use crate::source::open_bandwidth_stream;

const MOCK_INTERVAL: Duration = Duration::from_millis(100);

pub fn run_watch(watch: Watch) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    let stdout = std::io::stdout();
    let viewport = if stdout.is_terminal() {
        crossterm::terminal::size()
            .ok()
            .map(|(cols, rows)| Viewport { cols, rows })
    } else {
        None
    };
    let config = render_config(&watch, viewport);
    run_watch_with_shutdown(watch, config, stop_flag, &mut stdout.lock())
}

pub(crate) fn run_watch_with_shutdown<W: Write>(
    watch: Watch,
    config: RenderConfig,
    stop_flag: Arc<AtomicBool>,
    out: &mut W,
) -> Result<()> {
    let server = match (&watch.target, watch.mock) {
        (Some(target), false) => target.clone(),
        _ => "mock".to_string(),
    };
    let ctx = CycleContext::new(server, watch.buckets);
    let poll = Duration::from_millis(watch.poll_ms.max(1));
    info!(server = %ctx.server, buckets = ?ctx.buckets, json = watch.json, "Starting bandwidth watch");

    let mut source = if watch.mock {
        spawn_mock_source(&ctx.buckets, MOCK_INTERVAL, None, stop_flag.clone())
    } else {
        match open_bandwidth_stream(&ctx.server, &ctx.buckets) {
            Ok(source) => source,
            Err(err) => {
                if config.mode == OutputMode::Json {
                    report_failure(out, &ctx.server, &err);
                }
                return Err(anyhow::Error::new(err)
                    .context(format!("Unable to initialize admin connection with {}", ctx.server)));
            }
        }
    };

    refresh_loop(&mut source, &ctx, &config, out, &stop_flag, poll)?;
    Ok(())
}

/// Color only for tables on a terminal, and never when `NO_COLOR` is set.
/// `viewport` is `None` when stdout is not a terminal.
pub(crate) fn render_config(watch: &Watch, viewport: Option<Viewport>) -> RenderConfig {
    let mode = if watch.json { OutputMode::Json } else { OutputMode::Table };
    let color = mode == OutputMode::Table
        && viewport.is_some()
        && !watch.no_color
        && std::env::var_os("NO_COLOR").is_none();
    RenderConfig {
        mode,
        color,
        viewport,
    }
}

#[cfg(test)]
mod itests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    use crate::cli::Mock;
    use crate::mock::run_mock_with_shutdown;
    use crate::source::SourceError;

    fn watch(target: Option<String>, json: bool) -> Watch {
        Watch {
            target,
            buckets: vec![],
            json,
            no_color: false,
            poll_ms: 50,
            mock: false,
        }
    }

    #[test]
    fn render_config_disables_color_off_terminal_and_for_json() {
        let tty = Some(Viewport { cols: 80, rows: 24 });
        let table = watch(Some("h:1".into()), false);
        assert!(!render_config(&table, None).color);
        assert_eq!(render_config(&table, tty).viewport, tty);
        let json = watch(Some("h:1".into()), true);
        let cfg = render_config(&json, tty);
        assert_eq!(cfg.mode, OutputMode::Json);
        assert!(!cfg.color);
        let mut plain = table.clone();
        plain.no_color = true;
        assert!(!render_config(&plain, tty).color);
    }

    #[test]
    fn unreachable_server_emits_error_record() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let target = format!("127.0.0.1:{port}");
        let w = watch(Some(target.clone()), true);
        let mut out = Vec::new();
        let err = run_watch_with_shutdown(w, RenderConfig::plain(OutputMode::Json), Arc::new(AtomicBool::new(false)), &mut out)
            .unwrap_err();
        assert!(err
            .chain()
            .any(|c| matches!(c.downcast_ref::<SourceError>(), Some(SourceError::Connect { .. }))));
        let record: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(record["status"], "error");
        assert_eq!(record["server"], target.as_str());
        assert!(record.get("result").is_none());
    }

    /// Writer that fails every write, like a closed stdout.
    struct ClosedStdout;

    impl Write for ClosedStdout {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn unreachable_server_keeps_connect_exit_code_when_output_is_closed() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let w = watch(Some(format!("127.0.0.1:{port}")), true);
        let err = run_watch_with_shutdown(
            w,
            RenderConfig::plain(OutputMode::Json),
            Arc::new(AtomicBool::new(false)),
            &mut ClosedStdout,
        )
        .unwrap_err();
        assert_eq!(crate::exit_code_for_error(&err), 2);
    }

    #[test]
    fn watches_mock_server_until_feed_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mock = Mock {
            host: addr,
            buckets: vec!["media".into()],
            interval_ms: 0,
            count: Some(12),
        };
        let stop = Arc::new(AtomicBool::new(false));
        let stop_server = stop.clone();
        let server = thread::spawn(move || run_mock_with_shutdown(listener, mock, stop_server));

        let mut out = Vec::new();
        let w = watch(Some(addr.to_string()), true);
        run_watch_with_shutdown(w, RenderConfig::plain(OutputMode::Json), Arc::new(AtomicBool::new(false)), &mut out)
            .unwrap();
        stop.store(true, Ordering::Relaxed);
        server.join().unwrap().unwrap();

        let text = String::from_utf8(out).unwrap();
        let records: Vec<serde_json::Value> = text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        // 12 reports: one full window, then a partial one before the feed closes
        assert_eq!(records.len(), 2);
        assert!(records[0]["result"]["media"]["limitInBytesPerSecond"].is_u64());
    }
}
