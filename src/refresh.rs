use std::fmt::Display;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use crossterm::{
    cursor, queue,
    style::Stylize,
    terminal::{Clear, ClearType},
};
use tracing::{debug, info, warn};

use crate::model::CycleContext;
use crate::render::{render, render_record, BandwidthRecord, OutputMode, RenderConfig, Viewport};
use crate::source::SampleSource;
use crate::window::{run_cycle, CycleOutcome};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoopEnd {
    Cancelled,
    Exhausted,
}

/// Runs cycles until `stop` is set or the source ends, redrawing in place.
///
/// A source error ends the loop with that error; in JSON mode an error
/// record is written first. The erase height always comes from the last
/// thing actually drawn.
pub fn refresh_loop<S, W>(
    source: &mut S,
    ctx: &CycleContext,
    config: &RenderConfig,
    out: &mut W,
    stop: &AtomicBool,
    poll: Duration,
) -> Result<LoopEnd>
where
    S: SampleSource + ?Sized,
    W: Write,
{
    let table = config.mode == OutputMode::Table;
    if table {
        write_banner(out, config, ctx.window())?;
    }

    let mut drawn_rows = 0usize;
    let mut cycles = 0u64;
    loop {
        if stop.load(Ordering::Relaxed) {
            info!(cycles, "Stopping bandwidth watch");
            return Ok(LoopEnd::Cancelled);
        }

        let outcome = match run_cycle(source, ctx, stop, poll) {
            Ok(outcome) => outcome,
            Err(err) => {
                if !table {
                    report_failure(out, &ctx.server, &err);
                }
                return Err(anyhow::Error::new(err)
                    .context(format!("Unable to get bandwidth info from {}", ctx.server)));
            }
        };

        match outcome {
            CycleOutcome::Cancelled => {
                info!(cycles, "Stopping bandwidth watch");
                return Ok(LoopEnd::Cancelled);
            }
            CycleOutcome::Complete { result, folds, exhausted } => {
                if folds > 0 {
                    let rendered = render(config, &ctx.server, &result)?;
                    if table {
                        erase_rows(out, drawn_rows, config.viewport)?;
                        drawn_rows = rendered.rows;
                    }
                    out.write_all(rendered.text.as_bytes())?;
                    out.flush()?;
                    cycles += 1;
                    debug!(cycle = cycles, folds, buckets = result.len(), "Rendered cycle");
                }
                if exhausted {
                    info!(server = %ctx.server, cycles, "Bandwidth stream ended");
                    return Ok(LoopEnd::Exhausted);
                }
            }
        }
    }
}

/// Writes the error record a JSON consumer sees before the process exits.
fn write_failure_record<W: Write>(out: &mut W, server: &str, err: &dyn Display) -> Result<()> {
    let record = render_record(&BandwidthRecord::failure(server, err))?;
    out.write_all(record.text.as_bytes())?;
    out.flush()?;
    Ok(())
}

/// Best effort: a broken output must not hide the failure being reported.
pub fn report_failure<W: Write>(out: &mut W, server: &str, err: &dyn Display) {
    if let Err(e) = write_failure_record(out, server, err) {
        warn!(?e, %server, "Unable to write error record");
    }
}

fn write_banner<W: Write>(out: &mut W, config: &RenderConfig, window: usize) -> std::io::Result<()> {
    let banner = format!("Collecting {window} samples per refresh and averaging. These are the initial values..");
    if config.color {
        writeln!(out, "{}", banner.cyan())
    } else {
        writeln!(out, "{banner}")
    }
}

/// Moves the cursor up over the last `rows` rows and clears everything below.
///
/// A render at least as tall as the screen has partly scrolled away, so the
/// whole screen is cleared and drawing restarts at the top.
pub fn erase_rows<W: Write>(out: &mut W, rows: usize, viewport: Option<Viewport>) -> std::io::Result<()> {
    if rows == 0 {
        return Ok(());
    }
    if viewport.map_or(false, |v| rows >= v.rows as usize) {
        return queue!(out, cursor::MoveTo(0, 0), Clear(ClearType::All));
    }
    let n = u16::try_from(rows).unwrap_or(u16::MAX);
    queue!(out, cursor::MoveToPreviousLine(n), Clear(ClearType::FromCursorDown))
}
