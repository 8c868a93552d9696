use std::collections::BTreeMap;
use std::fmt::Display;

use crossterm::style::Stylize;
use serde::Serialize;
use thiserror::Error;

use crate::model::{AggregateResult, BucketStat};

const HEADERS: [&str; 3] = ["Bucket", "Current Bandwidth", "Limit Bandwidth"];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Table,
    Json,
}

/// Terminal size in character cells.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub cols: u16,
    pub rows: u16,
}

/// Explicit styling passed to every render call.
#[derive(Copy, Clone, Debug)]
pub struct RenderConfig {
    pub mode: OutputMode,
    pub color: bool,
    /// `None` when not drawing to a terminal; lines then never wrap.
    pub viewport: Option<Viewport>,
}

impl RenderConfig {
    pub fn plain(mode: OutputMode) -> Self {
        Self {
            mode,
            color: false,
            viewport: None,
        }
    }
}

/// Rendered text and how many terminal rows it occupies once wrapped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub rows: usize,
}

impl Rendered {
    fn new(text: String, viewport: Option<Viewport>) -> Self {
        let cols = viewport.map_or(0, |v| v.cols as usize);
        let rows = text
            .lines()
            .map(|line| {
                let width = visible_width(line);
                if cols == 0 || width == 0 {
                    1
                } else {
                    (width + cols - 1) / cols
                }
            })
            .sum();
        Self { text, rows }
    }
}

/// Character cells a line takes, skipping CSI escape sequences.
fn visible_width(line: &str) -> usize {
    let mut width = 0;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.next() == Some('[') {
                for c in chars.by_ref() {
                    if ('@'..='~').contains(&c) {
                        break;
                    }
                }
            }
            continue;
        }
        width += 1;
    }
    width
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unable to marshal bandwidth record into JSON")]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Machine-readable record for one server and cycle.
#[derive(Clone, Debug, Serialize)]
pub struct BandwidthRecord {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BTreeMap<String, BucketStat>>,
}

impl BandwidthRecord {
    pub fn success(server: &str, result: &AggregateResult) -> Self {
        Self {
            status: Status::Success,
            error: None,
            server: server.to_string(),
            result: Some(result.iter().map(|(k, v)| (k.clone(), *v)).collect()),
        }
    }

    /// Error records never carry a result.
    pub fn failure(server: &str, err: &dyn Display) -> Self {
        Self {
            status: Status::Error,
            error: Some(err.to_string()),
            server: server.to_string(),
            result: None,
        }
    }
}

pub fn render(config: &RenderConfig, server: &str, result: &AggregateResult) -> Result<Rendered, RenderError> {
    match config.mode {
        OutputMode::Table => Ok(render_table(config, server, result)),
        OutputMode::Json => render_record(&BandwidthRecord::success(server, result)),
    }
}

/// One JSON record per line.
pub fn render_record(record: &BandwidthRecord) -> Result<Rendered, RenderError> {
    let mut text = serde_json::to_string(record)?;
    text.push('\n');
    Ok(Rendered::new(text, None))
}

/// Server header followed by one boxed table per bucket, sorted by name.
pub fn render_table(config: &RenderConfig, server: &str, result: &AggregateResult) -> Rendered {
    let mut text = if config.color {
        format!("{}  {}\n", "●".green().bold(), server.bold())
    } else {
        format!("●  {server}\n")
    };

    let mut buckets: Vec<(&String, &BucketStat)> = result.iter().collect();
    buckets.sort_by(|a, b| a.0.cmp(b.0));
    for (bucket, stat) in buckets {
        let row = [bucket.clone(), format!("{:.4}", stat.current), stat.limit.to_string()];
        push_bucket_table(&mut text, config, &row);
    }
    Rendered::new(text, config.viewport)
}

fn push_bucket_table(text: &mut String, config: &RenderConfig, row: &[String; 3]) {
    let widths: Vec<usize> = HEADERS
        .iter()
        .zip(row.iter())
        .map(|(h, v)| h.chars().count().max(v.chars().count()))
        .collect();
    let rule = |left: &str, mid: &str, right: &str| -> String {
        let segs: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
        format!("{left}{}{right}\n", segs.join(mid))
    };

    text.push_str(&rule("┌", "┬", "┐"));
    let header: Vec<String> = HEADERS
        .iter()
        .zip(&widths)
        .map(|(h, &w)| format!(" {h:<w$} "))
        .collect();
    text.push_str(&format!("│{}│\n", header.join("│")));
    let cells: Vec<String> = row
        .iter()
        .zip(&widths)
        .enumerate()
        .map(|(i, (v, &w))| {
            let padded = format!("{v:<w$}");
            if config.color && i == 0 {
                format!(" {} ", padded.red().bold())
            } else {
                format!(" {padded} ")
            }
        })
        .collect();
    text.push_str(&format!("│{}│\n", cells.join("│")));
    text.push_str(&rule("└", "┴", "┘"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AggregateResult {
        [
            ("a".to_string(), BucketStat::new(100, 12.3456)),
            ("b".to_string(), BucketStat::new(200, 0.0)),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn table_formats_four_decimals_and_integer_limits() {
        let out = render_table(&RenderConfig::plain(OutputMode::Table), "srv:9000", &sample());
        assert!(out.text.contains("│ a      │ 12.3456           │ 100             │"));
        assert!(out.text.contains("│ b      │ 0.0000            │ 200             │"));
        assert!(!out.text.contains("100.0"));
    }

    #[test]
    fn table_height_is_header_plus_four_per_bucket() {
        let out = render_table(&RenderConfig::plain(OutputMode::Table), "srv:9000", &sample());
        assert_eq!(out.rows, 1 + 4 * 2);
        let empty = render_table(&RenderConfig::plain(OutputMode::Table), "srv:9000", &AggregateResult::new());
        assert_eq!(empty.rows, 1);
    }

    #[test]
    fn table_is_sorted_by_bucket() {
        let mut result = sample();
        result.insert("0first".into(), BucketStat::new(1, 1.0));
        let out = render_table(&RenderConfig::plain(OutputMode::Table), "srv", &result);
        let first = out.text.find("0first").unwrap();
        let a = out.text.find("│ a ").unwrap();
        assert!(first < a);
    }

    #[test]
    fn colored_table_keeps_height() {
        let cfg = RenderConfig {
            color: true,
            ..RenderConfig::plain(OutputMode::Table)
        };
        let out = render_table(&cfg, "srv", &sample());
        assert!(out.text.contains("\u{1b}["));
        assert_eq!(out.rows, 9);
    }

    #[test]
    fn wide_table_counts_wrapped_rows() {
        let long = "b".repeat(63);
        let result: AggregateResult = [(long, BucketStat::new(1, 1.0))].into_iter().collect();
        let unbounded = render_table(&RenderConfig::plain(OutputMode::Table), "srv", &result);
        assert_eq!(unbounded.rows, 5);

        let narrow = RenderConfig {
            viewport: Some(Viewport { cols: 80, rows: 50 }),
            ..RenderConfig::plain(OutputMode::Table)
        };
        let wrapped = render_table(&narrow, "srv", &result);
        // every box line is 105 cells wide and takes two rows
        assert_eq!(wrapped.rows, 1 + 4 * 2);
    }

    #[test]
    fn visible_width_ignores_color_codes() {
        let styled = format!("{}", "bucket".red().bold());
        assert_eq!(visible_width(&styled), 6);
        assert_eq!(visible_width("│ a │"), 5);
    }

    #[test]
    fn success_record_has_result_and_no_error() {
        let out = render(&RenderConfig::plain(OutputMode::Json), "srv:9000", &sample()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(v["status"], "success");
        assert_eq!(v["server"], "srv:9000");
        assert!(v.get("error").is_none());
        assert_eq!(v["result"]["a"]["limitInBytesPerSecond"], 100);
        let current = v["result"]["a"]["currentBandwidthInBytesPerSecond"].as_f64().unwrap();
        assert!((current - 12.3456).abs() < 1e-9);
        assert_eq!(out.rows, 1);
    }

    #[test]
    fn error_record_never_carries_result() {
        let rec = BandwidthRecord::failure("srv:9000", &"could not connect to srv:9000");
        let out = render_record(&rec).unwrap();
        let v: serde_json::Value = serde_json::from_str(&out.text).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["error"], "could not connect to srv:9000");
        assert!(v.get("result").is_none());
    }
}
