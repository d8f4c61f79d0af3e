//! Label printer
//!
//! Two modes, selected by config:
//! - `cups` - one plain-text job per batch, piped to the `lp` spooler
//! - `log` - labels are written to the log (kiosks without a printer)
//!
//! A job holds one page per label, separated by form feeds. Member pages
//! carry the name, the family code and the time; aggregate pages are split
//! into two tear-off halves that both carry the code. Custom pages use the
//! member layout, or the tear-off layout when they carry extra text.

use crate::domain::types::Label;
use crate::infra::config::{Config, PrinterMode};
use crate::services::checkin::{LabelPrinter, PrintError};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Timestamp printed on every label
const TIMESTAMP_FORMAT: &str = "%a %b %d, %Y  %I:%M %p";
/// Width of one text page in characters
const PAGE_WIDTH: usize = 32;
const PAGE_BREAK: char = '\u{0C}';
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Printer {
    mode: PrinterMode,
    name: String,
    page_size: String,
    timeout_ms: u64,
    spooler: String,
}

impl Printer {
    pub fn new(config: &Config) -> Self {
        Self {
            mode: config.printer_mode(),
            name: config.printer_name().to_string(),
            page_size: config.printer_page_size().to_string(),
            timeout_ms: config.printer_timeout_ms(),
            spooler: "lp".to_string(),
        }
    }

    /// Use a different spooler executable (same arguments as `lp`)
    #[cfg(test)]
    fn with_spooler(mut self, program: impl Into<String>) -> Self {
        self.spooler = program.into();
        self
    }

    pub fn mode(&self) -> PrinterMode {
        self.mode
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the configured printer is known to CUPS
    pub async fn is_connected(&self) -> bool {
        if self.mode == PrinterMode::Log {
            return true;
        }

        let status = Command::new("lpstat")
            .args(["-p", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(STATUS_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(printer = %self.name, error = %e, "lpstat_unavailable");
                false
            }
            Err(_) => false,
        }
    }

    /// Raw `lpstat -p` listing of the printers CUPS knows about
    ///
    /// Empty in log mode or when `lpstat` cannot be run.
    pub async fn list_printers(&self) -> String {
        if self.mode == PrinterMode::Log {
            return String::new();
        }

        let output = Command::new("lpstat")
            .arg("-p")
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(STATUS_TIMEOUT, output).await {
            Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).into_owned(),
            Ok(Err(e)) => {
                warn!(error = %e, "lpstat_unavailable");
                String::new()
            }
            Err(_) => {
                warn!(timeout_secs = STATUS_TIMEOUT.as_secs(), "lpstat_timeout");
                String::new()
            }
        }
    }

    fn lp_args(&self) -> Vec<String> {
        vec![
            "-d".to_string(),
            self.name.clone(),
            "-o".to_string(),
            format!("PageSize={}", self.page_size),
            "-o".to_string(),
            "orientation-requested=4".to_string(),
            "-o".to_string(),
            "fit-to-page".to_string(),
        ]
    }

    /// Pipe a rendered job to the spooler and wait for it to accept
    async fn spool(&self, job: String) -> Result<(), PrintError> {
        let mut child = Command::new(&self.spooler)
            .args(self.lp_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PrintError::Spooler(format!("{}: {}", self.spooler, e)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PrintError::Spooler("spooler stdin unavailable".to_string()))?;

        let submit = async move {
            stdin.write_all(job.as_bytes()).await?;
            // Close stdin so the spooler sees end of job
            drop(stdin);
            Ok::<_, std::io::Error>(child.wait_with_output().await?)
        };

        let output = tokio::time::timeout(Duration::from_millis(self.timeout_ms), submit)
            .await
            .map_err(|_| PrintError::Timeout(self.timeout_ms))?
            .map_err(|e| PrintError::Spooler(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PrintError::Rejected(if stderr.is_empty() {
                output.status.to_string()
            } else {
                stderr
            }));
        }

        debug!(
            printer = %self.name,
            stdout = %String::from_utf8_lossy(&output.stdout).trim(),
            "print_job_accepted"
        );
        Ok(())
    }
}

#[async_trait]
impl LabelPrinter for Printer {
    async fn print_batch(&self, labels: &[Label]) -> Result<usize, PrintError> {
        if labels.is_empty() {
            return Err(PrintError::Empty);
        }

        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();

        match self.mode {
            PrinterMode::Cups => {
                let job = render_text_job(labels, &timestamp);
                if let Err(e) = self.spool(job).await {
                    warn!(printer = %self.name, labels = labels.len(), error = %e, "print_job_failed");
                    return Err(e);
                }
                info!(printer = %self.name, labels = labels.len(), "print_job_submitted");
            }
            PrinterMode::Log => {
                for label in labels {
                    match label {
                        Label::Member { person_id, display_name, code } => info!(
                            person_id = %person_id,
                            name = %display_name,
                            code = %code,
                            "label_printed"
                        ),
                        Label::Aggregate { code, extra } => {
                            info!(extra = %extra, code = %code, "aggregate_label_printed")
                        }
                        Label::Custom { name, code, extra } => {
                            info!(name = %name, code = %code, extra = %extra, "custom_label_printed")
                        }
                    }
                }
            }
        }

        Ok(labels.len())
    }
}

fn centered(text: &str, width: usize) -> String {
    format!("{:^width$}", text, width = width).trim_end().to_string()
}

/// Left and right halves of a tear-off page
fn split_line(text: &str) -> String {
    let half = PAGE_WIDTH / 2 - 1;
    format!("{:^half$}||{:^half$}", text, text, half = half).trim_end().to_string()
}

fn render_page(label: &Label, timestamp: &str) -> String {
    let rule = "-".repeat(PAGE_WIDTH);
    let lines = match label {
        Label::Member { display_name, code, .. } => vec![
            centered(display_name, PAGE_WIDTH),
            rule,
            centered(code, PAGE_WIDTH),
            centered(timestamp, PAGE_WIDTH),
        ],
        Label::Aggregate { code, extra } => vec![
            split_line(extra),
            rule,
            split_line(code),
            centered(timestamp, PAGE_WIDTH),
        ],
        Label::Custom { name, code, extra } if extra.is_empty() => vec![
            centered(name, PAGE_WIDTH),
            rule,
            centered(code, PAGE_WIDTH),
            centered(timestamp, PAGE_WIDTH),
        ],
        Label::Custom { name, code, extra } => vec![
            split_line(name),
            rule,
            split_line(code),
            split_line(extra),
            centered(timestamp, PAGE_WIDTH),
        ],
    };
    lines.join("\n")
}

/// Render labels in order as one text job, one page per label
pub fn render_text_job(labels: &[Label], timestamp: &str) -> String {
    let mut job = String::new();
    for (i, label) in labels.iter().enumerate() {
        if i > 0 {
            job.push(PAGE_BREAK);
        }
        job.push_str(&render_page(label, timestamp));
        job.push('\n');
    }
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PersonId;

    const TS: &str = "Sun Oct 18, 2026  09:30 AM";

    fn member(id: u64, name: &str) -> Label {
        Label::Member {
            person_id: PersonId(id),
            display_name: name.to_string(),
            code: "225-BBCJ".to_string(),
        }
    }

    fn aggregate() -> Label {
        Label::Aggregate { code: "225-BBCJ".to_string(), extra: "parent".to_string() }
    }

    #[test]
    fn test_render_one_page_per_label() {
        let job = render_text_job(&[member(7, "Ada"), member(41, "Bob"), aggregate()], TS);

        let pages: Vec<&str> = job.split(PAGE_BREAK).collect();
        assert_eq!(pages.len(), 3);
        assert!(pages[0].contains("Ada"));
        assert!(pages[1].contains("Bob"));
        assert!(pages.iter().all(|p| p.contains("225-BBCJ")));
        assert!(pages.iter().all(|p| p.contains(TS)));
    }

    #[test]
    fn test_member_page_layout() {
        let page = render_page(&member(7, "Ada"), TS);
        let lines: Vec<&str> = page.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0].trim(), "Ada");
        assert_eq!(lines[1], "-".repeat(PAGE_WIDTH));
        assert_eq!(lines[2].trim(), "225-BBCJ");
    }

    #[test]
    fn test_aggregate_page_has_two_halves() {
        let page = render_page(&aggregate(), TS);
        let code_line = page.lines().nth(2).unwrap();
        assert_eq!(code_line.matches("225-BBCJ").count(), 2);
        assert!(code_line.contains("||"));
        assert_eq!(page.lines().next().unwrap().matches("parent").count(), 2);
    }

    #[test]
    fn test_custom_page_layouts() {
        let plain = Label::Custom {
            name: "Visitor".to_string(),
            code: String::new(),
            extra: String::new(),
        };
        let page = render_page(&plain, TS);
        assert_eq!(page.lines().count(), 4);
        assert_eq!(page.lines().next().unwrap().trim(), "Visitor");

        let tear_off = Label::Custom {
            name: "Parent".to_string(),
            code: "225-BBCJ".to_string(),
            extra: "Ada, Bob".to_string(),
        };
        let page = render_page(&tear_off, TS);
        let lines: Vec<&str> = page.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0].matches("Parent").count(), 2);
        assert_eq!(lines[2].matches("225-BBCJ").count(), 2);
        assert_eq!(lines[3].matches("Ada, Bob").count(), 2);
    }

    #[tokio::test]
    async fn test_log_mode_lists_no_printers() {
        let printer = Printer::new(&Config::default().with_printer_mode(PrinterMode::Log));
        assert_eq!(printer.list_printers().await, "");
    }

    #[test]
    fn test_lp_args() {
        let printer = Printer::new(&Config::default());
        assert_eq!(
            printer.lp_args(),
            vec![
                "-d",
                "DYMO_LabelWriter_550",
                "-o",
                "PageSize=w167h288",
                "-o",
                "orientation-requested=4",
                "-o",
                "fit-to-page"
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_job_rejected() {
        let printer = Printer::new(&Config::default().with_printer_mode(PrinterMode::Log));
        assert!(matches!(printer.print_batch(&[]).await, Err(PrintError::Empty)));
    }

    #[tokio::test]
    async fn test_log_mode_reports_all_labels() {
        let printer = Printer::new(&Config::default().with_printer_mode(PrinterMode::Log));
        let printed = printer.print_batch(&[member(7, "Ada"), aggregate()]).await.unwrap();
        assert_eq!(printed, 2);
        assert!(printer.is_connected().await);
    }

    #[tokio::test]
    async fn test_missing_spooler() {
        let printer = Printer::new(&Config::default()).with_spooler("/nonexistent/lp");
        let err = printer.print_batch(&[member(7, "Ada")]).await.unwrap_err();
        assert!(matches!(err, PrintError::Spooler(_)));
    }
}
