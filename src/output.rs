use std::io::{self, Write};

use serde::Serialize;
use tracing::debug;

use crate::harvest::{HarvestReport, ItemOutcome, ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

/// Forwards progress events to the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => debug!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => debug!("{}", event.message),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &HarvestReport) -> io::Result<()> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Human-readable run summary.
pub fn write_summary(out: &mut impl Write, report: &HarvestReport) -> io::Result<()> {
    writeln!(
        out,
        "lit-harvest: \"{}\" {}..{}",
        report.query.topic, report.query.date_range.start, report.query.date_range.end
    )?;
    writeln!(
        out,
        "  found {}, registered {}, already known {}, skipped {}, failed {}",
        report.items.len(),
        report.registered.len(),
        report.count("already_registered"),
        report.count("skipped"),
        report.count("failed"),
    )?;
    for item in &report.items {
        let detail = match &item.outcome {
            ItemOutcome::AlreadyRegistered => continue,
            ItemOutcome::Registered { storage_key } => storage_key.clone(),
            ItemOutcome::Skipped { reason } => reason.clone(),
            ItemOutcome::Failed { stage, reason } => format!("at {stage}: {reason}"),
        };
        writeln!(
            out,
            "  {:<18} {:<10} {detail}",
            item.outcome.label(),
            item.identifier
        )?;
    }
    Ok(())
}

pub fn print_summary(report: &HarvestReport) -> io::Result<()> {
    write_summary(&mut io::stdout().lock(), report)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::NaiveDate;

    use super::*;
    use crate::domain::{DateRange, SearchQuery};
    use crate::harvest::{ItemReport, ItemState};

    #[test]
    fn summary_lists_non_trivial_items() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let report = HarvestReport {
            query: SearchQuery {
                topic: "colorectal surgery".to_string(),
                publication_types: Vec::new(),
                date_range: DateRange::last_days(7, day).unwrap(),
                max_results: 50,
            },
            registered: BTreeSet::from(["P1".to_string()]),
            items: vec![
                ItemReport {
                    identifier: "P1".to_string(),
                    title: String::new(),
                    outcome: ItemOutcome::Registered {
                        storage_key: "pdfs/P1.pdf".to_string(),
                    },
                },
                ItemReport {
                    identifier: "P2".to_string(),
                    title: String::new(),
                    outcome: ItemOutcome::AlreadyRegistered,
                },
                ItemReport {
                    identifier: "P3".to_string(),
                    title: String::new(),
                    outcome: ItemOutcome::Failed {
                        stage: ItemState::Downloaded,
                        reason: "timeout".to_string(),
                    },
                },
            ],
        };

        let mut out = Vec::new();
        write_summary(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("found 3, registered 1, already known 1, skipped 0, failed 1"));
        assert!(text.contains("pdfs/P1.pdf"));
        assert!(text.contains("at Downloaded: timeout"));
        assert!(!text.contains("P2"));
    }
}
