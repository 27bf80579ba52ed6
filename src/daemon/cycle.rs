use log::{error, info};
use std::path::PathBuf;

use crate::config::{Config, Delivery};
use crate::daemon::notifier::Reporter;
use crate::domain::message::{FetchBatch, Uid};
use crate::mail::extract::{SaveDir, extract_attachments};
use crate::mail::fetcher::{Connect, FetchEngine};
use crate::store::watermark::WatermarkStore;

/// The parts of the config one poll cycle needs.
#[derive(Debug, Clone)]
pub struct CycleSettings {
    pub output_folder: PathBuf,
    pub extension: String,
    pub delivery: Delivery,
}

impl CycleSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            output_folder: PathBuf::from(&cfg.output_folder),
            extension: cfg.extension.clone(),
            delivery: cfg.delivery,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageReport {
    pub uid: Uid,
    pub from: String,
    pub subject: String,
    /// Base names of the files written for this message.
    pub saved: Vec<String>,
    pub error: Option<String>,
}

/// Outcome of one fetch-then-extract cycle, handed to the reporters.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub skipped: bool,
    pub fetch_error: Option<String>,
    pub messages: Vec<MessageReport>,
    pub output_folder: PathBuf,
}

impl CycleReport {
    pub fn uids(&self) -> Vec<Uid> {
        self.messages.iter().map(|m| m.uid).collect()
    }

    pub fn saved_count(&self) -> usize {
        self.messages.iter().map(|m| m.saved.len()).sum()
    }

    pub fn has_errors(&self) -> bool {
        self.fetch_error.is_some() || self.messages.iter().any(|m| m.error.is_some())
    }
}

/// One poll cycle: fetch new messages, extract their attachments into a single
/// `SaveDir`, move the watermark according to the delivery policy, report.
pub fn run_cycle<C: Connect>(
    engine: &FetchEngine<C>,
    store: &mut WatermarkStore,
    settings: &CycleSettings,
    reporter: &dyn Reporter,
) -> CycleReport {
    let mut report = CycleReport {
        output_folder: settings.output_folder.clone(),
        ..CycleReport::default()
    };

    if settings.output_folder.as_os_str().is_empty() || engine.params().server.is_empty() {
        report.skipped = true;
        return report;
    }

    let fetched = match settings.delivery {
        Delivery::AtMostOnce => engine.fetch_new(store),
        Delivery::AtLeastOnce => engine.fetch(store.last_uid()),
    };
    let batch = match fetched {
        Ok(b) => b,
        Err(e) => {
            error!("IMAP fetch failed: {e:#}");
            report.fetch_error = Some(format!("{e:#}"));
            reporter.report(&report);
            return report;
        }
    };

    if batch.is_empty() {
        return report;
    }

    for m in &batch.messages {
        info!("Fetched message UID {} - Subject: '{}', From: '{}'", m.uid, m.subject, m.from);
    }
    info!("IMAP fetch completed: {} new messages found (UIDs: {:?})", batch.messages.len(), batch.uids());

    report.messages = extract_batch(&batch, settings);

    if settings.delivery == Delivery::AtLeastOnce
        && let Some(uid) = committable_uid(&report.messages, &batch.skipped)
        && let Err(e) = store.advance_to(uid)
    {
        error!("could not persist watermark: {e}");
    }

    info!(
        "Extraction completed: {} files saved to {}",
        report.saved_count(),
        settings.output_folder.display()
    );
    reporter.report(&report);
    report
}

fn extract_batch(batch: &FetchBatch, settings: &CycleSettings) -> Vec<MessageReport> {
    let mut out = SaveDir::with_extension(&settings.output_folder, &settings.extension);

    batch
        .messages
        .iter()
        .map(|m| {
            let (saved, error) = match extract_attachments(&m.body, &mut out) {
                Ok(results) => (results, None),
                Err(e) => {
                    error!("Extraction failed for UID {}: {e}", m.uid);
                    (e.saved().to_vec(), Some(e.to_string()))
                }
            };
            let saved: Vec<String> = saved.into_iter().map(|r| r.filename).collect();
            if !saved.is_empty() {
                info!(
                    "Extracted {} files from UID {} (Subject: '{}', From: '{}') - Files: {:?}",
                    saved.len(),
                    m.uid,
                    m.subject,
                    m.from,
                    saved
                );
            }
            MessageReport {
                uid: m.uid,
                from: m.from.clone(),
                subject: m.subject.clone(),
                saved,
                error,
            }
        })
        .collect()
}

/// Highest uid such that every message of the batch at or below it was extracted
/// cleanly. Skipped uids count as failures.
fn committable_uid(messages: &[MessageReport], skipped: &[Uid]) -> Option<Uid> {
    let mut ordered: Vec<(Uid, bool)> = messages
        .iter()
        .map(|m| (m.uid, m.error.is_none()))
        .chain(skipped.iter().map(|&uid| (uid, false)))
        .collect();
    ordered.sort_by_key(|&(uid, _)| uid);
    ordered
        .iter()
        .take_while(|&&(_, ok)| ok)
        .map(|&(uid, _)| uid)
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(uid: Uid, failed: bool) -> MessageReport {
        MessageReport {
            uid,
            error: failed.then(|| "disk full".to_string()),
            ..MessageReport::default()
        }
    }

    #[test]
    fn committable_stops_at_first_failure() {
        let msgs = vec![report(9, false), report(3, false), report(7, true), report(5, false)];
        assert_eq!(committable_uid(&msgs, &[]), Some(5));
    }

    #[test]
    fn committable_is_max_when_all_succeed() {
        let msgs = vec![report(4, false), report(8, false)];
        assert_eq!(committable_uid(&msgs, &[]), Some(8));
    }

    #[test]
    fn nothing_committable_when_lowest_fails() {
        let msgs = vec![report(2, true), report(8, false)];
        assert_eq!(committable_uid(&msgs, &[]), None);
    }

    #[test]
    fn skipped_uid_caps_the_commit() {
        let msgs = vec![report(2, false), report(6, false)];
        assert_eq!(committable_uid(&msgs, &[4]), Some(2));
        assert_eq!(committable_uid(&msgs, &[1]), None);
        assert_eq!(committable_uid(&msgs, &[9]), Some(6));
    }

    #[test]
    fn report_counts() {
        let mut r = CycleReport::default();
        r.messages.push(MessageReport {
            uid: 1,
            saved: vec!["a.igc".into(), "b.igc".into()],
            ..MessageReport::default()
        });
        r.messages.push(report(4, true));
        assert_eq!(r.uids(), vec![1, 4]);
        assert_eq!(r.saved_count(), 2);
        assert!(r.has_errors());
    }
}
