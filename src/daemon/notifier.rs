use log::{info, warn};
use notify_rust::Notification;

use crate::daemon::cycle::CycleReport;

/// Consumer of cycle outcomes (logging, desktop notifications).
pub trait Reporter: Send {
    fn report(&self, report: &CycleReport);
}

/// Writes the per-message outcome to the log.
#[derive(Debug, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn report(&self, report: &CycleReport) {
        if let Some(e) = &report.fetch_error {
            warn!("cycle aborted at fetch: {e}");
            return;
        }
        for m in &report.messages {
            match &m.error {
                Some(e) => warn!("UID {} ({}): extraction error: {e}", m.uid, m.subject),
                None if m.saved.is_empty() => info!("UID {}: no matching attachments", m.uid),
                None => {}
            }
        }
    }
}

/// Desktop notifications for saved files and errors. Failures to notify are only logged.
pub struct Notifier {
    app_name: String,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            app_name: "igc_mail_imap".to_string(),
        }
    }

    fn show(&self, summary: &str, body: &str) {
        let mut n = Notification::new();
        n.appname(&self.app_name).summary(summary).body(body);

        #[cfg(all(unix, not(target_os = "macos")))]
        n.hint(notify_rust::Hint::Category("transfer.complete".to_string()));

        if let Err(e) = n.show() {
            warn!("Notification error: {e}");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for Notifier {
    fn report(&self, report: &CycleReport) {
        if let Some(e) = &report.fetch_error {
            self.show("IMAP", e);
            return;
        }
        for m in &report.messages {
            if let Some(e) = &m.error {
                self.show("Extract", &format!("UID {}: {e}", m.uid));
            }
        }
        let saved = report.saved_count();
        if saved > 0 {
            let names: Vec<&str> = report
                .messages
                .iter()
                .flat_map(|m| m.saved.iter().map(String::as_str))
                .collect();
            self.show(
                &format!("{saved} file(s) saved to {}", report.output_folder.display()),
                &names.join(", "),
            );
        }
    }
}

/// Fan-out to several reporters in order.
#[derive(Default)]
pub struct Reporters(Vec<Box<dyn Reporter>>);

impl Reporters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reporter: impl Reporter + 'static) -> Self {
        self.0.push(Box::new(reporter));
        self
    }
}

impl Reporter for Reporters {
    fn report(&self, report: &CycleReport) {
        for r in &self.0 {
            r.report(report);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recording(Arc<Mutex<Vec<usize>>>);

    impl Reporter for Recording {
        fn report(&self, report: &CycleReport) {
            self.0.lock().unwrap().push(report.messages.len());
        }
    }

    #[test]
    fn fan_out_reaches_every_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reporters = Reporters::new()
            .with(LogReporter)
            .with(Recording(seen.clone()))
            .with(Recording(seen.clone()));
        reporters.report(&CycleReport::default());
        assert_eq!(*seen.lock().unwrap(), vec![0, 0]);
    }
}
