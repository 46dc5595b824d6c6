use std::sync::Mutex;

use crate::events::{EventSink, LogEvent, LogLevel, ProgressEvent, Status};
use crate::journal::EventJournal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One readable line per progress event.
    Human,
    /// One JSON object per progress event on stdout.
    Json,
    Silent,
}

/// Reporter aggregates events and produces human or JSON output.
pub struct Reporter {
    mode: OutputMode,
    journal: Option<Mutex<EventJournal>>,
    events: Mutex<Vec<ProgressEvent>>,
    #[cfg(feature = "cli")]
    spinner: Option<indicatif::ProgressBar>,
}

impl Reporter {
    pub fn new(mode: OutputMode) -> Self {
        Self {
            mode,
            journal: None,
            events: Mutex::new(Vec::new()),
            #[cfg(feature = "cli")]
            spinner: (mode == OutputMode::Human).then(|| {
                let spinner = indicatif::ProgressBar::new_spinner();
                spinner.enable_steady_tick(std::time::Duration::from_millis(120));
                spinner
            }),
        }
    }

    /// Also append every progress event to `journal`.
    pub fn with_journal(mut self, journal: EventJournal) -> Self {
        self.journal = Some(Mutex::new(journal));
        self
    }

    /// Every progress event received so far, in arrival order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn summary(&self) -> String {
        let events = self.events();
        let failures = events
            .iter()
            .filter(|e| e.error.is_some())
            .count();
        let outcome = events
            .iter()
            .rev()
            .find(|e| e.status.is_terminal())
            .map_or_else(|| "no terminal status".to_string(), |e| format!("{:?}", e.status));
        format!(
            "{} events recorded, {} with errors, outcome: {}",
            events.len(),
            failures,
            outcome
        )
    }

    fn print(&self, event: &ProgressEvent) {
        match self.mode {
            OutputMode::Silent => {}
            OutputMode::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    println!("{line}");
                }
            }
            OutputMode::Human => {
                let line = match &event.error {
                    Some(error) => format!("{}: {} ({})", event.context, event.message, error),
                    None => format!("{}: {}", event.context, event.message),
                };
                #[cfg(feature = "cli")]
                if let Some(spinner) = &self.spinner {
                    spinner.suspend(|| println!("{line}"));
                    spinner.set_message(event.context.clone());
                    if event.status.is_terminal() {
                        spinner.finish_and_clear();
                    }
                    return;
                }
                println!("{line}");
            }
        }
    }
}

impl EventSink for Reporter {
    fn progress(&self, event: &ProgressEvent) -> bool {
        match event.status {
            Status::Failed => tracing::error!(
                context = %event.context,
                sequence = event.sequence,
                error = event.error.as_deref().unwrap_or_default(),
                "{}",
                event.message
            ),
            _ => tracing::debug!(
                context = %event.context,
                sequence = event.sequence,
                status = ?event.status,
                "{}",
                event.message
            ),
        }

        if let Some(journal) = &self.journal {
            let written = match journal.lock() {
                Ok(mut journal) => journal.write(event),
                Err(poisoned) => poisoned.into_inner().write(event),
            };
            if let Err(e) = written {
                tracing::warn!(error = %e, "could not append to event journal");
            }
        }

        self.print(event);
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        false
    }

    fn log(&self, event: &LogEvent) {
        match event.level {
            LogLevel::Debug | LogLevel::Info => {
                tracing::debug!(context = %event.context, "{}", event.message)
            }
            LogLevel::Warn => tracing::warn!(context = %event.context, "{}", event.message),
            LogLevel::Error => tracing::error!(context = %event.context, "{}", event.message),
        }
    }
}
