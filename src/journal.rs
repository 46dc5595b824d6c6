use std::path::Path;

use crate::events::ProgressEvent;

/// Append-only NDJSON log of a run's progress events.
pub struct EventJournal {
    file: std::fs::File,
}

impl EventJournal {
    /// Open journal file for appending.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Write one event as a line and flush it to disk.
    pub fn write(&mut self, event: &ProgressEvent) -> anyhow::Result<()> {
        use std::io::Write;
        let line = serde_json::to_string(event)?;
        writeln!(&mut self.file, "{line}")?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Read journal events from a file.
pub fn read_journal(path: &Path) -> anyhow::Result<Vec<ProgressEvent>> {
    let content = std::fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("invalid journal line {}: {}", n + 1, e))
        })
        .collect()
}
