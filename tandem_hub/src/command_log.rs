// Append-only per-unit command log, with autosave recording.
//
// Every command the hub issues is serialized once and appended to the log of
// its target unit (the global sentinel is a unit like any other here). The
// log holds everything issued since the last completed save; a joining peer
// receives it alongside that save and replays it.
//
// While an autosave is in flight, appends are also copied into a recording
// buffer. When the snapshot arrives the buffer becomes the new log (those are
// exactly the commands the snapshot does not contain yet) and the buffer is
// dropped. Only one recording can be active: `begin_recording` refuses while
// the buffer exists.

use std::collections::BTreeMap;

use tandem_protocol::{ScheduledCommand, UnitId};

pub type UnitLogs = BTreeMap<UnitId, Vec<Vec<u8>>>;

#[derive(Debug, Default)]
pub struct CommandLog {
    units: UnitLogs,
    recording: Option<UnitLogs>,
}

impl CommandLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and log `command`, returning the serialized bytes.
    pub fn append(&mut self, command: &ScheduledCommand) -> Vec<u8> {
        let bytes = command.encode();
        self.units
            .entry(command.unit)
            .or_default()
            .push(bytes.clone());
        if let Some(recording) = &mut self.recording {
            recording
                .entry(command.unit)
                .or_default()
                .push(bytes.clone());
        }
        bytes
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Start buffering a second copy of new commands. Returns false if a
    /// recording is already active.
    pub fn begin_recording(&mut self) -> bool {
        if self.recording.is_some() {
            return false;
        }
        self.recording = Some(UnitLogs::new());
        true
    }

    /// The snapshot landed: keep only what was issued after it started.
    /// Returns false if nothing was being recorded.
    pub fn finish_recording(&mut self) -> bool {
        match self.recording.take() {
            Some(recorded) => {
                self.units = recorded;
                true
            }
            None => false,
        }
    }

    /// Drop the recording buffer without touching the log.
    pub fn abort_recording(&mut self) -> bool {
        self.recording.take().is_some()
    }

    pub fn unit(&self, unit: UnitId) -> &[Vec<u8>] {
        self.units.get(&unit).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every unit's log, in unit order, ready for a world snapshot.
    pub fn snapshot(&self) -> Vec<(UnitId, Vec<Vec<u8>>)> {
        self.units
            .iter()
            .map(|(unit, log)| (*unit, log.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.units.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
