use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("Cannot apply {event} while the task is in phase {phase}")]
    InvalidTransition { phase: TaskPhase, event: Event },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationType {
    FullLoad,
    Cdc,
    #[default]
    FullLoadAndCdc,
}

impl MigrationType {
    pub fn as_str(&self) -> &'static str {
        return match self {
            MigrationType::FullLoad => "full-load",
            MigrationType::Cdc => "cdc",
            MigrationType::FullLoadAndCdc => "full-load-and-cdc",
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StartType {
    StartReplication,
    ResumeProcessing,
    ReloadTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Ready,
    FullLoad,
    Cdc,
    Stopped { resume: Resume },
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    FullLoad,
    Cdc,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            TaskPhase::Ready => f.write_str("ready"),
            TaskPhase::FullLoad => f.write_str("full-load"),
            TaskPhase::Cdc => f.write_str("cdc"),
            TaskPhase::Stopped { .. } => f.write_str("stopped"),
            TaskPhase::Completed => f.write_str("completed"),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Start(StartType),
    FullLoadFinished { rows: u64 },
    Stop,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            Event::Start(start) => write!(f, "start ({start:?})"),
            Event::FullLoadFinished { rows } => write!(f, "full load finished ({rows} rows)"),
            Event::Stop => f.write_str("stop"),
        };
    }
}

/// Lifecycle of a replication task as seen from outside the service.
///
/// With `full-load-and-cdc` the task moves `full-load -> cdc` once the initial
/// copy is done, whatever the row count. Only a `reload-target` start takes a
/// task back to `full-load`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    pub migration_type: MigrationType,
    pub phase: TaskPhase,
    pub rows_loaded: u64,
}

impl ReplicationTask {
    pub fn new(migration_type: MigrationType) -> Self {
        return Self {
            migration_type,
            phase: TaskPhase::Ready,
            rows_loaded: 0,
        };
    }

    fn initial_phase(&self) -> TaskPhase {
        return match self.migration_type {
            MigrationType::Cdc => TaskPhase::Cdc,
            _ => TaskPhase::FullLoad,
        };
    }

    pub fn apply(&mut self, event: Event) -> Result<TaskPhase, Error> {
        let next = match (self.phase, event) {
            (TaskPhase::Ready, Event::Start(StartType::StartReplication)) => self.initial_phase(),
            (TaskPhase::Ready, Event::Start(StartType::ReloadTarget)) => self.initial_phase(),

            (TaskPhase::FullLoad, Event::FullLoadFinished { rows }) => {
                self.rows_loaded = rows;
                match self.migration_type {
                    MigrationType::FullLoadAndCdc => TaskPhase::Cdc,
                    _ => TaskPhase::Completed,
                }
            }

            (TaskPhase::FullLoad, Event::Stop) => TaskPhase::Stopped {
                resume: Resume::FullLoad,
            },
            (TaskPhase::Cdc, Event::Stop) => TaskPhase::Stopped {
                resume: Resume::Cdc,
            },

            (TaskPhase::Stopped { resume }, Event::Start(StartType::ResumeProcessing)) => {
                match resume {
                    Resume::FullLoad => TaskPhase::FullLoad,
                    Resume::Cdc => TaskPhase::Cdc,
                }
            }

            (
                TaskPhase::Stopped { .. } | TaskPhase::Completed | TaskPhase::Cdc,
                Event::Start(StartType::ReloadTarget),
            ) => {
                self.rows_loaded = 0;
                self.initial_phase()
            }

            (phase, event) => return Err(Error::InvalidTransition { phase, event }),
        };

        self.phase = next;
        return Ok(next);
    }
}
