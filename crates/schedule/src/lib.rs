//! Scheduled imperatives: token grammar, line extraction, cron core, and
//! the runner that composes them with page identity and persistence.
//!
//! The parser stays pure (tokens, warnings, next occurrence), the cron
//! stays pure (jobs + ticker + handlers); only the runner knows about
//! pages and the state file.

pub mod cron;
pub mod imperative;
pub mod persist;
pub mod runner;
pub mod token;

use thiserror::Error;

pub use cron::{Cron, Job, JobHandler};
pub use imperative::{extract, ExtractResult, Imperative, ImperativeKind, ParseWarning};
pub use runner::{ScheduleHandler, ScheduleRunner};
pub use token::{next_occurrence_filtered, parse_token, FilterToken, RelativeDay, ScheduleToken};

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("schedule parse error: {0}")]
    Parse(String),

    #[error("filter tokens have no occurrence of their own")]
    NoOccurrence,

    #[error("no candidate passed the schedule filters after {0} attempts")]
    FilterExhausted(u32),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state file error: {0}")]
    Persist(String),

    #[error("handler error: {0}")]
    Handler(String),
}
