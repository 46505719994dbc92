//! FarmBot daily sum-up
//!
//! For every sequence, the `n`-th "Starting <name>" log of the day is paired
//! with the `n`-th "Completed <name>" log. Paired starts count as completed
//! runs, the remaining starts as uncompleted ones.

use crate::LogRecord;
use chrono::{DateTime, Utc};
use greenhouse_core::FarmbotLogSumup;

/// Build the sum-up of the UTC day containing `now`
pub fn build_sumup(sequences: &[String], logs: &[LogRecord], now: DateTime<Utc>) -> FarmbotLogSumup {
    let today = now.date_naive();
    let todays: Vec<&LogRecord> = logs
        .iter()
        .filter(|log| log.updated_at.date_naive() == today)
        .collect();

    let mut sumup = FarmbotLogSumup::empty(now);

    for sequence in sequences {
        let starting = format!("Starting {sequence}");
        let completed = format!("Completed {sequence}");

        let starts = todays
            .iter()
            .filter(|log| log.message.contains(&starting))
            .count();
        let completions = todays
            .iter()
            .filter(|log| log.message.contains(&completed))
            .count();

        for run in 0..starts {
            if run < completions {
                sumup.completed_sequences.push(sequence.clone());
            } else {
                sumup.uncompleted_sequences.push(sequence.clone());
            }
        }
    }

    sumup.error_logs = todays
        .iter()
        .filter(|log| log.is_error())
        .map(|log| log.to_error_log())
        .collect();

    sumup
}
