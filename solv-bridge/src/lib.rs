//! `solv-bridge`: hands locally assembled, ghost-augmented sparse systems to a
//! distributed iterative solver.
//!
//! The [`SolveDriver`] renumbers owned items first, splits the matrix into
//! interior and ghost blocks, builds the halo-exchange schedule once per
//! structure, and gates every solution on its residual. Errors are returned;
//! [`fatal::exit_on_fatal`] is the one place that terminates the process.

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod fatal;
pub mod journal;
pub mod partition;
pub mod renumber;
pub mod schedule;

pub use config::SolverConfig;
pub use context::SolveContext;
pub use driver::{DriverStage, SolveDriver, SolveReport, StageTimings};
pub use error::{BridgeError, ConfigError, ErrorKind};
pub use journal::{JournalConfig, Verbosity};
pub use partition::{IndexLists, PartitionDescriptor};
pub use renumber::LocalRenumbering;
pub use schedule::CommSchedule;

/// Byte count with a binary unit, for transfer logs.
pub fn human_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = units[0];
    for &u in &units[1..] {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = u;
    }
    format!("{:.2} {}", value, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512.00 B");
        assert_eq!(human_size(2048), "2.00 KB");
        assert_eq!(human_size(3 * 1024 * 1024), "3.00 MB");
    }
}
