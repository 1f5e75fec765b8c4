use serde::{Deserialize, Serialize};
use solv_core::{DeviceRuntime, ResidencyManager};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self {
            Verbosity::Quiet => log::LevelFilter::Warn,
            Verbosity::Normal => log::LevelFilter::Info,
            Verbosity::Verbose => log::LevelFilter::Debug,
            Verbosity::Debug => log::LevelFilter::Trace,
        }
    }
}

/// Journal settings injected into the solve driver and the residency
/// manager. Nothing here is process-wide until [`JournalConfig::init_logger`]
/// is called.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub verbosity: Verbosity,
    /// Log the residual of every iteration and the final residue of each solve.
    pub print_residuals: bool,
    /// Systems with fewer local rows are dumped at debug level.
    pub debug_dump_limit: usize,
    /// Log the duration of every device allocation, copy and free.
    pub clock: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            verbosity: Verbosity::Normal,
            print_residuals: false,
            debug_dump_limit: 20,
            clock: false,
        }
    }
}

impl JournalConfig {
    /// Installs `env_logger` at the journal's level. `RUST_LOG` still takes
    /// precedence. Calling it again once a logger is installed does nothing.
    pub fn init_logger(&self) {
        let default_filter = self.verbosity.level_filter().to_string().to_lowercase();
        let result = env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(default_filter),
        )
        .filter_module("wgpu", log::LevelFilter::Off)
        .filter_module("naga", log::LevelFilter::Off)
        .try_init();
        if result.is_err() {
            log::debug!("Logger already initialised, journal level left unchanged");
        }
    }

    /// Verbosity handed to the iterative solver.
    pub fn solver_verbosity(&self) -> u8 {
        if self.print_residuals {
            2
        } else if matches!(self.verbosity, Verbosity::Verbose | Verbosity::Debug) {
            1
        } else {
            0
        }
    }

    /// Residency manager over `runtime`, honouring the clock flag.
    pub fn residency_manager(&self, runtime: Option<Arc<dyn DeviceRuntime>>) -> ResidencyManager {
        let manager = match runtime {
            Some(runtime) => ResidencyManager::with_runtime(runtime),
            None => ResidencyManager::host_only(),
        };
        manager.with_clock(self.clock)
    }
}
