//! Solve-time configuration (spec §6): CLI flags layered over environment
//! variables, the way the teacher's CLI harness is expected to behave.

use log::info;

const DEFAULT_TIME_LIMIT_SECONDS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub seed: u64,
    pub time_limit_seconds: u64,
    pub workers: usize,
    pub use_ga_filter: bool,
}

impl Default for SolveOptions {
    fn default() -> Self {
        SolveOptions {
            seed: 1234,
            time_limit_seconds: DEFAULT_TIME_LIMIT_SECONDS,
            workers: 1,
            use_ga_filter: true,
        }
    }
}

impl SolveOptions {
    /// Merges CLI-supplied overrides with `SCHED_*` environment variables;
    /// CLI flags always win (spec §6).
    pub fn resolve(
        cli_seed: Option<u64>,
        cli_time_limit: Option<u64>,
        cli_workers: Option<usize>,
        cli_no_ga_filter: bool,
    ) -> Self {
        let mut opts = SolveOptions::default();

        if let Some(v) = env_u64("SCHED_SEED") {
            opts.seed = v;
        }
        if let Some(v) = env_u64("SCHED_TIME_LIMIT_SECONDS") {
            opts.time_limit_seconds = v;
        }
        if let Some(v) = env_u64("SCHED_WORKERS") {
            opts.workers = v as usize;
        }

        if let Some(seed) = cli_seed {
            opts.seed = seed;
        }
        if let Some(tl) = cli_time_limit {
            opts.time_limit_seconds = tl;
        }
        if let Some(w) = cli_workers {
            opts.workers = w;
        }
        if cli_no_ga_filter {
            opts.use_ga_filter = false;
        }

        info!(
            "solve options resolved: seed={} time_limit={}s workers={} ga_filter={}",
            opts.seed, opts.time_limit_seconds, opts.workers, opts.use_ga_filter
        );
        opts
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Resolves the log level the way `SCHED_LOG_LEVEL` is documented in spec
/// §6, falling back to `RUST_LOG`/`info` the way the teacher's
/// `env_logger::Builder::from_env` does.
pub fn init_logging() {
    let level = std::env::var("SCHED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
