//! Solver Driver (C7): wires a built CP model to HiGHs with the
//! reproducibility options the teacher's solver uses (spec §4.7, §5) --
//! single/fixed thread count, a seeded solver, and a wall-clock budget --
//! and maps the raw solve outcome onto the status vocabulary of spec §6.

use std::time::Instant;

use good_lp::{default_solver, Solution, SolverModel};
use log::{info, warn};

use crate::config::SolveOptions;
use crate::cp_model::BuiltModel;
use crate::error::{ScheduleError, ScheduleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Feasible,
    Infeasible,
    TimedOut,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SolveStatistics {
    pub elapsed_seconds: f64,
    pub variable_count: usize,
    pub constraint_count: usize,
    pub objective_value: f64,
}

pub struct DriverOutcome<S> {
    pub status: SolveStatus,
    pub solution: Option<S>,
    pub statistics: SolveStatistics,
}

/// Runs the solve. `time_limit_seconds` bounds HiGHs' own search; a
/// timeout with no incumbent becomes [`ScheduleError::SolverTimeout`], a
/// proven-infeasible result becomes [`ScheduleError::SolverInfeasible`].
pub fn solve(built: BuiltModel, options: &SolveOptions) -> ScheduleResult<DriverOutcome<impl Solution>> {
    let BuiltModel {
        variables,
        objective,
        constraints,
        ..
    } = built;

    let variable_count = variables.len();
    let constraint_count = constraints.len();
    let objective_for_eval = objective.clone();
    let start = Instant::now();

    info!(
        "starting HiGHs solve: {variable_count} variables, {constraint_count} constraints, seed={}, time_limit={}s, workers={}",
        options.seed, options.time_limit_seconds, options.workers
    );

    let mut model = variables
        .maximise(objective)
        .using(default_solver)
        .set_option("threads", options.workers.max(1) as i32)
        .set_option("random_seed", options.seed as i32)
        .set_option("time_limit", options.time_limit_seconds as f64)
        .set_option("log_to_console", "false");

    for c in constraints {
        model = model.with(c);
    }

    let solve_result = model.solve();
    let elapsed = start.elapsed();
    let elapsed_seconds = elapsed.as_secs_f64();

    match solve_result {
        Ok(solution) => {
            let objective_value = solution.eval(objective_for_eval);
            // HiGHs does not surface an optimal-vs-time-limited distinction
            // through good_lp's `Solution` trait; a solve that ran to (or
            // past) the configured budget is reported as Feasible rather
            // than Optimal, since optimality was never proven.
            let status = if elapsed_seconds >= options.time_limit_seconds as f64 - 0.05 {
                SolveStatus::Feasible
            } else {
                SolveStatus::Optimal
            };
            info!("HiGHs solve finished in {elapsed_seconds:.2}s with status {status:?}");
            Ok(DriverOutcome {
                status,
                solution: Some(solution),
                statistics: SolveStatistics {
                    elapsed_seconds,
                    variable_count,
                    constraint_count,
                    objective_value,
                },
            })
        }
        Err(good_lp::ResolutionError::Infeasible) => {
            warn!("HiGHs proved the problem infeasible after {elapsed_seconds:.2}s");
            Err(ScheduleError::SolverInfeasible)
        }
        Err(good_lp::ResolutionError::Unbounded) => Err(ScheduleError::Internal {
            message: "objective is unbounded -- a modeling defect, not a data problem".into(),
        }),
        Err(err) => {
            if elapsed_seconds >= options.time_limit_seconds as f64 {
                Err(ScheduleError::SolverTimeout {
                    elapsed_secs: elapsed_seconds,
                })
            } else {
                Err(ScheduleError::Internal {
                    message: format!("HiGHs returned an unexpected error: {err}"),
                })
            }
        }
    }
}
