//! Wires C2 through C8 together into the two operations the CLI and the
//! HTTP surface both expose: a full solve, and a pre-solve analysis only.

use serde::Serialize;
use uuid::Uuid;

use crate::analyzer::{self, AnalysisReport};
use crate::config::SolveOptions;
use crate::cp_model;
use crate::data_prep::{prepare_dataset, PreparationDiagnostics, RawDataset};
use crate::domain;
use crate::error::ScheduleError;
use crate::extractor::{self, ExamAssignment};
use crate::ga_filter::{self, GaFilterConfig};
use crate::solver_driver::{self, SolveStatistics, SolveStatus};

#[derive(Debug, Clone, Serialize)]
pub struct SolveOutput {
    pub session_id: Uuid,
    pub status: SolveStatus,
    pub statistics: SolveStatistics,
    pub assignments: Vec<ExamAssignment>,
    pub unassigned: Vec<Uuid>,
    pub diagnostics: PreparationDiagnostics,
}

/// Runs the full pipeline: prepare -> (GA filter) -> build -> solve -> extract.
pub fn solve_dataset(raw: RawDataset, options: &SolveOptions) -> Result<SolveOutput, ScheduleError> {
    let (model, constraints_config, diagnostics) = prepare_dataset(raw)?;
    let active = model.constraint_registry.resolve(&constraints_config);

    let x_domain_set = domain::build_x_domain(&model);
    let y_domain_set = domain::build_y_domain(&model, &x_domain_set);
    let u_domain_set = domain::build_u_domain(&model, &y_domain_set);

    let x_domain: Vec<_> = x_domain_set.into_iter().collect();
    let y_domain: Vec<_> = y_domain_set.into_iter().collect();
    let u_domain: Vec<_> = u_domain_set.into_iter().collect();

    let (viable_y, viable_u) = if options.use_ga_filter {
        let filtered = ga_filter::run(&model, &y_domain, &u_domain, &GaFilterConfig::default(), options.seed);
        (filtered.viable_y, filtered.viable_u)
    } else {
        (y_domain, u_domain)
    };

    let built = cp_model::build(&model, &active, &x_domain, &viable_y, &viable_u)?;
    let vars = built.vars.clone();
    let outcome = solver_driver::solve(built, options)?;

    let solution = outcome.solution.as_ref().ok_or_else(|| ScheduleError::Internal {
        message: "solver reported success with no solution attached".into(),
    })?;
    let extraction = extractor::extract(&model, &vars, solution);

    Ok(SolveOutput {
        session_id: model.session_id,
        status: outcome.status,
        statistics: outcome.statistics,
        assignments: extraction.assignments,
        unassigned: extraction.unassigned,
        diagnostics,
    })
}

/// Runs only the pre-solve analyzer (C3), skipping C5-C8 entirely.
pub fn analyze_dataset(raw: RawDataset) -> Result<AnalysisReport, ScheduleError> {
    let (model, constraints_config, _diag) = prepare_dataset(raw)?;
    let active = model.constraint_registry.resolve(&constraints_config);
    Ok(analyzer::analyze(&model, &active))
}
