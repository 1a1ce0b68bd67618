//! Adaptive university exam timetabling core: lifts a relational dataset
//! into a validated problem model, predicts feasibility/runtime/quality,
//! prunes the candidate variable domain with a genetic filter, builds and
//! solves a mixed-integer model, and extracts a timetable from the result.

pub mod analyzer;
pub mod config;
pub mod constraints;
pub mod cp_model;
pub mod data_prep;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod ga_filter;
pub mod model;
pub mod pipeline;
pub mod solver_driver;

pub mod server;
