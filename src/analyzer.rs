//! Pre-Solve Analyzer (C3): a deterministic, pure "pre-flight check" that
//! predicts feasibility, runtime and solution-quality envelopes from
//! structural metrics of a built [`ProblemModel`] (spec §4.3).

use std::collections::HashMap;

use log::info;
use serde::Serialize;

use crate::constraints::{ActiveConstraint, ConstraintType};
use crate::model::{ExamId, ProblemModel, RoomId, StudentId, TimeSlotId};

#[derive(Debug, Clone, Serialize)]
pub struct FeasibilityPrediction {
    pub likelihood: String,
    pub critical_issues: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimePrediction {
    pub expected_duration: String,
    pub complexity_score: f64,
    pub key_drivers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityPrediction {
    pub expected_quality: String,
    pub potential_issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub feasibility: FeasibilityPrediction,
    pub runtime: RuntimePrediction,
    pub quality: QualityPrediction,
    pub summary: String,
}

struct BaseMetrics {
    num_exams: usize,
    num_students: usize,
    num_rooms: usize,
    num_timeslots: usize,
    num_invigilators: usize,
    num_locks: usize,
    student_density: f64,
    seat_pressure_ratio: f64,
    active_soft_constraints: usize,
}

/// Runs the full analysis. Deterministic and side-effect free: the same
/// model and active-constraint set always yield a byte-equal report
/// modulo the non-deterministic fields of this very report (there are
/// none -- every field is computed from the model).
pub fn analyze(model: &ProblemModel, active: &[ActiveConstraint]) -> AnalysisReport {
    info!("--- Starting Pre-Solve Analysis ---");
    let metrics = calculate_base_metrics(model, active);
    let feasibility = analyze_feasibility(model, &metrics);
    let runtime = estimate_runtime(model, &metrics);
    let quality = predict_solution_quality(active, &metrics);
    let summary = format!(
        "Analysis complete. Feasibility is rated '{}'. Expected runtime is '{}' based on a complexity score of {:.0}. Anticipated solution quality is '{}'.",
        feasibility.likelihood, runtime.expected_duration, runtime.complexity_score, quality.expected_quality
    );
    info!("--- Pre-Solve Analysis Complete ---");
    AnalysisReport {
        feasibility,
        runtime,
        quality,
        summary,
    }
}

fn calculate_base_metrics(model: &ProblemModel, active: &[ActiveConstraint]) -> BaseMetrics {
    let num_exams = model.exams().len();
    let num_students = model.students().len();
    let num_rooms = model.rooms().len();
    let num_timeslots = model.timeslots().len();
    let num_invigilators = model.invigilators().len();

    let total_registrations: usize = model.exams().values().map(|e| e.students.len()).sum();
    let total_exam_minutes: u64 = model
        .exams()
        .values()
        .map(|e| e.students.len() as u64 * e.duration_minutes as u64)
        .sum();
    let total_slot_minutes: u64 = model
        .timeslots()
        .values()
        .map(|t| t.duration_minutes as u64)
        .sum();

    let student_density = if total_slot_minutes > 0 && num_students > 0 {
        total_exam_minutes as f64 / (total_slot_minutes as f64 * num_students as f64)
    } else {
        0.0
    };

    let total_seat_capacity: u64 = model.rooms().values().map(|r| r.exam_capacity as u64).sum();
    let total_student_demand: u64 = model
        .exams()
        .values()
        .map(|e| e.expected_students as u64)
        .sum();
    let seat_pressure_ratio = if total_seat_capacity > 0 && num_timeslots > 0 {
        total_student_demand as f64 / (total_seat_capacity as f64 * num_timeslots as f64)
    } else {
        f64::INFINITY
    };

    let active_soft_constraints = active
        .iter()
        .filter(|a| a.constraint_type == ConstraintType::Soft)
        .count();

    let _ = total_registrations;
    BaseMetrics {
        num_exams,
        num_students,
        num_rooms,
        num_timeslots,
        num_invigilators,
        num_locks: model.locks.len(),
        student_density,
        seat_pressure_ratio,
        active_soft_constraints,
    }
}

fn analyze_feasibility(model: &ProblemModel, metrics: &BaseMetrics) -> FeasibilityPrediction {
    let mut critical_issues = Vec::new();
    let mut warnings = Vec::new();

    for exam in model.exams().values() {
        let has_feasible_start = model
            .timeslots()
            .keys()
            .any(|slot_id| model.is_start_feasible(exam.id, *slot_id));
        if !has_feasible_start {
            critical_issues.push(format!(
                "Exam '{}' (duration: {} min) is too long to fit into any single day's schedule.",
                exam.id, exam.duration_minutes
            ));
        }
    }

    if model.rooms().is_empty() {
        critical_issues
            .push("No rooms are defined in the dataset. Cannot schedule any exams.".to_string());
    }

    analyze_locks(model, &mut critical_issues);

    if metrics.seat_pressure_ratio > 0.9 {
        warnings.push(format!(
            "Seat pressure ratio is very high ({:.2}). Room capacity is extremely tight, increasing difficulty.",
            metrics.seat_pressure_ratio
        ));
    }
    if metrics.student_density > 0.3 {
        warnings.push(format!(
            "Student density is high ({:.2}). Student schedules are very constrained, making conflicts hard to avoid.",
            metrics.student_density
        ));
    }

    let likelihood = if !critical_issues.is_empty() {
        "Very Low / Infeasible".to_string()
    } else if metrics.seat_pressure_ratio > 1.0 {
        critical_issues.push(
            "Overall student demand exceeds total available seat-hours. A feasible solution is impossible without reducing demand or increasing capacity/time.".to_string(),
        );
        "Very Low / Infeasible".to_string()
    } else if warnings.len() >= 2 || metrics.num_locks as f64 > metrics.num_exams as f64 * 0.5 {
        "Low".to_string()
    } else if warnings.len() == 1 {
        "Medium".to_string()
    } else {
        "High".to_string()
    };

    FeasibilityPrediction {
        likelihood,
        critical_issues,
        warnings,
    }
}

fn analyze_locks(model: &ProblemModel, critical_issues: &mut Vec<String>) {
    let mut locks_by_slot_room: HashMap<(TimeSlotId, RoomId), ExamId> = HashMap::new();
    let mut locks_by_slot_student: HashMap<(TimeSlotId, StudentId), ExamId> = HashMap::new();

    for lock in &model.locks {
        let Some(slot_id) = lock.time_slot_id else {
            continue;
        };
        let Some(exam) = model.exams().get(&lock.exam_id) else {
            continue;
        };

        for room_id in lock.room_ids.iter().flatten() {
            if let Some(&other_exam) = locks_by_slot_room.get(&(slot_id, *room_id)) {
                critical_issues.push(format!(
                    "Lock Conflict: Exam '{}' and Exam '{}' are both locked into the same room ('{}') at the same time.",
                    exam.id, other_exam, room_id
                ));
            }
            locks_by_slot_room.insert((slot_id, *room_id), exam.id);
        }

        for student_id in exam.students.keys() {
            if let Some(&other_exam) = locks_by_slot_student.get(&(slot_id, *student_id)) {
                critical_issues.push(format!(
                    "Lock Conflict: A student is registered for both Exam '{}' and Exam '{}', which are locked into the same timeslot.",
                    exam.id, other_exam
                ));
            }
            locks_by_slot_student.insert((slot_id, *student_id), exam.id);
        }
    }
}

fn estimate_runtime(model: &ProblemModel, metrics: &BaseMetrics) -> RuntimePrediction {
    let mut key_drivers = Vec::new();

    let num_x = metrics.num_exams as f64 * metrics.num_timeslots as f64;
    let avg_exams_per_slot = if metrics.num_timeslots > 0 {
        metrics.num_exams as f64 / metrics.num_timeslots as f64
    } else {
        0.0
    };
    let num_y_per_group = avg_exams_per_slot * metrics.num_rooms as f64;
    let num_u_per_group = metrics.num_invigilators as f64 * metrics.num_rooms as f64;

    let mut score = num_x * 0.1
        + num_y_per_group * metrics.num_timeslots as f64 * 0.4
        + num_u_per_group * metrics.num_timeslots as f64 * 0.5;

    key_drivers.push(format!("Phase 1 variables (starts): ~{}", num_x as u64));
    key_drivers.push(format!(
        "Phase 2 variables (room/invigilator assignments): ~{} per start-time group",
        (num_y_per_group + num_u_per_group) as u64
    ));

    score *= 1.0 + metrics.student_density;
    score *= 1.0 + metrics.active_soft_constraints as f64 * 0.05;

    let expected_duration = if score > 5_000_000.0 {
        "Very Long"
    } else if score > 1_000_000.0 {
        "Long"
    } else if score > 200_000.0 {
        "Medium"
    } else {
        "Short"
    };

    let _ = model;
    RuntimePrediction {
        expected_duration: expected_duration.to_string(),
        complexity_score: score,
        key_drivers,
    }
}

fn predict_solution_quality(
    active: &[ActiveConstraint],
    metrics: &BaseMetrics,
) -> QualityPrediction {
    let active_codes: Vec<&str> = active
        .iter()
        .filter(|a| a.constraint_type == ConstraintType::Soft)
        .map(|a| a.code)
        .collect();

    if active_codes.is_empty() {
        return QualityPrediction {
            expected_quality: "Excellent".to_string(),
            potential_issues: vec![
                "No active soft constraints; solution will be feasible but not optimized for any quality metrics.".to_string(),
            ],
        };
    }

    let mut pressure_points = 0u32;
    let mut potential_issues = Vec::new();

    if active_codes.contains(&crate::constraints::MINIMUM_GAP) && metrics.student_density > 0.25 {
        potential_issues.push(
            "High student density will likely force many back-to-back exams, violating the 'Minimum Gap' preference.".to_string(),
        );
        pressure_points += 2;
    }
    if active_codes.contains(&crate::constraints::MAX_EXAMS_PER_STUDENT_PER_DAY)
        && metrics.student_density > 0.3
    {
        potential_issues.push(
            "High student density may lead to students having more than the preferred max exams per day.".to_string(),
        );
        pressure_points += 2;
    }
    if active_codes.contains(&crate::constraints::INVIGILATOR_LOAD_BALANCE)
        && metrics.num_invigilators < metrics.num_rooms
    {
        potential_issues.push(
            "Fewer invigilators than rooms suggests workload balance will be difficult to achieve.".to_string(),
        );
        pressure_points += 1;
    }
    if active_codes.contains(&crate::constraints::ROOM_FIT_PENALTY)
        && metrics.seat_pressure_ratio < 0.5
    {
        potential_issues.push(
            "Low seat pressure with a room fit penalty active may result in inefficient space usage if not heavily weighted.".to_string(),
        );
        pressure_points += 1;
    }

    let expected_quality = if pressure_points >= 4 {
        "Poor"
    } else if pressure_points >= 2 {
        "Moderate"
    } else {
        "Good"
    };

    QualityPrediction {
        expected_quality: expected_quality.to_string(),
        potential_issues,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Day, Exam, Invigilator, InvigilatorSource, ProblemModel, Room, SlotGenerationMode, Student, TimeSlot};
    use std::collections::{HashMap as Map, HashSet};
    use uuid::Uuid;

    fn tiny_model() -> ProblemModel {
        let day_id = Uuid::new_v4();
        let slot_id = Uuid::new_v4();
        let room_id = Uuid::new_v4();
        let exam_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();

        let slot = TimeSlot {
            id: slot_id,
            day_id,
            name: "S1".into(),
            start_minutes: 0,
            end_minutes: 60,
            duration_minutes: 60,
        };
        let day = Day {
            id: day_id,
            date: chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            ordered_timeslots: vec![slot_id],
        };
        let room = Room {
            id: room_id,
            code: "R1".into(),
            capacity: 30,
            exam_capacity: 30,
            has_computers: false,
            has_projector: false,
            overbookable: false,
            max_inv_per_room: 1,
            adjacent_seat_pairs: vec![],
        };
        let mut students = Map::new();
        students.insert(student_id, crate::model::RegistrationType::Normal);
        let exam = Exam {
            id: exam_id,
            course_id: Uuid::new_v4(),
            duration_minutes: 60,
            expected_students: 1,
            is_practical: false,
            morning_only: false,
            students,
            instructor_ids: HashSet::new(),
            department_ids: vec![],
            faculty_ids: vec![],
            prerequisite_exams: HashSet::new(),
            requires_projector: false,
            requires_computers: false,
            is_common: false,
        };
        let invigilator = Invigilator {
            id: Uuid::new_v4(),
            name: "Inv".into(),
            department: None,
            can_invigilate: true,
            max_concurrent_exams: 1,
            max_students_per_exam: 50,
            max_daily_sessions: None,
            max_consecutive_sessions: None,
            unavailability: HashSet::new(),
            source: InvigilatorSource::Staff,
        };

        let mut exams_for_student = Map::new();
        exams_for_student.insert(student_id, HashSet::from([exam_id]));

        ProblemModel::build(
            Uuid::new_v4(),
            SlotGenerationMode::Fixed,
            vec![exam],
            vec![room],
            vec![day],
            vec![slot],
            vec![Student {
                id: student_id,
                department: None,
            }],
            vec![invigilator],
            vec![],
            exams_for_student,
            Map::new(),
        )
        .unwrap()
        .0
    }

    #[test]
    fn analysis_is_deterministic() {
        let model = tiny_model();
        let active = model.constraint_registry.resolve_defaults();
        let r1 = analyze(&model, &active);
        let r2 = analyze(&model, &active);
        assert_eq!(r1.feasibility.likelihood, r2.feasibility.likelihood);
        assert_eq!(r1.runtime.complexity_score, r2.runtime.complexity_score);
        assert_eq!(r1.summary, r2.summary);
    }

    #[test]
    fn high_likelihood_for_roomy_problem() {
        let model = tiny_model();
        let active = model.constraint_registry.resolve_defaults();
        let report = analyze(&model, &active);
        assert_eq!(report.feasibility.likelihood, "High");
    }
}
