//! Integration tests for the seed scenarios of spec §8: exercises
//! `prepare -> build -> solve -> extract` end to end the way the teacher
//! tests a solver, rather than poking at individual functions.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use exam_scheduler::config::SolveOptions;
use exam_scheduler::constraints::{ActiveConstraint, ConstraintType, MINIMUM_GAP, UNIFIED_STUDENT_CONFLICT};
use exam_scheduler::cp_model;
use exam_scheduler::domain;
use exam_scheduler::error::ScheduleError;
use exam_scheduler::extractor::{self, AssignmentStatus};
use exam_scheduler::model::{
    Day, Exam, Invigilator, InvigilatorSource, Lock, ProblemModel, RegistrationType, Room,
    SlotGenerationMode, Student, TimeSlot,
};
use exam_scheduler::solver_driver;
use uuid::Uuid;

/// A single day with `n` equal-length slots starting at midnight.
fn day_with_slots(slot_minutes: u32, n: usize) -> (Day, Vec<TimeSlot>) {
    let day_id = Uuid::new_v4();
    let mut slots = Vec::new();
    let mut ordered = Vec::new();
    let mut start = 0u32;
    for i in 0..n {
        let id = Uuid::new_v4();
        slots.push(TimeSlot {
            id,
            day_id,
            name: format!("S{i}"),
            start_minutes: start,
            end_minutes: start + slot_minutes,
            duration_minutes: slot_minutes,
        });
        ordered.push(id);
        start += slot_minutes;
    }
    (
        Day {
            id: day_id,
            date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            ordered_timeslots: ordered,
        },
        slots,
    )
}

fn room(exam_capacity: u32) -> Room {
    Room {
        id: Uuid::new_v4(),
        code: format!("R-{exam_capacity}"),
        capacity: exam_capacity,
        exam_capacity,
        has_computers: false,
        has_projector: false,
        overbookable: false,
        max_inv_per_room: 1,
        adjacent_seat_pairs: vec![],
    }
}

fn invigilator() -> Invigilator {
    Invigilator {
        id: Uuid::new_v4(),
        name: "Staff".into(),
        department: None,
        can_invigilate: true,
        max_concurrent_exams: 4,
        max_students_per_exam: 200,
        max_daily_sessions: None,
        max_consecutive_sessions: None,
        unavailability: HashSet::new(),
        source: InvigilatorSource::Staff,
    }
}

fn exam(duration_minutes: u32, students: HashMap<Uuid, RegistrationType>) -> Exam {
    let expected = students.len() as u32;
    Exam {
        id: Uuid::new_v4(),
        course_id: Uuid::new_v4(),
        duration_minutes,
        expected_students: expected,
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
    }
}

struct Solved<S: good_lp::Solution> {
    model: ProblemModel,
    vars: cp_model::CpVariables,
    outcome: Result<solver_driver::DriverOutcome<S>, ScheduleError>,
}

fn solve(model: ProblemModel, active_override: Option<Vec<ActiveConstraint>>) -> Solved<impl good_lp::Solution> {
    let active = active_override.unwrap_or_else(|| model.constraint_registry.resolve_defaults());
    let x_domain_set = domain::build_x_domain(&model);
    let y_domain_set = domain::build_y_domain(&model, &x_domain_set);
    let u_domain_set = domain::build_u_domain(&model, &y_domain_set);
    let x_domain: Vec<_> = x_domain_set.into_iter().collect();
    let y_domain: Vec<_> = y_domain_set.into_iter().collect();
    let u_domain: Vec<_> = u_domain_set.into_iter().collect();

    let built = cp_model::build(&model, &active, &x_domain, &y_domain, &u_domain).expect("model should build");
    let vars = built.vars.clone();
    let options = SolveOptions {
        use_ga_filter: false,
        ..SolveOptions::default()
    };
    let outcome = solver_driver::solve(built, &options);
    Solved { model, vars, outcome }
}

#[test]
fn s1_minimal_feasible_both_exams_scheduled_optimally() {
    let (day, slots) = day_with_slots(60, 2);
    let r = room(2);
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();

    let e1 = exam(60, HashMap::from([(s1, RegistrationType::Normal)]));
    let e2 = exam(60, HashMap::from([(s2, RegistrationType::Normal)]));

    let mut exams_for_student = HashMap::new();
    exams_for_student.insert(s1, HashSet::from([e1.id]));
    exams_for_student.insert(s2, HashSet::from([e2.id]));

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1, e2],
        vec![r],
        vec![day],
        slots,
        vec![Student { id: s1, department: None }, Student { id: s2, department: None }],
        vec![invigilator()],
        vec![],
        exams_for_student,
        HashMap::new(),
    )
    .expect("model should build");

    let solved = solve(model, None);
    let outcome = solved.outcome.expect("S1 must be solvable");
    assert_eq!(outcome.status, solver_driver::SolveStatus::Optimal);
    let solution = outcome.solution.as_ref().unwrap();
    let extraction = extractor::extract(&solved.model, &solved.vars, solution);
    assert_eq!(extraction.summary.assigned_exams, 2);
    assert_eq!(extraction.summary.unassigned_exams, 0);
}

#[test]
fn s3_hard_capacity_splits_across_two_rooms() {
    let (day, slots) = day_with_slots(60, 1);
    let r_big = room(30);
    let r_small = room(20);

    let mut students = HashMap::new();
    for _ in 0..50 {
        students.insert(Uuid::new_v4(), RegistrationType::Normal);
    }
    let e1 = exam(60, students.clone());
    let exam_id = e1.id;

    let mut exams_for_student = HashMap::new();
    for sid in students.keys() {
        exams_for_student.insert(*sid, HashSet::from([exam_id]));
    }
    let student_rows = students.keys().map(|id| Student { id: *id, department: None }).collect();

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1],
        vec![r_big, r_small],
        vec![day],
        slots,
        student_rows,
        vec![invigilator()],
        vec![],
        exams_for_student,
        HashMap::new(),
    )
    .expect("model should build");

    let solved = solve(model, None);
    let outcome = solved.outcome.expect("S3 must be solvable");
    let solution = outcome.solution.as_ref().unwrap();
    let extraction = extractor::extract(&solved.model, &solved.vars, solution);

    let assignment = extraction.assignments.iter().find(|a| a.exam_id == exam_id).unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Assigned);
    let total: u32 = assignment.room_allocations.iter().map(|a| a.students).sum();
    assert_eq!(total, 50);
    let mut seats: Vec<u32> = assignment.room_allocations.iter().map(|a| a.students).collect();
    seats.sort_unstable();
    assert_eq!(seats, vec![20, 30]);
}

#[test]
fn s4_prerequisite_forces_order() {
    let (day, slots) = day_with_slots(60, 3);
    let r = room(10);

    let mut e1 = exam(60, HashMap::new());
    let mut e2 = exam(60, HashMap::new());
    e2.prerequisite_exams.insert(e1.id);
    // give both exams a registered student each so they are not phantom-filtered upstream;
    // the model builder itself does not filter phantoms, only data_prep does.
    let s1 = Uuid::new_v4();
    e1.students.insert(s1, RegistrationType::Normal);
    let s2 = Uuid::new_v4();
    e2.students.insert(s2, RegistrationType::Normal);
    e1.expected_students = 1;
    e2.expected_students = 1;

    let e1_id = e1.id;
    let e2_id = e2.id;

    let mut exams_for_student = HashMap::new();
    exams_for_student.insert(s1, HashSet::from([e1_id]));
    exams_for_student.insert(s2, HashSet::from([e2_id]));

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1, e2],
        vec![r],
        vec![day],
        slots,
        vec![Student { id: s1, department: None }, Student { id: s2, department: None }],
        vec![invigilator()],
        vec![],
        exams_for_student,
        HashMap::new(),
    )
    .expect("model should build");

    let solved = solve(model, None);
    let outcome = solved.outcome.expect("S4 must be solvable");
    let solution = outcome.solution.as_ref().unwrap();
    let extraction = extractor::extract(&solved.model, &solved.vars, solution);

    let start_of = |id: Uuid| -> usize {
        let a = extraction.assignments.iter().find(|a| a.exam_id == id).unwrap();
        let slot_id = a.start_slot_id.expect("exam should be assigned");
        solved.model.slot_index_in_day(slot_id).unwrap()
    };
    assert!(start_of(e1_id) < start_of(e2_id), "prerequisite must start strictly before its dependent");
}

#[test]
fn s5_lock_is_honored_exactly() {
    let (day, slots) = day_with_slots(60, 2);
    let r1 = room(10);
    let r1_id = r1.id;
    let locked_slot = slots[1].id;

    let e1 = exam(60, HashMap::new());
    let e1_id = e1.id;

    let lock = Lock {
        exam_id: e1_id,
        time_slot_id: Some(locked_slot),
        room_ids: Some(vec![r1_id]),
        invigilator_ids: None,
    };

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1],
        vec![r1],
        vec![day],
        slots,
        vec![],
        vec![invigilator()],
        vec![lock],
        HashMap::new(),
        HashMap::new(),
    )
    .expect("model should build");

    let solved = solve(model, None);
    let outcome = solved.outcome.expect("S5 must be solvable");
    let solution = outcome.solution.as_ref().unwrap();
    let extraction = extractor::extract(&solved.model, &solved.vars, solution);

    let assignment = extraction.assignments.iter().find(|a| a.exam_id == e1_id).unwrap();
    assert_eq!(assignment.start_slot_id, Some(locked_slot));
    assert_eq!(assignment.room_ids, vec![r1_id]);
}

#[test]
fn s6_infeasible_by_duration_is_unsolvable_and_flagged_by_the_analyzer() {
    // Only two 60-minute slots in the only day; a 240-minute exam cannot
    // start anywhere.
    let (day, slots) = day_with_slots(60, 2);
    let r = room(10);
    let e1 = exam(240, HashMap::new());
    let e1_id = e1.id;

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1],
        vec![r],
        vec![day],
        slots,
        vec![],
        vec![invigilator()],
        vec![],
        HashMap::new(),
        HashMap::new(),
    )
    .expect("model should build despite the unschedulable exam");

    let active = model.constraint_registry.resolve_defaults();
    let report = exam_scheduler::analyzer::analyze(&model, &active);
    assert_eq!(report.feasibility.likelihood, "Very Low / Infeasible");
    assert!(report.feasibility.critical_issues.iter().any(|msg| msg.contains(&e1_id.to_string())));

    // The exam has no feasible start anywhere, so the x/y domains come back
    // empty and the model builder rejects the solve before HiGHs ever runs --
    // there is nothing for a MIP solve to prove infeasible over.
    let x_domain: Vec<_> = domain::build_x_domain(&model).into_iter().collect();
    let y_domain: Vec<_> = domain::build_y_domain(&model, &domain::build_x_domain(&model)).into_iter().collect();
    let u_domain: Vec<_> = domain::build_u_domain(&model, &domain::build_y_domain(&model, &domain::build_x_domain(&model)))
        .into_iter()
        .collect();
    assert!(x_domain.is_empty(), "a 240-minute exam should have no feasible start in 60-minute slots");

    let err = cp_model::build(&model, &active, &x_domain, &y_domain, &u_domain).unwrap_err();
    assert!(matches!(err, ScheduleError::NoSchedulableExams));
}

#[test]
fn s2_forced_conflict_as_soft_both_scheduled_with_penalty() {
    let (day, slots) = day_with_slots(60, 2);
    let r = room(2);
    let shared_student = Uuid::new_v4();

    let e1 = exam(60, HashMap::from([(shared_student, RegistrationType::Normal)]));
    let e2 = exam(60, HashMap::from([(shared_student, RegistrationType::Normal)]));
    let e1_id = e1.id;
    let e2_id = e2.id;

    let mut exams_for_student = HashMap::new();
    exams_for_student.insert(shared_student, HashSet::from([e1_id, e2_id]));

    let (model, _warnings) = ProblemModel::build(
        Uuid::new_v4(),
        SlotGenerationMode::Fixed,
        vec![e1, e2],
        vec![r],
        vec![day],
        slots,
        vec![Student { id: shared_student, department: None }],
        vec![invigilator()],
        vec![],
        exams_for_student,
        HashMap::new(),
    )
    .expect("model should build");

    let mut active = model.constraint_registry.resolve_defaults();
    for rule in &mut active {
        if rule.code == UNIFIED_STUDENT_CONFLICT {
            rule.constraint_type = ConstraintType::Soft;
        }
        if rule.code == MINIMUM_GAP {
            rule.weight = 100.0;
        }
    }

    let solved = solve(model, Some(active));
    let outcome = solved.outcome.expect("S2 must be solvable with the conflict relaxed to soft");
    let solution = outcome.solution.as_ref().unwrap();
    let extraction = extractor::extract(&solved.model, &solved.vars, solution);

    assert_eq!(extraction.summary.assigned_exams, 2);
}
