//! CP Model Builder (C6): translates the Problem Model plus the GA-filtered
//! candidate domains into a linear model good_lp/HiGHs can solve (spec
//! §4.6). The spec's model is expressed in CP-SAT terms (`Z[e,s]` derived
//! occupancy, integer `alloc`); since the solver here is a MIP solver, `Z`
//! is kept as a derived `Expression` over the `X` binaries rather than a
//! fresh variable, and the one genuinely bilinear relationship -- room
//! occupancy (a binary) times seat allocation (an integer) -- is linearized
//! with an auxiliary `occ_alloc` variable (see [`build_occ_alloc`]).

use std::collections::HashMap;

use good_lp::{constraint, variable, Constraint, Expression, ProblemVariables, Variable};
use log::info;

use crate::constraints::{
    ActiveConstraint, ConstraintType, CARRYOVER_STUDENT_CONFLICT, DAILY_WORKLOAD_BALANCE,
    INSTRUCTOR_CONFLICT, INVIGILATOR_LOAD_BALANCE, LOCK_COMPLIANCE, MAX_EXAMS_PER_STUDENT_PER_DAY,
    MINIMUM_GAP, OVERBOOKING_PENALTY, PREFERENCE_SLOTS, PREREQUISITE_ORDER, ROOM_CAPACITY_HARD,
    ROOM_DURATION_HOMOGENEITY, ROOM_FIT_PENALTY, ROOM_SEQUENTIAL_USE, UNIFIED_STUDENT_CONFLICT,
};
use crate::domain::{locked_u_keys, locked_y_keys, UKey, XKey, YKey};
use crate::error::{ScheduleError, ScheduleResult};
use crate::model::{DayId, ExamId, InvigilatorId, ProblemModel, RoomId, TimeSlotId};

#[derive(Clone)]
pub struct CpVariables {
    pub x: HashMap<XKey, Variable>,
    pub y: HashMap<YKey, Variable>,
    pub u: HashMap<UKey, Variable>,
    pub alloc: HashMap<(ExamId, RoomId), Variable>,
    pub occ_alloc: HashMap<(ExamId, RoomId, TimeSlotId), Variable>,
}

pub struct BuiltModel {
    pub variables: ProblemVariables,
    pub vars: CpVariables,
    pub objective: Expression,
    pub constraints: Vec<Constraint>,
}

/// Builds the decision variables, hard constraints and weighted objective
/// for a single solve. `viable_y`/`viable_u` are the GA-filtered (or
/// fallback-filtered) candidate domains from C5; locked keys from
/// [`crate::domain`] are always included regardless of filtering.
pub fn build(
    model: &ProblemModel,
    active: &[ActiveConstraint],
    x_domain: &[XKey],
    viable_y: &[YKey],
    viable_u: &[UKey],
) -> ScheduleResult<BuiltModel> {
    if viable_y.is_empty() {
        return Err(ScheduleError::NoSchedulableExams);
    }

    let mut variables = ProblemVariables::new();
    let locked_y = locked_y_keys(model);
    let locked_u = locked_u_keys(model);

    let mut y_keys: Vec<YKey> = viable_y.to_vec();
    for &k in &locked_y {
        if !y_keys.contains(&k) {
            y_keys.push(k);
        }
    }
    let mut u_keys: Vec<UKey> = viable_u.to_vec();
    for &k in &locked_u {
        if !u_keys.contains(&k) {
            u_keys.push(k);
        }
    }

    let mut x: HashMap<XKey, Variable> = HashMap::new();
    for &key in x_domain {
        x.insert(key, variables.add(variable().binary()));
    }

    let mut y: HashMap<YKey, Variable> = HashMap::new();
    for &key in &y_keys {
        y.insert(key, variables.add(variable().binary()));
    }

    let mut u: HashMap<UKey, Variable> = HashMap::new();
    for &key in &u_keys {
        u.insert(key, variables.add(variable().binary()));
    }

    let mut alloc: HashMap<(ExamId, RoomId), Variable> = HashMap::new();
    for &(exam_id, room_id, _) in &y_keys {
        alloc.entry((exam_id, room_id)).or_insert_with(|| {
            let cap = model.rooms()[&room_id].exam_capacity as f64;
            variables.add(variable().integer().min(0.0).max(cap))
        });
    }

    let mut occ_alloc: HashMap<(ExamId, RoomId, TimeSlotId), Variable> = HashMap::new();
    for exam in model.exams().values() {
        let room_starts: std::collections::HashSet<(RoomId, TimeSlotId)> = y_keys
            .iter()
            .filter(|(e, _, _)| *e == exam.id)
            .map(|&(_, r, s)| (r, s))
            .collect();
        for (room_id, start_id) in room_starts {
            if let Some(occupied) = model.occupied_slots(exam.id, start_id) {
                let cap = model.rooms()[&room_id].exam_capacity as f64;
                for slot_id in occupied {
                    occ_alloc
                        .entry((exam.id, room_id, slot_id))
                        .or_insert_with(|| variables.add(variable().min(0.0).max(cap)));
                }
            }
        }
    }

    let vars = CpVariables {
        x,
        y,
        u,
        alloc,
        occ_alloc,
    };

    let mut constraints = Vec::new();
    let mut objective = Expression::from(0.0);

    add_start_and_room_linking(model, &vars, &mut constraints);
    add_allocation_constraints(model, &vars, &mut constraints);
    add_invigilator_linking(model, &vars, &mut constraints);

    for a in active {
        match a.code {
            ROOM_CAPACITY_HARD => add_room_capacity_per_slot(
                model,
                &vars,
                a,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            ROOM_SEQUENTIAL_USE => add_room_sequential_use(
                model,
                &vars,
                a,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            PREREQUISITE_ORDER => add_prerequisite_order(model, &vars, &mut constraints),
            LOCK_COMPLIANCE => add_lock_compliance(model, &vars, &mut constraints),
            UNIFIED_STUDENT_CONFLICT => add_student_conflict(
                model,
                &vars,
                a,
                false,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            CARRYOVER_STUDENT_CONFLICT => add_student_conflict(
                model,
                &vars,
                a,
                true,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            MAX_EXAMS_PER_STUDENT_PER_DAY => add_max_exams_per_day(
                model,
                &vars,
                a,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            MINIMUM_GAP => add_minimum_gap(model, &vars, a, &mut variables, &mut constraints, &mut objective),
            INVIGILATOR_LOAD_BALANCE => add_invigilator_load_balance(
                model,
                &vars,
                a,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            INSTRUCTOR_CONFLICT => add_instructor_conflict(model, &vars, a, &mut objective),
            PREFERENCE_SLOTS => add_preference_slots(model, &vars, a, &mut objective),
            DAILY_WORKLOAD_BALANCE => add_daily_workload_balance(
                model,
                &vars,
                a,
                &mut variables,
                &mut constraints,
                &mut objective,
            ),
            OVERBOOKING_PENALTY | ROOM_FIT_PENALTY => {
                add_capacity_utilization_term(model, &vars, a, &mut objective)
            }
            ROOM_DURATION_HOMOGENEITY => add_room_duration_homogeneity(model, &vars, a, &mut objective),
            _ => {}
        }
    }

    info!(
        "CP model built: {} X, {} Y, {} U, {} alloc, {} occ_alloc variables, {} hard constraints",
        x_domain.len(),
        vars.y.len(),
        vars.u.len(),
        vars.alloc.len(),
        vars.occ_alloc.len(),
        constraints.len()
    );

    Ok(BuiltModel {
        variables,
        vars,
        objective,
        constraints,
    })
}

fn morning_cutoff_index(model: &ProblemModel, day_id: DayId) -> usize {
    model
        .days()
        .get(&day_id)
        .map(|d| d.ordered_timeslots.len() / 2)
        .unwrap_or(0)
}

fn is_morning_start(model: &ProblemModel, slot_id: TimeSlotId) -> bool {
    let Some(day_id) = model.day_of(slot_id) else {
        return false;
    };
    let Some(idx) = model.slot_index_in_day(slot_id) else {
        return false;
    };
    idx < morning_cutoff_index(model, day_id)
}

/// Exactly one start per exam (`X`); at least one room when started; a
/// room may not be used for an exam that did not start at that slot.
fn add_start_and_room_linking(model: &ProblemModel, vars: &CpVariables, constraints: &mut Vec<Constraint>) {
    for exam in model.exams().values() {
        let starts: Expression = vars
            .x
            .iter()
            .filter(|((e, _), _)| *e == exam.id)
            .map(|(_, v)| *v)
            .sum();
        constraints.push(constraint!(starts == 1));

        if exam.morning_only {
            for (&(e, s), &v) in vars.x.iter().filter(|((e, _), _)| *e == exam.id) {
                let _ = e;
                if !is_morning_start(model, s) {
                    constraints.push(constraint!(v == 0));
                }
            }
        }
    }

    for (&(exam_id, _room_id, start_id), &y_var) in &vars.y {
        if let Some(&x_var) = vars.x.get(&(exam_id, start_id)) {
            constraints.push(constraint!(y_var <= x_var));
        }
    }

    for exam in model.exams().values() {
        for &(e, start_id) in vars.x.keys().filter(|(e, _)| *e == exam.id) {
            let rooms_sum: Expression = vars
                .y
                .iter()
                .filter(|((ye, _, ys), _)| *ye == e && *ys == start_id)
                .map(|(_, v)| *v)
                .sum();
            let x_var = vars.x[&(e, start_id)];
            constraints.push(constraint!(rooms_sum >= x_var));
        }
    }
}

/// `alloc[e,r]` sums to the exam's expected student count across every
/// room it uses; bounded above by `exam_capacity(r) * Y[e,r,s]` (already
/// linear -- the bound the spec states directly, §4.6).
fn add_allocation_constraints(model: &ProblemModel, vars: &CpVariables, constraints: &mut Vec<Constraint>) {
    for exam in model.exams().values() {
        let rooms_used: Vec<RoomId> = vars
            .alloc
            .keys()
            .filter(|(e, _)| *e == exam.id)
            .map(|(_, r)| *r)
            .collect();
        if rooms_used.is_empty() {
            continue;
        }
        let sum: Expression = rooms_used.iter().map(|r| vars.alloc[&(exam.id, *r)]).sum();
        constraints.push(constraint!(sum == exam.expected_students as f64));

        for &room_id in &rooms_used {
            let alloc_var = vars.alloc[&(exam.id, room_id)];
            let cap = model.rooms()[&room_id].exam_capacity as f64;
            let y_sum: Expression = vars
                .y
                .iter()
                .filter(|((e, r, _), _)| *e == exam.id && *r == room_id)
                .map(|(_, v)| *v)
                .sum();
            constraints.push(constraint!(alloc_var <= cap * y_sum));
        }
    }
}

/// Links `occ_alloc[e,r,slot]` to `alloc[e,r]` via the occupancy indicator
/// for that slot (the sum of `Y` variables whose occupied window covers
/// it). Standard McCormick bound for `binary * bounded-integer`:
/// `occ_alloc <= alloc`, `occ_alloc <= cap * occ_indicator`, and (when a
/// lower bound is needed) `occ_alloc >= alloc - cap * (1 - occ_indicator)`.
fn build_occ_alloc(
    model: &ProblemModel,
    vars: &CpVariables,
    exam_id: ExamId,
    room_id: RoomId,
    slot_id: TimeSlotId,
    constraints: &mut Vec<Constraint>,
) -> Option<Variable> {
    let occ_var = *vars.occ_alloc.get(&(exam_id, room_id, slot_id))?;
    let alloc_var = *vars.alloc.get(&(exam_id, room_id))?;
    let cap = model.rooms()[&room_id].exam_capacity as f64;

    let occ_indicator: Expression = vars
        .y
        .iter()
        .filter(|((e, r, start), _)| {
            *e == exam_id
                && *r == room_id
                && model
                    .occupied_slots(*e, *start)
                    .map(|o| o.contains(&slot_id))
                    .unwrap_or(false)
        })
        .map(|(_, v)| *v)
        .sum();

    constraints.push(constraint!(occ_var <= alloc_var));
    constraints.push(constraint!(occ_var <= cap * occ_indicator.clone()));
    constraints.push(constraint!(occ_var >= alloc_var - cap * (1.0 - occ_indicator)));
    Some(occ_var)
}

/// `ROOM_CAPACITY_HARD`: per (room, slot), allocated students across every
/// exam occupying that slot must not exceed `exam_capacity(room)` unless
/// the room is `overbookable`.
fn add_room_capacity_per_slot(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let mut by_room_slot: HashMap<(RoomId, TimeSlotId), Vec<(ExamId, RoomId, TimeSlotId)>> = HashMap::new();
    for &(exam_id, room_id, slot_id) in vars.occ_alloc.keys() {
        by_room_slot
            .entry((room_id, slot_id))
            .or_default()
            .push((exam_id, room_id, slot_id));
    }

    for ((room_id, slot_id), triples) in by_room_slot {
        let room = &model.rooms()[&room_id];
        if room.overbookable {
            continue;
        }
        let mut sum = Expression::from(0.0);
        for (exam_id, r, s) in triples {
            if let Some(v) = build_occ_alloc(model, vars, exam_id, r, s, constraints) {
                sum += v;
            }
        }
        let cap = room.exam_capacity as f64;
        match active.constraint_type {
            ConstraintType::Hard => constraints.push(constraint!(sum <= cap)),
            ConstraintType::Soft => {
                // overage >= sum - cap, overage >= 0: a real slack, not a bare penalty term.
                let overage = variables.add(variable().min(0.0));
                constraints.push(constraint!(overage >= sum - cap));
                *objective -= active.weight * overage;
            }
        }
    }
}

/// `ROOM_SEQUENTIAL_USE`: a room may host only one exam's occupied window
/// at a time -- the stricter reading decided in SPEC_FULL.md §D (no
/// zero-gap handover unless `allow_zero_gap_handover` is set).
fn add_room_sequential_use(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    // `allow_zero_gap_handover` is a no-op here by construction: occupancy
    // sets are computed per exam from its own start, so a handover at a
    // shared boundary slot is already the normal non-overlapping case.
    // The parameter is retained in the registry for forward compatibility
    // (see SPEC_FULL.md §D) but has no effect on this per-slot encoding.
    let mut by_room_slot: HashMap<(RoomId, TimeSlotId), Expression> = HashMap::new();
    for (&(exam_id, room_id, start_id), &y_var) in &vars.y {
        let Some(occupied) = model.occupied_slots(exam_id, start_id) else {
            continue;
        };
        for slot_id in occupied {
            *by_room_slot
                .entry((room_id, slot_id))
                .or_insert_with(|| Expression::from(0.0)) += y_var;
        }
    }

    for ((_room_id, _slot_id), sum) in by_room_slot {
        match active.constraint_type {
            ConstraintType::Hard => constraints.push(constraint!(sum <= 1)),
            ConstraintType::Soft => {
                let overage = variables.add(variable().min(0.0));
                constraints.push(constraint!(overage >= sum - 1.0));
                *objective -= active.weight * overage;
            }
        }
    }
}

/// `PREREQUISITE_ORDER`: a dependent exam must start no earlier than the
/// end of every prerequisite, expressed over day-ordinal + slot-index
/// pairs since slots are only ordered within a day.
fn add_prerequisite_order(model: &ProblemModel, vars: &CpVariables, constraints: &mut Vec<Constraint>) {
    for exam in model.exams().values() {
        for &prereq_id in &exam.prerequisite_exams {
            let Some(prereq) = model.exams().get(&prereq_id) else {
                continue;
            };
            for &(e, s) in vars.x.keys().filter(|(e, _)| *e == exam.id) {
                let Some(day_id) = model.day_of(s) else { continue };
                let Some(idx) = model.slot_index_in_day(s) else { continue };
                for &(pe, ps) in vars.x.keys().filter(|(pe, _)| *pe == prereq.id) {
                    let Some(p_day) = model.day_of(ps) else { continue };
                    let Some(p_idx) = model.slot_index_in_day(ps) else { continue };
                    let p_end_idx = p_idx + model.occupied_slots(pe, ps).map(|o| o.len()).unwrap_or(1) - 1;
                    let violates =
                        (p_day == day_id && p_end_idx >= idx) || day_order(model, p_day) > day_order(model, day_id);
                    if violates {
                        let xv = vars.x[&(e, s)];
                        let pv = vars.x[&(pe, ps)];
                        constraints.push(constraint!(xv + pv <= 1));
                    }
                }
            }
        }
    }
}

fn day_order(model: &ProblemModel, day_id: DayId) -> chrono::NaiveDate {
    model
        .days()
        .get(&day_id)
        .map(|d| d.date)
        .unwrap_or_else(|| chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap())
}

/// `LOCK_COMPLIANCE`: every locked (exam, slot[, rooms[, invigilators]])
/// combination is forced into the solution.
fn add_lock_compliance(model: &ProblemModel, vars: &CpVariables, constraints: &mut Vec<Constraint>) {
    for lock in &model.locks {
        let Some(slot_id) = lock.time_slot_id else { continue };
        if let Some(&x_var) = vars.x.get(&(lock.exam_id, slot_id)) {
            constraints.push(constraint!(x_var == 1));
        }
        if let Some(room_ids) = &lock.room_ids {
            for room_id in room_ids {
                if let Some(&y_var) = vars.y.get(&(lock.exam_id, *room_id, slot_id)) {
                    constraints.push(constraint!(y_var == 1));
                }
            }
            if let Some(inv_ids) = &lock.invigilator_ids {
                for room_id in room_ids {
                    for inv_id in inv_ids {
                        if let Some(&u_var) = vars.u.get(&(*inv_id, lock.exam_id, *room_id, slot_id)) {
                            constraints.push(constraint!(u_var == 1));
                        }
                    }
                }
            }
        }
    }
}

/// Every occupied room needs at least one invigilator (bound tightened by
/// `room.max_inv_per_room`); no invigilator covers more rooms at one slot
/// than `max_concurrent_exams` allows.
fn add_invigilator_linking(model: &ProblemModel, vars: &CpVariables, constraints: &mut Vec<Constraint>) {
    for (&(exam_id, room_id, start_id), &y_var) in &vars.y {
        let room = &model.rooms()[&room_id];
        let covering: Expression = vars
            .u
            .iter()
            .filter(|((_, e, r, s), _)| *e == exam_id && *r == room_id && *s == start_id)
            .map(|(_, v)| *v)
            .sum();
        constraints.push(constraint!(covering.clone() >= y_var));
        constraints.push(constraint!(covering <= room.max_inv_per_room as f64 * y_var));
    }

    for (&(inv_id, exam_id, room_id, start_id), &u_var) in &vars.u {
        if let Some(&y_var) = vars.y.get(&(exam_id, room_id, start_id)) {
            constraints.push(constraint!(u_var <= y_var));
        }
        let _ = inv_id;
    }

    let mut by_inv_slot: HashMap<(InvigilatorId, TimeSlotId), Expression> = HashMap::new();
    for (&(inv_id, exam_id, _room_id, start_id), &u_var) in &vars.u {
        let Some(occupied) = model.occupied_slots(exam_id, start_id) else {
            continue;
        };
        for slot_id in occupied {
            *by_inv_slot
                .entry((inv_id, slot_id))
                .or_insert_with(|| Expression::from(0.0)) += u_var;
        }
    }
    for ((inv_id, _slot_id), sum) in by_inv_slot {
        let max_concurrent = model.invigilators()[&inv_id].max_concurrent_exams as f64;
        constraints.push(constraint!(sum <= max_concurrent));
    }
}

/// `UNIFIED_STUDENT_CONFLICT` / `CARRYOVER_STUDENT_CONFLICT`: no student
/// (or, in the carryover case, no student with at least one carryover
/// registration) may occupy two exams at once.
fn add_student_conflict(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    carryover_only: bool,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let max_allowed = active
        .parameters
        .get("max_allowed_conflicts")
        .copied()
        .unwrap_or(0.0);

    for student_id in model.all_student_ids() {
        let exams = model.exams_for_student(student_id);
        if exams.len() < 2 {
            continue;
        }
        if carryover_only {
            let has_carryover = exams.iter().any(|e| {
                model
                    .exams()
                    .get(e)
                    .and_then(|ex| ex.students.get(&student_id))
                    .map(|rt| matches!(rt, crate::model::RegistrationType::Carryover))
                    .unwrap_or(false)
            });
            if !has_carryover {
                continue;
            }
        }

        let mut by_slot: HashMap<TimeSlotId, Expression> = HashMap::new();
        for &exam_id in &exams {
            for &(e, s) in vars.x.keys().filter(|(e, _)| *e == exam_id) {
                let Some(occupied) = model.occupied_slots(e, s) else { continue };
                let x_var = vars.x[&(e, s)];
                for slot_id in occupied {
                    *by_slot.entry(slot_id).or_insert_with(|| Expression::from(0.0)) += x_var;
                }
            }
        }

        for (_slot_id, sum) in by_slot {
            match active.constraint_type {
                ConstraintType::Hard => constraints.push(constraint!(sum <= 1)),
                ConstraintType::Soft => {
                    let overage = variables.add(variable().min(0.0));
                    constraints.push(constraint!(overage >= sum - (1.0 + max_allowed)));
                    *objective -= active.weight * overage;
                }
            }
        }
    }
}

/// `MAX_EXAMS_PER_STUDENT_PER_DAY` (soft): penalizes days where a student
/// sits more exams than `max_exams_per_day`.
fn add_max_exams_per_day(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let max_per_day = active.parameters.get("max_exams_per_day").copied().unwrap_or(2.0);

    for student_id in model.all_student_ids() {
        let exams = model.exams_for_student(student_id);
        let mut by_day: HashMap<DayId, Expression> = HashMap::new();
        for &exam_id in &exams {
            for &(e, s) in vars.x.keys().filter(|(e, _)| *e == exam_id) {
                let Some(day_id) = model.day_of(s) else { continue };
                let x_var = vars.x[&(e, s)];
                *by_day.entry(day_id).or_insert_with(|| Expression::from(0.0)) += x_var;
            }
        }
        for (_day_id, count) in by_day {
            let overflow = variables.add(variable().min(0.0));
            constraints.push(constraint!(overflow >= count - max_per_day));
            *objective -= active.weight * overflow;
        }
    }
}

/// `MINIMUM_GAP` (soft): for each student, penalizes scheduling two of
/// their exams on the same day closer together than `min_gap_slots`,
/// mirroring the teacher's back-to-back penalty-variable pattern.
fn add_minimum_gap(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let min_gap = active.parameters.get("min_gap_slots").copied().unwrap_or(1.0) as i64;

    for student_id in model.all_student_ids() {
        let exams: Vec<ExamId> = model.exams_for_student(student_id).into_iter().collect();
        for i in 0..exams.len() {
            for j in (i + 1)..exams.len() {
                let (a, b) = (exams[i], exams[j]);
                for &(ea, sa) in vars.x.keys().filter(|(e, _)| *e == a) {
                    let Some(day_a) = model.day_of(sa) else { continue };
                    let Some(idx_a) = model.slot_index_in_day(sa) else { continue };
                    let Some(occ_a) = model.occupied_slots(ea, sa) else { continue };
                    let end_idx_a = idx_a + occ_a.len().saturating_sub(1);
                    for &(eb, sb) in vars.x.keys().filter(|(e, _)| *e == b) {
                        let Some(day_b) = model.day_of(sb) else { continue };
                        if day_a != day_b {
                            continue;
                        }
                        let Some(idx_b) = model.slot_index_in_day(sb) else { continue };
                        let gap = (idx_b as i64) - (end_idx_a as i64) - 1;
                        let reverse_gap = (idx_a as i64) - (model
                            .slot_index_in_day(sb)
                            .map(|v| v as i64)
                            .unwrap_or(0))
                            - 1;
                        let too_close = (idx_b > idx_a && gap < min_gap) || (idx_a > idx_b && reverse_gap < min_gap);
                        if too_close {
                            let penalty = variables.add(variable().binary());
                            let xa = vars.x[&(ea, sa)];
                            let xb = vars.x[&(eb, sb)];
                            // penalty forced to 1 whenever both starts are chosen together,
                            // mirroring the teacher's back-to-back link-variable pattern.
                            constraints.push(constraint!(penalty >= xa + xb - 1.0));
                            *objective -= active.weight * penalty;
                        }
                    }
                }
            }
        }
    }
}

/// `INVIGILATOR_LOAD_BALANCE` (soft): penalizes deviation of each
/// invigilator's assigned exam count from the session average.
fn add_invigilator_load_balance(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let n_inv = model.invigilators().len().max(1) as f64;
    let total_slots: f64 = vars
        .u
        .keys()
        .map(|(_, e, r, s)| (*e, *r, *s))
        .collect::<std::collections::HashSet<_>>()
        .len() as f64;
    let mean_load = total_slots / n_inv;

    for inv_id in model.invigilators().keys().copied() {
        let count: Expression = vars
            .u
            .iter()
            .filter(|((i, _, _, _), _)| *i == inv_id)
            .map(|(_, v)| *v)
            .sum();
        let dev_above = variables.add(variable().min(0.0));
        let dev_below = variables.add(variable().min(0.0));
        constraints.push(constraint!(dev_above >= count.clone() - mean_load));
        constraints.push(constraint!(dev_below >= mean_load - count));
        *objective -= active.weight * (dev_above + dev_below);
    }
}

/// `INSTRUCTOR_CONFLICT` (soft): penalizes an invigilator drawn from the
/// instructor pool being assigned to an exam they themselves teach.
fn add_instructor_conflict(model: &ProblemModel, vars: &CpVariables, active: &ActiveConstraint, objective: &mut Expression) {
    for (&(inv_id, exam_id, _room_id, _start_id), &u_var) in &vars.u {
        let Some(exam) = model.exams().get(&exam_id) else { continue };
        if exam.instructor_ids.contains(&inv_id) {
            *objective -= active.weight * u_var;
        }
    }
}

/// `PREFERENCE_SLOTS` (soft): rewards morning starts for exams that are
/// not already forced into the morning by `morning_only`, mirroring the
/// teacher's morning-preference objective term.
fn add_preference_slots(model: &ProblemModel, vars: &CpVariables, active: &ActiveConstraint, objective: &mut Expression) {
    for (&(exam_id, start_id), &x_var) in &vars.x {
        let Some(exam) = model.exams().get(&exam_id) else { continue };
        if exam.morning_only {
            continue;
        }
        if is_morning_start(model, start_id) {
            *objective += active.weight * x_var;
        }
    }
}

/// `DAILY_WORKLOAD_BALANCE` (soft): penalizes deviation of each day's
/// exam count from the session average.
fn add_daily_workload_balance(
    model: &ProblemModel,
    vars: &CpVariables,
    active: &ActiveConstraint,
    variables: &mut ProblemVariables,
    constraints: &mut Vec<Constraint>,
    objective: &mut Expression,
) {
    let n_days = model.days().len().max(1) as f64;
    let total_exams = model.exams().len() as f64;
    let mean_per_day = total_exams / n_days;

    for day_id in model.days().keys().copied() {
        let count: Expression = vars
            .x
            .iter()
            .filter(|((_, s), _)| model.day_of(*s) == Some(day_id))
            .map(|(_, v)| *v)
            .sum();
        let dev_above = variables.add(variable().min(0.0));
        let dev_below = variables.add(variable().min(0.0));
        constraints.push(constraint!(dev_above >= count.clone() - mean_per_day));
        constraints.push(constraint!(dev_below >= mean_per_day - count));
        *objective -= active.weight * (dev_above + dev_below);
    }
}

/// `OVERBOOKING_PENALTY` / `ROOM_FIT_PENALTY` (soft): both minimize unused
/// seats (`exam_capacity(room) - allocated`) per the shared formula in
/// spec §4.4; they differ only in registered weight.
fn add_capacity_utilization_term(model: &ProblemModel, vars: &CpVariables, active: &ActiveConstraint, objective: &mut Expression) {
    for (&(exam_id, room_id), &alloc_var) in &vars.alloc {
        let cap = model.rooms()[&room_id].exam_capacity as f64;
        let y_sum: Expression = vars
            .y
            .iter()
            .filter(|((e, r, _), _)| *e == exam_id && *r == room_id)
            .map(|(_, v)| *v)
            .sum();
        *objective -= active.weight * (cap * y_sum - alloc_var);
    }
}

/// `ROOM_DURATION_HOMOGENEITY` (soft): rewards assigning a room to exams
/// whose duration is close to the average duration among exams that could
/// feasibly use that room -- a linear proxy for "don't mix a 3-hour final
/// with a 30-minute quiz in the same room" without needing pairwise terms.
fn add_room_duration_homogeneity(model: &ProblemModel, vars: &CpVariables, active: &ActiveConstraint, objective: &mut Expression) {
    let mut room_avg_duration: HashMap<RoomId, f64> = HashMap::new();
    let mut room_counts: HashMap<RoomId, u32> = HashMap::new();
    for &(exam_id, room_id, _) in vars.y.keys() {
        if let Some(exam) = model.exams().get(&exam_id) {
            *room_avg_duration.entry(room_id).or_insert(0.0) += exam.duration_minutes as f64;
            *room_counts.entry(room_id).or_insert(0) += 1;
        }
    }
    for (room_id, total) in room_avg_duration.iter_mut() {
        let n = *room_counts.get(room_id).unwrap_or(&1) as f64;
        *total /= n.max(1.0);
    }

    for (&(exam_id, room_id, _start_id), &y_var) in &vars.y {
        let Some(exam) = model.exams().get(&exam_id) else { continue };
        let avg = room_avg_duration.get(&room_id).copied().unwrap_or(exam.duration_minutes as f64);
        let deviation = (exam.duration_minutes as f64 - avg).abs();
        *objective -= active.weight * (deviation / 60.0) * y_var;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::ConstraintRegistry;
    use crate::domain::{build_x_domain, build_y_domain};
    use chrono::NaiveDate;
    use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};
    use uuid::Uuid;

    fn tiny_model() -> ProblemModel {
        let day_id = Uuid::new_v4();
        let slot_a = crate::model::TimeSlot {
            id: Uuid::new_v4(),
            day_id,
            name: "AM".into(),
            start_minutes: 0,
            end_minutes: 120,
            duration_minutes: 120,
        };
        let slot_b = crate::model::TimeSlot {
            id: Uuid::new_v4(),
            day_id,
            name: "PM".into(),
            start_minutes: 120,
            end_minutes: 240,
            duration_minutes: 120,
        };
        let day = crate::model::Day {
            id: day_id,
            date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            ordered_timeslots: vec![slot_a.id, slot_b.id],
        };
        let room = crate::model::Room {
            id: Uuid::new_v4(),
            code: "R1".into(),
            capacity: 30,
            exam_capacity: 30,
            has_computers: false,
            has_projector: false,
            overbookable: false,
            max_inv_per_room: 1,
            adjacent_seat_pairs: vec![],
        };
        let exam = crate::model::Exam {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            duration_minutes: 120,
            expected_students: 10,
            is_practical: false,
            morning_only: false,
            students: StdHashMap::new(),
            instructor_ids: StdHashSet::new(),
            department_ids: vec![],
            faculty_ids: vec![],
            prerequisite_exams: StdHashSet::new(),
            requires_projector: false,
            requires_computers: false,
            is_common: false,
        };
        ProblemModel::build(
            Uuid::new_v4(),
            crate::model::SlotGenerationMode::Fixed,
            vec![exam],
            vec![room],
            vec![day],
            vec![slot_a, slot_b],
            vec![],
            vec![],
            vec![],
            StdHashMap::new(),
            StdHashMap::new(),
        )
        .unwrap()
        .0
    }

    #[test]
    fn builds_a_feasible_tiny_model() {
        let model = tiny_model();
        let x_domain: Vec<_> = build_x_domain(&model).into_iter().collect();
        let y_domain: Vec<_> = build_y_domain(&model, &build_x_domain(&model)).into_iter().collect();
        let registry = ConstraintRegistry::with_core_declarations();
        let active = registry.resolve_defaults();
        let built = build(&model, &active, &x_domain, &y_domain, &[]).unwrap();
        assert!(!built.vars.x.is_empty());
        assert!(!built.vars.y.is_empty());
    }

    #[test]
    fn empty_y_domain_is_no_schedulable_exams() {
        let model = tiny_model();
        let registry = ConstraintRegistry::with_core_declarations();
        let active = registry.resolve_defaults();
        let err = build(&model, &active, &[], &[], &[]).unwrap_err();
        assert!(matches!(err, ScheduleError::NoSchedulableExams));
    }
}
