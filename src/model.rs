//! The Problem Model (C1): a read-only, typed in-memory representation of
//! a single exam session, built once per solve. See spec §3 and §4.1.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constraints::ConstraintRegistry;
use crate::error::ScheduleError;

pub type ExamId = Uuid;
pub type RoomId = Uuid;
pub type TimeSlotId = Uuid;
pub type DayId = Uuid;
pub type StudentId = Uuid;
pub type InvigilatorId = Uuid;
pub type CourseId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationType {
    Normal,
    Carryover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotGenerationMode {
    Fixed,
    Flexible,
}

/// A scheduled sitting of a course; the atomic unit of assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exam {
    pub id: ExamId,
    pub course_id: CourseId,
    pub duration_minutes: u32,
    pub expected_students: u32,
    #[serde(default)]
    pub is_practical: bool,
    #[serde(default)]
    pub morning_only: bool,
    #[serde(default)]
    pub students: HashMap<StudentId, RegistrationType>,
    #[serde(default)]
    pub instructor_ids: HashSet<Uuid>,
    #[serde(default)]
    pub department_ids: Vec<Uuid>,
    #[serde(default)]
    pub faculty_ids: Vec<Uuid>,
    #[serde(default)]
    pub prerequisite_exams: HashSet<ExamId>,
    #[serde(default)]
    pub requires_projector: bool,
    #[serde(default)]
    pub requires_computers: bool,
    #[serde(default)]
    pub is_common: bool,
}

/// A physical room with capacity and feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub capacity: u32,
    pub exam_capacity: u32,
    #[serde(default)]
    pub has_computers: bool,
    #[serde(default)]
    pub has_projector: bool,
    #[serde(default)]
    pub overbookable: bool,
    #[serde(default = "default_max_inv_per_room")]
    pub max_inv_per_room: u32,
    #[serde(default)]
    pub adjacent_seat_pairs: Vec<(u32, u32)>,
}

fn default_max_inv_per_room() -> u32 {
    1
}

/// A contiguous interval within a day in which exams may start (fixed
/// mode) or be active (flexible mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlot {
    pub id: TimeSlotId,
    pub day_id: DayId,
    pub name: String,
    pub start_minutes: u32,
    pub end_minutes: u32,
    pub duration_minutes: u32,
}

/// An ordered, non-overlapping sequence of slots sharing a date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Day {
    pub id: DayId,
    pub date: NaiveDate,
    pub ordered_timeslots: Vec<TimeSlotId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvigilatorSource {
    Staff,
    Instructor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invigilator {
    pub id: InvigilatorId,
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default = "default_true")]
    pub can_invigilate: bool,
    #[serde(default = "default_one")]
    pub max_concurrent_exams: u32,
    #[serde(default = "default_max_students")]
    pub max_students_per_exam: u32,
    #[serde(default)]
    pub max_daily_sessions: Option<u32>,
    #[serde(default)]
    pub max_consecutive_sessions: Option<u32>,
    #[serde(default)]
    pub unavailability: HashSet<(NaiveDate, String)>,
    pub source: InvigilatorSource,
}

fn default_true() -> bool {
    true
}
fn default_one() -> u32 {
    1
}
fn default_max_students() -> u32 {
    50
}

/// An immutable constraint tying an exam to a specific slot, room set
/// and/or invigilator set. Locks never change during a solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub exam_id: ExamId,
    #[serde(default)]
    pub time_slot_id: Option<TimeSlotId>,
    #[serde(default)]
    pub room_ids: Option<Vec<RoomId>>,
    #[serde(default)]
    pub invigilator_ids: Option<Vec<InvigilatorId>>,
}

/// Non-fatal diagnostics recorded during model construction (spec §4.1).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelWarnings {
    pub messages: Vec<String>,
}

impl ModelWarnings {
    fn push(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!("{msg}");
        self.messages.push(msg);
    }
}

/// The read-only, validated Problem Model. Built once per solve by
/// [`ProblemModel::build`]; derived indices are computed eagerly and never
/// invalidated individually -- the whole model is rebuilt if inputs change.
pub struct ProblemModel {
    pub session_id: Uuid,
    pub slot_mode: SlotGenerationMode,
    exams: HashMap<ExamId, Exam>,
    rooms: HashMap<RoomId, Room>,
    timeslots: HashMap<TimeSlotId, TimeSlot>,
    days: HashMap<DayId, Day>,
    students: HashMap<StudentId, Student>,
    invigilators: HashMap<InvigilatorId, Invigilator>,
    pub locks: Vec<Lock>,
    pub constraint_registry: ConstraintRegistry,

    // Derived indices, built eagerly in `build`.
    day_of_slot: HashMap<TimeSlotId, DayId>,
    slot_index_in_day: HashMap<TimeSlotId, usize>,
    exams_for_student: HashMap<StudentId, HashSet<ExamId>>,
    courses_for_student: HashMap<StudentId, HashSet<CourseId>>,
    feasible_start_cache: HashMap<(ExamId, TimeSlotId), bool>,
}

impl ProblemModel {
    pub fn exams(&self) -> &HashMap<ExamId, Exam> {
        &self.exams
    }
    pub fn rooms(&self) -> &HashMap<RoomId, Room> {
        &self.rooms
    }
    pub fn timeslots(&self) -> &HashMap<TimeSlotId, TimeSlot> {
        &self.timeslots
    }
    pub fn days(&self) -> &HashMap<DayId, Day> {
        &self.days
    }
    pub fn students(&self) -> &HashMap<StudentId, Student> {
        &self.students
    }
    pub fn invigilators(&self) -> &HashMap<InvigilatorId, Invigilator> {
        &self.invigilators
    }

    pub fn students_for_exam(&self, exam_id: ExamId) -> HashSet<StudentId> {
        self.exams
            .get(&exam_id)
            .map(|e| e.students.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn courses_for_student(&self, student_id: StudentId) -> HashSet<CourseId> {
        self.courses_for_student
            .get(&student_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn exams_for_student(&self, student_id: StudentId) -> HashSet<ExamId> {
        self.exams_for_student
            .get(&student_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Every student id with at least one scheduled exam, whether or not the
    /// student also appears in `raw.students`/`raw.course_registrations`.
    pub fn all_student_ids(&self) -> HashSet<StudentId> {
        self.students
            .keys()
            .copied()
            .chain(self.exams_for_student.keys().copied())
            .collect()
    }

    pub fn day_of(&self, slot_id: TimeSlotId) -> Option<DayId> {
        self.day_of_slot.get(&slot_id).copied()
    }

    pub fn slot_index_in_day(&self, slot_id: TimeSlotId) -> Option<usize> {
        self.slot_index_in_day.get(&slot_id).copied()
    }

    /// True iff the contiguous slots in the slot's day starting at `slot_id`
    /// cover at least `duration_minutes(exam)` minutes. Computed once per
    /// (exam, slot) pair and cached (spec §4.1).
    pub fn is_start_feasible(&self, exam_id: ExamId, slot_id: TimeSlotId) -> bool {
        *self
            .feasible_start_cache
            .get(&(exam_id, slot_id))
            .unwrap_or(&false)
    }

    /// All timeslots covered if `exam_id` starts at `slot_id`, in day order,
    /// or `None` if the start is infeasible.
    pub fn occupied_slots(&self, exam_id: ExamId, slot_id: TimeSlotId) -> Option<Vec<TimeSlotId>> {
        if !self.is_start_feasible(exam_id, slot_id) {
            return None;
        }
        let exam = self.exams.get(&exam_id)?;
        let day_id = self.day_of(slot_id)?;
        let day = self.days.get(&day_id)?;
        let start_idx = self.slot_index_in_day(slot_id)?;
        let mut covered = Vec::new();
        let mut minutes_left = exam.duration_minutes as i64;
        for &sid in day.ordered_timeslots.iter().skip(start_idx) {
            if minutes_left <= 0 {
                break;
            }
            let ts = self.timeslots.get(&sid)?;
            covered.push(sid);
            minutes_left -= ts.duration_minutes as i64;
        }
        Some(covered)
    }

    pub fn longest_day_minutes(&self) -> u32 {
        self.days
            .values()
            .map(|d| {
                d.ordered_timeslots
                    .iter()
                    .filter_map(|sid| self.timeslots.get(sid))
                    .map(|ts| ts.duration_minutes)
                    .sum::<u32>()
            })
            .max()
            .unwrap_or(0)
    }

    /// Build and validate a model from its raw collections. Fails with
    /// `ModelConsistency` for the hard checks of spec §4.1 and records
    /// warnings for the soft ones.
    pub fn build(
        session_id: Uuid,
        slot_mode: SlotGenerationMode,
        exams: Vec<Exam>,
        rooms: Vec<Room>,
        days: Vec<Day>,
        timeslots: Vec<TimeSlot>,
        students: Vec<Student>,
        invigilators: Vec<Invigilator>,
        locks: Vec<Lock>,
        exams_for_student: HashMap<StudentId, HashSet<ExamId>>,
        courses_for_student: HashMap<StudentId, HashSet<CourseId>>,
    ) -> Result<(Self, ModelWarnings), ScheduleError> {
        let mut warnings = ModelWarnings::default();

        if exams.is_empty() || rooms.is_empty() || timeslots.is_empty() || days.is_empty() {
            return Err(ScheduleError::ModelConsistency {
                message: "an entity collection required for scheduling is empty".into(),
                entity_ids: vec![],
            });
        }

        for inv in &invigilators {
            if inv.max_students_per_exam == 0 {
                return Err(ScheduleError::ModelConsistency {
                    message: format!(
                        "invigilator {} has max_students_per_exam <= 0",
                        inv.id
                    ),
                    entity_ids: vec![inv.id],
                });
            }
        }

        let days_map: HashMap<DayId, Day> = days.into_iter().map(|d| (d.id, d)).collect();
        let timeslots_map: HashMap<TimeSlotId, TimeSlot> =
            timeslots.into_iter().map(|t| (t.id, t)).collect();

        let mut day_of_slot = HashMap::new();
        let mut slot_index_in_day = HashMap::new();
        for day in days_map.values() {
            let mut prev_end: Option<u32> = None;
            for (idx, sid) in day.ordered_timeslots.iter().enumerate() {
                let slot = timeslots_map.get(sid).ok_or_else(|| {
                    ScheduleError::ModelConsistency {
                        message: format!("day {} references unknown slot {}", day.id, sid),
                        entity_ids: vec![day.id, *sid],
                    }
                })?;
                if let Some(pe) = prev_end {
                    if slot.start_minutes < pe {
                        return Err(ScheduleError::ModelConsistency {
                            message: format!(
                                "slots in day {} overlap or are unordered",
                                day.id
                            ),
                            entity_ids: vec![day.id, *sid],
                        });
                    }
                }
                prev_end = Some(slot.end_minutes);
                day_of_slot.insert(*sid, day.id);
                slot_index_in_day.insert(*sid, idx);
            }
        }

        let rooms_map: HashMap<RoomId, Room> = rooms.into_iter().map(|r| (r.id, r)).collect();
        let students_map: HashMap<StudentId, Student> =
            students.into_iter().map(|s| (s.id, s)).collect();
        let invigilators_map: HashMap<InvigilatorId, Invigilator> =
            invigilators.into_iter().map(|i| (i.id, i)).collect();

        let longest_day: u32 = days_map
            .values()
            .map(|d| {
                d.ordered_timeslots
                    .iter()
                    .filter_map(|sid| timeslots_map.get(sid))
                    .map(|ts| ts.duration_minutes)
                    .sum::<u32>()
            })
            .max()
            .unwrap_or(0);

        let exams_map: HashMap<ExamId, Exam> = exams.into_iter().map(|e| (e.id, e)).collect();
        for exam in exams_map.values() {
            if exam.duration_minutes > longest_day {
                // Not a hard build-time error: the analyzer (C3) is the
                // layer that predicts infeasibility from structural
                // metrics, and the CP model's `starts == 1` completeness
                // constraint will make the solve itself prove infeasible
                // for this exam if no day can host it.
                warnings.push(format!(
                    "exam {} duration {} exceeds the longest available day ({} min); no slot will be feasible for it",
                    exam.id, exam.duration_minutes, longest_day
                ));
            }
            if (exam.students.len() as u32) > exam.expected_students {
                warnings.push(format!(
                    "exam {} has more registered students than expected_students; ignored by callers, the mapper upward-adjusts during preparation",
                    exam.id
                ));
            }
        }

        for lock in &locks {
            if !exams_map.contains_key(&lock.exam_id) {
                return Err(ScheduleError::ModelConsistency {
                    message: format!("lock references unknown exam {}", lock.exam_id),
                    entity_ids: vec![lock.exam_id],
                });
            }
            if let Some(sid) = lock.time_slot_id {
                if !timeslots_map.contains_key(&sid) {
                    return Err(ScheduleError::ModelConsistency {
                        message: format!("lock references unknown time slot {}", sid),
                        entity_ids: vec![lock.exam_id, sid],
                    });
                }
            }
            if let Some(room_ids) = &lock.room_ids {
                for rid in room_ids {
                    if !rooms_map.contains_key(rid) {
                        return Err(ScheduleError::ModelConsistency {
                            message: format!("lock references unknown room {}", rid),
                            entity_ids: vec![lock.exam_id, *rid],
                        });
                    }
                }
            }
        }
        validate_lock_pairs(&locks, &exams_map)?;

        let total_inv_capacity: u64 = invigilators_map
            .values()
            .map(|i| i.max_students_per_exam as u64 * i.max_concurrent_exams as u64)
            .sum();
        let total_expected: u64 = exams_map.values().map(|e| e.expected_students as u64).sum();
        if total_inv_capacity < total_expected {
            warnings.push(format!(
                "total invigilator student-capacity ({total_inv_capacity}) is below total expected students ({total_expected})"
            ));
        }

        let largest_room = rooms_map.values().map(|r| r.exam_capacity).max().unwrap_or(0);
        for exam in exams_map.values() {
            if exam.expected_students > largest_room {
                warnings.push(format!(
                    "exam {} expects {} students, more than the largest room's exam_capacity ({largest_room}); it must be split across rooms",
                    exam.id, exam.expected_students
                ));
            }
        }

        let mut model = ProblemModel {
            session_id,
            slot_mode,
            exams: exams_map,
            rooms: rooms_map,
            timeslots: timeslots_map,
            days: days_map,
            students: students_map,
            invigilators: invigilators_map,
            locks,
            constraint_registry: ConstraintRegistry::with_core_declarations(),
            day_of_slot,
            slot_index_in_day,
            exams_for_student,
            courses_for_student,
            feasible_start_cache: HashMap::new(),
        };
        model.build_feasibility_cache();
        Ok((model, warnings))
    }

    fn build_feasibility_cache(&mut self) {
        let mut cache = HashMap::new();
        for exam in self.exams.values() {
            for slot in self.timeslots.values() {
                let feasible = self.slot_covers_duration(slot.id, exam.duration_minutes);
                cache.insert((exam.id, slot.id), feasible);
            }
        }
        self.feasible_start_cache = cache;
    }

    fn slot_covers_duration(&self, slot_id: TimeSlotId, duration_minutes: u32) -> bool {
        let Some(day_id) = self.day_of_slot.get(&slot_id) else {
            return false;
        };
        let Some(day) = self.days.get(day_id) else {
            return false;
        };
        let Some(&start_idx) = self.slot_index_in_day.get(&slot_id) else {
            return false;
        };
        let mut covered = 0u32;
        for sid in day.ordered_timeslots.iter().skip(start_idx) {
            let Some(ts) = self.timeslots.get(sid) else {
                break;
            };
            covered += ts.duration_minutes;
            if covered >= duration_minutes {
                return true;
            }
        }
        false
    }
}

fn validate_lock_pairs(
    locks: &[Lock],
    exams: &HashMap<ExamId, Exam>,
) -> Result<(), ScheduleError> {
    for (i, a) in locks.iter().enumerate() {
        for b in locks.iter().skip(i + 1) {
            if a.time_slot_id.is_none() || a.time_slot_id != b.time_slot_id {
                continue;
            }
            if let (Some(a_rooms), Some(b_rooms)) = (&a.room_ids, &b.room_ids) {
                if a_rooms.iter().any(|r| b_rooms.contains(r)) {
                    return Err(ScheduleError::LockConflict {
                        message: format!(
                            "locks for exams {} and {} share a room at the same slot",
                            a.exam_id, b.exam_id
                        ),
                    });
                }
            }
            let a_students = exams.get(&a.exam_id).map(|e| &e.students);
            let b_students = exams.get(&b.exam_id).map(|e| &e.students);
            if let (Some(a_s), Some(b_s)) = (a_students, b_students) {
                if a_s.keys().any(|s| b_s.contains_key(s)) {
                    return Err(ScheduleError::LockConflict {
                        message: format!(
                            "locks for exams {} and {} share a student at the same slot",
                            a.exam_id, b.exam_id
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day_with_slots(date: NaiveDate, slot_minutes: &[(u32, u32)]) -> (Day, Vec<TimeSlot>) {
        let day_id = Uuid::new_v4();
        let mut slots = Vec::new();
        let mut ordered = Vec::new();
        for &(start, end) in slot_minutes {
            let id = Uuid::new_v4();
            ordered.push(id);
            slots.push(TimeSlot {
                id,
                day_id,
                name: format!("{start}-{end}"),
                start_minutes: start,
                end_minutes: end,
                duration_minutes: end - start,
            });
        }
        (
            Day {
                id: day_id,
                date,
                ordered_timeslots: ordered,
            },
            slots,
        )
    }

    #[test]
    fn feasibility_spans_contiguous_slots() {
        let (day, slots) = day_with_slots(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            &[(0, 60), (60, 120), (120, 180)],
        );
        let exam = Exam {
            id: Uuid::new_v4(),
            course_id: Uuid::new_v4(),
            duration_minutes: 150,
            expected_students: 2,
            is_practical: false,
            morning_only: false,
            students: HashMap::new(),
            instructor_ids: HashSet::new(),
            department_ids: vec![],
            faculty_ids: vec![],
            prerequisite_exams: HashSet::new(),
            requires_projector: false,
            requires_computers: false,
            is_common: false,
        };
        let room = Room {
            id: Uuid::new_v4(),
            code: "R1".into(),
            capacity: 10,
            exam_capacity: 10,
            has_computers: false,
            has_projector: false,
            overbookable: false,
            max_inv_per_room: 1,
            adjacent_seat_pairs: vec![],
        };
        let (model, _warnings) = ProblemModel::build(
            Uuid::new_v4(),
            SlotGenerationMode::Fixed,
            vec![exam.clone()],
            vec![room],
            vec![day],
            slots.clone(),
            vec![],
            vec![],
            vec![],
            HashMap::new(),
            HashMap::new(),
        )
        .unwrap();

        assert!(model.is_start_feasible(exam.id, slots[0].id));
        assert!(!model.is_start_feasible(exam.id, slots[1].id));
        assert!(!model.is_start_feasible(exam.id, slots[2].id));
    }

    #[test]
    fn empty_collection_fails_validation() {
        let err = ProblemModel::build(
            Uuid::new_v4(),
            SlotGenerationMode::Fixed,
            vec![],
            vec![],
            vec![],
            vec![],
            vec![],
            vec![],
            vec![],
            HashMap::new(),
            HashMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ScheduleError::ModelConsistency { .. }));
    }
}
