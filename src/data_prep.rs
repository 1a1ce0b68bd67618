//! Data Preparation (C2): lifts a raw relational payload (spec §6) into a
//! validated [`ProblemModel`] plus a diagnostics record. Per-record
//! failures are logged and dropped; the pipeline itself never aborts on a
//! single bad record (spec §4.2).

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constraints::ConstraintsConfig;
use crate::error::ScheduleError;
use crate::model::{
    CourseId, Day, Exam, Invigilator, InvigilatorSource, Lock, ProblemModel, RegistrationType,
    Room, SlotGenerationMode, Student, StudentId, TimeSlot,
};

/// Raw wire representation of a single exam day (spec §6).
#[derive(Debug, Clone, Deserialize)]
pub struct RawSlot {
    pub id: Value,
    pub start_time: String,
    pub end_time: String,
    pub duration_minutes: u32,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExamDay {
    pub date: NaiveDate,
    pub slots: Vec<RawSlot>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExam {
    pub id: Value,
    pub course_id: Value,
    #[serde(default = "default_duration")]
    pub duration_minutes: u32,
    #[serde(default)]
    pub expected_students: u32,
    #[serde(default)]
    pub is_practical: bool,
    #[serde(default)]
    pub morning_only: bool,
    #[serde(default)]
    pub students: HashMap<String, String>,
    #[serde(default)]
    pub instructor_ids: Vec<Value>,
    #[serde(default)]
    pub prerequisite_exams: Vec<Value>,
    #[serde(default)]
    pub requires_projector: bool,
    #[serde(default)]
    pub requires_computers: bool,
    #[serde(default)]
    pub is_common: bool,
}

fn default_duration() -> u32 {
    180
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawRoom {
    pub id: Value,
    #[serde(default)]
    pub code: String,
    pub capacity: u32,
    #[serde(default)]
    pub exam_capacity: Option<u32>,
    #[serde(default)]
    pub has_computers: bool,
    #[serde(default)]
    pub has_projector: bool,
    #[serde(default)]
    pub overbookable: bool,
    #[serde(default)]
    pub max_inv_per_room: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStudent {
    pub id: Value,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawStaff {
    pub id: Value,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default = "default_true")]
    pub can_invigilate: bool,
    #[serde(default = "default_one")]
    pub max_concurrent_exams: u32,
    #[serde(default = "default_max_students")]
    pub max_students_per_exam: u32,
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

#[derive(Debug, Clone, Deserialize)]
pub struct RawCourseRegistration {
    pub student_id: Value,
    pub course_id: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawLock {
    pub exam_id: Value,
    #[serde(default)]
    pub time_slot_id: Option<Value>,
    #[serde(default)]
    pub room_ids: Option<Vec<Value>>,
    #[serde(default)]
    pub invigilator_ids: Option<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataset {
    pub session_id: Value,
    pub exam_period_start: NaiveDate,
    pub exam_period_end: NaiveDate,
    #[serde(default = "default_mode")]
    pub slot_generation_mode: SlotGenerationMode,
    pub exam_days: Vec<RawExamDay>,
    pub exams: Vec<RawExam>,
    pub rooms: Vec<RawRoom>,
    #[serde(default)]
    pub students: Vec<RawStudent>,
    #[serde(default)]
    pub invigilators: Vec<RawStaff>,
    #[serde(default)]
    pub staff: Vec<RawStaff>,
    #[serde(default)]
    pub course_registrations: Vec<RawCourseRegistration>,
    #[serde(default)]
    pub student_exam_mappings: HashMap<String, Vec<Value>>,
    #[serde(default)]
    pub locks: Vec<RawLock>,
    #[serde(default)]
    pub constraints: crate::constraints::ConstraintsConfig,
}

fn default_mode() -> SlotGenerationMode {
    SlotGenerationMode::Fixed
}

/// Diagnostics produced alongside the built model (supplements spec §4.2
/// with the prototype's validation-result shape, see SPEC_FULL.md §C.2).
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreparationDiagnostics {
    pub dropped_records: Vec<String>,
    pub tie_break_warnings: Vec<String>,
    pub staff_sourced_invigilators: usize,
    pub instructor_sourced_invigilators: usize,
    pub model_warnings: Vec<String>,
}

/// Parses a UUID from either a native UUID value or a canonical string;
/// rejects anything else (spec §4.2.1).
fn parse_uuid(value: &Value, context: &str) -> Result<Uuid, String> {
    match value {
        Value::String(s) => Uuid::parse_str(s).map_err(|e| format!("{context}: invalid uuid string '{s}': {e}")),
        _ => Err(format!("{context}: expected a uuid string, got {value}")),
    }
}

fn parse_time_to_minutes(s: &str) -> Option<u32> {
    let mut parts = s.split(':');
    let hh: u32 = parts.next()?.parse().ok()?;
    let mm: u32 = parts.next()?.parse().ok()?;
    Some(hh * 60 + mm)
}

/// Maps a raw payload into a validated [`ProblemModel`], the caller's
/// constraints configuration (spec §6's `constraints.rules`, untouched here
/// so the pipeline can resolve it against the model's registry), and
/// diagnostics.
pub fn prepare_dataset(
    raw: RawDataset,
) -> Result<(ProblemModel, ConstraintsConfig, PreparationDiagnostics), ScheduleError> {
    let mut diag = PreparationDiagnostics::default();
    let constraints_config = raw.constraints.clone();

    let session_id = parse_uuid(&raw.session_id, "session_id")
        .map_err(|message| ScheduleError::InputValidation { message })?;

    // --- Days and slots ---
    let mut days = Vec::new();
    let mut timeslots = Vec::new();
    for raw_day in &raw.exam_days {
        let day_id = Uuid::new_v4();
        let mut ordered = Vec::new();
        for raw_slot in &raw_day.slots {
            let slot_id = match parse_uuid(&raw_slot.id, "slot.id") {
                Ok(id) => id,
                Err(e) => {
                    diag.dropped_records.push(e);
                    continue;
                }
            };
            let (Some(start), Some(end)) = (
                parse_time_to_minutes(&raw_slot.start_time),
                parse_time_to_minutes(&raw_slot.end_time),
            ) else {
                diag.dropped_records
                    .push(format!("slot {slot_id}: unparseable start/end time"));
                continue;
            };
            ordered.push(slot_id);
            timeslots.push(TimeSlot {
                id: slot_id,
                day_id,
                name: raw_slot.name.clone(),
                start_minutes: start,
                end_minutes: end,
                duration_minutes: raw_slot.duration_minutes,
            });
        }
        ordered.sort_by_key(|sid| timeslots.iter().find(|t| &t.id == sid).unwrap().start_minutes);
        days.push(Day {
            id: day_id,
            date: raw_day.date,
            ordered_timeslots: ordered,
        });
    }

    // --- Rooms ---
    let mut rooms = Vec::new();
    for raw_room in &raw.rooms {
        let id = match parse_uuid(&raw_room.id, "room.id") {
            Ok(id) => id,
            Err(e) => {
                diag.dropped_records.push(e);
                continue;
            }
        };
        rooms.push(Room {
            id,
            code: raw_room.code.clone(),
            capacity: raw_room.capacity,
            exam_capacity: raw_room.exam_capacity.unwrap_or(raw_room.capacity),
            has_computers: raw_room.has_computers,
            has_projector: raw_room.has_projector,
            overbookable: raw_room.overbookable,
            max_inv_per_room: raw_room.max_inv_per_room.unwrap_or(1),
            adjacent_seat_pairs: vec![],
        });
    }

    // --- Students ---
    let mut students = Vec::new();
    for raw_student in &raw.students {
        let id = match parse_uuid(&raw_student.id, "student.id") {
            Ok(id) => id,
            Err(e) => {
                diag.dropped_records.push(e);
                continue;
            }
        };
        students.push(Student {
            id,
            department: raw_student.department.clone(),
        });
    }

    // --- Invigilator derivation: Staff ∪ Instructors-not-already-present, Staff wins (spec §4.2.3) ---
    // Tag `invigilators` records as Instructor-sourced first, then let a
    // later `staff` record with the same id overwrite it as Staff-sourced --
    // Staff takes precedence on id collision.
    let mut invigilators: HashMap<Uuid, Invigilator> = HashMap::new();
    let sourced_records = raw
        .invigilators
        .iter()
        .map(|r| (r, InvigilatorSource::Instructor))
        .chain(raw.staff.iter().map(|r| (r, InvigilatorSource::Staff)));
    for (raw_staff, source) in sourced_records {
        if !raw_staff.can_invigilate {
            continue;
        }
        let id = match parse_uuid(&raw_staff.id, "staff.id") {
            Ok(id) => id,
            Err(e) => {
                diag.dropped_records.push(e);
                continue;
            }
        };
        invigilators.insert(
            id,
            Invigilator {
                id,
                name: raw_staff.name.clone(),
                department: raw_staff.department.clone(),
                can_invigilate: true,
                max_concurrent_exams: raw_staff.max_concurrent_exams,
                max_students_per_exam: raw_staff.max_students_per_exam,
                max_daily_sessions: None,
                max_consecutive_sessions: None,
                unavailability: HashSet::new(),
                source,
            },
        );
    }
    for inv in invigilators.values() {
        match inv.source {
            InvigilatorSource::Staff => diag.staff_sourced_invigilators += 1,
            InvigilatorSource::Instructor => diag.instructor_sourced_invigilators += 1,
        }
    }

    // --- Exams ---
    let mut exams_by_id: HashMap<Uuid, Exam> = HashMap::new();
    for raw_exam in &raw.exams {
        let id = match parse_uuid(&raw_exam.id, "exam.id") {
            Ok(id) => id,
            Err(e) => {
                diag.dropped_records.push(e);
                continue;
            }
        };
        let course_id = match parse_uuid(&raw_exam.course_id, "exam.course_id") {
            Ok(id) => id,
            Err(e) => {
                diag.dropped_records.push(e);
                continue;
            }
        };
        let mut typed_students: HashMap<StudentId, RegistrationType> = HashMap::new();
        for (sid_str, reg_type_str) in &raw_exam.students {
            let Ok(sid) = Uuid::parse_str(sid_str) else {
                diag.dropped_records
                    .push(format!("exam {id}: invalid student id '{sid_str}'"));
                continue;
            };
            let reg_type = if reg_type_str.eq_ignore_ascii_case("carryover") {
                RegistrationType::Carryover
            } else {
                RegistrationType::Normal
            };
            typed_students.insert(sid, reg_type);
        }

        let instructor_ids: HashSet<Uuid> = raw_exam
            .instructor_ids
            .iter()
            .filter_map(|v| parse_uuid(v, "exam.instructor_ids").ok())
            .collect();
        let prerequisite_exams: HashSet<Uuid> = raw_exam
            .prerequisite_exams
            .iter()
            .filter_map(|v| parse_uuid(v, "exam.prerequisite_exams").ok())
            .collect();

        let exam = Exam {
            id,
            course_id,
            duration_minutes: raw_exam.duration_minutes,
            expected_students: raw_exam.expected_students,
            is_practical: raw_exam.is_practical,
            morning_only: raw_exam.morning_only,
            students: typed_students,
            instructor_ids,
            department_ids: vec![],
            faculty_ids: vec![],
            prerequisite_exams,
            requires_projector: raw_exam.requires_projector,
            requires_computers: raw_exam.requires_computers,
            is_common: raw_exam.is_common,
        };

        if exams_by_id.contains_key(&id) {
            diag.tie_break_warnings
                .push(format!("exam {id} provided twice; the later record wins"));
        }
        exams_by_id.insert(id, exam);
    }

    // --- Relation reconciliation: untyped student_exam_mappings merge (spec §4.2.5) ---
    for (student_str, exam_ids) in &raw.student_exam_mappings {
        let Ok(student_id) = Uuid::parse_str(student_str) else {
            diag.dropped_records
                .push(format!("student_exam_mappings: invalid student id '{student_str}'"));
            continue;
        };
        for exam_id_val in exam_ids {
            let Ok(exam_id) = parse_uuid(exam_id_val, "student_exam_mappings") else {
                continue;
            };
            if let Some(exam) = exams_by_id.get_mut(&exam_id) {
                // Idempotent: typed registrations (from exam.students) win.
                exam.students
                    .entry(student_id)
                    .or_insert(RegistrationType::Normal);
            }
        }
    }

    // --- Course registrations -> exams_for_student / courses_for_student indices ---
    let mut courses_for_student: HashMap<StudentId, HashSet<CourseId>> = HashMap::new();
    let mut course_to_students: HashMap<CourseId, HashSet<StudentId>> = HashMap::new();
    let mut known_student_ids: HashSet<StudentId> = students.iter().map(|s| s.id).collect();
    for reg in &raw.course_registrations {
        let (Ok(sid), Ok(cid)) = (
            parse_uuid(&reg.student_id, "course_registration.student_id"),
            parse_uuid(&reg.course_id, "course_registration.course_id"),
        ) else {
            diag.dropped_records
                .push("course_registration: invalid student or course id".to_string());
            continue;
        };
        courses_for_student.entry(sid).or_default().insert(cid);
        course_to_students.entry(cid).or_default().insert(sid);
        if known_student_ids.insert(sid) {
            students.push(Student {
                id: sid,
                department: None,
            });
        }
    }

    // Upward-adjust expected_students to at least the registered count (spec §3 invariant).
    for exam in exams_by_id.values_mut() {
        if (exam.students.len() as u32) > exam.expected_students {
            exam.expected_students = exam.students.len() as u32;
        }
    }

    // --- Phantom exam filter (spec §4.2.4) ---
    let before = exams_by_id.len();
    exams_by_id.retain(|_, exam| !exam.students.is_empty());
    let dropped_phantoms = before - exams_by_id.len();
    if dropped_phantoms > 0 {
        info!("dropped {dropped_phantoms} phantom exam(s) with no registered students");
    }
    if exams_by_id.is_empty() {
        return Err(ScheduleError::NoSchedulableExams);
    }

    let mut exams_for_student: HashMap<StudentId, HashSet<Uuid>> = HashMap::new();
    for exam in exams_by_id.values() {
        for sid in exam.students.keys() {
            exams_for_student.entry(*sid).or_default().insert(exam.id);
        }
    }

    // --- Locks ---
    let mut locks = Vec::new();
    for raw_lock in &raw.locks {
        let Ok(exam_id) = parse_uuid(&raw_lock.exam_id, "lock.exam_id") else {
            diag.dropped_records
                .push("lock: invalid exam_id".to_string());
            continue;
        };
        let time_slot_id = raw_lock
            .time_slot_id
            .as_ref()
            .and_then(|v| parse_uuid(v, "lock.time_slot_id").ok());
        let room_ids = raw_lock.room_ids.as_ref().map(|ids| {
            ids.iter()
                .filter_map(|v| parse_uuid(v, "lock.room_ids").ok())
                .collect::<Vec<_>>()
        });
        let invigilator_ids = raw_lock.invigilator_ids.as_ref().map(|ids| {
            ids.iter()
                .filter_map(|v| parse_uuid(v, "lock.invigilator_ids").ok())
                .collect::<Vec<_>>()
        });
        locks.push(Lock {
            exam_id,
            time_slot_id,
            room_ids,
            invigilator_ids,
        });
    }

    let exams: Vec<Exam> = exams_by_id.into_values().collect();
    let invigilators: Vec<Invigilator> = invigilators.into_values().collect();

    let (model, model_warnings) = ProblemModel::build(
        session_id,
        raw.slot_generation_mode,
        exams,
        rooms,
        days,
        timeslots,
        students,
        invigilators,
        locks,
        exams_for_student,
        courses_for_student,
    )?;
    diag.model_warnings = model_warnings.messages;

    Ok((model, constraints_config, diag))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_exams_after_phantom_filter_is_an_error() {
        let raw = RawDataset {
            session_id: Value::String(Uuid::new_v4().to_string()),
            exam_period_start: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            exam_period_end: NaiveDate::from_ymd_opt(2026, 1, 2).unwrap(),
            slot_generation_mode: SlotGenerationMode::Fixed,
            exam_days: vec![],
            exams: vec![RawExam {
                id: Value::String(Uuid::new_v4().to_string()),
                course_id: Value::String(Uuid::new_v4().to_string()),
                duration_minutes: 60,
                expected_students: 0,
                is_practical: false,
                morning_only: false,
                students: HashMap::new(),
                instructor_ids: vec![],
                prerequisite_exams: vec![],
                requires_projector: false,
                requires_computers: false,
                is_common: false,
            }],
            rooms: vec![],
            students: vec![],
            invigilators: vec![],
            staff: vec![],
            course_registrations: vec![],
            student_exam_mappings: HashMap::new(),
            locks: vec![],
            constraints: Default::default(),
        };
        let err = prepare_dataset(raw).unwrap_err();
        assert!(matches!(err, ScheduleError::NoSchedulableExams));
    }
}
