//! Candidate variable domains shared between the GA filter (C5) and the CP
//! model builder (C6). Building the full domain once here keeps both
//! components talking about the same (exam, room, slot) / (invigilator,
//! exam, room, slot) keys.

use std::collections::HashSet;

use crate::model::{ExamId, InvigilatorId, ProblemModel, RoomId, TimeSlotId};

pub type XKey = (ExamId, TimeSlotId);
pub type YKey = (ExamId, RoomId, TimeSlotId);
pub type UKey = (InvigilatorId, ExamId, RoomId, TimeSlotId);

/// Every (exam, slot) pair where the exam could start, i.e. where
/// `is_start_feasible` holds (spec §4.1, §4.6).
pub fn build_x_domain(model: &ProblemModel) -> HashSet<XKey> {
    let mut domain = HashSet::new();
    for exam in model.exams().values() {
        for slot in model.timeslots().values() {
            if model.is_start_feasible(exam.id, slot.id) {
                domain.insert((exam.id, slot.id));
            }
        }
    }
    domain
}

/// Every (exam, room, slot) triple where the exam could start at that slot
/// and the room could plausibly host it: has positive exam capacity, and
/// (when the exam demands them) computers/projector.
pub fn build_y_domain(model: &ProblemModel, x_domain: &HashSet<XKey>) -> HashSet<YKey> {
    let mut domain = HashSet::new();
    for &(exam_id, slot_id) in x_domain {
        let exam = &model.exams()[&exam_id];
        for room in model.rooms().values() {
            if room.exam_capacity == 0 {
                continue;
            }
            if exam.requires_computers && !room.has_computers {
                continue;
            }
            if exam.requires_projector && !room.has_projector {
                continue;
            }
            domain.insert((exam_id, room.id, slot_id));
        }
    }
    domain
}

/// Every (invigilator, exam, room, slot) quadruple where the invigilator
/// can invigilate and is not marked unavailable for that slot's day.
pub fn build_u_domain(model: &ProblemModel, y_domain: &HashSet<YKey>) -> HashSet<UKey> {
    let mut domain = HashSet::new();
    for &(exam_id, room_id, slot_id) in y_domain {
        let Some(day_id) = model.day_of(slot_id) else {
            continue;
        };
        let Some(day) = model.days().get(&day_id) else {
            continue;
        };
        let Some(slot) = model.timeslots().get(&slot_id) else {
            continue;
        };
        for inv in model.invigilators().values() {
            if !inv.can_invigilate {
                continue;
            }
            if inv.unavailability.contains(&(day.date, slot.name.clone())) {
                continue;
            }
            domain.insert((inv.id, exam_id, room_id, slot_id));
        }
    }
    domain
}

/// (exam_id, room_id, slot_id) triples pinned by a lock -- always kept,
/// never pruned (spec §4.5's "locked variables are forced critical").
pub fn locked_y_keys(model: &ProblemModel) -> HashSet<YKey> {
    let mut keys = HashSet::new();
    for lock in &model.locks {
        let Some(slot_id) = lock.time_slot_id else {
            continue;
        };
        if let Some(room_ids) = &lock.room_ids {
            for room_id in room_ids {
                keys.insert((lock.exam_id, *room_id, slot_id));
            }
        }
    }
    keys
}

pub fn locked_u_keys(model: &ProblemModel) -> HashSet<UKey> {
    let mut keys = HashSet::new();
    for lock in &model.locks {
        let Some(slot_id) = lock.time_slot_id else {
            continue;
        };
        let (Some(room_ids), Some(inv_ids)) = (&lock.room_ids, &lock.invigilator_ids) else {
            continue;
        };
        for room_id in room_ids {
            for inv_id in inv_ids {
                keys.insert((*inv_id, lock.exam_id, *room_id, slot_id));
            }
        }
    }
    keys
}
