//! Pre-save checks for a proposed allocation.

use std::collections::{HashMap, HashSet};

use shared::{
    domain::{ProposedMember, UnitRow},
    protocol::ValidationReport,
};

/// Checks a proposed allocation against the rows it was built from.
///
/// Every unit ID may appear once across all groups, and every loaded ID must
/// be assigned somewhere. Both checks run to completion; the report carries
/// every problem found, duplicates first. IDs proposed but never loaded are
/// accepted.
pub fn validate(proposed: &[ProposedMember], loaded: &[UnitRow]) -> ValidationReport {
    let mut order: Vec<&str> = Vec::new();
    let mut rooms: HashMap<&str, Vec<&str>> = HashMap::new();
    for member in proposed {
        let id = member.unit.id.as_str();
        rooms
            .entry(id)
            .or_insert_with(|| {
                order.push(id);
                Vec::new()
            })
            .push(member.unit.room.as_str());
    }

    let mut errors = Vec::new();
    for id in &order {
        let found = &rooms[id];
        if found.len() > 1 {
            errors.push(format!("ID {id} is duplicated; rooms: {}", found.join(", ")));
        }
    }

    let mut reported = HashSet::new();
    for unit in loaded {
        if !rooms.contains_key(unit.id.as_str()) && reported.insert(unit.id.as_str()) {
            errors.push(format!("ID {} is missing; room: {}", unit.id, unit.room));
        }
    }

    ValidationReport { errors }
}
