use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Morning,
    Evening,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Morning => "morning",
            Period::Evening => "evening",
        }
    }

    pub fn parse(s: &str) -> Option<Period> {
        match s {
            "morning" => Some(Period::Morning),
            "evening" => Some(Period::Evening),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    Regular,
    Special,
}

impl RoomKind {
    /// Regular rooms seat one supervisor, special rooms (labs, oversized
    /// halls) seat two.
    pub fn required_supervisors(self) -> usize {
        match self {
            RoomKind::Regular => 1,
            RoomKind::Special => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Regular => "regular",
            RoomKind::Special => "special",
        }
    }

    pub fn parse(s: &str) -> Option<RoomKind> {
        match s {
            "regular" => Some(RoomKind::Regular),
            "special" => Some(RoomKind::Special),
            _ => None,
        }
    }
}

/// One room to be covered by a distribution run. `preassigned` names occupy
/// the room's leading seats before the fill step; the caller uses this to
/// carry a morning lead supervisor into the evening run unchanged.
#[derive(Debug, Clone)]
pub struct RoomRequest {
    pub name: String,
    pub kind: RoomKind,
    pub preassigned: Vec<String>,
}

impl RoomRequest {
    pub fn new(name: impl Into<String>, kind: RoomKind) -> Self {
        Self {
            name: name.into(),
            kind,
            preassigned: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub room: String,
    pub supervisors: Vec<String>,
}

/// Non-fatal warning: fewer distinct names than seats, some names were
/// seated more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortage {
    pub required: usize,
    pub available: usize,
}

#[derive(Debug, Clone)]
pub struct Distribution {
    pub assignments: Vec<Assignment>,
    pub shortage: Option<Shortage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistributeError {
    NoSupervisorsAvailable,
}

/// Assigns supervisors to rooms for one (day, period) run.
///
/// The pool is shuffled before allocation so repeated runs spread duty
/// fairly instead of always favoring the head of the roster. When `prior`
/// holds the same day's other-period assignments, names seated there are
/// excluded from the pool; the filtered pool is kept even when it is too
/// small to cover demand (the caller gets a `Shortage` instead of a silent
/// un-exclusion). Only when filtering would leave nothing at all does the
/// full pool come back into play, since every room must still be covered.
///
/// Regular rooms are filled before special rooms so that rooms needing a
/// second seat still find distinct names once the single-seat rooms are
/// done. The returned assignments follow the input `rooms` order.
pub fn distribute<R: Rng>(
    pool: &[String],
    rooms: &[RoomRequest],
    prior: Option<&[Assignment]>,
    rng: &mut R,
) -> Result<Distribution, DistributeError> {
    if pool.is_empty() {
        return Err(DistributeError::NoSupervisorsAvailable);
    }

    let excluded: HashSet<&str> = prior
        .unwrap_or_default()
        .iter()
        .flat_map(|a| a.supervisors.iter().map(String::as_str))
        .collect();

    let mut available: Vec<String> = pool
        .iter()
        .filter(|name| !excluded.contains(name.as_str()))
        .cloned()
        .collect();
    let fresh = available.len();
    if available.is_empty() {
        // Exclusion never wins over coverage: with every name excluded the
        // run would produce empty seats, so the full pool is reused.
        available = pool.to_vec();
    }
    available.shuffle(rng);

    let required: usize = rooms.iter().map(|r| r.kind.required_supervisors()).sum();
    let pinned: usize = rooms
        .iter()
        .map(|r| r.preassigned.len().min(r.kind.required_supervisors()))
        .sum();
    let shortage = if fresh + pinned < required {
        Some(Shortage {
            required,
            available: fresh + pinned,
        })
    } else {
        None
    };

    let mut used: HashSet<String> = HashSet::new();
    let mut filled: Vec<Option<Assignment>> = vec![None; rooms.len()];

    let regular_then_special = (0..rooms.len())
        .filter(|&i| rooms[i].kind == RoomKind::Regular)
        .chain((0..rooms.len()).filter(|&i| rooms[i].kind == RoomKind::Special));

    for idx in regular_then_special {
        let room = &rooms[idx];
        let seats = room.kind.required_supervisors();
        let mut supervisors: Vec<String> = Vec::with_capacity(seats);

        for name in room.preassigned.iter().take(seats) {
            used.insert(name.clone());
            supervisors.push(name.clone());
        }
        while supervisors.len() < seats {
            let pick = available
                .iter()
                .find(|name| !used.contains(*name))
                .unwrap_or(&available[0])
                .clone();
            used.insert(pick.clone());
            supervisors.push(pick);
        }

        filled[idx] = Some(Assignment {
            room: room.name.clone(),
            supervisors,
        });
    }

    Ok(Distribution {
        assignments: filled.into_iter().flatten().collect(),
        shortage,
    })
}

/// One stored seat of a supervision schedule, as read back from the
/// workspace database.
#[derive(Debug, Clone)]
pub struct SeatRow {
    pub day: String,
    pub period: Period,
    pub room: String,
    pub supervisor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionStats {
    pub total_seats: usize,
    pub morning_seats: usize,
    pub evening_seats: usize,
    pub per_supervisor: BTreeMap<String, usize>,
    pub per_day: BTreeMap<String, usize>,
    pub per_room: BTreeMap<String, usize>,
}

pub fn supervision_stats(rows: &[SeatRow]) -> SupervisionStats {
    let mut stats = SupervisionStats::default();
    for row in rows {
        stats.total_seats += 1;
        match row.period {
            Period::Morning => stats.morning_seats += 1,
            Period::Evening => stats.evening_seats += 1,
        }
        *stats
            .per_supervisor
            .entry(row.supervisor.clone())
            .or_insert(0) += 1;
        *stats.per_day.entry(row.day.clone()).or_insert(0) += 1;
        *stats.per_room.entry(row.room.clone()).or_insert(0) += 1;
    }
    stats
}
