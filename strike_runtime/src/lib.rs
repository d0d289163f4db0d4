//! Shared data contracts for the strike simulation.
//!
//! Status enums, immutable audit-record states and broadcast payloads live
//! here so that clients, persistence and the core engines in `strike_core`
//! agree on one wire shape without depending on each other's internals.
//! Probabilities are carried as raw fixed-point values (six decimal places,
//! `1_000_000 == 1.0`) so contracts stay exact across platforms.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Raw fixed-point scale shared with `strike_core::scalar::Chance`.
pub const CHANCE_SCALE: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchTrack {
    Missile,
    Defense,
    Intelligence,
}

impl ResearchTrack {
    pub const ALL: [ResearchTrack; 3] = [
        ResearchTrack::Missile,
        ResearchTrack::Defense,
        ResearchTrack::Intelligence,
    ];
}

/// The five named assembly slots of a missile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentSlot {
    Guidance,
    Propulsion,
    Payload,
    Airframe,
    Arming,
}

impl ComponentSlot {
    pub const ALL: [ComponentSlot; 5] = [
        ComponentSlot::Guidance,
        ComponentSlot::Propulsion,
        ComponentSlot::Payload,
        ComponentSlot::Airframe,
        ComponentSlot::Arming,
    ];

    pub fn index(self) -> usize {
        match self {
            ComponentSlot::Guidance => 0,
            ComponentSlot::Propulsion => 1,
            ComponentSlot::Payload => 2,
            ComponentSlot::Airframe => 3,
            ComponentSlot::Arming => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissileStatus {
    Assembling,
    Ready,
    Launched,
    Intercepted,
    Detonated,
    Dismantled,
}

impl MissileStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MissileStatus::Intercepted | MissileStatus::Detonated | MissileStatus::Dismantled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryStatus {
    Idle,
    Reserved,
    Cooldown,
    Damaged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterceptOutcome {
    Success,
    Partial,
    Failure,
    Malfunction,
}

impl InterceptOutcome {
    /// Whether the warhead still detonates on the target(s).
    pub fn detonates(self) -> bool {
        !matches!(self, InterceptOutcome::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Planning,
    Active,
    Completed,
    Failed,
    Compromised,
    Cancelled,
}

impl MissionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MissionStatus::Planning | MissionStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionKind {
    Reconnaissance,
    Surveillance,
    SabotageLight,
    SabotageHeavy,
    SabotageNuclear,
    IntelligenceLeak,
    Theft,
    Assassination,
}

/// Five-level spy ladder, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SpyRank {
    Recruit,
    Agent,
    Operative,
    Shadow,
    Phantom,
}

impl SpyRank {
    pub const ALL: [SpyRank; 5] = [
        SpyRank::Recruit,
        SpyRank::Agent,
        SpyRank::Operative,
        SpyRank::Shadow,
        SpyRank::Phantom,
    ];

    pub fn next(self) -> Option<SpyRank> {
        match self {
            SpyRank::Recruit => Some(SpyRank::Agent),
            SpyRank::Agent => Some(SpyRank::Operative),
            SpyRank::Operative => Some(SpyRank::Shadow),
            SpyRank::Shadow => Some(SpyRank::Phantom),
            SpyRank::Phantom => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Credits,
    Materials,
    ResearchPoints,
    Units,
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Coarse classification every operation error maps onto.
///
/// `Conflict` is retried once internally before being surfaced; the other
/// kinds are never retried by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    State,
    Conflict,
    Collaborator,
}

// ---------------------------------------------------------------------------
// Audit records
// ---------------------------------------------------------------------------

bitflags! {
    /// Flags attached to immutable audit records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct AuditFlags: u8 {
        /// Ledger conversion failed twice; the record awaits manual
        /// reconciliation instead of losing the outcome.
        const RECONCILE_PENDING = 1 << 0;
        /// Clan batteries participated alongside the target's own.
        const CLAN_POOLED = 1 << 1;
        /// One pooled battery rolled a malfunction and took no action.
        const BATTERY_MALFUNCTION = 1 << 2;
    }
}

/// One per resolved interception, keyed by missile id; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterceptionAttemptState {
    pub missile: u64,
    pub resolved_at: u64,
    pub outcome: InterceptOutcome,
    /// Raw fixed-point combined chance the roll was tested against.
    pub combined_chance: i64,
    /// Raw fixed-point uniform roll in [0, 1).
    pub roll: i64,
    pub batteries: Vec<u64>,
    pub malfunctioned_battery: Option<u64>,
    pub flags: AuditFlags,
}

/// Per-recipient share of a detonation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageShareState {
    pub recipient: u64,
    /// Percentage of the warhead's damage applied, after any partial halving.
    pub percent: u8,
    pub flags: AuditFlags,
}

/// Immutable record of one launch, opened on authorization and closed by the
/// resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchHistoryState {
    pub missile: u64,
    pub attacker: u64,
    pub primary_target: u64,
    pub target_count: u32,
    pub launched_at: u64,
    pub impact_at: u64,
    pub outcome: Option<InterceptOutcome>,
    pub damage: Vec<DamageShareState>,
}

/// Immutable record of a successful sabotage side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SabotageDamageState {
    pub mission: u64,
    pub missile: u64,
    pub slots_destroyed: Vec<ComponentSlot>,
    /// Raw fixed-point fraction refunded to the missile owner's ledger.
    pub refund_fraction: i64,
    pub resolved_at: u64,
    pub flags: AuditFlags,
}

/// Time-boxed intelligence produced by reconnaissance/surveillance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelReportState {
    pub mission: u64,
    pub target: u64,
    pub gathered_at: u64,
    pub expires_at: u64,
    pub missile_count: u32,
    pub ready_missiles: u32,
    pub battery_count: u32,
    pub highest_defense_tier: u8,
}

// ---------------------------------------------------------------------------
// Broadcast payloads
// ---------------------------------------------------------------------------

/// Fire-and-forget event handed to the broadcast dispatcher on every
/// terminal transition. Delivery order is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BroadcastEvent {
    TechUnlocked {
        player: u64,
        tech: String,
        track: ResearchTrack,
        tier: u8,
    },
    MissileReady {
        missile: u64,
        owner: u64,
    },
    MissileLaunched {
        missile: u64,
        attacker: u64,
        primary_target: u64,
        impact_at: u64,
    },
    MissileIntercepted {
        missile: u64,
        target: u64,
        batteries: u32,
    },
    MissileDetonated {
        missile: u64,
        outcome: InterceptOutcome,
        recipients: u32,
    },
    RadarWarning {
        owner: u64,
        missile: u64,
        impact_at: u64,
        lead_secs: u64,
        /// Raw fixed-point accuracy of the contact report.
        accuracy: i64,
    },
    MissionResolved {
        mission: u64,
        owner: u64,
        target: u64,
        kind: MissionKind,
        status: MissionStatus,
    },
    IntelLeaked {
        target: u64,
        missile_count: u32,
        ready_missiles: u32,
    },
    SpyLost {
        spy: u64,
        owner: u64,
    },
}

pub fn encode_event_json(event: &BroadcastEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

pub fn decode_event_json(data: &str) -> serde_json::Result<BroadcastEvent> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_event_round_trips_as_tagged_json() {
        let event = BroadcastEvent::MissileLaunched {
            missile: 7,
            attacker: 1,
            primary_target: 2,
            impact_at: 600,
        };
        let json = encode_event_json(&event).expect("encode");
        assert!(json.contains("\"event\":\"missile_launched\""));
        let decoded = decode_event_json(&json).expect("decode");
        assert_eq!(decoded, event);
    }

    #[test]
    fn ready_requires_non_terminal_ordering() {
        assert!(!MissileStatus::Ready.is_terminal());
        assert!(MissileStatus::Intercepted.is_terminal());
        assert!(InterceptOutcome::Partial.detonates());
        assert!(!InterceptOutcome::Success.detonates());
    }

    #[test]
    fn spy_rank_ladder_is_five_levels() {
        let mut rank = SpyRank::Recruit;
        let mut steps = 0;
        while let Some(next) = rank.next() {
            rank = next;
            steps += 1;
        }
        assert_eq!(steps, 4);
        assert_eq!(rank, SpyRank::Phantom);
    }
}
