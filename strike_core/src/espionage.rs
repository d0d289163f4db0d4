use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

use strike_runtime::{
    BroadcastEvent, FailureKind, IntelReportState, MissileStatus, MissionKind, MissionStatus,
    ResourceKind, SabotageDamageState, SpyRank, CHANCE_SCALE,
};

use crate::arsenal::ArsenalEngine;
use crate::broadcast::Dispatcher;
use crate::config::BalanceConfig;
use crate::defense::DefenseEngine;
use crate::hashing::event_seed;
use crate::ids::{IdAllocator, MissionId, PlayerId, SpyId};
use crate::metrics::SimulationMetrics;
use crate::queue::{DueKind, DueQueue};
use crate::research::UnlockedSet;
use crate::scalar::Chance;
use crate::services::{
    player_account, rp_account, LedgerError, PlayerDirectory, ResourceLedger,
};

pub const BUILTIN_MISSION_CATALOG: &str = include_str!("data/espionage_missions.json");

pub const ESPIONAGE_TOPIC: &str = "strike::espionage";

pub const RECRUIT_COST: u64 = 500;

const MAX_EQUIPMENT_BONUS: f32 = 0.10;

// ---------------------------------------------------------------------------
// Mission catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct MissionEntry {
    kind: MissionKind,
    min_rank: SpyRank,
    duration_secs: u64,
    detection_risk: f32,
    cost_credits: u64,
    base_success: [f32; 5],
}

#[derive(Debug, Clone)]
pub struct MissionSpec {
    pub kind: MissionKind,
    pub min_rank: SpyRank,
    pub duration_secs: u64,
    pub detection_risk: Chance,
    pub cost_credits: u64,
    base_success: [Chance; 5],
}

impl MissionSpec {
    /// Base success rate for one rank, lowest rank first.
    pub fn base_success(&self, rank: SpyRank) -> Chance {
        let index = SpyRank::ALL
            .iter()
            .position(|candidate| *candidate == rank)
            .unwrap_or(0);
        self.base_success[index]
    }
}

#[derive(Debug, Deserialize)]
struct MissionCatalogFile {
    missions: Vec<MissionEntry>,
}

#[derive(Debug, Error)]
pub enum MissionCatalogError {
    #[error("failed to parse mission catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate mission kind {0:?}")]
    DuplicateKind(MissionKind),
}

#[derive(Debug)]
pub struct MissionCatalog {
    missions: HashMap<MissionKind, MissionSpec>,
}

impl MissionCatalog {
    pub fn load_builtin() -> Result<Self, MissionCatalogError> {
        Self::load_from_str(BUILTIN_MISSION_CATALOG)
    }

    pub fn load_from_str(json: &str) -> Result<Self, MissionCatalogError> {
        let file: MissionCatalogFile = serde_json::from_str(json)?;
        let mut missions = HashMap::new();
        for entry in file.missions {
            if missions.contains_key(&entry.kind) {
                return Err(MissionCatalogError::DuplicateKind(entry.kind));
            }
            let mut base_success = [Chance::ZERO; 5];
            for (slot, value) in base_success.iter_mut().zip(entry.base_success) {
                *slot = Chance::from_f32(value);
            }
            missions.insert(
                entry.kind,
                MissionSpec {
                    kind: entry.kind,
                    min_rank: entry.min_rank,
                    duration_secs: entry.duration_secs,
                    detection_risk: Chance::from_f32(entry.detection_risk),
                    cost_credits: entry.cost_credits,
                    base_success,
                },
            );
        }
        Ok(Self { missions })
    }

    pub fn mission(&self, kind: MissionKind) -> Option<&MissionSpec> {
        self.missions.get(&kind)
    }
}

// ---------------------------------------------------------------------------
// Spies and missions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SpyAgent {
    pub id: SpyId,
    pub owner: PlayerId,
    pub rank: SpyRank,
    pub experience: u32,
    pub equipment_bonus: Chance,
    /// Unavailability window end after a compromise, unix seconds.
    pub available_after: u64,
    pub current_mission: Option<MissionId>,
}

impl SpyAgent {
    pub fn is_available(&self, now: u64) -> bool {
        self.current_mission.is_none() && self.available_after <= now
    }
}

#[derive(Debug, Clone)]
pub struct Mission {
    pub id: MissionId,
    pub spy: SpyId,
    pub owner: PlayerId,
    pub target: PlayerId,
    pub kind: MissionKind,
    pub status: MissionStatus,
    /// Clamped success chance, fixed at planning time.
    pub success_chance: Chance,
    pub detection_risk: Chance,
    pub planned_at: u64,
    pub completes_at: u64,
}

#[derive(Debug, Error)]
pub enum EspionageError {
    #[error("mission kind {0:?} is not in the catalog")]
    UnknownKind(MissionKind),
    #[error("mission kind {0:?} not unlocked")]
    KindNotUnlocked(MissionKind),
    #[error("spy rank {0:?} not unlocked")]
    RankNotUnlocked(SpyRank),
    #[error("unknown spy {0}")]
    UnknownSpy(SpyId),
    #[error("spy {spy} belongs to player {owner}, not {requester}")]
    NotSpyOwner {
        spy: SpyId,
        owner: PlayerId,
        requester: PlayerId,
    },
    #[error("spy {spy} is unavailable until {until}")]
    SpyUnavailable { spy: SpyId, until: u64 },
    #[error("mission requires rank {required:?}, spy is {rank:?}")]
    RankTooLow { required: SpyRank, rank: SpyRank },
    #[error("cannot run missions against yourself")]
    SelfTarget,
    #[error("unknown mission {0}")]
    UnknownMission(MissionId),
    #[error("mission {mission} is {status:?}, operation requires {required:?}")]
    InvalidStatus {
        mission: MissionId,
        status: MissionStatus,
        required: MissionStatus,
    },
    #[error("insufficient credits: cost {cost}, held {held}")]
    InsufficientFunds { cost: u64, held: u64 },
    #[error("mission state lost a concurrent update race")]
    Conflict,
    #[error(transparent)]
    Collaborator(#[from] crate::services::CollaboratorError),
}

impl EspionageError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EspionageError::UnknownKind(_)
            | EspionageError::KindNotUnlocked(_)
            | EspionageError::RankNotUnlocked(_)
            | EspionageError::UnknownSpy(_)
            | EspionageError::NotSpyOwner { .. }
            | EspionageError::RankTooLow { .. }
            | EspionageError::SelfTarget
            | EspionageError::UnknownMission(_)
            | EspionageError::InsufficientFunds { .. } => FailureKind::Validation,
            EspionageError::SpyUnavailable { .. } | EspionageError::InvalidStatus { .. } => {
                FailureKind::State
            }
            EspionageError::Conflict => FailureKind::Conflict,
            EspionageError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Espionage: spy roster, mission lifecycle
/// PLANNING → ACTIVE → {COMPLETED | FAILED | COMPROMISED | CANCELLED},
/// and the type-specific side effects applied on success.
#[derive(Debug)]
pub struct EspionageEngine {
    catalog: Arc<MissionCatalog>,
    config: Arc<BalanceConfig>,
    stream_seed: u64,
    spies: HashMap<SpyId, SpyAgent>,
    missions: HashMap<MissionId, Mission>,
    /// Counter-intelligence posture per player, fed by the embedding.
    security: HashMap<PlayerId, Chance>,
    /// Resolved intelligence-leak missions per (owner, target) pair; the
    /// nth raises the leak odds by one step.
    leak_history: HashMap<(PlayerId, PlayerId), u32>,
    /// Per-target cooldown after a public leak fires.
    leak_cooldown_until: HashMap<PlayerId, u64>,
    intel: HashMap<MissionId, IntelReportState>,
    sabotage_records: HashMap<MissionId, SabotageDamageState>,
    /// Theft figures pinned at first computation. A redelivery after a
    /// failed credit must move the amount the debit took, not a fresh 10%
    /// of the already-reduced balance.
    theft_amounts: HashMap<MissionId, u64>,
    ids: IdAllocator,
}

impl EspionageEngine {
    pub fn new(catalog: Arc<MissionCatalog>, config: Arc<BalanceConfig>, stream_seed: u64) -> Self {
        Self {
            catalog,
            config,
            stream_seed,
            spies: HashMap::new(),
            missions: HashMap::new(),
            security: HashMap::new(),
            leak_history: HashMap::new(),
            leak_cooldown_until: HashMap::new(),
            intel: HashMap::new(),
            sabotage_records: HashMap::new(),
            theft_amounts: HashMap::new(),
            ids: IdAllocator::default(),
        }
    }

    pub fn spy(&self, id: SpyId) -> Option<&SpyAgent> {
        self.spies.get(&id)
    }

    pub fn mission(&self, id: MissionId) -> Option<&Mission> {
        self.missions.get(&id)
    }

    pub fn intel_report(&self, mission: MissionId) -> Option<&IntelReportState> {
        self.intel.get(&mission)
    }

    /// Unexpired reports gathered against `target`.
    pub fn intel_reports_on(
        &self,
        target: PlayerId,
        now: u64,
    ) -> impl Iterator<Item = &IntelReportState> {
        self.intel
            .values()
            .filter(move |report| report.target == target.0 && report.expires_at > now)
    }

    pub fn sabotage_record(&self, mission: MissionId) -> Option<&SabotageDamageState> {
        self.sabotage_records.get(&mission)
    }

    pub fn set_security_rating(&mut self, player: PlayerId, rating: Chance) {
        self.security.insert(player, rating.clamp_unit());
    }

    /// Leak odds the next intelligence-leak mission by `owner` against
    /// `target` would carry.
    pub fn leak_chance_for(&self, owner: PlayerId, target: PlayerId) -> Chance {
        let n = self.leak_history.get(&(owner, target)).copied().unwrap_or(0) + 1;
        self.config.espionage().leak_chance(n)
    }

    pub fn recruit_spy(
        &mut self,
        owner: PlayerId,
        unlocked: &UnlockedSet,
        ledger: &dyn ResourceLedger,
    ) -> Result<SpyId, EspionageError> {
        if !unlocked.spy_ranks.contains(&SpyRank::Recruit) {
            return Err(EspionageError::RankNotUnlocked(SpyRank::Recruit));
        }
        let id = SpyId(self.ids.allocate());
        let op_id = format!("spy-recruit:{owner}:{id}");
        debit_credits(ledger, owner, RECRUIT_COST, &op_id)?;
        self.spies.insert(
            id,
            SpyAgent {
                id,
                owner,
                rank: SpyRank::Recruit,
                experience: 0,
                equipment_bonus: Chance::ZERO,
                available_after: 0,
                current_mission: None,
            },
        );
        Ok(id)
    }

    /// Assign gear. The bonus feeds the success formula, capped well below
    /// what rank progression earns.
    pub fn equip_spy(
        &mut self,
        requester: PlayerId,
        spy_id: SpyId,
        bonus: Chance,
    ) -> Result<(), EspionageError> {
        let spy = self
            .spies
            .get_mut(&spy_id)
            .ok_or(EspionageError::UnknownSpy(spy_id))?;
        if spy.owner != requester {
            return Err(EspionageError::NotSpyOwner {
                spy: spy_id,
                owner: spy.owner,
                requester,
            });
        }
        spy.equipment_bonus = bonus.clamp(Chance::ZERO, Chance::from_f32(MAX_EQUIPMENT_BONUS));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn plan_mission(
        &mut self,
        owner: PlayerId,
        spy_id: SpyId,
        kind: MissionKind,
        target: PlayerId,
        unlocked: &UnlockedSet,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        now: u64,
    ) -> Result<MissionId, EspionageError> {
        let spec = self
            .catalog
            .mission(kind)
            .ok_or(EspionageError::UnknownKind(kind))?
            .clone();
        if !unlocked.missions.contains(&kind) {
            return Err(EspionageError::KindNotUnlocked(kind));
        }
        if owner == target {
            return Err(EspionageError::SelfTarget);
        }
        let spy = self
            .spies
            .get(&spy_id)
            .ok_or(EspionageError::UnknownSpy(spy_id))?;
        if spy.owner != owner {
            return Err(EspionageError::NotSpyOwner {
                spy: spy_id,
                owner: spy.owner,
                requester: owner,
            });
        }
        if !spy.is_available(now) {
            return Err(EspionageError::SpyUnavailable {
                spy: spy_id,
                until: spy.available_after,
            });
        }
        if spy.rank < spec.min_rank {
            return Err(EspionageError::RankTooLow {
                required: spec.min_rank,
                rank: spy.rank,
            });
        }
        // Target must exist; the profile also carries the clan bonus input.
        directory.profile(target)?;
        let owner_profile = directory.profile(owner)?;

        let tuning = self.config.espionage();
        let security = self.security.get(&target).copied().unwrap_or(Chance::ZERO);
        let penalty = security * tuning.security_penalty_factor();
        let success_chance = (spec.base_success(spy.rank).saturating_sub(penalty)
            + tuning.clan_bonus(owner_profile.clan_level)
            + spy.equipment_bonus)
            .clamp(tuning.success_floor(), tuning.success_ceiling());

        let id = MissionId(self.ids.allocate());
        // Up-front and never refunded, whatever the outcome.
        let op_id = format!("mission-cost:{owner}:{id}");
        debit_credits(ledger, owner, spec.cost_credits, &op_id)?;

        self.missions.insert(
            id,
            Mission {
                id,
                spy: spy_id,
                owner,
                target,
                kind,
                status: MissionStatus::Planning,
                success_chance,
                detection_risk: spec.detection_risk,
                planned_at: now,
                completes_at: now + spec.duration_secs,
            },
        );
        if let Some(spy) = self.spies.get_mut(&spy_id) {
            spy.current_mission = Some(id);
        }
        debug!(
            target: ESPIONAGE_TOPIC,
            "mission {id} ({kind:?}) planned by {owner} against {target}: success {success_chance}"
        );
        Ok(id)
    }

    /// PLANNING → ACTIVE; schedules the resolution.
    pub fn activate(
        &mut self,
        mission_id: MissionId,
        queue: &mut DueQueue,
    ) -> Result<(), EspionageError> {
        let mission = self
            .missions
            .get_mut(&mission_id)
            .ok_or(EspionageError::UnknownMission(mission_id))?;
        if mission.status != MissionStatus::Planning {
            return Err(EspionageError::InvalidStatus {
                mission: mission_id,
                status: mission.status,
                required: MissionStatus::Planning,
            });
        }
        mission.status = MissionStatus::Active;
        queue.push(DueKind::Mission, mission_id.0, mission.completes_at);
        Ok(())
    }

    /// Cancellation window closes at activation; the up-front cost stays
    /// spent either way.
    pub fn cancel(&mut self, mission_id: MissionId) -> Result<(), EspionageError> {
        let mission = self
            .missions
            .get_mut(&mission_id)
            .ok_or(EspionageError::UnknownMission(mission_id))?;
        if mission.status != MissionStatus::Planning {
            return Err(EspionageError::InvalidStatus {
                mission: mission_id,
                status: mission.status,
                required: MissionStatus::Planning,
            });
        }
        mission.status = MissionStatus::Cancelled;
        let spy = mission.spy;
        if let Some(spy) = self.spies.get_mut(&spy) {
            spy.current_mission = None;
        }
        Ok(())
    }

    /// Active missions whose completion time has arrived.
    pub fn due_missions(&self, queue: &DueQueue, now: u64) -> Vec<MissionId> {
        queue
            .due_entities(DueKind::Mission, now)
            .into_iter()
            .map(MissionId)
            .filter(|id| {
                self.missions
                    .get(id)
                    .map(|mission| mission.status == MissionStatus::Active)
                    .unwrap_or(false)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resolve_mission(
        &mut self,
        mission_id: MissionId,
        arsenal: &mut ArsenalEngine,
        defense: &DefenseEngine,
        unlocked: &UnlockedSet,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
        now: u64,
    ) -> Result<MissionStatus, EspionageError> {
        let (spy_id, owner, target, kind, success_chance, detection_risk, completes_at) = {
            let mission = self
                .missions
                .get(&mission_id)
                .ok_or(EspionageError::UnknownMission(mission_id))?;
            // A due event delivered twice resolves once.
            if mission.status.is_terminal() {
                return Ok(mission.status);
            }
            if mission.status != MissionStatus::Active {
                return Err(EspionageError::InvalidStatus {
                    mission: mission_id,
                    status: mission.status,
                    required: MissionStatus::Active,
                });
            }
            (
                mission.spy,
                mission.owner,
                mission.target,
                mission.kind,
                mission.success_chance,
                mission.detection_risk,
                mission.completes_at,
            )
        };

        let mut rng =
            SmallRng::seed_from_u64(event_seed(self.stream_seed, mission_id.0, completes_at));
        let succeeded = roll(&mut rng) < success_chance;
        let detected = roll(&mut rng) < detection_risk;

        let config = Arc::clone(&self.config);
        let tuning = config.espionage();
        let status = if detected {
            MissionStatus::Compromised
        } else if succeeded {
            MissionStatus::Completed
        } else {
            MissionStatus::Failed
        };

        if status == MissionStatus::Completed {
            self.apply_effect(
                mission_id, owner, target, kind, arsenal, defense, directory, ledger, dispatcher,
                metrics, &mut rng, now,
            )?;
        }

        if let Some(spy) = self.spies.get_mut(&spy_id) {
            spy.current_mission = None;
            match status {
                MissionStatus::Compromised => {
                    spy.experience = spy.experience.saturating_sub(tuning.compromise_xp_penalty);
                    spy.available_after = now + tuning.compromise_lockout_secs;
                    metrics.missions_compromised += 1;
                }
                MissionStatus::Completed => spy.experience += tuning.xp_on_success,
                _ => spy.experience += tuning.xp_on_failure,
            }
            promote(spy, &tuning.promotion_thresholds, unlocked);
        }

        if let Some(mission) = self.missions.get_mut(&mission_id) {
            mission.status = status;
        }
        metrics.missions_resolved += 1;
        debug!(
            target: ESPIONAGE_TOPIC,
            "mission {mission_id} ({kind:?}) by {owner} against {target} resolved {status:?}"
        );
        dispatcher.publish(BroadcastEvent::MissionResolved {
            mission: mission_id.0,
            owner: owner.0,
            target: target.0,
            kind,
            status,
        });
        Ok(status)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_effect(
        &mut self,
        mission_id: MissionId,
        owner: PlayerId,
        target: PlayerId,
        kind: MissionKind,
        arsenal: &mut ArsenalEngine,
        defense: &DefenseEngine,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
        rng: &mut SmallRng,
        now: u64,
    ) -> Result<(), EspionageError> {
        let config = Arc::clone(&self.config);
        let tuning = config.espionage();
        match kind {
            MissionKind::Reconnaissance | MissionKind::Surveillance => {
                let (missile_count, ready_missiles) = count_missiles(arsenal, target);
                let batteries: Vec<_> = defense.batteries_of(target).collect();
                let report = IntelReportState {
                    mission: mission_id.0,
                    target: target.0,
                    gathered_at: now,
                    expires_at: now + tuning.intel_report_ttl_secs,
                    missile_count,
                    ready_missiles,
                    battery_count: batteries.len() as u32,
                    highest_defense_tier: batteries
                        .iter()
                        .map(|battery| battery.tier)
                        .max()
                        .unwrap_or(0),
                };
                self.intel.insert(mission_id, report);
            }
            MissionKind::SabotageLight | MissionKind::SabotageHeavy => {
                if let Some(victim) = best_sabotage_victim(arsenal, target, false) {
                    let record = arsenal
                        .apply_sabotage(victim, mission_id, false, now, ledger, metrics)
                        .map_err(map_assembly)?;
                    self.sabotage_records.insert(mission_id, record);
                }
            }
            MissionKind::SabotageNuclear => {
                // Only a READY missile can be zeroed wholesale.
                if let Some(victim) = best_sabotage_victim(arsenal, target, true) {
                    let record = arsenal
                        .apply_sabotage(victim, mission_id, true, now, ledger, metrics)
                        .map_err(map_assembly)?;
                    self.sabotage_records.insert(mission_id, record);
                }
            }
            MissionKind::IntelligenceLeak => {
                let repeats = self.leak_history.entry((owner, target)).or_insert(0);
                *repeats += 1;
                let chance = tuning.leak_chance(*repeats);
                let cooled = self
                    .leak_cooldown_until
                    .get(&target)
                    .copied()
                    .unwrap_or(0);
                if cooled <= now && roll(rng) < chance {
                    let (missile_count, ready_missiles) = count_missiles(arsenal, target);
                    self.leak_cooldown_until
                        .insert(target, now + tuning.leak_cooldown_secs);
                    metrics.intel_leaks += 1;
                    dispatcher.publish(BroadcastEvent::IntelLeaked {
                        target: target.0,
                        missile_count,
                        ready_missiles,
                    });
                }
            }
            MissionKind::Theft => {
                let target_profile = directory.profile(target)?;
                let owner_profile = directory.profile(owner)?;
                let amount = match self.theft_amounts.get(&mission_id).copied() {
                    Some(amount) => amount,
                    None => {
                        let held = ledger
                            .balance(rp_account(&target_profile), ResourceKind::ResearchPoints)
                            .map_err(map_ledger)?;
                        let amount =
                            (held as i64 * tuning.theft_fraction().raw() / CHANCE_SCALE) as u64;
                        self.theft_amounts.insert(mission_id, amount);
                        amount
                    }
                };
                if amount > 0 {
                    ledger
                        .debit(
                            rp_account(&target_profile),
                            ResourceKind::ResearchPoints,
                            amount,
                            &format!("theft-debit:{mission_id}"),
                        )
                        .map_err(map_ledger)?;
                    ledger
                        .credit(
                            rp_account(&owner_profile),
                            ResourceKind::ResearchPoints,
                            amount,
                            &format!("theft-credit:{mission_id}"),
                        )
                        .map_err(map_ledger)?;
                }
                self.theft_amounts.remove(&mission_id);
            }
            MissionKind::Assassination => {
                let victim = self
                    .spies
                    .values()
                    .filter(|spy| spy.owner == target)
                    .max_by_key(|spy| (spy.rank, spy.id))
                    .map(|spy| spy.id);
                if let Some(victim) = victim {
                    self.spies.remove(&victim);
                    dispatcher.publish(BroadcastEvent::SpyLost {
                        spy: victim.0,
                        owner: target.0,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Rank-up sweep after any experience change. A threshold crossing only
/// promotes when the next rank's research grant is held.
fn promote(spy: &mut SpyAgent, thresholds: &[u32; 4], unlocked: &UnlockedSet) {
    while let Some(next) = spy.rank.next() {
        let index = SpyRank::ALL
            .iter()
            .position(|candidate| *candidate == next)
            .unwrap_or(1)
            .saturating_sub(1);
        if spy.experience < thresholds[index] || !unlocked.spy_ranks.contains(&next) {
            break;
        }
        spy.rank = next;
    }
}

fn count_missiles(arsenal: &ArsenalEngine, target: PlayerId) -> (u32, u32) {
    let mut total = 0;
    let mut ready = 0;
    for missile in arsenal.missiles_of(target) {
        if missile.status.is_terminal() {
            continue;
        }
        total += 1;
        if missile.status == MissileStatus::Ready {
            ready += 1;
        }
    }
    (total, ready)
}

/// The target missile a saboteur goes after: the most complete one still on
/// the ground. Nuclear strikes only READY airframes.
fn best_sabotage_victim(
    arsenal: &ArsenalEngine,
    target: PlayerId,
    ready_only: bool,
) -> Option<crate::ids::MissileId> {
    arsenal
        .missiles_of(target)
        .filter(|missile| {
            if ready_only {
                missile.status == MissileStatus::Ready
            } else {
                matches!(
                    missile.status,
                    MissileStatus::Assembling | MissileStatus::Ready
                )
            }
        })
        .max_by_key(|missile| (missile.completed_slots(), missile.id))
        .map(|missile| missile.id)
}

fn debit_credits(
    ledger: &dyn ResourceLedger,
    owner: PlayerId,
    amount: u64,
    op_id: &str,
) -> Result<(), EspionageError> {
    ledger
        .debit(player_account(owner), ResourceKind::Credits, amount, op_id)
        .map_err(|err| match err {
            LedgerError::InsufficientFunds { held, .. } => EspionageError::InsufficientFunds {
                cost: amount,
                held,
            },
            LedgerError::Unavailable(inner) => EspionageError::Collaborator(inner),
        })
}

fn map_ledger(err: LedgerError) -> EspionageError {
    match err {
        LedgerError::InsufficientFunds { requested, held, .. } => {
            EspionageError::InsufficientFunds {
                cost: requested,
                held,
            }
        }
        LedgerError::Unavailable(inner) => EspionageError::Collaborator(inner),
    }
}

fn map_assembly(err: crate::arsenal::AssemblyError) -> EspionageError {
    match err {
        crate::arsenal::AssemblyError::Conflict => EspionageError::Conflict,
        crate::arsenal::AssemblyError::Collaborator(inner) => {
            EspionageError::Collaborator(inner)
        }
        // Victim selection already filtered on status; anything else means
        // the missile moved under us.
        _ => EspionageError::Conflict,
    }
}

fn roll(rng: &mut SmallRng) -> Chance {
    Chance::from_raw(rng.gen_range(0..CHANCE_SCALE))
}
