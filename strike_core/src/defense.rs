use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use strike_runtime::{BatteryStatus, BroadcastEvent, FailureKind, ResourceKind};

use crate::arsenal::ArsenalEngine;
use crate::broadcast::Dispatcher;
use crate::config::{BalanceConfig, InterceptionTuning};
use crate::ids::{BatteryId, ClanId, IdAllocator, MissileId, PlayerId, RadarId};
use crate::metrics::SimulationMetrics;
use crate::research::UnlockedSet;
use crate::scalar::Chance;
use crate::services::{player_account, LedgerError, ResourceLedger};

pub const BUILTIN_DEFENSE_CATALOG: &str = include_str!("data/defense_catalog.json");

pub const DEFENSE_TOPIC: &str = "strike::defense";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct BatteryTierEntry {
    tier: u8,
    base_chance: f32,
    cooldown_secs: u64,
    build_cost: u64,
    repair_cost: u64,
}

#[derive(Debug, Clone)]
pub struct BatteryTierSpec {
    pub tier: u8,
    pub base_chance: Chance,
    pub cooldown_secs: u64,
    pub build_cost: u64,
    pub repair_cost: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct RadarLevelEntry {
    level: u8,
    accuracy: f32,
    lead_secs: u64,
    #[serde(default)]
    stealth_detection: bool,
    build_cost: u64,
}

#[derive(Debug, Clone)]
pub struct RadarLevelSpec {
    pub level: u8,
    pub accuracy: Chance,
    pub lead_secs: u64,
    pub stealth_detection: bool,
    pub build_cost: u64,
}

#[derive(Debug, Deserialize)]
struct DefenseCatalogFile {
    battery_tiers: Vec<BatteryTierEntry>,
    radar_levels: Vec<RadarLevelEntry>,
}

#[derive(Debug, Error)]
pub enum DefenseCatalogError {
    #[error("failed to parse defense catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate battery tier {0}")]
    DuplicateBatteryTier(u8),
    #[error("duplicate radar level {0}")]
    DuplicateRadarLevel(u8),
}

#[derive(Debug)]
pub struct DefenseCatalog {
    battery_tiers: HashMap<u8, BatteryTierSpec>,
    radar_levels: HashMap<u8, RadarLevelSpec>,
}

impl DefenseCatalog {
    pub fn load_builtin() -> Result<Self, DefenseCatalogError> {
        Self::load_from_str(BUILTIN_DEFENSE_CATALOG)
    }

    pub fn load_from_str(json: &str) -> Result<Self, DefenseCatalogError> {
        let file: DefenseCatalogFile = serde_json::from_str(json)?;
        let mut battery_tiers = HashMap::new();
        for entry in file.battery_tiers {
            if battery_tiers.contains_key(&entry.tier) {
                return Err(DefenseCatalogError::DuplicateBatteryTier(entry.tier));
            }
            battery_tiers.insert(
                entry.tier,
                BatteryTierSpec {
                    tier: entry.tier,
                    base_chance: Chance::from_f32(entry.base_chance),
                    cooldown_secs: entry.cooldown_secs,
                    build_cost: entry.build_cost,
                    repair_cost: entry.repair_cost,
                },
            );
        }
        let mut radar_levels = HashMap::new();
        for entry in file.radar_levels {
            if radar_levels.contains_key(&entry.level) {
                return Err(DefenseCatalogError::DuplicateRadarLevel(entry.level));
            }
            radar_levels.insert(
                entry.level,
                RadarLevelSpec {
                    level: entry.level,
                    accuracy: Chance::from_f32(entry.accuracy),
                    lead_secs: entry.lead_secs,
                    stealth_detection: entry.stealth_detection,
                    build_cost: entry.build_cost,
                },
            );
        }
        Ok(Self {
            battery_tiers,
            radar_levels,
        })
    }

    pub fn battery_tier(&self, tier: u8) -> Option<&BatteryTierSpec> {
        self.battery_tiers.get(&tier)
    }

    pub fn radar_level(&self, level: u8) -> Option<&RadarLevelSpec> {
        self.radar_levels.get(&level)
    }
}

// ---------------------------------------------------------------------------
// Combined intercept chance
// ---------------------------------------------------------------------------

/// Pooled intercept probability: the lead battery's base chance scaled by
/// the warhead difficulty modifier, plus a fixed bonus per extra battery
/// (bonus capped), the grand total capped. Non-decreasing in pool size.
pub fn combined_intercept_chance(
    bases: &[Chance],
    difficulty_modifier: Chance,
    tuning: &InterceptionTuning,
) -> Chance {
    let Some(first) = bases.first() else {
        return Chance::ZERO;
    };
    let lead = *first * difficulty_modifier;
    let extra = bases.len().saturating_sub(1) as i64;
    let bonus = Chance::from_raw(tuning.per_battery_bonus().raw() * extra)
        .min(tuning.pool_bonus_cap());
    (lead + bonus).min(tuning.total_cap())
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DefenseBattery {
    pub id: BatteryId,
    pub owner: PlayerId,
    pub tier: u8,
    pub status: BatteryStatus,
    pub intercept_chance: Chance,
    pub health: u8,
    pub cooldown_until: u64,
}

impl DefenseBattery {
    /// Available for interception only if IDLE, healthy and off cooldown.
    pub fn is_eligible(&self, now: u64, min_health: u8) -> bool {
        self.status == BatteryStatus::Idle
            && self.health > min_health
            && self.cooldown_until <= now
    }
}

#[derive(Debug, Clone)]
pub struct RadarInstallation {
    pub id: RadarId,
    pub owner: PlayerId,
    pub level: u8,
}

/// Derived read-through aggregate over a clan's member batteries. Never
/// ground truth; recomputed whenever any member battery changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClanDefenseGrid {
    pub clan: ClanId,
    pub eligible_batteries: usize,
    pub combined_chance: Chance,
    pub computed_at: u64,
}

#[derive(Debug, Error)]
pub enum DefenseError {
    #[error("battery tier {0} not unlocked")]
    TierNotUnlocked(u8),
    #[error("radar level {0} not unlocked")]
    LevelNotUnlocked(u8),
    #[error("unknown battery tier {0}")]
    UnknownTier(u8),
    #[error("unknown radar level {0}")]
    UnknownLevel(u8),
    #[error("unknown battery {0}")]
    UnknownBattery(BatteryId),
    #[error("battery {battery} is {status:?}, not reservable")]
    NotReservable {
        battery: BatteryId,
        status: BatteryStatus,
    },
    #[error("insufficient funds: cost {cost}, held {held}")]
    InsufficientFunds { cost: u64, held: u64 },
    #[error(transparent)]
    Collaborator(#[from] crate::services::CollaboratorError),
}

impl DefenseError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DefenseError::TierNotUnlocked(_)
            | DefenseError::LevelNotUnlocked(_)
            | DefenseError::UnknownTier(_)
            | DefenseError::UnknownLevel(_)
            | DefenseError::UnknownBattery(_)
            | DefenseError::InsufficientFunds { .. } => FailureKind::Validation,
            DefenseError::NotReservable { .. } => FailureKind::State,
            DefenseError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Defense Network: battery and radar lifecycle, independent of any
/// specific incoming missile.
#[derive(Debug)]
pub struct DefenseEngine {
    catalog: Arc<DefenseCatalog>,
    config: Arc<BalanceConfig>,
    batteries: HashMap<BatteryId, DefenseBattery>,
    radars: HashMap<RadarId, RadarInstallation>,
    grid_cache: HashMap<ClanId, ClanDefenseGrid>,
    /// (owner, missile) pairs already warned about; radar never repeats a
    /// contact report.
    warned: HashSet<(PlayerId, MissileId)>,
    ids: IdAllocator,
}

impl DefenseEngine {
    pub fn new(catalog: Arc<DefenseCatalog>, config: Arc<BalanceConfig>) -> Self {
        Self {
            catalog,
            config,
            batteries: HashMap::new(),
            radars: HashMap::new(),
            grid_cache: HashMap::new(),
            warned: HashSet::new(),
            ids: IdAllocator::default(),
        }
    }

    pub fn catalog(&self) -> &DefenseCatalog {
        &self.catalog
    }

    pub fn battery(&self, id: BatteryId) -> Option<&DefenseBattery> {
        self.batteries.get(&id)
    }

    pub fn batteries_of(&self, owner: PlayerId) -> impl Iterator<Item = &DefenseBattery> {
        self.batteries
            .values()
            .filter(move |battery| battery.owner == owner)
    }

    pub fn radars_of(&self, owner: PlayerId) -> impl Iterator<Item = &RadarInstallation> {
        self.radars.values().filter(move |radar| radar.owner == owner)
    }

    pub fn build_battery(
        &mut self,
        owner: PlayerId,
        tier: u8,
        unlocked: &UnlockedSet,
        ledger: &dyn ResourceLedger,
    ) -> Result<BatteryId, DefenseError> {
        if !unlocked.battery_tiers.contains(&tier) {
            return Err(DefenseError::TierNotUnlocked(tier));
        }
        let spec = self
            .catalog
            .battery_tier(tier)
            .ok_or(DefenseError::UnknownTier(tier))?
            .clone();
        let id = BatteryId(self.ids.allocate());
        let op_id = format!("battery-build:{owner}:{id}");
        match ledger.debit(player_account(owner), ResourceKind::Materials, spec.build_cost, &op_id)
        {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(DefenseError::InsufficientFunds {
                    cost: spec.build_cost,
                    held,
                });
            }
            Err(LedgerError::Unavailable(err)) => return Err(DefenseError::Collaborator(err)),
        }
        self.batteries.insert(
            id,
            DefenseBattery {
                id,
                owner,
                tier,
                status: BatteryStatus::Idle,
                intercept_chance: spec.base_chance,
                health: 100,
                cooldown_until: 0,
            },
        );
        self.grid_cache.clear();
        Ok(id)
    }

    pub fn build_radar(
        &mut self,
        owner: PlayerId,
        level: u8,
        unlocked: &UnlockedSet,
        ledger: &dyn ResourceLedger,
    ) -> Result<RadarId, DefenseError> {
        if !unlocked.radar_levels.contains(&level) {
            return Err(DefenseError::LevelNotUnlocked(level));
        }
        let spec = self
            .catalog
            .radar_level(level)
            .ok_or(DefenseError::UnknownLevel(level))?
            .clone();
        let id = RadarId(self.ids.allocate());
        let op_id = format!("radar-build:{owner}:{id}");
        match ledger.debit(player_account(owner), ResourceKind::Materials, spec.build_cost, &op_id)
        {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(DefenseError::InsufficientFunds {
                    cost: spec.build_cost,
                    held,
                });
            }
            Err(LedgerError::Unavailable(err)) => return Err(DefenseError::Collaborator(err)),
        }
        self.radars.insert(id, RadarInstallation { id, owner, level });
        Ok(id)
    }

    /// Cooldown decay: batteries whose cooldown elapsed self-heal back to
    /// IDLE. Driven by the external scheduler trigger.
    pub fn tick(&mut self, now: u64) {
        let mut changed = false;
        for battery in self.batteries.values_mut() {
            if battery.status == BatteryStatus::Cooldown && battery.cooldown_until <= now {
                battery.status = BatteryStatus::Idle;
                changed = true;
            }
        }
        if changed {
            self.grid_cache.clear();
        }
    }

    /// Eligible battery ids of one owner, best intercept chance first.
    fn eligible_of(&self, owner: PlayerId, now: u64) -> Vec<BatteryId> {
        let min_health = self.config.interception().min_battery_health;
        let mut eligible: Vec<&DefenseBattery> = self
            .batteries_of(owner)
            .filter(|battery| battery.is_eligible(now, min_health))
            .collect();
        eligible.sort_by(|a, b| {
            b.intercept_chance
                .cmp(&a.intercept_chance)
                .then(a.id.cmp(&b.id))
        });
        eligible.into_iter().map(|battery| battery.id).collect()
    }

    /// Reserve an interception pool for `target`, own batteries before clan
    /// batteries, capped at the pool limit. Reservation happens before any
    /// roll so two concurrent incoming missiles cannot double-book a
    /// battery's single interception slot.
    pub fn reserve_pool(
        &mut self,
        target: PlayerId,
        clan_members: &[PlayerId],
        now: u64,
    ) -> Vec<BatteryId> {
        let cap = self.config.interception().pool_cap;
        let mut pool = self.eligible_of(target, now);
        for member in clan_members {
            if *member == target || pool.len() >= cap {
                continue;
            }
            pool.extend(self.eligible_of(*member, now));
        }
        pool.truncate(cap);
        for id in &pool {
            if let Some(battery) = self.batteries.get_mut(id) {
                battery.status = BatteryStatus::Reserved;
            }
        }
        if !pool.is_empty() {
            self.grid_cache.clear();
        }
        pool
    }

    pub fn base_chances(&self, pool: &[BatteryId]) -> Vec<Chance> {
        pool.iter()
            .filter_map(|id| self.batteries.get(id))
            .map(|battery| battery.intercept_chance)
            .collect()
    }

    /// Release a reserved pool. Participants go to COOLDOWN regardless of
    /// outcome; a malfunctioned battery never acted and returns to IDLE.
    pub fn release_pool(
        &mut self,
        pool: &[BatteryId],
        malfunctioned: Option<BatteryId>,
        now: u64,
    ) {
        for id in pool {
            let Some(battery) = self.batteries.get_mut(id) else {
                continue;
            };
            if battery.status != BatteryStatus::Reserved {
                continue;
            }
            if Some(*id) == malfunctioned {
                battery.status = BatteryStatus::Idle;
                continue;
            }
            let cooldown = self
                .catalog
                .battery_tier(battery.tier)
                .map(|spec| spec.cooldown_secs)
                .unwrap_or(0);
            battery.status = BatteryStatus::Cooldown;
            battery.cooldown_until = now + cooldown;
        }
        self.grid_cache.clear();
    }

    /// Sabotage health loss; at or below the eligibility floor the battery
    /// is DAMAGED and leaves the pool until repaired.
    pub fn damage_battery(&mut self, id: BatteryId, amount: u8) -> Result<u8, DefenseError> {
        let min_health = self.config.interception().min_battery_health;
        let battery = self
            .batteries
            .get_mut(&id)
            .ok_or(DefenseError::UnknownBattery(id))?;
        battery.health = battery.health.saturating_sub(amount);
        if battery.health <= min_health {
            battery.status = BatteryStatus::Damaged;
        }
        self.grid_cache.clear();
        Ok(battery.health)
    }

    pub fn repair_battery(
        &mut self,
        id: BatteryId,
        ledger: &dyn ResourceLedger,
    ) -> Result<(), DefenseError> {
        let (owner, tier) = {
            let battery = self
                .batteries
                .get(&id)
                .ok_or(DefenseError::UnknownBattery(id))?;
            (battery.owner, battery.tier)
        };
        let spec = self
            .catalog
            .battery_tier(tier)
            .ok_or(DefenseError::UnknownTier(tier))?;
        let op_id = format!("battery-repair:{owner}:{id}");
        match ledger.debit(player_account(owner), ResourceKind::Materials, spec.repair_cost, &op_id)
        {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(DefenseError::InsufficientFunds {
                    cost: spec.repair_cost,
                    held,
                });
            }
            Err(LedgerError::Unavailable(err)) => return Err(DefenseError::Collaborator(err)),
        }
        let battery = self
            .batteries
            .get_mut(&id)
            .ok_or(DefenseError::UnknownBattery(id))?;
        battery.health = 100;
        battery.status = BatteryStatus::Idle;
        self.grid_cache.clear();
        Ok(())
    }

    /// Derived clan grid, cached until any member battery changes.
    pub fn clan_grid(
        &mut self,
        clan: ClanId,
        members: &[PlayerId],
        now: u64,
    ) -> ClanDefenseGrid {
        if let Some(cached) = self.grid_cache.get(&clan) {
            return *cached;
        }
        let min_health = self.config.interception().min_battery_health;
        let cap = self.config.interception().pool_cap;
        let mut bases: Vec<Chance> = members
            .iter()
            .flat_map(|member| self.batteries_of(*member))
            .filter(|battery| battery.is_eligible(now, min_health))
            .map(|battery| battery.intercept_chance)
            .collect();
        bases.sort_unstable_by(|a, b| b.cmp(a));
        bases.truncate(cap);
        let grid = ClanDefenseGrid {
            clan,
            eligible_batteries: bases.len(),
            combined_chance: combined_intercept_chance(
                &bases,
                Chance::ONE,
                self.config.interception(),
            ),
            computed_at: now,
        };
        self.grid_cache.insert(clan, grid);
        grid
    }

    /// Advance-warning sweep. Radar never changes interception odds; it
    /// only publishes detection events once per (owner, missile) contact,
    /// when the missile is inside the radar's lead window. Stealth warheads
    /// need stealth-capable radar.
    pub fn radar_sweep(
        &mut self,
        owner: PlayerId,
        arsenal: &ArsenalEngine,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
        now: u64,
    ) -> usize {
        let best = self
            .radars_of(owner)
            .filter_map(|radar| self.catalog.radar_level(radar.level))
            .max_by_key(|spec| spec.level)
            .cloned();
        let Some(radar) = best else {
            return 0;
        };

        let mut detections = 0;
        for missile in arsenal.inbound_for(owner) {
            let Some(impact_at) = missile.impact_at else {
                continue;
            };
            if impact_at.saturating_sub(now) > radar.lead_secs {
                continue;
            }
            let stealth = arsenal
                .catalog()
                .warhead(&missile.warhead)
                .map(|w| w.stealth)
                .unwrap_or(false);
            if stealth && !radar.stealth_detection {
                continue;
            }
            if !self.warned.insert((owner, missile.id)) {
                continue;
            }
            detections += 1;
            metrics.radar_warnings += 1;
            debug!(
                target: DEFENSE_TOPIC,
                "radar L{} contact: missile {} inbound for player {owner}",
                radar.level, missile.id
            );
            dispatcher.publish(BroadcastEvent::RadarWarning {
                owner: owner.0,
                missile: missile.id.0,
                impact_at,
                lead_secs: impact_at.saturating_sub(now),
                accuracy: radar.accuracy.raw(),
            });
        }
        detections
    }
}
