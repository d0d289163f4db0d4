use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::Deserialize;
use thiserror::Error;

use strike_runtime::{
    AuditFlags, BroadcastEvent, ComponentSlot, FailureKind, InterceptOutcome, MissileStatus,
    ResourceKind, SabotageDamageState,
};

use crate::broadcast::Dispatcher;
use crate::config::BalanceConfig;
use crate::ids::{IdAllocator, MissileId, MissionId, PlayerId};
use crate::metrics::SimulationMetrics;
use crate::research::UnlockedSet;
use crate::scalar::Chance;
use crate::services::{player_account, LedgerError, ResourceLedger};
use crate::store::{UpdateError, Versioned};

pub const BUILTIN_WARHEAD_CATALOG: &str = include_str!("data/warheads.json");

pub const ARSENAL_TOPIC: &str = "strike::arsenal";

// ---------------------------------------------------------------------------
// Warhead catalog
// ---------------------------------------------------------------------------

/// How a warhead spreads its damage. Percentages are of the recipient's
/// ledger value; each tier contributes less than the one before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DamageShape {
    Single {
        primary_percent: u8,
    },
    Multi {
        primary_percent: u8,
        secondary_percent: u8,
        secondary_count: u8,
    },
    ClanWide {
        primary_percent: u8,
        secondary_percent: u8,
        secondary_count: u8,
        tertiary_percent: u8,
        tertiary_sample: u8,
    },
}

impl DamageShape {
    pub fn primary_percent(&self) -> u8 {
        match *self {
            DamageShape::Single { primary_percent }
            | DamageShape::Multi {
                primary_percent, ..
            }
            | DamageShape::ClanWide {
                primary_percent, ..
            } => primary_percent,
        }
    }

    /// Upper bound on recipients, used to validate launch target lists.
    pub fn max_targets(&self) -> u32 {
        match *self {
            DamageShape::Single { .. } => 1,
            DamageShape::Multi {
                secondary_count, ..
            } => 1 + secondary_count as u32,
            // The tertiary group is sampled from the whole clan.
            DamageShape::ClanWide { .. } => 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WarheadEntry {
    id: String,
    name: String,
    tier: u8,
    flight_secs: u64,
    difficulty_modifier: f32,
    cost_multiplier: f32,
    #[serde(default)]
    stealth: bool,
    damage: DamageShape,
}

#[derive(Debug, Clone)]
pub struct WarheadSpec {
    pub id: String,
    pub name: String,
    pub tier: u8,
    pub flight_secs: u64,
    /// Multiplier in [0.7, 1.0] applied to the lead battery's base chance;
    /// harsher warheads are harder to stop.
    pub difficulty_modifier: Chance,
    pub cost_multiplier: f32,
    pub stealth: bool,
    pub damage: DamageShape,
}

#[derive(Debug, Deserialize)]
struct WarheadCatalogFile {
    slot_costs: SlotCosts,
    warheads: Vec<WarheadEntry>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct SlotCosts {
    guidance: u64,
    propulsion: u64,
    payload: u64,
    airframe: u64,
    arming: u64,
}

impl SlotCosts {
    fn cost(&self, slot: ComponentSlot) -> u64 {
        match slot {
            ComponentSlot::Guidance => self.guidance,
            ComponentSlot::Propulsion => self.propulsion,
            ComponentSlot::Payload => self.payload,
            ComponentSlot::Airframe => self.airframe,
            ComponentSlot::Arming => self.arming,
        }
    }
}

#[derive(Debug, Error)]
pub enum WarheadCatalogError {
    #[error("failed to parse warhead catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate warhead id '{0}'")]
    DuplicateWarhead(String),
    #[error("warhead '{id}' difficulty modifier {value} outside [0.7, 1.0]")]
    DifficultyOutOfRange { id: String, value: f32 },
}

#[derive(Debug)]
pub struct WarheadCatalog {
    warheads: HashMap<String, WarheadSpec>,
    slot_costs: SlotCosts,
}

impl WarheadCatalog {
    pub fn load_builtin() -> Result<Self, WarheadCatalogError> {
        Self::load_from_str(BUILTIN_WARHEAD_CATALOG)
    }

    pub fn load_from_str(json: &str) -> Result<Self, WarheadCatalogError> {
        let file: WarheadCatalogFile = serde_json::from_str(json)?;
        let mut warheads = HashMap::new();
        for entry in file.warheads {
            if !(0.7..=1.0).contains(&entry.difficulty_modifier) {
                return Err(WarheadCatalogError::DifficultyOutOfRange {
                    id: entry.id,
                    value: entry.difficulty_modifier,
                });
            }
            if warheads.contains_key(&entry.id) {
                return Err(WarheadCatalogError::DuplicateWarhead(entry.id));
            }
            let spec = WarheadSpec {
                id: entry.id.clone(),
                name: entry.name,
                tier: entry.tier,
                flight_secs: entry.flight_secs,
                difficulty_modifier: Chance::from_f32(entry.difficulty_modifier),
                cost_multiplier: entry.cost_multiplier,
                stealth: entry.stealth,
                damage: entry.damage,
            };
            warheads.insert(entry.id, spec);
        }
        Ok(Self {
            warheads,
            slot_costs: file.slot_costs,
        })
    }

    pub fn warhead(&self, id: &str) -> Option<&WarheadSpec> {
        self.warheads.get(id)
    }

    pub fn warheads(&self) -> impl Iterator<Item = &WarheadSpec> {
        self.warheads.values()
    }

    /// Component cost for one slot of one warhead: slot base × warhead
    /// cost multiplier, rounded to whole resources.
    pub fn component_cost(&self, warhead: &WarheadSpec, slot: ComponentSlot) -> u64 {
        (self.slot_costs.cost(slot) as f32 * warhead.cost_multiplier).round() as u64
    }
}

// ---------------------------------------------------------------------------
// Missiles
// ---------------------------------------------------------------------------

pub const COMPONENT_SLOTS: usize = 5;

#[derive(Debug, Clone)]
pub struct Missile {
    pub id: MissileId,
    pub owner: PlayerId,
    pub warhead: String,
    pub components: [bool; COMPONENT_SLOTS],
    pub status: MissileStatus,
    pub targets: Vec<PlayerId>,
    pub launched_at: Option<u64>,
    pub impact_at: Option<u64>,
    pub interception: Option<InterceptOutcome>,
}

impl Missile {
    pub fn completed_slots(&self) -> usize {
        self.components.iter().filter(|slot| **slot).count()
    }

    /// Always `100 × completed / 5`.
    pub fn progress_percent(&self) -> u8 {
        (self.completed_slots() * 100 / COMPONENT_SLOTS) as u8
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("unknown warhead '{0}'")]
    UnknownWarhead(String),
    #[error("warhead '{0}' not unlocked by owner")]
    WarheadNotUnlocked(String),
    #[error("unknown missile {0}")]
    UnknownMissile(MissileId),
    #[error("missile {missile} is {status:?}; operation requires {required:?}")]
    InvalidStatus {
        missile: MissileId,
        status: MissileStatus,
        required: &'static [MissileStatus],
    },
    #[error("missile {missile} slot {slot:?} already installed")]
    SlotAlreadyInstalled {
        missile: MissileId,
        slot: ComponentSlot,
    },
    #[error("insufficient materials: cost {cost}, held {held}")]
    InsufficientFunds { cost: u64, held: u64 },
    #[error("missile state lost a concurrent update race")]
    Conflict,
    #[error(transparent)]
    Collaborator(#[from] crate::services::CollaboratorError),
}

impl AssemblyError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AssemblyError::UnknownWarhead(_)
            | AssemblyError::WarheadNotUnlocked(_)
            | AssemblyError::UnknownMissile(_)
            | AssemblyError::InsufficientFunds { .. } => FailureKind::Validation,
            AssemblyError::InvalidStatus { .. } | AssemblyError::SlotAlreadyInstalled { .. } => {
                FailureKind::State
            }
            AssemblyError::Conflict => FailureKind::Conflict,
            AssemblyError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Missile Assembly & Inventory Manager.
#[derive(Debug)]
pub struct ArsenalEngine {
    catalog: Arc<WarheadCatalog>,
    config: Arc<BalanceConfig>,
    missiles: HashMap<MissileId, Versioned<Missile>>,
    ids: IdAllocator,
}

impl ArsenalEngine {
    pub fn new(catalog: Arc<WarheadCatalog>, config: Arc<BalanceConfig>) -> Self {
        Self {
            catalog,
            config,
            missiles: HashMap::new(),
            ids: IdAllocator::default(),
        }
    }

    pub fn catalog(&self) -> &WarheadCatalog {
        &self.catalog
    }

    pub fn missile(&self, id: MissileId) -> Option<&Missile> {
        self.missiles.get(&id).map(Versioned::value)
    }

    pub fn missiles_of(&self, owner: PlayerId) -> impl Iterator<Item = &Missile> {
        self.missiles
            .values()
            .map(Versioned::value)
            .filter(move |missile| missile.owner == owner)
    }

    /// Create a missile in ASSEMBLING with all five slots empty. Gated on
    /// the warhead variant being present in the owner's unlocked grants.
    pub fn start_assembly(
        &mut self,
        owner: PlayerId,
        warhead_id: &str,
        unlocked: &UnlockedSet,
        metrics: &mut SimulationMetrics,
    ) -> Result<MissileId, AssemblyError> {
        let warhead = self
            .catalog
            .warhead(warhead_id)
            .ok_or_else(|| AssemblyError::UnknownWarhead(warhead_id.to_string()))?;
        if !unlocked.warheads.contains(&warhead.id) {
            return Err(AssemblyError::WarheadNotUnlocked(warhead.id.clone()));
        }
        let id = MissileId(self.ids.allocate());
        self.missiles.insert(
            id,
            Versioned::new(Missile {
                id,
                owner,
                warhead: warhead.id.clone(),
                components: [false; COMPONENT_SLOTS],
                status: MissileStatus::Assembling,
                targets: Vec::new(),
                launched_at: None,
                impact_at: None,
                interception: None,
            }),
        );
        metrics.missiles_assembled += 1;
        debug!(target: ARSENAL_TOPIC, "missile {id} started ({warhead_id}) for player {owner}");
        Ok(id)
    }

    /// Charge one component and flip its slot. The fifth slot transitions
    /// ASSEMBLING → READY; calling on an already-READY missile is the
    /// idempotent no-op the transition demands.
    pub fn acquire_component(
        &mut self,
        missile_id: MissileId,
        slot: ComponentSlot,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
    ) -> Result<u8, AssemblyError> {
        let versioned = self
            .missiles
            .get_mut(&missile_id)
            .ok_or(AssemblyError::UnknownMissile(missile_id))?;

        let (owner, warhead_id) = {
            let (missile, _) = versioned.read();
            match missile.status {
                MissileStatus::Ready => return Ok(100),
                MissileStatus::Assembling => {}
                status => {
                    return Err(AssemblyError::InvalidStatus {
                        missile: missile_id,
                        status,
                        required: &[MissileStatus::Assembling, MissileStatus::Ready],
                    })
                }
            }
            if missile.components[slot.index()] {
                return Err(AssemblyError::SlotAlreadyInstalled {
                    missile: missile_id,
                    slot,
                });
            }
            (missile.owner, missile.warhead.clone())
        };

        let warhead = self
            .catalog
            .warhead(&warhead_id)
            .ok_or(AssemblyError::UnknownWarhead(warhead_id))?;
        let cost = self.catalog.component_cost(warhead, slot);

        // Idempotent op id: a CAS retry after a sabotage race cannot charge
        // the same slot twice.
        let op_id = format!("component:{missile_id}:{}", slot.index());
        match ledger.debit(player_account(owner), ResourceKind::Materials, cost, &op_id) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(AssemblyError::InsufficientFunds { cost, held });
            }
            Err(LedgerError::Unavailable(err)) => return Err(AssemblyError::Collaborator(err)),
        }

        let mut became_ready = false;
        versioned
            .update(|missile| {
                // Re-checked at write time: a concurrent sabotage may have
                // reset the slot set; the purchase still lands on one slot.
                let mut next = missile.clone();
                if next.status == MissileStatus::Ready {
                    return Ok(next);
                }
                next.components[slot.index()] = true;
                if next.completed_slots() == COMPONENT_SLOTS {
                    next.status = MissileStatus::Ready;
                }
                Ok::<_, AssemblyError>(next)
            })
            .map_err(|err| match err {
                UpdateError::Rejected(inner) => inner,
                UpdateError::Conflict(_) => {
                    metrics.conflicts_retried += 1;
                    AssemblyError::Conflict
                }
            })?;

        let missile = versioned.value();
        if missile.status == MissileStatus::Ready {
            became_ready = true;
        }
        let progress = missile.progress_percent();
        if became_ready {
            metrics.missiles_ready += 1;
            dispatcher.publish(BroadcastEvent::MissileReady {
                missile: missile_id.0,
                owner: owner.0,
            });
        }
        Ok(progress)
    }

    /// Permitted from ASSEMBLING or READY; no refund.
    pub fn dismantle(&mut self, missile_id: MissileId) -> Result<(), AssemblyError> {
        let versioned = self
            .missiles
            .get_mut(&missile_id)
            .ok_or(AssemblyError::UnknownMissile(missile_id))?;
        versioned
            .update(|missile| {
                if !matches!(
                    missile.status,
                    MissileStatus::Assembling | MissileStatus::Ready
                ) {
                    return Err(AssemblyError::InvalidStatus {
                        missile: missile_id,
                        status: missile.status,
                        required: &[MissileStatus::Assembling, MissileStatus::Ready],
                    });
                }
                let mut next = missile.clone();
                next.status = MissileStatus::Dismantled;
                Ok(next)
            })
            .map_err(|err| match err {
                UpdateError::Rejected(inner) => inner,
                UpdateError::Conflict(_) => AssemblyError::Conflict,
            })?;
        Ok(())
    }

    /// Espionage side effect. Destroys the most recently completed slot, or
    /// all five, reverting READY back to ASSEMBLING, and credits the refund
    /// fraction of the destroyed slots' cost to the missile *owner* (never
    /// the saboteur). Sabotage wins any race with a concurrent purchase;
    /// the refund is computed against the pre-sabotage slot set.
    pub fn apply_sabotage(
        &mut self,
        missile_id: MissileId,
        mission: MissionId,
        destroy_all: bool,
        now: u64,
        ledger: &dyn ResourceLedger,
        metrics: &mut SimulationMetrics,
    ) -> Result<SabotageDamageState, AssemblyError> {
        let versioned = self
            .missiles
            .get_mut(&missile_id)
            .ok_or(AssemblyError::UnknownMissile(missile_id))?;

        {
            let (missile, _) = versioned.read();
            if !matches!(
                missile.status,
                MissileStatus::Assembling | MissileStatus::Ready
            ) {
                return Err(AssemblyError::InvalidStatus {
                    missile: missile_id,
                    status: missile.status,
                    required: &[MissileStatus::Assembling, MissileStatus::Ready],
                });
            }
        }

        let mut destroyed: Vec<ComponentSlot> = Vec::new();
        let mut owner = PlayerId(0);
        let mut warhead_id = String::new();
        versioned
            .update(|missile| {
                let mut next = missile.clone();
                destroyed.clear();
                owner = next.owner;
                warhead_id = next.warhead.clone();
                if destroy_all {
                    for slot in ComponentSlot::ALL {
                        if next.components[slot.index()] {
                            destroyed.push(slot);
                            next.components[slot.index()] = false;
                        }
                    }
                } else if let Some(slot) = ComponentSlot::ALL
                    .into_iter()
                    .rev()
                    .find(|slot| next.components[slot.index()])
                {
                    destroyed.push(slot);
                    next.components[slot.index()] = false;
                }
                next.status = MissileStatus::Assembling;
                Ok::<_, AssemblyError>(next)
            })
            .map_err(|err| match err {
                UpdateError::Rejected(inner) => inner,
                UpdateError::Conflict(_) => AssemblyError::Conflict,
            })?;

        let refund_fraction = self.config.assembly().sabotage_refund_fraction();
        let warhead = self
            .catalog
            .warhead(&warhead_id)
            .ok_or(AssemblyError::UnknownWarhead(warhead_id))?;
        let destroyed_cost: u64 = destroyed
            .iter()
            .map(|slot| self.catalog.component_cost(warhead, *slot))
            .sum();
        let refund = (destroyed_cost as f32 * refund_fraction.to_f32()).round() as u64;
        if refund > 0 {
            let op_id = format!("sabotage-refund:{mission}:{missile_id}");
            ledger
                .credit(player_account(owner), ResourceKind::Materials, refund, &op_id)
                .map_err(|err| match err {
                    LedgerError::Unavailable(inner) => AssemblyError::Collaborator(inner),
                    LedgerError::InsufficientFunds { .. } => AssemblyError::Conflict,
                })?;
        }

        metrics.sabotage_hits += 1;
        debug!(
            target: ARSENAL_TOPIC,
            "missile {missile_id} sabotaged: {} slot(s) destroyed, {refund} refunded",
            destroyed.len()
        );
        Ok(SabotageDamageState {
            mission: mission.0,
            missile: missile_id.0,
            slots_destroyed: destroyed,
            refund_fraction: refund_fraction.raw(),
            resolved_at: now,
            flags: AuditFlags::empty(),
        })
    }

    /// Launch transition, invoked by the targeting engine after
    /// authorization. READY is re-checked at write time.
    pub(crate) fn mark_launched(
        &mut self,
        missile_id: MissileId,
        targets: Vec<PlayerId>,
        launched_at: u64,
        impact_at: u64,
    ) -> Result<(), AssemblyError> {
        let versioned = self
            .missiles
            .get_mut(&missile_id)
            .ok_or(AssemblyError::UnknownMissile(missile_id))?;
        versioned
            .update(|missile| {
                if missile.status != MissileStatus::Ready {
                    return Err(AssemblyError::InvalidStatus {
                        missile: missile_id,
                        status: missile.status,
                        required: &[MissileStatus::Ready],
                    });
                }
                let mut next = missile.clone();
                next.status = MissileStatus::Launched;
                next.targets = targets.clone();
                next.launched_at = Some(launched_at);
                next.impact_at = Some(impact_at);
                Ok(next)
            })
            .map_err(|err| match err {
                UpdateError::Rejected(inner) => inner,
                UpdateError::Conflict(_) => AssemblyError::Conflict,
            })?;
        Ok(())
    }

    /// Terminal transition written by the flight resolver.
    pub(crate) fn record_flight_outcome(
        &mut self,
        missile_id: MissileId,
        outcome: InterceptOutcome,
    ) -> Result<(), AssemblyError> {
        let versioned = self
            .missiles
            .get_mut(&missile_id)
            .ok_or(AssemblyError::UnknownMissile(missile_id))?;
        versioned
            .update(|missile| {
                if missile.status != MissileStatus::Launched {
                    return Err(AssemblyError::InvalidStatus {
                        missile: missile_id,
                        status: missile.status,
                        required: &[MissileStatus::Launched],
                    });
                }
                let mut next = missile.clone();
                next.interception = Some(outcome);
                next.status = if outcome.detonates() {
                    MissileStatus::Detonated
                } else {
                    MissileStatus::Intercepted
                };
                Ok(next)
            })
            .map_err(|err| match err {
                UpdateError::Rejected(inner) => inner,
                UpdateError::Conflict(_) => AssemblyError::Conflict,
            })?;
        Ok(())
    }

    /// Launched missiles currently en route to `target` (radar sweeps).
    pub fn inbound_for(&self, target: PlayerId) -> impl Iterator<Item = &Missile> {
        self.missiles
            .values()
            .map(Versioned::value)
            .filter(move |missile| {
                missile.status == MissileStatus::Launched
                    && missile.targets.first() == Some(&target)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ArsenalEngine {
        let catalog = Arc::new(WarheadCatalog::load_builtin().expect("builtin warheads parse"));
        let config = Arc::new(BalanceConfig::default());
        ArsenalEngine::new(catalog, config)
    }

    fn unlocked_with(warhead: &str) -> UnlockedSet {
        let mut unlocked = UnlockedSet::default();
        unlocked.warheads.insert(warhead.to_string());
        unlocked
    }

    fn funded_ledger(owner: PlayerId) -> crate::services::InMemoryLedger {
        let ledger = crate::services::InMemoryLedger::new();
        ledger.deposit(player_account(owner), ResourceKind::Materials, 1_000_000);
        ledger
    }

    fn assemble_ready(
        engine: &mut ArsenalEngine,
        owner: PlayerId,
        ledger: &crate::services::InMemoryLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
    ) -> MissileId {
        let id = engine
            .start_assembly(owner, "scout", &unlocked_with("scout"), metrics)
            .expect("assembly starts");
        for slot in ComponentSlot::ALL {
            engine
                .acquire_component(id, slot, ledger, dispatcher, metrics)
                .expect("component purchased");
        }
        id
    }

    #[test]
    fn warhead_gating_blocks_locked_variants() {
        let mut engine = engine();
        let mut metrics = SimulationMetrics::default();
        let err = engine
            .start_assembly(PlayerId(1), "clanbreaker", &unlocked_with("scout"), &mut metrics)
            .expect_err("locked warhead");
        assert!(matches!(err, AssemblyError::WarheadNotUnlocked(_)));
    }

    #[test]
    fn progress_tracks_slots_and_ready_needs_all_five() {
        let mut engine = engine();
        let owner = PlayerId(1);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let id = engine
            .start_assembly(owner, "scout", &unlocked_with("scout"), &mut metrics)
            .unwrap();
        assert_eq!(engine.missile(id).unwrap().progress_percent(), 0);

        let mut expected = 0;
        for slot in ComponentSlot::ALL {
            expected += 20;
            let progress = engine
                .acquire_component(id, slot, &ledger, &dispatcher, &mut metrics)
                .unwrap();
            assert_eq!(progress, expected);
        }
        let missile = engine.missile(id).unwrap();
        assert_eq!(missile.status, MissileStatus::Ready);
        assert_eq!(missile.progress_percent(), 100);

        // READY acquisition is idempotent.
        let progress = engine
            .acquire_component(id, ComponentSlot::Guidance, &ledger, &dispatcher, &mut metrics)
            .unwrap();
        assert_eq!(progress, 100);
        assert_eq!(metrics.missiles_ready, 1);
    }

    #[test]
    fn duplicate_slot_purchase_is_a_state_error() {
        let mut engine = engine();
        let owner = PlayerId(1);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let id = engine
            .start_assembly(owner, "scout", &unlocked_with("scout"), &mut metrics)
            .unwrap();
        engine
            .acquire_component(id, ComponentSlot::Payload, &ledger, &dispatcher, &mut metrics)
            .unwrap();
        let err = engine
            .acquire_component(id, ComponentSlot::Payload, &ledger, &dispatcher, &mut metrics)
            .expect_err("double purchase");
        assert_eq!(err.kind(), FailureKind::State);
    }

    #[test]
    fn component_purchase_charges_scaled_cost() {
        let mut engine = engine();
        let owner = PlayerId(2);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let before = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();
        let id = engine
            .start_assembly(owner, "scout", &unlocked_with("scout"), &mut metrics)
            .unwrap();
        engine
            .acquire_component(id, ComponentSlot::Payload, &ledger, &dispatcher, &mut metrics)
            .unwrap();
        let after = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();
        // Payload base 150 × scout multiplier 1.0.
        assert_eq!(before - after, 150);
    }

    #[test]
    fn dismantle_gives_no_refund_and_blocks_launched() {
        let mut engine = engine();
        let owner = PlayerId(3);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let id = assemble_ready(&mut engine, owner, &ledger, &dispatcher, &mut metrics);
        let before = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();
        engine.dismantle(id).expect("dismantle from READY");
        let after = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();
        assert_eq!(before, after, "no refund on dismantle");

        let id = assemble_ready(&mut engine, owner, &ledger, &dispatcher, &mut metrics);
        engine.mark_launched(id, vec![PlayerId(9)], 0, 120).unwrap();
        let err = engine.dismantle(id).expect_err("launched missiles run to terminal state");
        assert_eq!(err.kind(), FailureKind::State);
    }

    #[test]
    fn nuclear_sabotage_zeroes_a_ready_missile_in_one_action() {
        let mut engine = engine();
        let owner = PlayerId(4);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let id = assemble_ready(&mut engine, owner, &ledger, &dispatcher, &mut metrics);
        let record = engine
            .apply_sabotage(id, MissionId(1), true, 1_000, &ledger, &mut metrics)
            .expect("sabotage applies");

        let missile = engine.missile(id).unwrap();
        assert_eq!(missile.status, MissileStatus::Assembling);
        assert_eq!(missile.completed_slots(), 0);
        assert_eq!(record.slots_destroyed.len(), 5);
    }

    #[test]
    fn light_sabotage_refunds_owner_half_of_one_slot() {
        let mut engine = engine();
        let owner = PlayerId(5);
        let ledger = funded_ledger(owner);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let id = assemble_ready(&mut engine, owner, &ledger, &dispatcher, &mut metrics);
        let before = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();
        let record = engine
            .apply_sabotage(id, MissionId(2), false, 1_000, &ledger, &mut metrics)
            .unwrap();
        let after = ledger.balance(player_account(owner), ResourceKind::Materials).unwrap();

        assert_eq!(record.slots_destroyed, vec![ComponentSlot::Arming]);
        // Arming base 90 × 1.0 multiplier, refunded at 0.5.
        assert_eq!(after - before, 45);
        let missile = engine.missile(id).unwrap();
        assert_eq!(missile.status, MissileStatus::Assembling);
        assert_eq!(missile.completed_slots(), 4);
    }
}
