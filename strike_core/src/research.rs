use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use strike_runtime::{
    BroadcastEvent, FailureKind, MissionKind, ResearchTrack, ResourceKind, SpyRank,
};

use crate::broadcast::Dispatcher;
use crate::ids::{PlayerId, TechId};
use crate::metrics::SimulationMetrics;
use crate::services::{
    rp_account, CollaboratorError, LedgerError, PlayerDirectory, ResourceLedger,
};
use crate::store::{UpdateError, Versioned};

pub const BUILTIN_RESEARCH_CATALOG: &str = include_str!("data/research_techs.json");

pub const RESEARCH_TOPIC: &str = "strike::research";

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// What completing a tech grants. A closed set: adding a grant kind forces
/// every aggregation site through an exhaustive match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "grant", rename_all = "snake_case")]
pub enum UnlockGrant {
    Warhead { id: String },
    BatteryTier { tier: u8 },
    RadarLevel { level: u8 },
    Mission { kind: MissionKind },
    SpyRank { rank: SpyRank },
}

/// Named accumulator over a player's unlock grants; consulted by the
/// assembly, defense and espionage engines for gating.
#[derive(Debug, Clone, Default)]
pub struct UnlockedSet {
    pub warheads: HashSet<String>,
    pub battery_tiers: HashSet<u8>,
    pub radar_levels: HashSet<u8>,
    pub missions: HashSet<MissionKind>,
    pub spy_ranks: HashSet<SpyRank>,
}

impl UnlockedSet {
    pub fn absorb(&mut self, grant: &UnlockGrant) {
        match grant {
            UnlockGrant::Warhead { id } => {
                self.warheads.insert(id.clone());
            }
            UnlockGrant::BatteryTier { tier } => {
                self.battery_tiers.insert(*tier);
            }
            UnlockGrant::RadarLevel { level } => {
                self.radar_levels.insert(*level);
            }
            UnlockGrant::Mission { kind } => {
                self.missions.insert(*kind);
            }
            UnlockGrant::SpyRank { rank } => {
                self.spy_ranks.insert(*rank);
            }
        }
    }
}

/// Immutable catalog node. `closure` holds the *recursive* prerequisite set,
/// computed once at load so per-request validation is a set containment.
#[derive(Debug, Clone)]
pub struct ResearchTech {
    pub id: TechId,
    pub track: ResearchTrack,
    pub tier: u8,
    pub prerequisites: Vec<TechId>,
    pub closure: HashSet<TechId>,
    pub rp_cost: u64,
    pub player_level_gate: u32,
    pub clan_level_gate: u32,
    pub unlocks: Vec<UnlockGrant>,
}

#[derive(Debug, Error)]
pub enum ResearchCatalogError {
    #[error("failed to parse research catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("duplicate tech id '{0}'")]
    DuplicateTech(String),
    #[error("tech '{tech}' references unknown prerequisite '{prerequisite}'")]
    UnknownPrerequisite { tech: String, prerequisite: String },
    #[error("prerequisite cycle through tech '{0}'")]
    PrerequisiteCycle(String),
    #[error("tech '{tech}' has tier {tier}, outside 1..=10")]
    TierOutOfRange { tech: String, tier: u8 },
}

#[derive(Debug, Deserialize)]
struct ResearchCatalogFile {
    techs: Vec<ResearchTechEntry>,
}

#[derive(Debug, Deserialize)]
struct ResearchTechEntry {
    id: String,
    track: ResearchTrack,
    tier: u8,
    #[serde(default)]
    prerequisites: Vec<String>,
    rp_cost: u64,
    #[serde(default)]
    player_level: u32,
    #[serde(default)]
    clan_level: u32,
    #[serde(default)]
    unlocks: Vec<UnlockGrant>,
}

/// Static research DAG keyed by tech id. Loaded once; cycle-freedom and
/// reference integrity are load-time invariants, never runtime checks.
#[derive(Debug)]
pub struct ResearchCatalog {
    techs: HashMap<TechId, ResearchTech>,
    order: Vec<TechId>,
}

impl ResearchCatalog {
    pub fn load_builtin() -> Result<Self, ResearchCatalogError> {
        Self::load_from_str(BUILTIN_RESEARCH_CATALOG)
    }

    pub fn load_from_str(json: &str) -> Result<Self, ResearchCatalogError> {
        let file: ResearchCatalogFile = serde_json::from_str(json)?;

        let mut entries: HashMap<TechId, ResearchTechEntry> = HashMap::new();
        let mut order = Vec::with_capacity(file.techs.len());
        for entry in file.techs {
            if !(1..=10).contains(&entry.tier) {
                return Err(ResearchCatalogError::TierOutOfRange {
                    tech: entry.id,
                    tier: entry.tier,
                });
            }
            let id = TechId::new(entry.id.clone());
            if entries.contains_key(&id) {
                return Err(ResearchCatalogError::DuplicateTech(entry.id));
            }
            order.push(id.clone());
            entries.insert(id, entry);
        }

        for entry in entries.values() {
            for prerequisite in &entry.prerequisites {
                if !entries.contains_key(&TechId::new(prerequisite.clone())) {
                    return Err(ResearchCatalogError::UnknownPrerequisite {
                        tech: entry.id.clone(),
                        prerequisite: prerequisite.clone(),
                    });
                }
            }
        }

        // Depth-first closure with an on-stack marker doubling as the cycle
        // check.
        let mut closures: HashMap<TechId, HashSet<TechId>> = HashMap::new();
        for id in &order {
            let mut stack = HashSet::new();
            Self::closure_of(id, &entries, &mut closures, &mut stack)?;
        }

        let techs = entries
            .into_iter()
            .map(|(id, entry)| {
                let closure = closures.remove(&id).unwrap_or_default();
                let tech = ResearchTech {
                    id: id.clone(),
                    track: entry.track,
                    tier: entry.tier,
                    prerequisites: entry
                        .prerequisites
                        .iter()
                        .map(|p| TechId::new(p.clone()))
                        .collect(),
                    closure,
                    rp_cost: entry.rp_cost,
                    player_level_gate: entry.player_level,
                    clan_level_gate: entry.clan_level,
                    unlocks: entry.unlocks,
                };
                (id, tech)
            })
            .collect();

        Ok(Self { techs, order })
    }

    fn closure_of(
        id: &TechId,
        entries: &HashMap<TechId, ResearchTechEntry>,
        closures: &mut HashMap<TechId, HashSet<TechId>>,
        stack: &mut HashSet<TechId>,
    ) -> Result<HashSet<TechId>, ResearchCatalogError> {
        if let Some(done) = closures.get(id) {
            return Ok(done.clone());
        }
        if !stack.insert(id.clone()) {
            return Err(ResearchCatalogError::PrerequisiteCycle(id.0.clone()));
        }
        let entry = entries.get(id).expect("referential integrity checked");
        let mut closure = HashSet::new();
        for prerequisite in &entry.prerequisites {
            let pid = TechId::new(prerequisite.clone());
            closure.insert(pid.clone());
            let upstream = Self::closure_of(&pid, entries, closures, stack)?;
            closure.extend(upstream);
        }
        stack.remove(id);
        closures.insert(id.clone(), closure.clone());
        Ok(closure)
    }

    pub fn tech(&self, id: &TechId) -> Option<&ResearchTech> {
        self.techs.get(id)
    }

    pub fn techs(&self) -> impl Iterator<Item = &ResearchTech> {
        self.order.iter().filter_map(|id| self.techs.get(id))
    }

    pub fn len(&self) -> usize {
        self.techs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.techs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Player progress
// ---------------------------------------------------------------------------

/// Tech currently being funded incrementally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InProgressResearch {
    pub tech: TechId,
    pub rp_spent: u64,
    pub rp_required: u64,
}

/// Per-player research progress; created on first research action and
/// mutated only by this engine.
#[derive(Debug, Clone, Default)]
pub struct PlayerResearch {
    pub completed: HashSet<TechId>,
    pub in_progress: Option<InProgressResearch>,
    pub track_tiers: HashMap<ResearchTrack, u8>,
    pub rp_spent_total: u64,
    /// Bumped every time instalments are rolled back, so the ledger op ids
    /// of a later funding round never collide with a spent one.
    pub fund_epoch: u64,
}

impl PlayerResearch {
    pub fn highest_tier(&self, track: ResearchTrack) -> u8 {
        self.track_tiers.get(&track).copied().unwrap_or(0)
    }
}

#[derive(Debug, Error)]
pub enum UnlockError {
    #[error("unknown tech '{0}'")]
    UnknownTech(String),
    #[error("tech '{0}' already unlocked")]
    AlreadyUnlocked(TechId),
    #[error("tech '{tech}' missing prerequisite '{missing}'")]
    PrerequisiteUnmet { tech: TechId, missing: TechId },
    #[error(
        "tech '{tech}' gated at player level {player_gate}/clan level {clan_gate} \
         (player has {player_level}/{clan_level})"
    )]
    InsufficientLevel {
        tech: TechId,
        player_gate: u32,
        clan_gate: u32,
        player_level: u32,
        clan_level: u32,
    },
    #[error("insufficient research points for '{tech}': cost {cost}, held {held}")]
    InsufficientRp { tech: TechId, cost: u64, held: u64 },
    #[error("research state lost a concurrent update race")]
    Conflict,
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl UnlockError {
    pub fn kind(&self) -> FailureKind {
        match self {
            UnlockError::UnknownTech(_)
            | UnlockError::PrerequisiteUnmet { .. }
            | UnlockError::InsufficientLevel { .. }
            | UnlockError::InsufficientRp { .. } => FailureKind::Validation,
            UnlockError::AlreadyUnlocked(_) => FailureKind::State,
            UnlockError::Conflict => FailureKind::Conflict,
            UnlockError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Research Graph Engine: validates and unlocks nodes in the fixed DAG and
/// maintains the memoized available-tech frontier per player.
#[derive(Debug)]
pub struct ResearchEngine {
    catalog: Arc<ResearchCatalog>,
    players: HashMap<PlayerId, Versioned<PlayerResearch>>,
    frontier: HashMap<PlayerId, HashSet<TechId>>,
    unlocked: HashMap<PlayerId, UnlockedSet>,
}

impl ResearchEngine {
    pub fn new(catalog: Arc<ResearchCatalog>) -> Self {
        Self {
            catalog,
            players: HashMap::new(),
            frontier: HashMap::new(),
            unlocked: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &ResearchCatalog {
        &self.catalog
    }

    pub fn progress(&self, player: PlayerId) -> Option<&PlayerResearch> {
        self.players.get(&player).map(Versioned::value)
    }

    /// Grants accumulated from every completed tech; empty set for players
    /// who have never researched.
    pub fn unlocked(&self, player: PlayerId) -> &UnlockedSet {
        static EMPTY: std::sync::OnceLock<UnlockedSet> = std::sync::OnceLock::new();
        self.unlocked
            .get(&player)
            .unwrap_or_else(|| EMPTY.get_or_init(UnlockedSet::default))
    }

    /// `unlock` validates the recursive prerequisite closure, both level
    /// gates and the RP balance, then completes the tech. The RP debit is
    /// the last step before local mutation, so any refusal leaves research
    /// state untouched.
    pub fn unlock(
        &mut self,
        player: PlayerId,
        tech_id: &TechId,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
    ) -> Result<(), UnlockError> {
        let tech = self
            .catalog
            .tech(tech_id)
            .ok_or_else(|| UnlockError::UnknownTech(tech_id.0.clone()))?
            .clone();

        let profile = directory.profile(player)?;
        if profile.level < tech.player_level_gate || profile.clan_level < tech.clan_level_gate {
            return Err(UnlockError::InsufficientLevel {
                tech: tech.id.clone(),
                player_gate: tech.player_level_gate,
                clan_gate: tech.clan_level_gate,
                player_level: profile.level,
                clan_level: profile.clan_level,
            });
        }

        let slot = self.players.entry(player).or_default();
        {
            let (progress, _) = slot.read();
            if progress.completed.contains(&tech.id) {
                return Err(UnlockError::AlreadyUnlocked(tech.id.clone()));
            }
            if let Some(missing) = tech
                .closure
                .iter()
                .find(|prerequisite| !progress.completed.contains(*prerequisite))
            {
                return Err(UnlockError::PrerequisiteUnmet {
                    tech: tech.id.clone(),
                    missing: missing.clone(),
                });
            }
        }

        // Single atomic conditional debit against the shared pool; two
        // simultaneous unlocks of an exactly-affordable tech cannot both
        // pass this.
        let account = rp_account(&profile);
        let op_id = format!("research:{player}:{tech_id}");
        match ledger.debit(account, ResourceKind::ResearchPoints, tech.rp_cost, &op_id) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(UnlockError::InsufficientRp {
                    tech: tech.id.clone(),
                    cost: tech.rp_cost,
                    held,
                });
            }
            Err(LedgerError::Unavailable(err)) => return Err(UnlockError::Collaborator(err)),
        }

        let completed_tech = tech.clone();
        slot.update(|progress| {
            if progress.completed.contains(&completed_tech.id) {
                return Err(UnlockError::AlreadyUnlocked(completed_tech.id.clone()));
            }
            let mut next = progress.clone();
            next.completed.insert(completed_tech.id.clone());
            next.rp_spent_total += completed_tech.rp_cost;
            let tier = next.track_tiers.entry(completed_tech.track).or_insert(0);
            *tier = (*tier).max(completed_tech.tier);
            if next
                .in_progress
                .as_ref()
                .is_some_and(|partial| partial.tech == completed_tech.id)
            {
                next.in_progress = None;
            }
            Ok(next)
        })
        .map_err(|err| match err {
            UpdateError::Rejected(inner) => inner,
            UpdateError::Conflict(_) => {
                metrics.conflicts_retried += 1;
                UnlockError::Conflict
            }
        })?;

        let grants = self.unlocked.entry(player).or_default();
        for grant in &tech.unlocks {
            grants.absorb(grant);
        }
        self.recompute_frontier(player);
        metrics.techs_unlocked += 1;

        debug!(
            target: RESEARCH_TOPIC,
            "player {} unlocked {} (track {:?}, tier {})",
            player, tech.id, tech.track, tech.tier
        );
        dispatcher.publish(BroadcastEvent::TechUnlocked {
            player: player.0,
            tech: tech.id.0.clone(),
            track: tech.track,
            tier: tech.tier,
        });
        Ok(())
    }

    /// Partially fund a tech; completion still goes through [`unlock`]'s
    /// validation by deferring the final debit to the remaining balance.
    pub fn fund_research(
        &mut self,
        player: PlayerId,
        tech_id: &TechId,
        amount: u64,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
    ) -> Result<(), UnlockError> {
        let tech = self
            .catalog
            .tech(tech_id)
            .ok_or_else(|| UnlockError::UnknownTech(tech_id.0.clone()))?
            .clone();

        let slot = self.players.entry(player).or_default();
        let (already_spent, epoch) = {
            let (progress, _) = slot.read();
            if progress.completed.contains(&tech.id) {
                return Err(UnlockError::AlreadyUnlocked(tech.id.clone()));
            }
            let spent = match &progress.in_progress {
                Some(partial) if partial.tech == tech.id => partial.rp_spent,
                Some(_) | None => 0,
            };
            (spent, progress.fund_epoch)
        };

        let remaining = tech.rp_cost.saturating_sub(already_spent);
        if amount >= remaining {
            // Final instalment: roll the part-payments back and route
            // through `unlock` so completion revalidates everything and the
            // full-cost debit stays the single balance-bearing write.
            return self.unlock_partial(
                player, &tech, already_spent, epoch, directory, ledger, dispatcher, metrics,
            );
        }

        let profile = directory.profile(player)?;
        let account = rp_account(&profile);
        let op_id = format!("research-fund:{player}:{tech_id}:{epoch}:{already_spent}");
        match ledger.debit(account, ResourceKind::ResearchPoints, amount, &op_id) {
            Ok(()) => {}
            Err(LedgerError::InsufficientFunds { held, .. }) => {
                return Err(UnlockError::InsufficientRp {
                    tech: tech.id.clone(),
                    cost: amount,
                    held,
                });
            }
            Err(LedgerError::Unavailable(err)) => return Err(UnlockError::Collaborator(err)),
        }

        let funded_tech = tech.id.clone();
        let rp_required = tech.rp_cost;
        let slot = self.players.entry(player).or_default();
        slot.update(|progress| {
            let mut next = progress.clone();
            let spent = match &next.in_progress {
                Some(partial) if partial.tech == funded_tech => partial.rp_spent,
                Some(_) | None => 0,
            };
            next.in_progress = Some(InProgressResearch {
                tech: funded_tech.clone(),
                rp_spent: spent + amount,
                rp_required,
            });
            next.rp_spent_total += amount;
            Ok::<_, UnlockError>(next)
        })
        .map_err(|err| match err {
            UpdateError::Rejected(inner) => inner,
            UpdateError::Conflict(_) => UnlockError::Conflict,
        })?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn unlock_partial(
        &mut self,
        player: PlayerId,
        tech: &ResearchTech,
        already_spent: u64,
        epoch: u64,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
    ) -> Result<(), UnlockError> {
        // Credit back the instalments so the plain unlock debit stays the
        // single balance-bearing write. The op id carries the funding epoch
        // and the in-progress marker is cleared alongside the credit: if the
        // completion below is refused, a later funding round starts from
        // zero with fresh op ids instead of silently replaying spent ones.
        if already_spent > 0 {
            let profile = directory.profile(player)?;
            let account = rp_account(&profile);
            let op_id = format!("research-fund-rollup:{player}:{}:{epoch}", tech.id);
            ledger
                .credit(account, ResourceKind::ResearchPoints, already_spent, &op_id)
                .map_err(|err| match err {
                    LedgerError::Unavailable(inner) => UnlockError::Collaborator(inner),
                    LedgerError::InsufficientFunds { .. } => UnlockError::Conflict,
                })?;
            if let Some(slot) = self.players.get_mut(&player) {
                let _ = slot.update(|progress| {
                    let mut next = progress.clone();
                    next.rp_spent_total = next.rp_spent_total.saturating_sub(already_spent);
                    if next
                        .in_progress
                        .as_ref()
                        .is_some_and(|partial| partial.tech == tech.id)
                    {
                        next.in_progress = None;
                    }
                    next.fund_epoch += 1;
                    Ok::<_, UnlockError>(next)
                });
            }
        }
        self.unlock(player, &tech.id, directory, ledger, dispatcher, metrics)
    }

    /// Memoized frontier: every tech whose direct prerequisites are all
    /// completed and which is not itself completed. Invalidated only by a
    /// successful unlock.
    pub fn frontier(&mut self, player: PlayerId) -> &HashSet<TechId> {
        if !self.frontier.contains_key(&player) {
            self.recompute_frontier(player);
        }
        self.frontier.get(&player).expect("frontier just computed")
    }

    fn recompute_frontier(&mut self, player: PlayerId) {
        let completed: HashSet<TechId> = self
            .players
            .get(&player)
            .map(|slot| slot.value().completed.clone())
            .unwrap_or_default();
        let available: HashSet<TechId> = self
            .catalog
            .techs()
            .filter(|tech| {
                !completed.contains(&tech.id)
                    && tech
                        .prerequisites
                        .iter()
                        .all(|prerequisite| completed.contains(prerequisite))
            })
            .map(|tech| tech.id.clone())
            .collect();
        self.frontier.insert(player, available);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClanId;
    use crate::services::{InMemoryDirectory, InMemoryLedger, PlayerProfile};

    fn directory_with(player: PlayerId, level: u32, clan_level: u32) -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        directory.upsert(PlayerProfile {
            player,
            level,
            power: 10_000,
            clan: Some(ClanId(1)),
            clan_level,
            leadership: false,
            protected_until: 0,
        });
        directory
    }

    fn engine() -> ResearchEngine {
        let catalog = Arc::new(ResearchCatalog::load_builtin().expect("builtin catalog parses"));
        ResearchEngine::new(catalog)
    }

    #[test]
    fn builtin_catalog_is_acyclic_and_complete() {
        let catalog = ResearchCatalog::load_builtin().expect("builtin catalog parses");
        assert_eq!(catalog.len(), 30);
        for track in ResearchTrack::ALL {
            for tier in 1..=10u8 {
                assert!(
                    catalog.techs().any(|t| t.track == track && t.tier == tier),
                    "missing {track:?} tier {tier}"
                );
            }
        }
    }

    #[test]
    fn cycle_in_catalog_is_a_load_error() {
        let json = r#"{"techs": [
            {"id": "a", "track": "missile", "tier": 1, "prerequisites": ["b"], "rp_cost": 10},
            {"id": "b", "track": "missile", "tier": 2, "prerequisites": ["a"], "rp_cost": 10}
        ]}"#;
        let err = ResearchCatalog::load_from_str(json).expect_err("cycle rejected");
        assert!(matches!(err, ResearchCatalogError::PrerequisiteCycle(_)));
    }

    #[test]
    fn unlock_requires_recursive_closure_not_just_parents() {
        let mut engine = engine();
        let player = PlayerId(1);
        let directory = directory_with(player, 50, 10);
        let ledger = InMemoryLedger::new();
        ledger.deposit(crate::services::clan_account(ClanId(1)), ResourceKind::ResearchPoints, 100_000);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        // Tier 3 requires tier 2 which requires tier 1; jumping straight to
        // tier 2 must fail even though its direct parent list is only tier 1.
        let err = engine
            .unlock(player, &TechId::new("missile_t2"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect_err("prereq unmet");
        assert!(matches!(err, UnlockError::PrerequisiteUnmet { .. }));
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(engine.progress(player).is_none() || engine.progress(player).unwrap().completed.is_empty());

        engine
            .unlock(player, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect("tier 1 unlocks");
        engine
            .unlock(player, &TechId::new("missile_t2"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect("tier 2 unlocks after tier 1");

        let progress = engine.progress(player).expect("created");
        assert_eq!(progress.highest_tier(ResearchTrack::Missile), 2);
        assert_eq!(metrics.techs_unlocked, 2);
    }

    #[test]
    fn unlock_failures_are_specific_and_mutate_nothing() {
        let mut engine = engine();
        let player = PlayerId(2);
        let directory = directory_with(player, 1, 0);
        let ledger = InMemoryLedger::new();
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let err = engine
            .unlock(player, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect_err("level gate");
        assert!(matches!(err, UnlockError::InsufficientLevel { .. }));

        let directory = directory_with(player, 50, 10);
        let err = engine
            .unlock(player, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect_err("no RP deposited");
        assert!(matches!(err, UnlockError::InsufficientRp { .. }));
        assert!(engine.unlocked(player).warheads.is_empty());
        assert_eq!(metrics.techs_unlocked, 0);
    }

    #[test]
    fn shared_pool_admits_exactly_one_of_two_exact_cost_unlocks() {
        let mut engine = engine();
        let first = PlayerId(3);
        let second = PlayerId(4);
        let directory = InMemoryDirectory::new();
        for player in [first, second] {
            directory.upsert(PlayerProfile {
                player,
                level: 50,
                power: 10_000,
                clan: Some(ClanId(7)),
                clan_level: 10,
                leadership: false,
                protected_until: 0,
            });
        }
        let ledger = InMemoryLedger::new();
        let cost = engine
            .catalog()
            .tech(&TechId::new("missile_t1"))
            .unwrap()
            .rp_cost;
        ledger.deposit(crate::services::clan_account(ClanId(7)), ResourceKind::ResearchPoints, cost);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        engine
            .unlock(first, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect("first unlock wins the pool");
        let err = engine
            .unlock(second, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect_err("pool exhausted");
        assert!(matches!(err, UnlockError::InsufficientRp { .. }));
    }

    #[test]
    fn frontier_is_memoized_and_invalidated_by_unlock() {
        let mut engine = engine();
        let player = PlayerId(5);
        let directory = directory_with(player, 50, 10);
        let ledger = InMemoryLedger::new();
        ledger.deposit(crate::services::clan_account(ClanId(1)), ResourceKind::ResearchPoints, 100_000);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let frontier = engine.frontier(player).clone();
        assert!(frontier.contains(&TechId::new("missile_t1")));
        assert!(frontier.contains(&TechId::new("defense_t1")));
        assert!(!frontier.contains(&TechId::new("missile_t2")));

        engine
            .unlock(player, &TechId::new("missile_t1"), &directory, &ledger, &dispatcher, &mut metrics)
            .expect("unlocks");
        let frontier = engine.frontier(player);
        assert!(!frontier.contains(&TechId::new("missile_t1")));
        assert!(frontier.contains(&TechId::new("missile_t2")));
    }

    #[test]
    fn partial_funding_tracks_progress_then_completes() {
        let mut engine = engine();
        let player = PlayerId(6);
        let directory = directory_with(player, 50, 10);
        let ledger = InMemoryLedger::new();
        ledger.deposit(crate::services::clan_account(ClanId(1)), ResourceKind::ResearchPoints, 100_000);
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        let tech = TechId::new("intelligence_t1");
        engine
            .fund_research(player, &tech, 30, &directory, &ledger, &dispatcher, &mut metrics)
            .expect("partial instalment");
        let partial = engine
            .progress(player)
            .and_then(|p| p.in_progress.clone())
            .expect("in progress");
        assert_eq!(partial.rp_spent, 30);
        assert!(partial.rp_spent < partial.rp_required);

        engine
            .fund_research(player, &tech, partial.rp_required, &directory, &ledger, &dispatcher, &mut metrics)
            .expect("final instalment completes");
        let progress = engine.progress(player).unwrap();
        assert!(progress.completed.contains(&tech));
        assert!(progress.in_progress.is_none());
    }

    #[test]
    fn failed_completion_refunds_instalments_for_the_next_round() {
        let mut engine = engine();
        let player = PlayerId(7);
        let directory = directory_with(player, 50, 10);
        let ledger = InMemoryLedger::new();
        let pool = crate::services::clan_account(ClanId(1));
        let (dispatcher, _rx) = Dispatcher::channel();
        let mut metrics = SimulationMetrics::default();

        // Cost 100: escrow 30, then attempt completion with an empty pool.
        let tech = TechId::new("intelligence_t1");
        ledger.deposit(pool, ResourceKind::ResearchPoints, 30);
        engine
            .fund_research(player, &tech, 30, &directory, &ledger, &dispatcher, &mut metrics)
            .expect("first instalment");
        let err = engine
            .fund_research(player, &tech, 70, &directory, &ledger, &dispatcher, &mut metrics)
            .expect_err("full-cost debit refused");
        assert!(matches!(err, UnlockError::InsufficientRp { held: 30, .. }));

        // The instalment came back to the pool and the escrow was cleared.
        assert_eq!(
            ledger.balance(pool, ResourceKind::ResearchPoints).unwrap(),
            30
        );
        assert!(engine.progress(player).unwrap().in_progress.is_none());

        // A later funding round must refund just as cleanly; a replayed
        // rollup op id would swallow this round's credit.
        ledger.deposit(pool, ResourceKind::ResearchPoints, 120);
        engine
            .fund_research(player, &tech, 50, &directory, &ledger, &dispatcher, &mut metrics)
            .expect("second round instalment");
        engine
            .fund_research(player, &tech, 50, &directory, &ledger, &dispatcher, &mut metrics)
            .expect("completion with a funded pool");

        let progress = engine.progress(player).unwrap();
        assert!(progress.completed.contains(&tech));
        // 150 deposited in total, exactly the 100 cost spent.
        assert_eq!(
            ledger.balance(pool, ResourceKind::ResearchPoints).unwrap(),
            50
        );
        assert_eq!(progress.rp_spent_total, 100);
    }
}
