//! Simulation core for a strategic-warfare game: research, missile
//! assembly, launch authorization, flight resolution, defense, and
//! espionage.
//!
//! The crate owns no threads and no clock. Every operation takes an
//! explicit `now` in unix seconds, mutations go through [`SimContext`], and
//! scheduled work surfaces through [`SimContext::due_impacts`] /
//! [`SimContext::due_missions`] for an external trigger to drain.

pub mod arsenal;
pub mod broadcast;
pub mod config;
pub mod damage;
pub mod defense;
pub mod espionage;
pub mod flight;
pub mod hashing;
pub mod ids;
pub mod log_stream;
pub mod metrics;
pub mod queue;
pub mod research;
pub mod scalar;
pub mod services;
pub mod store;
pub mod targeting;

use std::sync::Arc;

use crossbeam_channel::Receiver;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;

use strike_runtime::{BroadcastEvent, MissionKind, MissionStatus};

pub use arsenal::{ArsenalEngine, AssemblyError, DamageShape, WarheadCatalog, WarheadSpec};
pub use broadcast::Dispatcher;
pub use config::BalanceConfig;
pub use defense::{DefenseCatalog, DefenseEngine, DefenseError};
pub use espionage::{EspionageEngine, EspionageError, MissionCatalog};
pub use flight::{FlightEngine, FlightError};
pub use ids::{
    BatteryId, ClanId, IdAllocator, MissileId, MissionId, PlayerId, RadarId, SpyId, TechId, VoteId,
};
pub use metrics::SimulationMetrics;
pub use queue::{DueKind, DueKey, DueQueue};
pub use research::{ResearchCatalog, ResearchEngine, UnlockError, UnlockedSet};
pub use scalar::Chance;
pub use services::{
    ClanVoteService, CollaboratorError, InMemoryDirectory, InMemoryLedger, InMemoryVotes,
    LedgerError, PlayerDirectory, PlayerProfile, ResourceLedger, VoteOutcome,
};
pub use targeting::{LaunchError, TargetingEngine};

use strike_runtime::InterceptionAttemptState;

#[derive(Debug, Error)]
pub enum SimInitError {
    #[error(transparent)]
    Config(#[from] config::BalanceConfigError),
    #[error(transparent)]
    Research(#[from] research::ResearchCatalogError),
    #[error(transparent)]
    Warheads(#[from] arsenal::WarheadCatalogError),
    #[error(transparent)]
    Defense(#[from] defense::DefenseCatalogError),
    #[error(transparent)]
    Missions(#[from] espionage::MissionCatalogError),
}

/// Everything the simulation owns, constructed once at process start. No
/// module-level singletons; collaborators come in as trait handles and the
/// broadcast receiver goes back out to the embedding.
pub struct SimContext {
    pub research: ResearchEngine,
    pub arsenal: ArsenalEngine,
    pub targeting: TargetingEngine,
    pub flight: FlightEngine,
    pub defense: DefenseEngine,
    pub espionage: EspionageEngine,
    pub queue: DueQueue,
    pub metrics: SimulationMetrics,
    ledger: Arc<dyn ResourceLedger>,
    votes: Arc<dyn ClanVoteService>,
    directory: Arc<dyn PlayerDirectory>,
    dispatcher: Dispatcher,
}

impl SimContext {
    /// Build a context from the builtin catalogs. `master_seed` feeds a
    /// ChaCha stream that derives one independent seed per resolver, so a
    /// replay with the same seed re-rolls identically.
    pub fn new(
        ledger: Arc<dyn ResourceLedger>,
        votes: Arc<dyn ClanVoteService>,
        directory: Arc<dyn PlayerDirectory>,
        master_seed: u64,
    ) -> Result<(Self, Receiver<BroadcastEvent>), SimInitError> {
        let config = Arc::new(BalanceConfig::load_builtin()?);
        let research_catalog = Arc::new(ResearchCatalog::load_builtin()?);
        let warhead_catalog = Arc::new(WarheadCatalog::load_builtin()?);
        let defense_catalog = Arc::new(DefenseCatalog::load_builtin()?);
        let mission_catalog = Arc::new(MissionCatalog::load_builtin()?);

        let mut seeds = ChaCha8Rng::seed_from_u64(master_seed);
        let flight_seed: u64 = seeds.gen();
        let espionage_seed: u64 = seeds.gen();

        let (dispatcher, events) = Dispatcher::channel();
        let context = Self {
            research: ResearchEngine::new(research_catalog),
            arsenal: ArsenalEngine::new(warhead_catalog, Arc::clone(&config)),
            targeting: TargetingEngine::new(Arc::clone(&config)),
            flight: FlightEngine::new(Arc::clone(&config), flight_seed),
            defense: DefenseEngine::new(defense_catalog, Arc::clone(&config)),
            espionage: EspionageEngine::new(mission_catalog, config, espionage_seed),
            queue: DueQueue::new(),
            metrics: SimulationMetrics::default(),
            ledger,
            votes,
            directory,
            dispatcher,
        };
        Ok((context, events))
    }

    // --- research ---------------------------------------------------------

    pub fn unlock_tech(&mut self, player: PlayerId, tech: &TechId) -> Result<(), UnlockError> {
        self.research.unlock(
            player,
            tech,
            &*self.directory,
            &*self.ledger,
            &self.dispatcher,
            &mut self.metrics,
        )
    }

    pub fn fund_research(
        &mut self,
        player: PlayerId,
        tech: &TechId,
        amount: u64,
    ) -> Result<(), UnlockError> {
        self.research.fund_research(
            player,
            tech,
            amount,
            &*self.directory,
            &*self.ledger,
            &self.dispatcher,
            &mut self.metrics,
        )
    }

    // --- arsenal ----------------------------------------------------------

    pub fn start_assembly(
        &mut self,
        owner: PlayerId,
        warhead: &str,
    ) -> Result<MissileId, AssemblyError> {
        let unlocked = self.research.unlocked(owner);
        self.arsenal
            .start_assembly(owner, warhead, unlocked, &mut self.metrics)
    }

    pub fn acquire_component(
        &mut self,
        missile: MissileId,
        slot: strike_runtime::ComponentSlot,
    ) -> Result<u8, AssemblyError> {
        self.arsenal.acquire_component(
            missile,
            slot,
            &*self.ledger,
            &self.dispatcher,
            &mut self.metrics,
        )
    }

    pub fn dismantle(&mut self, missile: MissileId) -> Result<(), AssemblyError> {
        self.arsenal.dismantle(missile)
    }

    // --- defense ----------------------------------------------------------

    pub fn build_battery(&mut self, owner: PlayerId, tier: u8) -> Result<BatteryId, DefenseError> {
        let unlocked = self.research.unlocked(owner);
        self.defense
            .build_battery(owner, tier, unlocked, &*self.ledger)
    }

    pub fn build_radar(&mut self, owner: PlayerId, level: u8) -> Result<RadarId, DefenseError> {
        let unlocked = self.research.unlocked(owner);
        self.defense
            .build_radar(owner, level, unlocked, &*self.ledger)
    }

    pub fn repair_battery(&mut self, battery: BatteryId) -> Result<(), DefenseError> {
        self.defense.repair_battery(battery, &*self.ledger)
    }

    /// Cooldown decay tick, driven by the external scheduler.
    pub fn tick_defense(&mut self, now: u64) {
        self.defense.tick(now);
    }

    pub fn radar_sweep(&mut self, owner: PlayerId, now: u64) -> usize {
        self.defense.radar_sweep(
            owner,
            &self.arsenal,
            &self.dispatcher,
            &mut self.metrics,
            now,
        )
    }

    // --- targeting and flight ----------------------------------------------

    pub fn validate_target(
        &self,
        attacker: PlayerId,
        target: PlayerId,
        now: u64,
    ) -> Result<(), LaunchError> {
        self.targeting
            .validate_target(attacker, target, &*self.directory, now)
    }

    pub fn request_launch(
        &mut self,
        missile: MissileId,
        targets: Vec<PlayerId>,
        requester: PlayerId,
        now: u64,
    ) -> Result<u64, LaunchError> {
        self.targeting.request_launch(
            &mut self.arsenal,
            missile,
            targets,
            requester,
            &*self.directory,
            &*self.votes,
            &mut self.queue,
            &self.dispatcher,
            &mut self.metrics,
            now,
        )
    }

    pub fn due_impacts(&self, now: u64) -> Vec<MissileId> {
        self.flight.due_impacts(&self.queue, now)
    }

    pub fn resolve_impact(
        &mut self,
        missile: MissileId,
        now: u64,
    ) -> Result<InterceptionAttemptState, FlightError> {
        self.flight.resolve_impact(
            &mut self.arsenal,
            &mut self.defense,
            &mut self.targeting,
            missile,
            &*self.directory,
            &*self.ledger,
            &self.dispatcher,
            &mut self.metrics,
            now,
        )
    }

    // --- espionage ----------------------------------------------------------

    pub fn recruit_spy(&mut self, owner: PlayerId) -> Result<SpyId, EspionageError> {
        let unlocked = self.research.unlocked(owner);
        self.espionage.recruit_spy(owner, unlocked, &*self.ledger)
    }

    pub fn plan_mission(
        &mut self,
        owner: PlayerId,
        spy: SpyId,
        kind: MissionKind,
        target: PlayerId,
        now: u64,
    ) -> Result<MissionId, EspionageError> {
        let unlocked = self.research.unlocked(owner);
        self.espionage.plan_mission(
            owner,
            spy,
            kind,
            target,
            unlocked,
            &*self.directory,
            &*self.ledger,
            now,
        )
    }

    pub fn activate_mission(&mut self, mission: MissionId) -> Result<(), EspionageError> {
        self.espionage.activate(mission, &mut self.queue)
    }

    pub fn cancel_mission(&mut self, mission: MissionId) -> Result<(), EspionageError> {
        self.espionage.cancel(mission)
    }

    pub fn due_missions(&self, now: u64) -> Vec<MissionId> {
        self.espionage.due_missions(&self.queue, now)
    }

    pub fn resolve_mission(
        &mut self,
        mission: MissionId,
        now: u64,
    ) -> Result<MissionStatus, EspionageError> {
        let owner = self
            .espionage
            .mission(mission)
            .map(|mission| mission.owner)
            .ok_or(EspionageError::UnknownMission(mission))?;
        let unlocked = self.research.unlocked(owner);
        self.espionage.resolve_mission(
            mission,
            &mut self.arsenal,
            &self.defense,
            unlocked,
            &*self.directory,
            &*self.ledger,
            &self.dispatcher,
            &mut self.metrics,
            now,
        )
    }

    /// Drain and resolve everything due at-or-before `now`: impacts first,
    /// then missions, then the defense cooldown tick.
    pub fn run_due(&mut self, now: u64) {
        for key in self.queue.drain_due(now) {
            let result = match key.kind {
                DueKind::Impact => self
                    .resolve_impact(MissileId(key.entity), now)
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
                DueKind::Mission => self
                    .resolve_mission(MissionId(key.entity), now)
                    .map(|_| ())
                    .map_err(|err| err.to_string()),
            };
            if let Err(err) = result {
                log::warn!(
                    target: "strike::context",
                    "due entry {:?} for entity {} failed: {err}",
                    key.kind,
                    key.entity
                );
            }
        }
        self.defense.tick(now);
    }

    pub fn metrics(&self) -> &SimulationMetrics {
        &self.metrics
    }
}
