// Not every scenario file exercises every helper.
#![allow(dead_code)]

use std::sync::{Arc, Once};

use crossbeam_channel::Receiver;
use strike_core::services::{clan_account, player_account};
use strike_core::{
    ClanId, InMemoryDirectory, InMemoryLedger, InMemoryVotes, MissileId, PlayerId, PlayerProfile,
    SimContext, TechId,
};
use strike_runtime::{BroadcastEvent, ComponentSlot, ResourceKind};

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub struct TestWorld {
    pub context: SimContext,
    pub ledger: Arc<InMemoryLedger>,
    pub votes: Arc<InMemoryVotes>,
    pub directory: Arc<InMemoryDirectory>,
    pub events: Receiver<BroadcastEvent>,
}

impl TestWorld {
    pub fn new(master_seed: u64) -> Self {
        init_logging();
        let ledger = Arc::new(InMemoryLedger::new());
        let votes = Arc::new(InMemoryVotes::new());
        let directory = Arc::new(InMemoryDirectory::new());
        let ledger_dyn: Arc<dyn strike_core::ResourceLedger> = ledger.clone();
        let votes_dyn: Arc<dyn strike_core::ClanVoteService> = votes.clone();
        let directory_dyn: Arc<dyn strike_core::PlayerDirectory> = directory.clone();
        let (context, events) = SimContext::new(ledger_dyn, votes_dyn, directory_dyn, master_seed)
            .expect("builtin catalogs parse");
        Self {
            context,
            ledger,
            votes,
            directory,
            events,
        }
    }

    /// Register a rich player with funded accounts.
    pub fn add_player(&mut self, player: PlayerId, clan: Option<ClanId>, leadership: bool) {
        self.directory.upsert(PlayerProfile {
            player,
            level: 20,
            power: 5_000,
            clan,
            clan_level: if clan.is_some() { 5 } else { 0 },
            leadership,
            protected_until: 0,
        });
        for kind in [
            ResourceKind::Credits,
            ResourceKind::Materials,
            ResourceKind::ResearchPoints,
            ResourceKind::Units,
        ] {
            self.ledger.deposit(player_account(player), kind, 1_000_000);
        }
        if let Some(clan) = clan {
            self.ledger
                .deposit(clan_account(clan), ResourceKind::ResearchPoints, 1_000_000);
        }
    }

    /// Walk the Missile track far enough to hold `through` and its closure.
    pub fn research_missile_track(&mut self, player: PlayerId, through: u8) {
        for tier in 1..=through {
            self.context
                .unlock_tech(player, &TechId::new(format!("missile_t{tier}")))
                .expect("missile tier unlocks in order");
        }
    }

    pub fn research_defense_track(&mut self, player: PlayerId, through: u8) {
        for tier in 1..=through {
            self.context
                .unlock_tech(player, &TechId::new(format!("defense_t{tier}")))
                .expect("defense tier unlocks in order");
        }
    }

    pub fn research_intelligence_track(&mut self, player: PlayerId, through: u8) {
        for tier in 1..=through {
            self.context
                .unlock_tech(player, &TechId::new(format!("intelligence_t{tier}")))
                .expect("intelligence tier unlocks in order");
        }
    }

    /// Assemble a missile to READY, buying all five components.
    pub fn ready_missile(&mut self, owner: PlayerId, warhead: &str) -> MissileId {
        let missile = self
            .context
            .start_assembly(owner, warhead)
            .expect("assembly starts");
        for slot in ComponentSlot::ALL {
            self.context
                .acquire_component(missile, slot)
                .expect("component installs");
        }
        missile
    }
}
