mod common;

use common::TestWorld;
use strike_core::services::clan_account;
use strike_core::{ClanId, MissionId, PlayerId, PlayerProfile, TechId, UnlockError};
use strike_runtime::{MissionKind, ResourceKind};

const ALPHA: PlayerId = PlayerId(1);
const BRAVO: PlayerId = PlayerId(2);
const TARGET: PlayerId = PlayerId(3);

/// Two members, one pool, funds for exactly one unlock. The conditional
/// debit decides the winner; the loser sees the drained balance.
#[test]
fn shared_clan_pool_funds_exactly_one_unlock() {
    let mut world = TestWorld::new(5);
    let clan = ClanId(2);
    for player in [ALPHA, BRAVO] {
        world.directory.upsert(PlayerProfile {
            player,
            level: 20,
            power: 5_000,
            clan: Some(clan),
            clan_level: 5,
            leadership: false,
            protected_until: 0,
        });
    }
    world
        .ledger
        .deposit(clan_account(clan), ResourceKind::ResearchPoints, 100);

    world
        .context
        .unlock_tech(ALPHA, &TechId::new("missile_t1"))
        .expect("first unlock drains the pool");

    let err = world
        .context
        .unlock_tech(BRAVO, &TechId::new("missile_t1"))
        .unwrap_err();
    assert!(matches!(
        err,
        UnlockError::InsufficientRp { cost: 100, held: 0, .. }
    ));

    assert!(world.context.research.unlocked(ALPHA).warheads.contains("scout"));
    assert!(!world.context.research.unlocked(BRAVO).warheads.contains("scout"));
    assert_eq!(world.context.metrics().techs_unlocked, 1);
}

/// One drain pass picks up everything that has come due, impacts and
/// missions alike, and leaves the queue empty.
#[test]
fn run_due_drains_impacts_and_missions_together() {
    let mut world = TestWorld::new(21);
    world.add_player(ALPHA, None, false);
    world.add_player(BRAVO, None, false);
    world.add_player(TARGET, None, false);
    world.research_missile_track(ALPHA, 1);
    world.research_intelligence_track(BRAVO, 1);

    let missile = world.ready_missile(ALPHA, "scout");
    world
        .context
        .request_launch(missile, vec![TARGET], ALPHA, 1_000)
        .expect("launch");

    let spy = world.context.recruit_spy(BRAVO).expect("recruit");
    let mission: MissionId = world
        .context
        .plan_mission(BRAVO, spy, MissionKind::Reconnaissance, TARGET, 1_000)
        .expect("plan");
    world.context.activate_mission(mission).expect("activate");
    assert_eq!(world.context.queue.len(), 2);

    world.context.run_due(90_000);

    assert!(world.context.queue.is_empty());
    let history = world
        .context
        .targeting
        .launch_history(missile)
        .expect("history recorded");
    assert!(history.outcome.is_some(), "impact left unresolved");
    let mission_status = world
        .context
        .espionage
        .mission(mission)
        .expect("mission kept")
        .status;
    assert!(mission_status.is_terminal(), "mission left unresolved");
}
