use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use strike_runtime::{BroadcastEvent, FailureKind, LaunchHistoryState, MissileStatus};

use crate::arsenal::ArsenalEngine;
use crate::broadcast::Dispatcher;
use crate::config::BalanceConfig;
use crate::ids::{MissileId, PlayerId, VoteId};
use crate::metrics::SimulationMetrics;
use crate::queue::{DueKind, DueQueue};
use crate::services::{ClanVoteService, CollaboratorError, PlayerDirectory, VoteOutcome};

pub const TARGETING_TOPIC: &str = "strike::targeting";

pub const MAX_TARGETS: usize = 100;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("unknown missile {0}")]
    UnknownMissile(MissileId),
    #[error("missile {missile} belongs to player {owner}, not {requester}")]
    NotOwner {
        missile: MissileId,
        owner: PlayerId,
        requester: PlayerId,
    },
    #[error("missile {missile} is {status:?}, launch requires READY")]
    NotReady {
        missile: MissileId,
        status: MissileStatus,
    },
    #[error("launch requires between 1 and {MAX_TARGETS} targets, got {0}")]
    BadTargetCount(usize),
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("target {target} level {level} is below the floor of {floor}")]
    TargetTooLow {
        target: PlayerId,
        level: u32,
        floor: u32,
    },
    #[error("target {target} power {power} is below the floor of {floor}")]
    TargetTooWeak {
        target: PlayerId,
        power: u64,
        floor: u64,
    },
    #[error("target {target} is under new-member protection until {until}")]
    TargetProtected { target: PlayerId, until: u64 },
    #[error("strike cooldown against {target} active until {until}")]
    StrikeCooldown { target: PlayerId, until: u64 },
    #[error("clan vote {0} is still pending")]
    VotePending(VoteId),
    #[error("clan vote {0} rejected the launch")]
    VoteRejected(VoteId),
    #[error("missile state changed during authorization")]
    Conflict,
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl LaunchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LaunchError::UnknownMissile(_)
            | LaunchError::NotOwner { .. }
            | LaunchError::BadTargetCount(_)
            | LaunchError::SelfTarget
            | LaunchError::TargetTooLow { .. }
            | LaunchError::TargetTooWeak { .. }
            | LaunchError::TargetProtected { .. } => FailureKind::Validation,
            LaunchError::NotReady { .. }
            | LaunchError::StrikeCooldown { .. }
            | LaunchError::VotePending(_)
            | LaunchError::VoteRejected(_) => FailureKind::State,
            LaunchError::Conflict => FailureKind::Conflict,
            LaunchError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Targeting validation and launch authorization. Owns the per-pair strike
/// cooldown book, the pending-vote book, and every LaunchHistory record.
#[derive(Debug)]
pub struct TargetingEngine {
    config: Arc<BalanceConfig>,
    /// Last authorized strike per (attacker, target) pair.
    last_strike: HashMap<(PlayerId, PlayerId), u64>,
    /// Outstanding authorization votes keyed by missile. A PASSED vote is
    /// consumed by exactly one launch; re-launching needs a fresh vote.
    pending_votes: HashMap<MissileId, VoteId>,
    history: HashMap<MissileId, LaunchHistoryState>,
}

impl TargetingEngine {
    pub fn new(config: Arc<BalanceConfig>) -> Self {
        Self {
            config,
            last_strike: HashMap::new(),
            pending_votes: HashMap::new(),
            history: HashMap::new(),
        }
    }

    pub fn launch_history(&self, missile: MissileId) -> Option<&LaunchHistoryState> {
        self.history.get(&missile)
    }

    pub fn validate_target(
        &self,
        attacker: PlayerId,
        target: PlayerId,
        directory: &dyn PlayerDirectory,
        now: u64,
    ) -> Result<(), LaunchError> {
        if attacker == target {
            return Err(LaunchError::SelfTarget);
        }
        let tuning = self.config.targeting();
        let profile = directory.profile(target)?;
        if profile.level < tuning.min_target_level {
            return Err(LaunchError::TargetTooLow {
                target,
                level: profile.level,
                floor: tuning.min_target_level,
            });
        }
        if profile.power < tuning.min_target_power {
            return Err(LaunchError::TargetTooWeak {
                target,
                power: profile.power,
                floor: tuning.min_target_power,
            });
        }
        if profile.protected_until > now {
            return Err(LaunchError::TargetProtected {
                target,
                until: profile.protected_until,
            });
        }
        if let Some(last) = self.last_strike.get(&(attacker, target)) {
            let until = last + tuning.strike_cooldown_secs;
            if until > now {
                return Err(LaunchError::StrikeCooldown { target, until });
            }
        }
        Ok(())
    }

    /// Authorize and perform a launch. Clan leadership launches directly;
    /// everyone else in a clan needs a PASSED vote (the first call requests
    /// one and returns `VotePending`; later calls poll it). Solo players
    /// answer to nobody.
    #[allow(clippy::too_many_arguments)]
    pub fn request_launch(
        &mut self,
        arsenal: &mut ArsenalEngine,
        missile_id: MissileId,
        targets: Vec<PlayerId>,
        requester: PlayerId,
        directory: &dyn PlayerDirectory,
        votes: &dyn ClanVoteService,
        queue: &mut DueQueue,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
        now: u64,
    ) -> Result<u64, LaunchError> {
        let (owner, status, flight_secs) = {
            let missile = arsenal
                .missile(missile_id)
                .ok_or(LaunchError::UnknownMissile(missile_id))?;
            let flight_secs = arsenal
                .catalog()
                .warhead(&missile.warhead)
                .map(|spec| spec.flight_secs)
                .unwrap_or(0);
            (missile.owner, missile.status, flight_secs)
        };
        if owner != requester {
            return Err(LaunchError::NotOwner {
                missile: missile_id,
                owner,
                requester,
            });
        }
        if status != MissileStatus::Ready {
            return Err(LaunchError::NotReady {
                missile: missile_id,
                status,
            });
        }
        if targets.is_empty() || targets.len() > MAX_TARGETS {
            return Err(LaunchError::BadTargetCount(targets.len()));
        }
        for target in &targets {
            self.validate_target(requester, *target, directory, now)?;
        }

        let profile = directory.profile(requester)?;
        if let Some(clan) = profile.clan {
            if !profile.leadership {
                let vote = match self.pending_votes.get(&missile_id) {
                    Some(vote) => *vote,
                    None => {
                        let subject = format!("launch:{missile_id}");
                        let vote = votes.request_authorization(clan, &subject)?;
                        self.pending_votes.insert(missile_id, vote);
                        return Err(LaunchError::VotePending(vote));
                    }
                };
                match votes.outcome(vote)? {
                    VoteOutcome::Pending => return Err(LaunchError::VotePending(vote)),
                    VoteOutcome::Failed => {
                        self.pending_votes.remove(&missile_id);
                        return Err(LaunchError::VoteRejected(vote));
                    }
                    VoteOutcome::Passed => {
                        // Consumed below once the launch succeeds.
                    }
                }
            }
        }

        let impact_at = now + flight_secs;
        let primary = targets[0];
        arsenal
            .mark_launched(missile_id, targets.clone(), now, impact_at)
            .map_err(|_| LaunchError::Conflict)?;
        self.pending_votes.remove(&missile_id);

        for target in &targets {
            self.last_strike.insert((requester, *target), now);
        }
        queue.push(DueKind::Impact, missile_id.0, impact_at);
        self.history.insert(
            missile_id,
            LaunchHistoryState {
                missile: missile_id.0,
                attacker: requester.0,
                primary_target: primary.0,
                target_count: targets.len() as u32,
                launched_at: now,
                impact_at,
                outcome: None,
                damage: Vec::new(),
            },
        );
        metrics.missiles_launched += 1;
        debug!(
            target: TARGETING_TOPIC,
            "missile {missile_id} launched by {requester} at {} target(s), impact at {impact_at}",
            targets.len()
        );
        dispatcher.publish(BroadcastEvent::MissileLaunched {
            missile: missile_id.0,
            attacker: requester.0,
            primary_target: primary.0,
            impact_at,
        });
        Ok(impact_at)
    }

    pub(crate) fn close_history(
        &mut self,
        missile: MissileId,
        outcome: strike_runtime::InterceptOutcome,
        damage: Vec<strike_runtime::DamageShareState>,
    ) {
        if let Some(record) = self.history.get_mut(&missile) {
            record.outcome = Some(outcome);
            record.damage = damage;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arsenal::WarheadCatalog;
    use crate::research::UnlockedSet;
    use crate::services::{
        player_account, InMemoryDirectory, InMemoryLedger, InMemoryVotes, PlayerProfile,
    };
    use strike_runtime::{ComponentSlot, ResourceKind};

    fn profile(player: PlayerId, leadership: bool) -> PlayerProfile {
        PlayerProfile {
            player,
            level: 20,
            power: 5_000,
            clan: Some(crate::ids::ClanId(1)),
            clan_level: 3,
            leadership,
            protected_until: 0,
        }
    }

    struct Fixture {
        arsenal: ArsenalEngine,
        targeting: TargetingEngine,
        directory: InMemoryDirectory,
        votes: InMemoryVotes,
        queue: DueQueue,
        dispatcher: Dispatcher,
        metrics: SimulationMetrics,
        missile: MissileId,
    }

    fn ready_missile_fixture(leadership: bool) -> Fixture {
        let config = Arc::new(BalanceConfig::default());
        let catalog = Arc::new(WarheadCatalog::load_builtin().expect("builtin catalog"));
        let mut arsenal = ArsenalEngine::new(catalog, Arc::clone(&config));

        let owner = PlayerId(1);
        let ledger = InMemoryLedger::new();
        ledger.deposit(player_account(owner), ResourceKind::Materials, 100_000);
        let mut unlocked = UnlockedSet::default();
        unlocked.warheads.insert("scout".to_string());
        let mut metrics = SimulationMetrics::default();
        let (dispatcher, _events) = Dispatcher::channel();
        let missile = arsenal
            .start_assembly(owner, "scout", &unlocked, &mut metrics)
            .expect("assembly starts");
        for slot in ComponentSlot::ALL {
            arsenal
                .acquire_component(missile, slot, &ledger, &dispatcher, &mut metrics)
                .expect("component installs");
        }

        let directory = InMemoryDirectory::new();
        directory.upsert(profile(owner, leadership));
        directory.upsert(profile(PlayerId(2), false));
        Fixture {
            arsenal,
            targeting: TargetingEngine::new(config),
            directory,
            votes: InMemoryVotes::new(),
            queue: DueQueue::new(),
            dispatcher,
            metrics,
            missile,
        }
    }

    #[test]
    fn leadership_launch_schedules_impact_and_opens_history() {
        let mut fx = ready_missile_fixture(true);
        let impact_at = fx
            .targeting
            .request_launch(
                &mut fx.arsenal,
                fx.missile,
                vec![PlayerId(2)],
                PlayerId(1),
                &fx.directory,
                &fx.votes,
                &mut fx.queue,
                &fx.dispatcher,
                &mut fx.metrics,
                1_000,
            )
            .expect("leadership launches without a vote");

        // scout flight time is 120 seconds.
        assert_eq!(impact_at, 1_120);
        assert_eq!(
            fx.arsenal.missile(fx.missile).unwrap().status,
            MissileStatus::Launched
        );
        assert_eq!(fx.queue.due_entities(DueKind::Impact, impact_at), vec![fx.missile.0]);
        let record = fx.targeting.launch_history(fx.missile).unwrap();
        assert_eq!(record.attacker, 1);
        assert_eq!(record.primary_target, 2);
        assert!(record.outcome.is_none());
        assert_eq!(fx.metrics.missiles_launched, 1);
    }

    #[test]
    fn member_launch_waits_on_the_clan_vote() {
        let mut fx = ready_missile_fixture(false);
        let launch = |fx: &mut Fixture| {
            fx.targeting.request_launch(
                &mut fx.arsenal,
                fx.missile,
                vec![PlayerId(2)],
                PlayerId(1),
                &fx.directory,
                &fx.votes,
                &mut fx.queue,
                &fx.dispatcher,
                &mut fx.metrics,
                1_000,
            )
        };

        let vote = match launch(&mut fx) {
            Err(LaunchError::VotePending(vote)) => vote,
            other => panic!("expected a pending vote, got {other:?}"),
        };
        assert_eq!(
            fx.arsenal.missile(fx.missile).unwrap().status,
            MissileStatus::Ready
        );

        // Still pending on the second poll.
        assert!(matches!(launch(&mut fx), Err(LaunchError::VotePending(v)) if v == vote));

        fx.votes.set_outcome(vote, VoteOutcome::Passed);
        launch(&mut fx).expect("passed vote authorizes the launch");
        assert_eq!(
            fx.arsenal.missile(fx.missile).unwrap().status,
            MissileStatus::Launched
        );
    }

    #[test]
    fn rejected_vote_blocks_the_launch() {
        let mut fx = ready_missile_fixture(false);
        let result = fx.targeting.request_launch(
            &mut fx.arsenal,
            fx.missile,
            vec![PlayerId(2)],
            PlayerId(1),
            &fx.directory,
            &fx.votes,
            &mut fx.queue,
            &fx.dispatcher,
            &mut fx.metrics,
            1_000,
        );
        let vote = match result {
            Err(LaunchError::VotePending(vote)) => vote,
            other => panic!("expected a pending vote, got {other:?}"),
        };
        fx.votes.set_outcome(vote, VoteOutcome::Failed);

        let result = fx.targeting.request_launch(
            &mut fx.arsenal,
            fx.missile,
            vec![PlayerId(2)],
            PlayerId(1),
            &fx.directory,
            &fx.votes,
            &mut fx.queue,
            &fx.dispatcher,
            &mut fx.metrics,
            1_000,
        );
        assert!(matches!(result, Err(LaunchError::VoteRejected(v)) if v == vote));
        assert_eq!(result.unwrap_err().kind(), FailureKind::State);
    }

    #[test]
    fn target_validation_rejects_protected_weak_and_cooldown_targets() {
        let mut fx = ready_missile_fixture(true);
        let attacker = PlayerId(1);

        fx.directory.upsert(PlayerProfile {
            protected_until: 9_999,
            ..profile(PlayerId(3), false)
        });
        assert!(matches!(
            fx.targeting.validate_target(attacker, PlayerId(3), &fx.directory, 1_000),
            Err(LaunchError::TargetProtected { until: 9_999, .. })
        ));

        fx.directory.upsert(PlayerProfile {
            level: 2,
            ..profile(PlayerId(4), false)
        });
        assert!(matches!(
            fx.targeting.validate_target(attacker, PlayerId(4), &fx.directory, 1_000),
            Err(LaunchError::TargetTooLow { floor: 5, .. })
        ));

        fx.directory.upsert(PlayerProfile {
            power: 10,
            ..profile(PlayerId(5), false)
        });
        assert!(matches!(
            fx.targeting.validate_target(attacker, PlayerId(5), &fx.directory, 1_000),
            Err(LaunchError::TargetTooWeak { floor: 500, .. })
        ));

        assert!(matches!(
            fx.targeting.validate_target(attacker, attacker, &fx.directory, 1_000),
            Err(LaunchError::SelfTarget)
        ));

        fx.targeting.last_strike.insert((attacker, PlayerId(2)), 1_000);
        assert!(matches!(
            fx.targeting.validate_target(attacker, PlayerId(2), &fx.directory, 1_500),
            Err(LaunchError::StrikeCooldown { until: 4_600, .. })
        ));
        assert!(fx
            .targeting
            .validate_target(attacker, PlayerId(2), &fx.directory, 4_600)
            .is_ok());
    }
}
