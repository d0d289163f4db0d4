use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use strike_runtime::{
    AuditFlags, BroadcastEvent, DamageShareState, FailureKind, InterceptOutcome,
    InterceptionAttemptState, MissileStatus, CHANCE_SCALE,
};

use crate::arsenal::ArsenalEngine;
use crate::broadcast::Dispatcher;
use crate::config::BalanceConfig;
use crate::damage;
use crate::defense::{combined_intercept_chance, DefenseEngine};
use crate::hashing::event_seed;
use crate::ids::{MissileId, PlayerId};
use crate::metrics::SimulationMetrics;
use crate::queue::{DueKind, DueQueue};
use crate::scalar::Chance;
use crate::services::{CollaboratorError, PlayerDirectory, ResourceLedger};
use crate::targeting::TargetingEngine;

pub const FLIGHT_TOPIC: &str = "strike::flight";

#[derive(Debug, Error)]
pub enum FlightError {
    #[error("unknown missile {0}")]
    UnknownMissile(MissileId),
    #[error("missile {missile} is {status:?}, resolution requires LAUNCHED")]
    NotLaunched {
        missile: MissileId,
        status: MissileStatus,
    },
    #[error("missile {0} carries no target list")]
    NoTargets(MissileId),
    #[error("missile state lost a concurrent update race")]
    Conflict,
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl FlightError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FlightError::UnknownMissile(_) | FlightError::NoTargets(_) => FailureKind::Validation,
            FlightError::NotLaunched { .. } => FailureKind::State,
            FlightError::Conflict => FailureKind::Conflict,
            FlightError::Collaborator(_) => FailureKind::Collaborator,
        }
    }
}

/// Flight resolution: LAUNCHED missiles become INTERCEPTED or DETONATED
/// exactly once. Attempts are the idempotency ledger; a due event delivered
/// twice finds its attempt and returns it unchanged.
#[derive(Debug)]
pub struct FlightEngine {
    config: Arc<BalanceConfig>,
    stream_seed: u64,
    attempts: HashMap<MissileId, InterceptionAttemptState>,
}

impl FlightEngine {
    pub fn new(config: Arc<BalanceConfig>, stream_seed: u64) -> Self {
        Self {
            config,
            stream_seed,
            attempts: HashMap::new(),
        }
    }

    pub fn attempt(&self, missile: MissileId) -> Option<&InterceptionAttemptState> {
        self.attempts.get(&missile)
    }

    /// Launched missiles whose impact time has arrived.
    pub fn due_impacts(&self, queue: &DueQueue, now: u64) -> Vec<MissileId> {
        queue
            .due_entities(DueKind::Impact, now)
            .into_iter()
            .map(MissileId)
            .filter(|id| !self.attempts.contains_key(id))
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn resolve_impact(
        &mut self,
        arsenal: &mut ArsenalEngine,
        defense: &mut DefenseEngine,
        targeting: &mut TargetingEngine,
        missile_id: MissileId,
        directory: &dyn PlayerDirectory,
        ledger: &dyn ResourceLedger,
        dispatcher: &Dispatcher,
        metrics: &mut SimulationMetrics,
        now: u64,
    ) -> Result<InterceptionAttemptState, FlightError> {
        if let Some(existing) = self.attempts.get(&missile_id) {
            return Ok(existing.clone());
        }

        let (target, targets, shape, difficulty, impact_at) = {
            let missile = arsenal
                .missile(missile_id)
                .ok_or(FlightError::UnknownMissile(missile_id))?;
            if missile.status != MissileStatus::Launched {
                return Err(FlightError::NotLaunched {
                    missile: missile_id,
                    status: missile.status,
                });
            }
            let target = *missile
                .targets
                .first()
                .ok_or(FlightError::NoTargets(missile_id))?;
            let spec = arsenal
                .catalog()
                .warhead(&missile.warhead)
                .ok_or(FlightError::UnknownMissile(missile_id))?;
            (
                target,
                missile.targets.clone(),
                spec.damage,
                spec.difficulty_modifier,
                missile.impact_at.unwrap_or(now),
            )
        };

        let clan_members: Vec<PlayerId> = match directory.profile(target)?.clan {
            Some(clan) => directory.clan_members(clan)?,
            None => Vec::new(),
        };
        let pool = defense.reserve_pool(target, &clan_members, now);
        let bases = defense.base_chances(&pool);

        let tuning = self.config.interception();
        let mut rng = SmallRng::seed_from_u64(event_seed(self.stream_seed, missile_id.0, impact_at));

        let mut flags = AuditFlags::empty();
        if pool
            .iter()
            .filter_map(|id| defense.battery(*id))
            .any(|battery| battery.owner != target)
        {
            flags |= AuditFlags::CLAN_POOLED;
        }

        // Malfunction first: one random pooled battery sits the attempt out
        // and the odds are recomputed without it.
        let mut malfunctioned = None;
        let mut effective = bases.clone();
        if !pool.is_empty() && roll(&mut rng) < tuning.malfunction_chance() {
            let index = rng.gen_range(0..pool.len());
            malfunctioned = Some(pool[index]);
            effective.remove(index);
            flags |= AuditFlags::BATTERY_MALFUNCTION;
            metrics.battery_malfunctions += 1;
        }

        let chance = combined_intercept_chance(&effective, difficulty, tuning);
        let r = roll(&mut rng);
        // With nothing left to shoot, the roll is moot: full damage.
        let outcome = if pool.is_empty() {
            InterceptOutcome::Failure
        } else if malfunctioned.is_some() && effective.is_empty() {
            InterceptOutcome::Malfunction
        } else if r < chance {
            InterceptOutcome::Success
        } else if r < chance + chance.complement().halved() {
            InterceptOutcome::Partial
        } else {
            InterceptOutcome::Failure
        };

        defense.release_pool(&pool, malfunctioned, now);

        let shares: Vec<DamageShareState> = if outcome.detonates() {
            damage::distribute(
                shape,
                &targets,
                outcome == InterceptOutcome::Partial,
                directory,
                ledger,
                &mut rng,
                metrics,
                &format!("impact:{missile_id}"),
            )
        } else {
            Vec::new()
        };

        arsenal
            .record_flight_outcome(missile_id, outcome)
            .map_err(|_| FlightError::Conflict)?;
        targeting.close_history(missile_id, outcome, shares.clone());

        debug!(
            target: FLIGHT_TOPIC,
            "missile {missile_id} resolved {outcome:?}: chance {chance}, roll {r}, pool {}",
            pool.len()
        );
        match outcome {
            InterceptOutcome::Success => {
                metrics.missiles_intercepted += 1;
                dispatcher.publish(BroadcastEvent::MissileIntercepted {
                    missile: missile_id.0,
                    target: target.0,
                    batteries: pool.len() as u32,
                });
            }
            detonated => {
                metrics.missiles_detonated += 1;
                if detonated == InterceptOutcome::Partial {
                    metrics.interception_partials += 1;
                }
                dispatcher.publish(BroadcastEvent::MissileDetonated {
                    missile: missile_id.0,
                    outcome: detonated,
                    recipients: shares.len() as u32,
                });
            }
        }

        let attempt = InterceptionAttemptState {
            missile: missile_id.0,
            resolved_at: now,
            outcome,
            combined_chance: chance.raw(),
            roll: r.raw(),
            batteries: pool.iter().map(|id| id.0).collect(),
            malfunctioned_battery: malfunctioned.map(|id| id.0),
            flags,
        };
        self.attempts.insert(missile_id, attempt.clone());
        Ok(attempt)
    }
}

fn roll(rng: &mut SmallRng) -> Chance {
    Chance::from_raw(rng.gen_range(0..CHANCE_SCALE))
}
