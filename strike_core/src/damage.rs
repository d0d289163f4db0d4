use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use strike_runtime::{AuditFlags, DamageShareState, ResourceKind};

use crate::arsenal::DamageShape;
use crate::ids::PlayerId;
use crate::metrics::SimulationMetrics;
use crate::services::{player_account, LedgerError, PlayerDirectory, ResourceLedger};

pub const DAMAGE_TOPIC: &str = "strike::damage";

/// Spread a detonation over its recipients. The shape picks the recipients
/// and their percentages; a partial interception halves every percentage
/// before any conversion. Each recipient's unit loss is debited
/// independently; a debit that fails twice keeps its share in the record
/// under the RECONCILE_PENDING flag rather than dropping the outcome.
pub fn distribute(
    shape: DamageShape,
    targets: &[PlayerId],
    partial: bool,
    directory: &dyn PlayerDirectory,
    ledger: &dyn ResourceLedger,
    rng: &mut impl Rng,
    metrics: &mut SimulationMetrics,
    op_prefix: &str,
) -> Vec<DamageShareState> {
    let mut shares: Vec<(PlayerId, u8)> = Vec::new();
    let Some(primary) = targets.first().copied() else {
        return Vec::new();
    };

    let halve = |percent: u8| if partial { percent / 2 } else { percent };

    shares.push((primary, halve(shape.primary_percent())));

    match shape {
        DamageShape::Single { .. } => {}
        DamageShape::Multi {
            secondary_percent,
            secondary_count,
            ..
        }
        | DamageShape::ClanWide {
            secondary_percent,
            secondary_count,
            ..
        } => {
            // Secondary recipients: the strongest of the remaining targets.
            let mut ranked: Vec<(u64, PlayerId)> = targets[1..]
                .iter()
                .filter_map(|target| {
                    directory
                        .profile(*target)
                        .ok()
                        .map(|profile| (profile.power, *target))
                })
                .collect();
            ranked.sort_unstable_by(|a, b| b.cmp(a));
            ranked.truncate(secondary_count as usize);
            for (_, target) in ranked {
                shares.push((target, halve(secondary_percent)));
            }
        }
    }

    if let DamageShape::ClanWide {
        tertiary_percent,
        tertiary_sample,
        ..
    } = shape
    {
        let clan = directory
            .profile(primary)
            .ok()
            .and_then(|profile| profile.clan);
        if let Some(clan) = clan {
            if let Ok(members) = directory.clan_members(clan) {
                let already_hit: Vec<PlayerId> =
                    shares.iter().map(|(player, _)| *player).collect();
                let mut pool: Vec<PlayerId> = members
                    .into_iter()
                    .filter(|member| !already_hit.contains(member))
                    .collect();
                pool.shuffle(rng);
                pool.truncate(tertiary_sample as usize);
                for member in pool {
                    shares.push((member, halve(tertiary_percent)));
                }
            }
        }
    }

    shares
        .into_iter()
        .map(|(recipient, percent)| apply_share(recipient, percent, directory, ledger, metrics, op_prefix))
        .collect()
}

/// One recipient's share: convert the percentage to a unit loss against
/// their directory power and debit it. One retry, then reconcile later.
fn apply_share(
    recipient: PlayerId,
    percent: u8,
    directory: &dyn PlayerDirectory,
    ledger: &dyn ResourceLedger,
    metrics: &mut SimulationMetrics,
    op_prefix: &str,
) -> DamageShareState {
    let units = directory
        .profile(recipient)
        .map(|profile| profile.power * percent as u64 / 100)
        .unwrap_or(0);
    let op_id = format!("{op_prefix}:{recipient}");
    let mut flags = AuditFlags::empty();

    let attempt =
        || ledger.debit(player_account(recipient), ResourceKind::Units, units, &op_id);
    let result = match attempt() {
        Err(LedgerError::Unavailable(_)) => {
            metrics.conflicts_retried += 1;
            attempt()
        }
        other => other,
    };
    if let Err(err) = result {
        debug!(
            target: DAMAGE_TOPIC,
            "damage debit for player {recipient} deferred to reconciliation: {err}"
        );
        flags |= AuditFlags::RECONCILE_PENDING;
        metrics.ledger_reconciliations += 1;
    }

    DamageShareState {
        recipient: recipient.0,
        percent,
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClanId;
    use crate::services::{InMemoryDirectory, InMemoryLedger, PlayerProfile};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn directory_with(players: &[(u64, u64, Option<u64>)]) -> InMemoryDirectory {
        let directory = InMemoryDirectory::new();
        for (id, power, clan) in players {
            directory.upsert(PlayerProfile {
                player: PlayerId(*id),
                level: 10,
                power: *power,
                clan: clan.map(ClanId),
                clan_level: 1,
                leadership: false,
                protected_until: 0,
            });
        }
        directory
    }

    fn funded(ledger: &InMemoryLedger, players: &[u64]) {
        for id in players {
            ledger.deposit(player_account(PlayerId(*id)), ResourceKind::Units, 1_000_000);
        }
    }

    #[test]
    fn no_targets_yields_no_shares_and_no_debits() {
        let directory = directory_with(&[(1, 1_000, None)]);
        let ledger = InMemoryLedger::new();
        funded(&ledger, &[1]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut metrics = SimulationMetrics::default();

        let shares = distribute(
            DamageShape::Single { primary_percent: 20 },
            &[],
            false,
            &directory,
            &ledger,
            &mut rng,
            &mut metrics,
            "impact:0",
        );
        assert!(shares.is_empty());
        assert_eq!(
            ledger.balance(player_account(PlayerId(1)), ResourceKind::Units).unwrap(),
            1_000_000
        );
    }

    #[test]
    fn single_shape_hits_only_the_primary() {
        let directory = directory_with(&[(1, 1_000, None)]);
        let ledger = InMemoryLedger::new();
        funded(&ledger, &[1]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut metrics = SimulationMetrics::default();

        let shares = distribute(
            DamageShape::Single { primary_percent: 20 },
            &[PlayerId(1), PlayerId(2)],
            false,
            &directory,
            &ledger,
            &mut rng,
            &mut metrics,
            "impact:1",
        );
        assert_eq!(shares.len(), 1);
        assert_eq!(shares[0].recipient, 1);
        assert_eq!(shares[0].percent, 20);
        // 20% of 1000 power.
        assert_eq!(
            ledger.balance(player_account(PlayerId(1)), ResourceKind::Units).unwrap(),
            999_800
        );
    }

    #[test]
    fn multi_shape_ranks_secondaries_by_power_and_partial_halves() {
        let directory = directory_with(&[(1, 1_000, None), (2, 500, None), (3, 900, None)]);
        let ledger = InMemoryLedger::new();
        funded(&ledger, &[1, 2, 3]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut metrics = SimulationMetrics::default();

        let shape = DamageShape::Multi {
            primary_percent: 30,
            secondary_percent: 15,
            secondary_count: 1,
        };
        let shares = distribute(
            shape,
            &[PlayerId(1), PlayerId(2), PlayerId(3)],
            true,
            &directory,
            &ledger,
            &mut rng,
            &mut metrics,
            "impact:2",
        );
        assert_eq!(shares.len(), 2);
        assert_eq!(shares[0].percent, 15, "30% halved");
        // Player 3 outranks player 2 on power for the single secondary slot.
        assert_eq!(shares[1].recipient, 3);
        assert_eq!(shares[1].percent, 7, "15% halved");
    }

    #[test]
    fn clan_wide_samples_tertiaries_without_double_hits() {
        let directory = directory_with(&[
            (1, 1_000, Some(9)),
            (2, 800, Some(9)),
            (3, 700, Some(9)),
            (4, 600, Some(9)),
            (5, 500, Some(9)),
        ]);
        let ledger = InMemoryLedger::new();
        funded(&ledger, &[1, 2, 3, 4, 5]);
        let mut rng = SmallRng::seed_from_u64(11);
        let mut metrics = SimulationMetrics::default();

        let shape = DamageShape::ClanWide {
            primary_percent: 50,
            secondary_percent: 25,
            secondary_count: 1,
            tertiary_percent: 10,
            tertiary_sample: 2,
        };
        let shares = distribute(
            shape,
            &[PlayerId(1), PlayerId(2)],
            false,
            &directory,
            &ledger,
            &mut rng,
            &mut metrics,
            "impact:3",
        );
        assert_eq!(shares.len(), 4);
        let recipients: Vec<u64> = shares.iter().map(|share| share.recipient).collect();
        let mut deduped = recipients.clone();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), recipients.len(), "no recipient hit twice");
        assert!(shares[2..].iter().all(|share| share.percent == 10));
    }

    #[test]
    fn failed_debit_is_flagged_for_reconciliation() {
        // Recipient has power but an empty unit balance, so the debit fails
        // both times; the share survives with the reconcile flag.
        let directory = directory_with(&[(1, 1_000, None)]);
        let ledger = InMemoryLedger::new();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut metrics = SimulationMetrics::default();

        let shares = distribute(
            DamageShape::Single { primary_percent: 40 },
            &[PlayerId(1)],
            false,
            &directory,
            &ledger,
            &mut rng,
            &mut metrics,
            "impact:4",
        );
        assert_eq!(shares.len(), 1);
        assert!(shares[0].flags.contains(AuditFlags::RECONCILE_PENDING));
        assert_eq!(metrics.ledger_reconciliations, 1);
    }
}
