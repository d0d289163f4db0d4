use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use thiserror::Error;

use strike_runtime::{FailureKind, ResourceKind};

use crate::ids::{ClanId, PlayerId, VoteId};

/// A collaborator could not be reached or answered out of contract. The
/// operation in flight aborts with no partial mutation; the caller may
/// retry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{service} unavailable: {detail}")]
pub struct CollaboratorError {
    pub service: &'static str,
    pub detail: String,
}

impl CollaboratorError {
    pub fn new(service: &'static str, detail: impl Into<String>) -> Self {
        Self {
            service,
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        FailureKind::Collaborator
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient {kind:?} on account {account} (requested {requested}, held {held})")]
    InsufficientFunds {
        account: u64,
        kind: ResourceKind,
        requested: u64,
        held: u64,
    },
    #[error(transparent)]
    Unavailable(#[from] CollaboratorError),
}

impl LedgerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            LedgerError::InsufficientFunds { .. } => FailureKind::Validation,
            LedgerError::Unavailable(_) => FailureKind::Collaborator,
        }
    }
}

/// Resource Ledger collaborator: atomic conditional debits/credits,
/// idempotent per operation id. Accounts are opaque u64s; a clan shares one
/// account across members (the shared RP pool), players own their own.
pub trait ResourceLedger: Send + Sync {
    fn debit(
        &self,
        account: u64,
        kind: ResourceKind,
        amount: u64,
        op_id: &str,
    ) -> Result<(), LedgerError>;

    fn credit(
        &self,
        account: u64,
        kind: ResourceKind,
        amount: u64,
        op_id: &str,
    ) -> Result<(), LedgerError>;

    fn balance(&self, account: u64, kind: ResourceKind) -> Result<u64, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed,
    Failed,
    Pending,
}

/// Clan Vote collaborator. The launch component proceeds only on `Passed`
/// or a leadership override; vote consumption bookkeeping stays in the core.
pub trait ClanVoteService: Send + Sync {
    fn request_authorization(
        &self,
        clan: ClanId,
        subject: &str,
    ) -> Result<VoteId, CollaboratorError>;

    fn outcome(&self, vote: VoteId) -> Result<VoteOutcome, CollaboratorError>;
}

/// Directory facts consulted by targeting validation and damage sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    pub player: PlayerId,
    pub level: u32,
    pub power: u64,
    pub clan: Option<ClanId>,
    pub clan_level: u32,
    pub leadership: bool,
    /// New-clan-member protection window end, unix seconds.
    pub protected_until: u64,
}

pub trait PlayerDirectory: Send + Sync {
    fn profile(&self, player: PlayerId) -> Result<PlayerProfile, CollaboratorError>;
    fn clan_members(&self, clan: ClanId) -> Result<Vec<PlayerId>, CollaboratorError>;
}

/// Ledger account for a clan's shared pool. The high bit keeps clan
/// accounts disjoint from player accounts.
pub fn clan_account(clan: ClanId) -> u64 {
    clan.0 | (1 << 63)
}

pub fn player_account(player: PlayerId) -> u64 {
    player.0
}

/// The account research-point operations hit: the clan pool when the player
/// belongs to one, the player's own account otherwise.
pub fn rp_account(profile: &PlayerProfile) -> u64 {
    match profile.clan {
        Some(clan) => clan_account(clan),
        None => player_account(profile.player),
    }
}

// ---------------------------------------------------------------------------
// In-memory reference implementations
// ---------------------------------------------------------------------------

/// In-memory ledger with idempotent operations; the reference collaborator
/// used by tests and the standalone embedding.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<(u64, ResourceKind), u64>,
    applied_ops: HashSet<String>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self, account: u64, kind: ResourceKind, amount: u64) {
        let mut state = self.inner.lock().expect("ledger mutex poisoned");
        *state.balances.entry((account, kind)).or_insert(0) += amount;
    }
}

impl ResourceLedger for InMemoryLedger {
    fn debit(
        &self,
        account: u64,
        kind: ResourceKind,
        amount: u64,
        op_id: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.inner.lock().expect("ledger mutex poisoned");
        if state.applied_ops.contains(op_id) {
            return Ok(());
        }
        let held = state.balances.get(&(account, kind)).copied().unwrap_or(0);
        if held < amount {
            return Err(LedgerError::InsufficientFunds {
                account,
                kind,
                requested: amount,
                held,
            });
        }
        state.balances.insert((account, kind), held - amount);
        state.applied_ops.insert(op_id.to_string());
        Ok(())
    }

    fn credit(
        &self,
        account: u64,
        kind: ResourceKind,
        amount: u64,
        op_id: &str,
    ) -> Result<(), LedgerError> {
        let mut state = self.inner.lock().expect("ledger mutex poisoned");
        if state.applied_ops.contains(op_id) {
            return Ok(());
        }
        *state.balances.entry((account, kind)).or_insert(0) += amount;
        state.applied_ops.insert(op_id.to_string());
        Ok(())
    }

    fn balance(&self, account: u64, kind: ResourceKind) -> Result<u64, LedgerError> {
        let state = self.inner.lock().expect("ledger mutex poisoned");
        Ok(state.balances.get(&(account, kind)).copied().unwrap_or(0))
    }
}

/// In-memory vote book; outcomes are scripted by the embedding (or a test)
/// via [`InMemoryVotes::set_outcome`].
#[derive(Debug, Default)]
pub struct InMemoryVotes {
    inner: Mutex<VoteState>,
}

#[derive(Debug, Default)]
struct VoteState {
    next_id: u64,
    outcomes: HashMap<VoteId, VoteOutcome>,
}

impl InMemoryVotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_outcome(&self, vote: VoteId, outcome: VoteOutcome) {
        let mut state = self.inner.lock().expect("votes mutex poisoned");
        state.outcomes.insert(vote, outcome);
    }
}

impl ClanVoteService for InMemoryVotes {
    fn request_authorization(
        &self,
        _clan: ClanId,
        _subject: &str,
    ) -> Result<VoteId, CollaboratorError> {
        let mut state = self.inner.lock().expect("votes mutex poisoned");
        let id = VoteId(state.next_id);
        state.next_id += 1;
        state.outcomes.insert(id, VoteOutcome::Pending);
        Ok(id)
    }

    fn outcome(&self, vote: VoteId) -> Result<VoteOutcome, CollaboratorError> {
        let state = self.inner.lock().expect("votes mutex poisoned");
        state
            .outcomes
            .get(&vote)
            .copied()
            .ok_or_else(|| CollaboratorError::new("clan_vote", format!("unknown vote {vote}")))
    }
}

/// In-memory player directory seeded by the embedding.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: Mutex<HashMap<PlayerId, PlayerProfile>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: PlayerProfile) {
        let mut players = self.inner.lock().expect("directory mutex poisoned");
        players.insert(profile.player, profile);
    }
}

impl PlayerDirectory for InMemoryDirectory {
    fn profile(&self, player: PlayerId) -> Result<PlayerProfile, CollaboratorError> {
        let players = self.inner.lock().expect("directory mutex poisoned");
        players
            .get(&player)
            .cloned()
            .ok_or_else(|| CollaboratorError::new("directory", format!("unknown player {player}")))
    }

    fn clan_members(&self, clan: ClanId) -> Result<Vec<PlayerId>, CollaboratorError> {
        let players = self.inner.lock().expect("directory mutex poisoned");
        let mut members: Vec<PlayerId> = players
            .values()
            .filter(|profile| profile.clan == Some(clan))
            .map(|profile| profile.player)
            .collect();
        members.sort_unstable();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_is_conditional_and_idempotent() {
        let ledger = InMemoryLedger::new();
        ledger.deposit(1, ResourceKind::ResearchPoints, 100);

        ledger
            .debit(1, ResourceKind::ResearchPoints, 60, "op-a")
            .expect("first debit");
        // Same op id replayed: no double-charge.
        ledger
            .debit(1, ResourceKind::ResearchPoints, 60, "op-a")
            .expect("replay is a no-op");
        assert_eq!(ledger.balance(1, ResourceKind::ResearchPoints).unwrap(), 40);

        let err = ledger
            .debit(1, ResourceKind::ResearchPoints, 60, "op-b")
            .expect_err("insufficient");
        assert_eq!(err.kind(), FailureKind::Validation);
    }

    #[test]
    fn directory_lists_clan_members_sorted() {
        let directory = InMemoryDirectory::new();
        for id in [3u64, 1, 2] {
            directory.upsert(PlayerProfile {
                player: PlayerId(id),
                level: 10,
                power: 1000,
                clan: Some(ClanId(9)),
                clan_level: 2,
                leadership: false,
                protected_until: 0,
            });
        }
        let members = directory.clan_members(ClanId(9)).unwrap();
        assert_eq!(members, vec![PlayerId(1), PlayerId(2), PlayerId(3)]);
    }
}
