/// Counters updated by the engines; snapshot-able for dashboards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationMetrics {
    pub techs_unlocked: u64,
    pub missiles_assembled: u64,
    pub missiles_ready: u64,
    pub missiles_launched: u64,
    pub missiles_intercepted: u64,
    pub missiles_detonated: u64,
    pub interception_partials: u64,
    pub battery_malfunctions: u64,
    pub radar_warnings: u64,
    pub missions_resolved: u64,
    pub missions_compromised: u64,
    pub intel_leaks: u64,
    pub sabotage_hits: u64,
    pub ledger_reconciliations: u64,
    pub conflicts_retried: u64,
}
