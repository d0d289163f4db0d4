use serde::Deserialize;
use thiserror::Error;

use crate::scalar::Chance;

pub const BUILTIN_BALANCE_CONFIG: &str = include_str!("data/balance_config.json");

#[derive(Debug, Error)]
pub enum BalanceConfigError {
    #[error("failed to parse balance config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Balance tuning for the whole core. Every section deserializes with
/// defaults so a partial override file stays valid.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BalanceConfig {
    #[serde(default)]
    targeting: TargetingTuning,
    #[serde(default)]
    interception: InterceptionTuning,
    #[serde(default)]
    assembly: AssemblyTuning,
    #[serde(default)]
    espionage: EspionageTuning,
}

impl BalanceConfig {
    pub fn load_builtin() -> Result<Self, BalanceConfigError> {
        Self::load_from_str(BUILTIN_BALANCE_CONFIG)
    }

    pub fn load_from_str(json: &str) -> Result<Self, BalanceConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn targeting(&self) -> &TargetingTuning {
        &self.targeting
    }

    pub fn interception(&self) -> &InterceptionTuning {
        &self.interception
    }

    pub fn assembly(&self) -> &AssemblyTuning {
        &self.assembly
    }

    pub fn espionage(&self) -> &EspionageTuning {
        &self.espionage
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetingTuning {
    pub min_target_level: u32,
    pub min_target_power: u64,
    pub strike_cooldown_secs: u64,
}

impl Default for TargetingTuning {
    fn default() -> Self {
        Self {
            min_target_level: 5,
            min_target_power: 500,
            strike_cooldown_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterceptionTuning {
    per_battery_bonus: f32,
    pool_bonus_cap: f32,
    total_cap: f32,
    malfunction_chance: f32,
    pub pool_cap: usize,
    pub min_battery_health: u8,
}

impl Default for InterceptionTuning {
    fn default() -> Self {
        Self {
            per_battery_bonus: 0.05,
            pool_bonus_cap: 0.50,
            total_cap: 0.95,
            malfunction_chance: 0.05,
            pool_cap: 10,
            min_battery_health: 50,
        }
    }
}

impl InterceptionTuning {
    pub fn per_battery_bonus(&self) -> Chance {
        Chance::from_f32(self.per_battery_bonus)
    }

    pub fn pool_bonus_cap(&self) -> Chance {
        Chance::from_f32(self.pool_bonus_cap)
    }

    pub fn total_cap(&self) -> Chance {
        Chance::from_f32(self.total_cap)
    }

    pub fn malfunction_chance(&self) -> Chance {
        Chance::from_f32(self.malfunction_chance)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssemblyTuning {
    sabotage_refund_fraction: f32,
}

impl Default for AssemblyTuning {
    fn default() -> Self {
        Self {
            sabotage_refund_fraction: 0.5,
        }
    }
}

impl AssemblyTuning {
    pub fn sabotage_refund_fraction(&self) -> Chance {
        Chance::from_f32(self.sabotage_refund_fraction)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EspionageTuning {
    security_penalty_factor: f32,
    success_floor: f32,
    success_ceiling: f32,
    clan_bonus_per_level: f32,
    clan_bonus_cap: f32,
    leak_base: f32,
    leak_step: f32,
    leak_cap: f32,
    theft_fraction: f32,
    pub leak_cooldown_secs: u64,
    pub compromise_lockout_secs: u64,
    pub intel_report_ttl_secs: u64,
    pub xp_on_success: u32,
    pub xp_on_failure: u32,
    pub compromise_xp_penalty: u32,
    /// Cumulative experience required to reach Agent, Operative, Shadow
    /// and Phantom, in ladder order.
    pub promotion_thresholds: [u32; 4],
}

impl Default for EspionageTuning {
    fn default() -> Self {
        Self {
            security_penalty_factor: 0.5,
            success_floor: 0.05,
            success_ceiling: 0.95,
            clan_bonus_per_level: 0.01,
            clan_bonus_cap: 0.05,
            leak_base: 0.05,
            leak_step: 0.02,
            leak_cap: 0.30,
            theft_fraction: 0.10,
            leak_cooldown_secs: 86_400,
            compromise_lockout_secs: 43_200,
            intel_report_ttl_secs: 21_600,
            xp_on_success: 40,
            xp_on_failure: 10,
            compromise_xp_penalty: 25,
            promotion_thresholds: [100, 300, 700, 1_500],
        }
    }
}

impl EspionageTuning {
    pub fn security_penalty_factor(&self) -> Chance {
        Chance::from_f32(self.security_penalty_factor)
    }

    pub fn success_floor(&self) -> Chance {
        Chance::from_f32(self.success_floor)
    }

    pub fn success_ceiling(&self) -> Chance {
        Chance::from_f32(self.success_ceiling)
    }

    pub fn clan_bonus(&self, clan_level: u32) -> Chance {
        let bonus = Chance::from_f32(self.clan_bonus_per_level * clan_level as f32);
        bonus.min(Chance::from_f32(self.clan_bonus_cap))
    }

    /// min(base + step * (n - 1), cap) for the nth repeated mission against
    /// the same target.
    pub fn leak_chance(&self, repeat_count: u32) -> Chance {
        let n = repeat_count.max(1);
        let raised = Chance::from_f32(self.leak_base + self.leak_step * (n - 1) as f32);
        raised.min(Chance::from_f32(self.leak_cap))
    }

    pub fn theft_fraction(&self) -> Chance {
        Chance::from_f32(self.theft_fraction)
    }
}
