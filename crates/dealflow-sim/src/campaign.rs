//! Campaign runner: many seeds, one report.
//!
//! Every seed runs with the same parameters. The report keeps the first
//! failing seed so it can be replayed with [`replay_seed`].

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::network::FaultConfig;
use crate::oracle::InvariantViolation;
use crate::{SimulationConfig, SimulationResult, Simulator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    pub items: usize,
    pub rounds: u64,
    pub max_drags_per_round: u8,
    pub batch_rate_percent: u8,
    pub fault: FaultConfig,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            items: sim.items,
            rounds: sim.rounds,
            max_drags_per_round: sim.max_drags_per_round,
            batch_rate_percent: sim.batch_rate_percent,
            fault: sim.fault,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            items: self.items,
            rounds: self.rounds,
            max_drags_per_round: self.max_drags_per_round,
            batch_rate_percent: self.batch_rate_percent,
            fault: self.fault,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.items == 0 {
            bail!("items must be > 0");
        }
        if self.rounds == 0 {
            bail!("rounds must be > 0");
        }
        for (name, percent) in [
            ("batch_rate_percent", self.batch_rate_percent),
            ("fail_rate_percent", self.fault.fail_rate_percent),
            ("lost_reply_rate_percent", self.fault.lost_reply_rate_percent),
            ("duplicate_rate_percent", self.fault.duplicate_rate_percent),
            ("reorder_rate_percent", self.fault.reorder_rate_percent),
        ] {
            if percent > 100 {
                bail!("{name} must be <= 100, got {percent}");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First failing seed, for replay.
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds that hit both a rollback and a superseded outcome.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// Returns an error if the config is invalid or a seed cannot be set up.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let result = replay_seed(seed, config)?;
        if result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if result.oracle.passed {
            report.seeds_passed += 1;
        } else {
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: result
                    .oracle
                    .violations
                    .iter()
                    .map(InvariantViolation::to_string)
                    .collect(),
            });
        }
    }

    tracing::info!(
        seeds = report.seeds_run,
        passed = report.seeds_passed,
        first_failure = ?report.first_failure,
        "campaign finished"
    );
    Ok(report)
}

/// Run one seed; `Ok(Err(violations))` when an invariant broke.
///
/// # Errors
///
/// Returns an error if the simulation cannot be set up or fails to drain.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let result = replay_seed(seed, config)?;
    if result.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(result.oracle.violations))
    }
}

/// Re-run one seed and return its full trace.
///
/// # Errors
///
/// Same as [`run_single_seed`].
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<SimulationResult> {
    Simulator::new(config.sim_config_for_seed(seed))?.run()
}

#[cfg(test)]
mod tests {
    use super::{CampaignConfig, replay_seed, run_campaign, run_single_seed};
    use crate::network::FaultConfig;

    fn small() -> CampaignConfig {
        CampaignConfig {
            seed_range: 0..20,
            rounds: 30,
            ..CampaignConfig::default()
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(CampaignConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let empty = CampaignConfig {
            seed_range: 5..5,
            ..CampaignConfig::default()
        };
        assert!(empty.validate().is_err());

        let no_items = CampaignConfig {
            items: 0,
            ..CampaignConfig::default()
        };
        assert!(no_items.validate().is_err());

        let bad_rate = CampaignConfig {
            fault: FaultConfig {
                fail_rate_percent: 150,
                ..FaultConfig::default()
            },
            ..CampaignConfig::default()
        };
        assert!(bad_rate.validate().is_err());
    }

    #[test]
    fn sim_config_carries_seed_and_faults() {
        let config = small();
        let sim = config.sim_config_for_seed(17);
        assert_eq!(sim.seed, 17);
        assert_eq!(sim.fault, config.fault);
        assert_eq!(sim.rounds, 30);
    }

    #[test]
    fn campaign_passes_every_seed() {
        let report = run_campaign(&small()).expect("campaign");
        assert_eq!(report.seeds_run, 20);
        assert!(report.all_passed(), "{:?}", report.failures);
        assert_eq!(report.first_failure, None);
        assert_eq!(report.seeds_passed, 20);
    }

    #[test]
    fn heavy_faults_reach_stale_outcomes() {
        let config = CampaignConfig {
            seed_range: 0..20,
            rounds: 60,
            max_drags_per_round: 4,
            items: 4,
            fault: FaultConfig {
                max_delay_rounds: 4,
                fail_rate_percent: 40,
                reorder_rate_percent: 50,
                ..FaultConfig::default()
            },
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config).expect("campaign");
        assert!(report.all_passed(), "{:?}", report.failures);
        assert!(report.interesting_states_reached > 0);
    }

    #[test]
    fn single_seed_and_replay_agree() {
        let config = small();
        assert!(run_single_seed(4, &config).expect("run").is_ok());
        let a = replay_seed(4, &config).expect("replay");
        let b = replay_seed(4, &config).expect("replay");
        assert_eq!(a, b);
        assert!(!a.trace.is_empty());
    }

    #[test]
    fn report_serializes_to_json() {
        let report = run_campaign(&CampaignConfig {
            seed_range: 0..2,
            ..small()
        })
        .expect("campaign");
        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["seeds_run"], 2);
        assert!(json["failures"].as_array().is_some_and(Vec::is_empty));
    }
}
