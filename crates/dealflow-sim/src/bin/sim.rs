#![forbid(unsafe_code)]

use anyhow::{Result, bail};
use dealflow_sim::campaign::{CampaignConfig, replay_seed, run_campaign};

fn main() -> Result<()> {
    let report = run_campaign(&CampaignConfig::default())?;

    println!(
        "campaign complete: seeds_run={} seeds_passed={} interesting={}",
        report.seeds_run, report.seeds_passed, report.interesting_states_reached
    );

    if let Some(seed) = report.first_failure {
        let replay = replay_seed(seed, &CampaignConfig::default())?;
        println!("{}", serde_json::to_string_pretty(&replay)?);
        bail!("seed {seed} violated {} invariant(s)", replay.oracle.violations.len());
    }

    Ok(())
}
