//! Small debug CLI: format a backing file from a cfgstring, or dump its
//! zone/domain/realm reports. Not a substitute for the host SCSI target
//! framework's own CLI — this binary exists for manual inspection only.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use zbc_zdr_emu::Device;

#[derive(Parser)]
#[command(name = "zbc-demo", about = "Inspect a file-backed Zone Domains device")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit structured reports as JSON instead of a human-readable table.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Format a new backing file from a cfgstring (e.g.
    /// `dhsmr/type-HM_ZONED/model-SmrNoCmr/size-10G/zsize-256M@/tmp/backing.img`).
    Format { cfgstring: String },
    /// Open an existing backing file and print its zone report.
    Zones { cfgstring: String },
    /// Open an existing backing file and print its domain report.
    Domains { cfgstring: String },
    /// Open an existing backing file and print its realm table.
    Realms { cfgstring: String },
    /// Open an existing backing file and print its statistics log page.
    Stats { cfgstring: String },
    /// Switch an existing backing file's active profile in place.
    Mutate { cfgstring: String, profile: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Format { cfgstring } => {
            let dev = Device::format(&cfgstring).context("formatting backing file")?;
            tracing::info!(zones = dev.zones.len(), "formatted device");
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&dev.cfg)?);
            }
        }
        Commands::Zones { cfgstring } => {
            let dev = Device::open(&cfgstring).context("opening backing file")?;
            for (i, z) in dev.zones.iter().enumerate() {
                println!(
                    "zone {i}: type={:?} cond={:?} start={} len={} wp={}",
                    z.zone_type, z.condition, z.start_lba, z.length_lba, z.write_pointer
                );
            }
        }
        Commands::Domains { cfgstring } => {
            let dev = Device::open(&cfgstring).context("opening backing file")?;
            for d in &dev.domains {
                println!(
                    "domain {}: type={:?} zones={} [{}, {})",
                    d.id, d.zone_type, d.zone_count, d.start_lba, d.end_lba_exclusive
                );
            }
        }
        Commands::Realms { cfgstring } => {
            let dev = Device::open(&cfgstring).context("opening backing file")?;
            for r in &dev.realms {
                println!("realm {}: active_domain_id={}", r.number, r.active_domain_id);
            }
        }
        Commands::Stats { cfgstring } => {
            let dev = Device::open(&cfgstring).context("opening backing file")?;
            let stats = zbc_zdr_emu::stats::Stats::from_device(&dev);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{stats:#?}");
            }
        }
        Commands::Mutate { cfgstring, profile } => {
            let mut dev = Device::open(&cfgstring).context("opening backing file")?;
            let cdb = [zbc_zdr_emu::dispatch::OP_ZBC_OUT, zbc_zdr_emu::dispatch::SA_MUTATE];
            let res = zbc_zdr_emu::dispatch::dispatch(&mut dev, &cdb, profile.as_bytes());
            match res.status {
                zbc_zdr_emu::dispatch::CommandStatus::Good => {
                    tracing::info!(profile = %profile, "mutated device");
                }
                zbc_zdr_emu::dispatch::CommandStatus::CheckCondition(sense) => {
                    anyhow::bail!("MUTATE rejected: {sense:?}");
                }
            }
        }
    }

    Ok(())
}
