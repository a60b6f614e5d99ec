use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use uuid::Uuid;

use sealtrace_core::{
    config::SealtraceConfig,
    crypto::MasterKey,
    seal::Seal,
    service::{SealService, ServiceLimits, VerifyRequest},
    sqlite::SqliteSealStore,
    util,
};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "sealtrace",
    version = util::VERSION,
    about = "Tamper-evident seal provisioning and verification for shipments"
)]
struct Cli {
    /// Path to the seal database (SQLite).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty seal database.
    InitDb,

    /// Provision a seal identity for a physical tag.
    Provision {
        /// Hardware UID: 8 or 14 hex characters.
        #[arg(long)]
        serial: String,
        /// Optional absolute expiry (RFC 3339 UTC).
        #[arg(long)]
        expires: Option<String>,
    },

    /// Provision a batch of seals from a CSV with a `serial` header.
    ProvisionBatch {
        #[arg(long)]
        csv: PathBuf,
        #[arg(long)]
        expires: Option<String>,
    },

    /// Bind a provisioned seal to a shipment.
    Attach {
        #[arg(long)]
        seal_id: Uuid,
        #[arg(long)]
        shipment: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lng: Option<f64>,
    },

    /// Verify a claimed reading against a seal's outstanding challenge.
    Verify {
        #[arg(long)]
        serial: String,
        /// Base64 DER-encoded ECDSA signature over the outstanding challenge.
        #[arg(long)]
        signature_b64: String,
        /// Read counter as reported by the device.
        #[arg(long)]
        counter: i64,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lng: Option<f64>,
        #[arg(long)]
        device: Option<String>,
    },

    /// Produce a simulated reading and verify it (development/CI only; a
    /// real deployment signs inside the tag, never server-side).
    SimulateVerify {
        #[arg(long)]
        serial: String,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        lat: Option<f64>,
        #[arg(long)]
        lng: Option<f64>,
    },

    /// Record the controlled removal of a seal at destination.
    Remove {
        #[arg(long)]
        seal_id: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Report physical damage observed in the field.
    ReportDamage {
        #[arg(long)]
        seal_id: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        description: String,
    },

    /// Print the outstanding challenge for a seal (diagnostics).
    Challenge {
        #[arg(long)]
        serial: String,
    },

    /// List non-terminal seals expiring within N days.
    Expiring {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },

    /// List provisioned seals not yet bound to a shipment.
    Unattached,

    /// Export a seal's audit trail (seal + verification history) as JSON.
    ExportAudit {
        #[arg(long)]
        serial: String,
        #[arg(long)]
        out: PathBuf,
    },

    /// Print version information.
    Version,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration.
    let mut cfg = SealtraceConfig::load(cli.config.as_deref()).context("load config")?;
    cfg.apply_env();

    init_logging(&cfg.logging);

    if let Commands::Version = cli.cmd {
        println!("{}", util::version_string());
        return Ok(());
    }

    // A process without a usable master key must not start.
    let master_key = MasterKey::from_config(&cfg.security).context("resolve master key")?;
    let limits = ServiceLimits::from_config(&cfg);
    let db_path = cli.db.unwrap_or(cfg.paths.db.clone());

    if let Commands::InitDb = cli.cmd {
        let store = SqliteSealStore::create_new(&db_path).context("create seal database")?;
        info!(store_id = %store.store_id(), db = %db_path.display(), "database initialized");
        return Ok(());
    }

    let store = SqliteSealStore::open_or_create(&db_path).context("open seal database")?;
    let service = SealService::new(store, master_key, limits);

    match cli.cmd {
        Commands::InitDb | Commands::Version => unreachable!("handled above"),

        Commands::Provision { serial, expires } => {
            let seal = service
                .provision(&serial, expires.as_deref())
                .context("provision seal")?;
            print_seal(&seal);
            println!("challenge: {}", seal.challenge);
        }

        Commands::ProvisionBatch { csv, expires } => {
            let serials = read_serial_csv(&csv)?;
            let outcome = service
                .provision_batch(&serials, expires.as_deref())
                .context("provision batch")?;
            for (serial, reason) in &outcome.rejected {
                warn!(serial = %serial, reason = %reason, "rejected");
            }
            println!(
                "provisioned {} seal(s), rejected {}",
                outcome.provisioned.len(),
                outcome.rejected.len()
            );
        }

        Commands::Attach {
            seal_id,
            shipment,
            actor,
            location,
            lat,
            lng,
        } => {
            let seal = service
                .attach(&seal_id, &shipment, &actor, location, lat, lng)
                .context("attach seal")?;
            print_seal(&seal);
        }

        Commands::Verify {
            serial,
            signature_b64,
            counter,
            actor,
            location,
            lat,
            lng,
            device,
        } => {
            let signature_der = util::b64_decode(&signature_b64).context("decode signature")?;
            let outcome = service
                .verify(&VerifyRequest {
                    serial_number: serial,
                    signature_der,
                    read_counter: counter,
                    verified_by: actor,
                    latitude: lat,
                    longitude: lng,
                    location,
                    device_info: device,
                })
                .context("verify reading")?;
            print_verify_outcome(&outcome)?;
        }

        Commands::SimulateVerify {
            serial,
            actor,
            location,
            lat,
            lng,
        } => {
            warn!("simulated reading: signing server-side with the stored key copy");
            let reading = service
                .simulate_reading(&serial)
                .context("simulate reading")?;
            let outcome = service
                .verify(&VerifyRequest {
                    serial_number: reading.serial_number,
                    signature_der: reading.signature_der,
                    read_counter: reading.read_counter,
                    verified_by: actor,
                    latitude: lat,
                    longitude: lng,
                    location,
                    device_info: Some("simulated-reader".to_string()),
                })
                .context("verify simulated reading")?;
            print_verify_outcome(&outcome)?;
        }

        Commands::Remove {
            seal_id,
            actor,
            location,
            reason,
        } => {
            let seal = service
                .remove(&seal_id, &actor, location, reason)
                .context("remove seal")?;
            print_seal(&seal);
        }

        Commands::ReportDamage {
            seal_id,
            actor,
            description,
        } => {
            let seal = service
                .report_damage(&seal_id, &actor, &description)
                .context("report damage")?;
            print_seal(&seal);
        }

        Commands::Challenge { serial } => {
            let challenge = service.current_challenge(&serial).context("read challenge")?;
            println!("{challenge}");
        }

        Commands::Expiring { days } => {
            let seals = service
                .expiring_within_days(days)
                .context("list expiring seals")?;
            for seal in &seals {
                println!(
                    "{}  {}  expires {}",
                    seal.serial_number,
                    seal.status,
                    seal.expires_at.as_deref().unwrap_or("-")
                );
            }
            info!(count = seals.len(), days, "expiring seals listed");
        }

        Commands::Unattached => {
            let seals = service.unattached().context("list unattached seals")?;
            for seal in &seals {
                println!("{}  provisioned {}", seal.serial_number, seal.provisioned_at);
            }
            info!(count = seals.len(), "unattached seals listed");
        }

        Commands::ExportAudit { serial, out } => {
            let bundle = service.audit_bundle(&serial).context("build audit bundle")?;
            let json = serde_json::to_vec_pretty(&bundle).context("serialize audit bundle")?;
            std::fs::write(&out, json).with_context(|| format!("write {}", out.display()))?;
            info!(serial = %serial, out = %out.display(), "audit trail exported");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, serde::Deserialize)]
struct CsvRow {
    serial: String,
}

fn read_serial_csv(path: &PathBuf) -> Result<Vec<String>> {
    let mut rdr =
        csv::Reader::from_path(path).with_context(|| format!("open csv: {}", path.display()))?;
    let headers = rdr.headers().context("read csv headers")?.clone();
    if !headers.iter().any(|h| h.eq_ignore_ascii_case("serial")) {
        anyhow::bail!("csv missing required header 'serial'");
    }
    let mut serials = Vec::new();
    for rec in rdr.deserialize::<CsvRow>() {
        serials.push(rec.context("parse csv row")?.serial);
    }
    Ok(serials)
}

fn print_seal(seal: &Seal) {
    println!("seal:      {}", seal.id);
    println!("serial:    {}", seal.serial_number);
    println!("status:    {}", seal.status);
    if let Some(shipment) = &seal.shipment_id {
        println!("shipment:  {shipment}");
    }
    if seal.tamper_indicator != sealtrace_core::seal::TamperIndicator::None {
        println!(
            "tamper:    {} ({})",
            seal.tamper_indicator,
            seal.tamper_details.as_deref().unwrap_or("-")
        );
    }
}

fn print_verify_outcome(outcome: &sealtrace_core::service::VerifyOutcome) -> Result<()> {
    let summary = serde_json::json!({
        "serial": outcome.seal.serial_number,
        "is_valid": outcome.is_valid,
        "status": outcome.seal.status,
        "tamper_indicator": outcome.tamper_indicator,
        "integrity_score": outcome.integrity_score,
        "next_challenge": outcome.next_challenge,
        "record_id": outcome.record.id,
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("serialize outcome")?
    );
    Ok(())
}

fn init_logging(cfg: &sealtrace_core::config::LoggingConfig) {
    use tracing_subscriber::prelude::*;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.level));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg.json_stdout {
        // JSON output to stdout for container / SIEM pipelines.
        let json_layer = tracing_subscriber::fmt::layer().json();
        registry.with(json_layer).init();
    } else if !cfg.json_log_file.is_empty() {
        // JSON-lines output to file for SIEM integration.
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.json_log_file)
            .expect("failed to open json log file");
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::sync::Mutex::new(log_file));
        let console_layer = tracing_subscriber::fmt::layer();
        registry.with(file_layer).with(console_layer).init();
    } else {
        // Default: human-readable output to stderr.
        let console_layer = tracing_subscriber::fmt::layer();
        registry.with(console_layer).init();
    }
}
