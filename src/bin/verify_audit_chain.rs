use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info};
use uuid::Uuid;

use governance_core::audit::verify_chain;
use governance_core::{Database, RequestContext};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-audit-chain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify the tamper-evident audit chain for one organization")
        .arg(
            Arg::new("database-url")
                .short('d')
                .long("database-url")
                .value_name("URL")
                .help("Database URL (e.g. sqlite://governance.db)")
                .required(true),
        )
        .arg(
            Arg::new("organization")
                .short('o')
                .long("organization")
                .value_name("UUID")
                .help("Organization id whose chain to verify")
                .required(true),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .value_name("N")
                .help("Verify only the most recent N entries (default 1000, max 10000)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let quiet = matches.get_flag("quiet");
    tracing_subscriber::fmt()
        .with_max_level(if quiet {
            tracing::Level::ERROR
        } else {
            tracing::Level::INFO
        })
        .init();

    let database_url = matches.get_one::<String>("database-url").expect("required");
    let organization = matches.get_one::<String>("organization").expect("required");
    let organization_id = Uuid::parse_str(organization)
        .map_err(|e| anyhow!("Invalid organization id {:?}: {}", organization, e))?;

    let limit = matches
        .get_one::<String>("limit")
        .map(|l| l.parse::<i64>())
        .transpose()
        .map_err(|e| anyhow!("Invalid limit: {}", e))?;

    let db = Database::new(database_url).await?;
    let ctx = RequestContext::system(organization_id);

    info!("Verifying audit chain for organization {}", organization_id);

    let mut conn = db.pool().acquire().await?;
    let result = verify_chain(&mut conn, &ctx, limit).await?;

    if result.ok {
        if !quiet {
            println!(
                "ok: checked {} entries (seq {:?}..{:?})",
                result.checked, result.first_seq, result.last_seq
            );
        }
        Ok(())
    } else {
        let detail = result
            .error
            .map(|e| format!("seq {} ({}): {:?}", e.seq, e.audit_log_id, e.reason))
            .unwrap_or_else(|| "unknown".to_string());
        error!(
            "Audit chain verification failed after {} entries: {}",
            result.checked, detail
        );
        std::process::exit(1);
    }
}
