//! PaySentinel CLI
//!
//! Command-line interface for the PaySentinel detection engine.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use paysentinel::alerting::{
    AlertRepository, Collaborators, CounterSource, DetectionEngine, HttpReasoner,
    NotificationSender, Reasoner, RuleRepository,
};
use paysentinel::api::{AppState, HttpServer};
use paysentinel::db::{Database, EventLogRepository, KamRepository, RedisCounterStore};
use paysentinel::models::{ActiveHours, AlertRuleInput, MetricType, Operator, Severity};
use paysentinel::{telemetry, Config};

/// PaySentinel - Payment anomaly detection and alerting
#[derive(Parser)]
#[command(name = "paysentinel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "PAYSENTINEL_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the detection engine and the operations API
    Serve {
        /// Operations API port (overrides server.http_port)
        #[arg(long, env = "PAYSENTINEL_HTTP_PORT")]
        http_port: Option<u16>,

        /// Apply pending migrations before starting
        #[arg(long)]
        migrate: bool,
    },

    /// Manage alert rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Inspect raised alerts
    Alerts {
        #[command(subcommand)]
        command: AlertsCommands,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Show system health status
    Health,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List all alert rules
    List,

    /// Create a new alert rule
    Create {
        /// Rule name
        #[arg(long)]
        name: String,

        /// Metric to monitor (approval_rate, error_rate, decline_rate, volume)
        #[arg(long)]
        metric: MetricType,

        /// Comparison operator (gt, lt, gte, lte or symbolic)
        #[arg(long)]
        operator: Operator,

        /// Threshold value
        #[arg(long)]
        threshold: f64,

        /// Merchant scope (optional)
        #[arg(long)]
        tenant: Option<String>,

        /// Country scope (optional)
        #[arg(long)]
        country: Option<String>,

        /// Provider scope (optional)
        #[arg(long)]
        provider: Option<String>,

        /// Card issuer scope (optional)
        #[arg(long)]
        issuer: Option<String>,

        /// Minimum transactions before the rule is evaluated
        #[arg(long, default_value = "50")]
        min_transactions: u64,

        /// UTC hours the rule applies, e.g. "9-17"
        #[arg(long, value_parser = parse_active_hours)]
        active_hours: Option<ActiveHours>,

        /// Severity (info, warning, critical)
        #[arg(long, default_value = "warning")]
        severity: Severity,

        /// Create the rule disabled
        #[arg(long)]
        disabled: bool,
    },

    /// Enable an alert rule
    Enable {
        /// Rule ID
        rule_id: Uuid,
    },

    /// Disable an alert rule
    Disable {
        /// Rule ID
        rule_id: Uuid,
    },

    /// Delete an alert rule
    Delete {
        /// Rule ID
        rule_id: Uuid,
    },
}

#[derive(Subcommand)]
enum AlertsCommands {
    /// Show the most recent alerts
    Recent {
        /// Maximum number of alerts
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _log_guard = match telemetry::init_tracing(&config.logging, cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Serve { http_port, migrate } => run_serve(config, http_port, migrate).await,
        Commands::Rules { command } => run_rules(config, command, cli.format).await,
        Commands::Alerts { command } => run_alerts(config, command, cli.format).await,
        Commands::Db { command } => run_db(config, command).await,
        Commands::Health => run_health(config, cli.format).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_serve(config: Config, http_port: Option<u16>, migrate: bool) -> anyhow::Result<()> {
    let prometheus = telemetry::install_metrics_recorder()?;
    let db = Database::new(&config)
        .await
        .context("failed to connect to the databases")?;
    if migrate {
        db.migrate().await.context("failed to run migrations")?;
    }

    let counters: Arc<dyn CounterSource> =
        Arc::new(RedisCounterStore::new(&db.redis, &config.redis.key_prefix));
    let reasoner = HttpReasoner::from_config(&config.reasoning)?
        .map(|reasoner| Arc::new(reasoner) as Arc<dyn Reasoner>);
    if reasoner.is_none() {
        warn!("Reasoning service not configured, alerts will carry no explanation");
    }

    let engine = DetectionEngine::new(
        &config,
        Collaborators {
            counters: counters.clone(),
            rules: Arc::new(RuleRepository::new(&db.postgres)),
            event_log: Arc::new(EventLogRepository::new(&db.postgres)),
            alerts: Arc::new(AlertRepository::new(&db.postgres)),
            reasoner,
            kam: Arc::new(KamRepository::new(&db.postgres)),
            notifier: Arc::new(NotificationSender::new(&config.notification)?),
        },
    );

    let server = HttpServer::new(AppState {
        alert_repo: Some(AlertRepository::new(&db.postgres)),
        counters,
        key_prefix: config.redis.key_prefix.clone(),
        detection_state: engine.state(),
        prometheus: Some(prometheus),
    });

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    let addr = format!(
        "{}:{}",
        config.server.host,
        http_port.unwrap_or(config.server.http_port)
    );
    let listener = HttpServer::bind(&addr).await?;
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = server.serve(listener, server_shutdown.clone()).await;
        if let Err(e) = &result {
            error!(error = %e, "Operations API failed, shutting down");
            server_shutdown.cancel();
        }
        result
    });

    info!(
        interval = %humantime::format_duration(config.detection.check_interval),
        cooldown = %humantime::format_duration(config.detection.cooldown),
        "PaySentinel started"
    );
    engine.run(shutdown.clone()).await;

    // the engine only returns after cancellation; make sure the server follows
    shutdown.cancel();
    server_task.await.context("operations API task panicked")??;
    Ok(())
}

async fn run_rules(config: Config, command: RulesCommands, format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::new(&config).await?;
    let repo = RuleRepository::new(&db.postgres);

    match command {
        RulesCommands::List => {
            let rules = repo.list_rules().await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&rules)?);
                return Ok(());
            }
            if rules.is_empty() {
                println!("No alert rules configured");
            }
            for rule in rules {
                let scope = [
                    rule.tenant_id.as_deref(),
                    rule.country.as_deref(),
                    rule.provider_id.as_deref(),
                    rule.issuer.as_deref(),
                ]
                .map(|filter| filter.unwrap_or("*"))
                .join("/");
                println!(
                    "{}  {:<8} {:<9} {} {} {} [{}] {}",
                    rule.id,
                    if rule.enabled { "enabled" } else { "disabled" },
                    rule.severity,
                    rule.metric_type,
                    rule.operator.symbol(),
                    rule.threshold,
                    scope,
                    rule.name
                );
            }
        }
        RulesCommands::Create {
            name,
            metric,
            operator,
            threshold,
            tenant,
            country,
            provider,
            issuer,
            min_transactions,
            active_hours,
            severity,
            disabled,
        } => {
            let rule = repo
                .create_rule(AlertRuleInput {
                    name,
                    tenant_id: tenant,
                    country,
                    provider_id: provider,
                    issuer,
                    metric_type: metric,
                    operator,
                    threshold,
                    min_transactions: Some(min_transactions),
                    active_hours,
                    severity: Some(severity),
                    enabled: Some(!disabled),
                })
                .await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rule)?),
                OutputFormat::Text => println!("Created rule {}", rule.id),
            }
        }
        RulesCommands::Enable { rule_id } => {
            repo.set_enabled(rule_id, true).await?;
            println!("Enabled rule {rule_id}");
        }
        RulesCommands::Disable { rule_id } => {
            repo.set_enabled(rule_id, false).await?;
            println!("Disabled rule {rule_id}");
        }
        RulesCommands::Delete { rule_id } => {
            if repo.delete_rule(rule_id).await? {
                println!("Deleted rule {rule_id}");
            } else {
                anyhow::bail!("rule {rule_id} not found");
            }
        }
    }
    Ok(())
}

async fn run_alerts(config: Config, command: AlertsCommands, format: OutputFormat) -> anyhow::Result<()> {
    let db = Database::new(&config).await?;
    let repo = AlertRepository::new(&db.postgres);

    match command {
        AlertsCommands::Recent { limit } => {
            let alerts = repo.list_recent(limit.max(1)).await?;
            if format == OutputFormat::Json {
                println!("{}", serde_json::to_string_pretty(&alerts)?);
                return Ok(());
            }
            if alerts.is_empty() {
                println!("No alerts raised");
            }
            for stored in alerts {
                let alert = &stored.alert;
                println!(
                    "{}  {:<8} {}",
                    alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                    alert.severity,
                    alert.title
                );
                println!(
                    "    value {:.3} vs {:.3}, {} affected, ${:.2} at risk",
                    alert.metric_value,
                    alert.threshold_value,
                    alert.affected_transactions,
                    alert.revenue_at_risk_usd
                );
                println!("    cause:  {}", alert.root_cause.issue);
                println!("    action: {}", alert.suggested_action.label);
            }
        }
    }
    Ok(())
}

async fn run_db(config: Config, command: DbCommands) -> anyhow::Result<()> {
    match command {
        DbCommands::Migrate => {
            let db = Database::new(&config).await?;
            db.migrate().await?;
            println!("Migrations applied");
        }
    }
    Ok(())
}

async fn run_health(config: Config, format: OutputFormat) -> anyhow::Result<()> {
    let status = match Database::new(&config).await {
        Ok(db) => db.health_check().await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match format {
        OutputFormat::Json => {
            let body = serde_json::json!({
                "status": if status.is_ok() { "ok" } else { "degraded" },
                "error": status.as_ref().err(),
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => match &status {
            Ok(()) => println!("Databases: connected"),
            Err(e) => println!("Databases: unavailable ({e})"),
        },
    }

    status.map_err(anyhow::Error::msg)
}

fn parse_active_hours(value: &str) -> Result<ActiveHours, String> {
    let (start, end) = value
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got '{value}'"))?;
    let start: u8 = start.trim().parse().map_err(|_| format!("invalid start hour '{start}'"))?;
    let end: u8 = end.trim().parse().map_err(|_| format!("invalid end hour '{end}'"))?;
    ActiveHours::new(start, end)
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "paysentinel", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_active_hours() {
        let hours = parse_active_hours("9-17").unwrap();
        assert_eq!((hours.start_hour, hours.end_hour), (9, 17));
        assert!(parse_active_hours("9").is_err());
        assert!(parse_active_hours("9-25").is_err());
    }

    #[test]
    fn test_create_rule_arguments() {
        let cli = Cli::try_parse_from([
            "paysentinel",
            "rules",
            "create",
            "--name",
            "stripe errors",
            "--metric",
            "error_rate",
            "--operator",
            ">",
            "--threshold",
            "0.2",
            "--provider",
            "STRIPE",
        ])
        .unwrap();

        match cli.command {
            Commands::Rules {
                command: RulesCommands::Create { metric, operator, severity, .. },
            } => {
                assert_eq!(metric, MetricType::ErrorRate);
                assert_eq!(operator, Operator::Gt);
                assert_eq!(severity, Severity::Warning);
            }
            _ => panic!("expected rules create"),
        }
    }
}
