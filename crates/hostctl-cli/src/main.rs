//! Binary bootstrap for a hostctl deployment: wires storage, the domain
//! event bus, the activity/tool registries, and starts the worker pool
//! plus the cron passes that drive every workflow in this repository.
//!
//! Out of scope here: a REST API surface, an admin SPA, and an MCP tool
//! server. Those reach the control plane only through the external-
//! collaborator interfaces the activity layer exposes, not through
//! anything this binary itself serves. `hostctl` is a daemon, not a
//! request router.

mod clients;
mod config;
mod cron;
mod runners;
mod tools;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hostctl_bus_core::InMemoryBus;
use hostctl_engine::worker::{WorkerPool, WorkerPoolConfig};
use hostctl_store_postgres::{CoreDb, PostgresStepStore, MIGRATOR};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "hostctl", about = "Durable orchestration daemon for a multi-tenant web-hosting control plane")]
struct Cli {
    /// Path to a config file (TOML/YAML/JSON, without extension), layered
    /// under defaults and over by `HOSTCTL_`-prefixed env vars.
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending migrations, then start the worker pool and every cron
    /// pass. The default long-running mode.
    Run,
    /// Apply pending database migrations and exit.
    Migrate,
    /// Mint an HS256 capability token for manual API testing.
    GenerateToken {
        /// Token subject (user or agent id).
        #[arg(long)]
        subject: String,
        /// Cluster the token is scoped to.
        #[arg(long)]
        cluster: String,
        /// Comma-separated permission list.
        #[arg(long, default_value = "")]
        permissions: String,
        /// Token lifetime in seconds.
        #[arg(long, default_value_t = 3600)]
        ttl_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log_format);

    match cli.command {
        Commands::Migrate => run_migrations(&config).await,
        Commands::GenerateToken { subject, cluster, permissions, ttl_secs } => {
            generate_token(&config, &subject, &cluster, &permissions, ttl_secs)
        }
        Commands::Run => run_daemon(config).await,
    }
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn connect(config: &CliConfig) -> Result<sqlx::PgPool> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.worker_concurrency.max(1) as u32 + 4)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")
}

async fn run_migrations(config: &CliConfig) -> Result<()> {
    let pool = connect(config).await?;
    MIGRATOR.run(&pool).await.context("failed to run migrations")?;
    tracing::info!("migrations applied");
    Ok(())
}

fn generate_token(config: &CliConfig, subject: &str, cluster: &str, permissions: &str, ttl_secs: u64) -> Result<()> {
    let permissions: Vec<String> = permissions.split(',').filter(|p| !p.is_empty()).map(str::to_string).collect();
    let token = hostctl_auth::hs256::JwtHs256Token::new(subject, cluster, permissions, &config.jwt_secret, ttl_secs)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("{}", token.as_str());
    Ok(())
}

async fn run_daemon(config: CliConfig) -> Result<()> {
    let pool = connect(&config).await?;
    MIGRATOR.run(&pool).await.context("failed to run migrations")?;

    let core_db = Arc::new(CoreDb::new(pool.clone()));
    let store: Arc<dyn hostctl_store_core::StorageBackend> = Arc::new(PostgresStepStore::new(pool));
    let bus = Arc::new(InMemoryBus::new(config.bus_capacity));

    let powerdns: Arc<dyn hostctl_activities::dns::PowerDnsClient> =
        Arc::new(clients::HttpPowerDns::new(config.powerdns_base_url.clone()));
    let haproxy: Arc<dyn hostctl_activities::lb::HaproxyClient> = Arc::new(clients::TcpHaproxy::new(config.haproxy_addr.clone()));
    let lb_map_files = Arc::new(hostctl_activities::lb::LbMapFiles::new(std::path::PathBuf::from(&config.lb_map_dir)));
    let acme: Arc<dyn hostctl_activities::acme::AcmeClient> = Arc::new(clients::ReqwestAcme::new(config.acme_directory_url.clone()));
    let node_agent: Arc<dyn hostctl_activities::node_agent::NodeAgent> =
        Arc::new(clients::HttpNodeAgent::new(core_db.clone(), config.node_agent_port));
    let mail: Arc<dyn hostctl_activities::mail::MailClient> = Arc::new(clients::HttpMail::new(config.mail_base_url.clone()));
    let webhook: Arc<dyn hostctl_activities::webhook::WebhookSender> = Arc::new(clients::ReqwestWebhook::new());
    let env_codec: Arc<dyn hostctl_convergence::web_shard::EnvVarCodec> = Arc::new(clients::AesGcmEnvCodec::new(config.master_key_bytes()?));

    let llm_config = hostctl_llm_gateway::Config::from_env().context("failed to load LLM gateway configuration")?;
    let llm: Arc<dyn hostctl_activities::llm::LlmProvider> =
        Arc::new(hostctl_llm_gateway::LlmGateway::new(llm_config).await.context("failed to initialize LLM gateway")?);

    hostctl_activities::register_builtin_activities(
        core_db.clone(),
        powerdns,
        haproxy,
        lb_map_files.clone(),
        acme,
        node_agent,
        mail,
        webhook,
        llm,
    );
    tools::register_tools(core_db.clone());
    runners::register_runners(store, core_db.clone(), bus.clone(), env_codec, lb_map_files, config.webhook_url.clone());

    let pool = Arc::new(WorkerPool::spawn(
        WorkerPoolConfig { concurrency: config.worker_concurrency, ..WorkerPoolConfig::default() },
        bus.clone(),
    ));

    runners::spawn_converge_bridge(bus.clone(), pool.clone());
    runners::spawn_task_abandonment_bridge(bus.clone(), core_db.clone());
    cron::spawn_escalation_tick(pool.clone(), config.escalation_interval());
    cron::spawn_investigation_poll(core_db.clone(), pool.clone(), config.investigation_poll_interval(), format!("worker:{}", pool.worker_id().0));
    cron::spawn_certificate_renewal_tick(core_db.clone(), pool.clone(), config.certificate_renewal_interval());
    cron::spawn_backup_retention_tick(core_db.clone(), config.backup_retention_interval(), config.backup_retention());
    cron::spawn_unhealthy_node_scan_tick(core_db, bus, config.unhealthy_node_scan_interval(), config.unhealthy_node_stale_after());

    tracing::info!(concurrency = config.worker_concurrency, "hostctl daemon started");
    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    Ok(())
}
