use std::net::Ipv4Addr;
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `cloudmirror list vpc | head`)
/// exits cleanly instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use cloudmirror::config::loader;
use cloudmirror::config::types::{EngineConfig, ProviderSeed};
use cloudmirror::engine::{Engine, OpContext};
use cloudmirror::netprep::{self, NetPrep};
use cloudmirror::output::formatter;
use cloudmirror::query::ListInput;
use cloudmirror::resources::{service, CreateInput};
use cloudmirror::scheduler;
use cloudmirror::state::export::{format_rows, OutputFormat};
use cloudmirror::state::models::{task_status, TaskFilter};
use cloudmirror::state::sqlite::SqliteBackend;
use cloudmirror::sync::cycle::{self, CycleOptions};
use cloudmirror::timer::Timer;

/// cloudmirror - multi-cloud inventory reconciliation engine
#[derive(Parser)]
#[command(name = "cloudmirror", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = loader::DEFAULT_CONFIG)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// State database path (overrides database.path)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state database and register configured providers
    Init,

    /// Manage cloud providers
    Provider {
        #[command(subcommand)]
        command: ProviderCommands,
    },

    /// Reconcile local records with a provider's inventory
    Sync {
        /// Provider name or id
        provider: String,

        /// Ignore the sync cooldown
        #[arg(long)]
        force: bool,

        /// Only add and remove records; skip updates of existing ones
        #[arg(long)]
        xor: bool,
    },

    /// List records of a class
    List {
        /// Class keyword (e.g. vpc, dns_zone)
        class: String,

        /// Filter by status
        #[arg(long)]
        status: Vec<String>,

        /// Filter by provider name or id
        #[arg(long)]
        provider: Vec<String>,

        /// Substring match on name
        #[arg(long)]
        search: Option<String>,

        /// Only records under this parent
        #[arg(long)]
        parent: Option<String>,

        /// Export only these keys (comma separated)
        #[arg(long, value_delimiter = ',')]
        keys: Vec<String>,

        /// Sort keys, `-` prefix for descending (comma separated)
        #[arg(long, value_delimiter = ',')]
        order_by: Vec<String>,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        offset: Option<usize>,

        /// Output format: table, json, csv
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show one record
    Show {
        class: String,
        /// Record id or name
        id: String,

        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a record from a JSON body
    Create {
        class: String,
        /// JSON create body, e.g. '{"name": "z1", "attributes": {...}}'
        body: String,
    },

    /// Request deletion of a record
    Delete {
        class: String,
        id: String,
    },

    /// Run a perform action on a record (or on a provider with class `cloudprovider`)
    Perform {
        class: String,
        id: String,
        action: String,

        /// JSON params
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// List tasks
    Tasks {
        /// Only tasks targeting this object id
        #[arg(long)]
        obj: Option<String>,

        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Bind a timer to a perform action
    Schedule {
        /// Name of the scheduled operation
        name: String,
        class: String,
        id: String,
        action: String,

        /// Timer JSON, e.g. '{"cycle": "week", "hour": 2, "minute": 30, "weekdays": [2, 4]}'
        #[arg(long)]
        timer: String,

        /// JSON params for the action
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Run scheduled operations that are due now
    Tick,

    /// List registered resource classes
    Classes {
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Suggest /24 guest networks covering host addresses
    Netprep {
        /// Host IPv4 addresses
        #[arg(required = true)]
        ips: Vec<String>,

        /// Treat the addresses as VM seeds and widen each to its free /24 run
        #[arg(long)]
        expand: bool,

        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ProviderCommands {
    /// Register a provider
    Add {
        name: String,

        #[arg(long, default_value = "snapshot")]
        brand: String,

        /// Driver endpoint; for `snapshot`, the inventory YAML path
        #[arg(long, default_value = "")]
        endpoint: String,

        #[arg(long, default_value = "")]
        account: String,

        #[arg(long, default_value = "default")]
        domain: String,

        /// "local" keeps local ownership, "cloud" maps remote projects
        #[arg(long, default_value = "local")]
        project_src: String,

        /// Per-provider sync cooldown in seconds
        #[arg(long)]
        cooldown: Option<u64>,
    },
    /// List providers
    List,
    /// Enable a provider
    Enable { provider: String },
    /// Disable a provider
    Disable { provider: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = loader::load_config(&cli.config)?;
    if let Some(ref db) = cli.db {
        config.database.path = db.clone();
    }

    match cli.command {
        Commands::Init => cmd_init(config).await,
        Commands::Provider { ref command } => cmd_provider(config, command).await,
        Commands::Sync {
            ref provider,
            force,
            xor,
        } => cmd_sync(config, provider, CycleOptions { force, xor }).await,
        Commands::List {
            ref class,
            ref status,
            ref provider,
            ref search,
            ref parent,
            ref keys,
            ref order_by,
            limit,
            offset,
            ref format,
        } => {
            let mut input = ListInput {
                status: status.clone(),
                search: search.clone(),
                parent_id: parent.clone(),
                export_keys: keys.clone(),
                order_by: order_by.clone(),
                limit,
                offset,
                ..ListInput::default()
            };
            input.managed.provider_ids = provider.clone();
            cmd_list(config, class, &input, format).await
        }
        Commands::Show {
            ref class,
            ref id,
            json,
        } => cmd_show(config, class, id, json).await,
        Commands::Create {
            ref class,
            ref body,
        } => cmd_create(config, class, body).await,
        Commands::Delete { ref class, ref id } => cmd_delete(config, class, id).await,
        Commands::Perform {
            ref class,
            ref id,
            ref action,
            ref params,
        } => cmd_perform(config, class, id, action, params).await,
        Commands::Tasks {
            ref obj,
            ref status,
            limit,
        } => {
            let filter = TaskFilter {
                obj_id: obj.clone(),
                status: status.clone(),
                limit: Some(limit),
                ..TaskFilter::default()
            };
            cmd_tasks(config, &filter).await
        }
        Commands::Schedule {
            ref name,
            ref class,
            ref id,
            ref action,
            ref timer,
            ref params,
        } => cmd_schedule(config, name, class, id, action, timer, params).await,
        Commands::Tick => cmd_tick(config).await,
        Commands::Classes { ref format } => cmd_classes(config, format).await,
        Commands::Netprep {
            ref ips,
            expand,
            ref format,
        } => cmd_netprep(config, ips, expand, format).await,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

async fn open_engine(config: EngineConfig) -> Result<Arc<Engine>> {
    let backend = SqliteBackend::open(&config.database.path)?;
    let engine = Engine::new(config, Arc::new(backend)).await?;
    Ok(engine)
}

fn parse_json(label: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("Invalid JSON in {}", label))
}

/// Wait for background tasks, then report how the given one ended.
async fn finish_task(engine: &Arc<Engine>, task_id: Option<String>) -> Result<()> {
    engine.tasks.wait_idle().await;
    let Some(task_id) = task_id else {
        return Ok(());
    };
    let task = engine.tasks.wait_for(engine, &task_id).await?;
    match task.status.as_str() {
        task_status::DONE => formatter::print_success(&format!("Task {} ({}) succeeded.", task.id, task.kind)),
        _ => {
            formatter::print_error(&format!("Task {} ({}) {}.", task.id, task.kind, task.status));
            for reason in &task.failed_reasons {
                println!("  {}", reason.dimmed());
            }
        }
    }
    Ok(())
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_init(config: EngineConfig) -> Result<()> {
    let seeds = config.providers.clone();
    let path = config.database.path.clone();
    let engine = open_engine(config).await?;
    let added = engine.providers.seed(&seeds).await?;
    if added > 0 {
        println!("  {} Registered {} provider(s).", "+".green(), added);
    }
    formatter::print_success(&format!("State database ready at {}.", path));
    Ok(())
}

async fn cmd_provider(config: EngineConfig, command: &ProviderCommands) -> Result<()> {
    let engine = open_engine(config).await?;
    match command {
        ProviderCommands::Add {
            name,
            brand,
            endpoint,
            account,
            domain,
            project_src,
            cooldown,
        } => {
            let seed = ProviderSeed {
                name: name.clone(),
                brand: brand.clone(),
                account_id: account.clone(),
                endpoint: endpoint.clone(),
                credentials: String::new(),
                domain_id: domain.clone(),
                project_id: String::new(),
                project_src: project_src.clone(),
                sync_cooldown_secs: *cooldown,
            };
            let provider = engine.providers.add(&seed).await?;
            formatter::print_success(&format!("Registered provider {} ({}).", provider.name, provider.id));
        }
        ProviderCommands::List => {
            formatter::print_providers(&engine.providers.list().await?);
        }
        ProviderCommands::Enable { provider } | ProviderCommands::Disable { provider } => {
            let enable = matches!(command, ProviderCommands::Enable { .. });
            let provider = engine.providers.set_enabled(provider, enable).await?;
            let state = if provider.enabled { "enabled" } else { "disabled" };
            formatter::print_success(&format!("Provider {} {}.", provider.name, state));
        }
    }
    Ok(())
}

async fn cmd_sync(config: EngineConfig, provider: &str, options: CycleOptions) -> Result<()> {
    let engine = open_engine(config).await?;
    let report = cycle::sync_provider(&engine, provider, options).await?;
    engine.tasks.wait_idle().await;
    formatter::print_cycle_report(&report);
    Ok(())
}

async fn cmd_list(config: EngineConfig, class: &str, input: &ListInput, format: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let output = service::list(&cx, class, input).await?;
    let format = OutputFormat::parse(format);

    let rows: Vec<Value> = if input.is_projection() || format == OutputFormat::Json {
        output.data
    } else {
        output.data.iter().map(formatter::summary_row).collect()
    };
    println!("{}", format_rows(&rows, format)?);
    if format == OutputFormat::Table && output.total > rows.len() {
        println!("{}", format!("{} of {} shown", rows.len(), output.total).dimmed());
    }
    engine.tasks.wait_idle().await;
    Ok(())
}

async fn cmd_show(config: EngineConfig, class: &str, id: &str, json: bool) -> Result<()> {
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let record = service::get(&cx, class, id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        formatter::print_record_detail(&record);
    }
    Ok(())
}

async fn cmd_create(config: EngineConfig, class: &str, body: &str) -> Result<()> {
    let input: CreateInput =
        serde_json::from_value(parse_json("body", body)?).context("Invalid create body")?;
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let (record, task_id) = service::create(&cx, class, input).await?;
    formatter::print_success(&format!("Created {} ({}).", record.reference(), record.status));
    finish_task(&engine, task_id).await
}

async fn cmd_delete(config: EngineConfig, class: &str, id: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let task_id = service::delete(&cx, class, id).await?;
    formatter::print_success(&format!("Delete of {} {} requested.", class, id));
    finish_task(&engine, task_id).await
}

async fn cmd_perform(config: EngineConfig, class: &str, id: &str, action: &str, params: &str) -> Result<()> {
    let params = parse_json("params", params)?;
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let outcome = if class == "cloudprovider" {
        service::perform_provider(&cx, id, action, params).await?
    } else {
        service::perform(&cx, class, id, action, params).await?
    };
    if !outcome.result.is_null() {
        println!("{}", serde_json::to_string_pretty(&outcome.result)?);
    }
    formatter::print_success(&format!("{} on {} {} accepted.", action, class, id));
    finish_task(&engine, outcome.task_id).await
}

async fn cmd_tasks(config: EngineConfig, filter: &TaskFilter) -> Result<()> {
    let engine = open_engine(config).await?;
    let tasks = engine.tasks.list(&engine, filter).await?;
    formatter::print_tasks(&tasks);
    Ok(())
}

async fn cmd_schedule(
    config: EngineConfig,
    name: &str,
    class: &str,
    id: &str,
    action: &str,
    timer: &str,
    params: &str,
) -> Result<()> {
    let timer: Timer = serde_json::from_value(parse_json("timer", timer)?).context("Invalid timer")?;
    let params = parse_json("params", params)?;
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let scheduled = scheduler::schedule(&cx, name, class, id, action, params, timer).await?;
    let next = scheduled
        .timer
        .next_time
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    formatter::print_success(&format!("Scheduled {} ({}), next run {}.", scheduled.name, scheduled.timer.describe(), next));
    Ok(())
}

async fn cmd_tick(config: EngineConfig) -> Result<()> {
    let engine = open_engine(config).await?;
    let report = scheduler::tick(&engine, chrono::Utc::now()).await?;
    engine.tasks.wait_idle().await;
    if report.ran.is_empty() && report.failed.is_empty() {
        println!("{}", "Nothing due.".dimmed());
        return Ok(());
    }
    formatter::print_success(&format!("Ran {} scheduled operation(s).", report.ran.len()));
    for id in &report.failed {
        formatter::print_error(&format!("Scheduled operation {} failed.", id));
    }
    if !report.expired.is_empty() {
        println!("  {} expired.", report.expired.len().to_string().dimmed());
    }
    Ok(())
}

async fn cmd_classes(config: EngineConfig, format: &str) -> Result<()> {
    let engine = open_engine(config).await?;
    let cx = OpContext::system(&engine);
    let mut rows = Vec::new();
    for spec in engine.registry.classes() {
        rows.push(json!({
            "class": spec.keyword,
            "parent": spec.parent,
            "ownership": format!("{:?}", spec.ownership).to_lowercase(),
            "locality": format!("{:?}", spec.locality).to_lowercase(),
            "actions": service::actions(&cx, spec.keyword)?.join(" "),
        }));
    }
    println!("{}", format_rows(&rows, OutputFormat::parse(format))?);
    Ok(())
}

async fn cmd_netprep(config: EngineConfig, ips: &[String], expand: bool, format: &str) -> Result<()> {
    let mut addrs = Vec::with_capacity(ips.len());
    for ip in ips {
        let addr: Ipv4Addr = match ip.parse() {
            Ok(addr) => addr,
            Err(_) => bail!("Not an IPv4 address: '{}'", ip),
        };
        addrs.push(addr);
    }
    let octet = config.netprep.gateway_last_octet;
    let engine = open_engine(config).await?;
    let pool = netprep::pool_from_store(&engine).await?;
    let mut prep = NetPrep::new(pool, octet);
    let suggestions = if expand {
        prep.suggest(&addrs)
    } else {
        prep.suggest_hosts(&addrs)
    };
    let rows: Vec<Value> = suggestions
        .iter()
        .map(serde_json::to_value)
        .collect::<std::result::Result<_, _>>()?;
    println!("{}", format_rows(&rows, OutputFormat::parse(format))?);
    Ok(())
}
