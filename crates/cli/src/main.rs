use clap::{Parser, Subcommand};
use invoke::channels::InboundMessage;
use invoke::config::{Config, DatastoreBackend};
use invoke::gateway::InvokeResponse;
use invoke::store::{Datastore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;

/// Dashboard refresh interval for `metrics --watch`.
const METRICS_REFRESH: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "invoke")]
#[command(about = "Invoke waitlist gateway CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: INVOKE_CONFIG_PATH or ~/.invoke/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (intake API, SMS webhook, events, waitlist, admin).
    Serve {
        /// Config file path (default: INVOKE_CONFIG_PATH or ~/.invoke/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,

        /// Use the in-memory datastore instead of PostgREST.
        #[arg(long)]
        memory: bool,
    },

    /// Chat with the intake flow as a phone number (interactive).
    Chat {
        /// Sender phone number.
        #[arg(long, value_name = "PHONE")]
        phone: String,

        /// Channel recorded with each message.
        #[arg(long, default_value = "web")]
        channel: String,

        /// Config file path (default: INVOKE_CONFIG_PATH or ~/.invoke/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Run turns in process against the configured datastore instead of a running gateway.
        #[arg(long)]
        local: bool,
    },

    /// Print the admin metrics snapshot from a running gateway.
    Metrics {
        /// Config file path (default: INVOKE_CONFIG_PATH or ~/.invoke/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Refresh every 60 seconds until interrupted.
        #[arg(long)]
        watch: bool,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("invoke {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port, memory }) => {
            if let Err(e) = run_serve(config, port, memory).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Chat {
            phone,
            channel,
            config,
            local,
        }) => {
            if let Err(e) = run_chat(config, phone, channel, local).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Metrics { config, watch }) => {
            if let Err(e) = run_metrics(config, watch).await {
                log::error!("metrics failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(invoke::config::default_config_path);
    let dir = invoke::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
    memory: bool,
) -> anyhow::Result<()> {
    let (mut config, path) = invoke::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    if memory {
        config.datastore.backend = DatastoreBackend::Memory;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    invoke::gateway::run_gateway(config, path).await
}

/// Base URL for talking to the local gateway; a wildcard bind is reached over loopback.
fn gateway_base_url(config: &Config) -> String {
    let bind = config.gateway.bind.trim();
    let host = match bind {
        "0.0.0.0" | "::" | "" => "127.0.0.1",
        other => other,
    };
    format!("http://{}:{}", host, config.gateway.port)
}

/// Where chat turns are executed.
enum ChatTarget {
    Gateway { client: reqwest::Client, url: String },
    Local(Arc<dyn Datastore>),
}

impl ChatTarget {
    async fn turn(&self, phone: &str, channel: &str, text: &str) -> anyhow::Result<InvokeResponse> {
        match self {
            ChatTarget::Gateway { client, url } => {
                let resp = client
                    .post(url)
                    .json(&serde_json::json!({ "from": phone, "body": text, "channel": channel }))
                    .send()
                    .await?;
                let status = resp.status();
                if !status.is_success() {
                    let body: serde_json::Value = resp.json().await.unwrap_or_default();
                    let err = body
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("request failed");
                    anyhow::bail!("{} ({})", err, status);
                }
                Ok(resp.json().await?)
            }
            ChatTarget::Local(store) => {
                let turn = invoke::conversation::handle_inbound(
                    store.as_ref(),
                    InboundMessage::new(channel, phone, text),
                )
                .await?;
                Ok(InvokeResponse {
                    success: true,
                    reply: turn.reply.reply,
                    state: turn.reply.state,
                    category: turn.reply.category,
                })
            }
        }
    }
}

async fn run_chat(
    config_path: Option<std::path::PathBuf>,
    phone: String,
    channel: String,
    local: bool,
) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let (config, _) = invoke::config::load_config(config_path)?;
    let target = if local {
        let store = invoke::gateway::open_datastore(&config).unwrap_or_else(|| {
            log::warn!("no datastore configured; chatting against an in-memory store");
            let fallback: Arc<dyn Datastore> = Arc::new(MemoryStore::new());
            fallback
        });
        ChatTarget::Local(store)
    } else {
        ChatTarget::Gateway {
            client: reqwest::Client::new(),
            url: format!("{}/api/invoke", gateway_base_url(&config)),
        }
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match target.turn(&phone, &channel, input).await {
            Ok(reply) => {
                println!("< {}", reply.reply.trim());
                let mut status = format!("  [{}", reply.state.step.as_str());
                if let Some(category) = reply.category {
                    status.push_str(&format!(", interest: {}", category.label()));
                }
                println!("{}]", status);
            }
            Err(e) => {
                eprintln!("chat error: {:#}", e);
            }
        }
    }

    Ok(())
}

async fn fetch_metrics(
    client: &reqwest::Client,
    url: &str,
    admin: Option<&invoke::config::AdminCredentials>,
) -> anyhow::Result<serde_json::Value> {
    let mut req = client.get(url);
    if let Some(creds) = admin {
        req = req.basic_auth(&creds.user, Some(&creds.pass));
    }
    let resp = req.send().await?;
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        anyhow::bail!("admin credentials rejected (set ADMIN_USER and ADMIN_PASS)");
    }
    if !status.is_success() {
        anyhow::bail!("metrics request failed ({})", status);
    }
    let body: serde_json::Value = resp.json().await?;
    body.get("metrics")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("response has no metrics"))
}

/// Dashboard text for a flat metrics snapshot (`h24`, `visitors24h`, `cost7d`, ...).
fn format_metrics(metrics: &serde_json::Value) -> String {
    use std::fmt::Write;

    let field = |key: &str| metrics.get(key).cloned().unwrap_or(serde_json::Value::Null);
    let generated = metrics.get("generatedAt").and_then(|v| v.as_str()).unwrap_or("-");
    let mut out = format!("metrics at {}\n", generated);
    for (boundary, suffix) in [("h24", "24h"), ("d7", "7d"), ("d30", "30d")] {
        if metrics.get(boundary).is_none() {
            continue;
        }
        let _ = write!(
            out,
            "  {:>3}  visitors {}  new {}  consented {}  invokes {}  errors {}  tokens {}  cost {}",
            suffix,
            field(format!("visitors{}", suffix).as_str()),
            field(format!("newUsers{}", suffix).as_str()),
            field(format!("consented{}", suffix).as_str()),
            field(format!("invokes{}", suffix).as_str()),
            field(format!("errors{}", suffix).as_str()),
            field(format!("tokens{}", suffix).as_str()),
            field(format!("cost{}", suffix).as_str()),
        );
        if let Some(rate) = metrics.get(format!("returningRate{}", suffix).as_str()) {
            let _ = write!(
                out,
                "  returning {} ({}%)",
                field(format!("returningUsers{}", suffix).as_str()),
                rate
            );
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "  active sessions {}  latency p50 {}  p95 {}",
        field("activeSessions"),
        field("latencyP50"),
        field("latencyP95"),
    );
    if let Some(agents) = metrics.get("topAgents").and_then(|v| v.as_array()) {
        for a in agents {
            let name = a
                .get("agent")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("unknown");
            let count = a.get("count").cloned().unwrap_or(serde_json::Value::Null);
            let _ = writeln!(out, "  agent {}: {}", name, count);
        }
    }
    out
}

async fn run_metrics(config_path: Option<std::path::PathBuf>, watch: bool) -> anyhow::Result<()> {
    let (config, _) = invoke::config::load_config(config_path)?;
    let admin = invoke::config::resolve_admin_credentials(&config);
    let url = format!("{}/api/admin/metrics", gateway_base_url(&config));
    let client = reqwest::Client::new();

    loop {
        match fetch_metrics(&client, &url, admin.as_ref()).await {
            Ok(metrics) => print!("{}", format_metrics(&metrics)),
            Err(e) if watch => eprintln!("metrics error: {:#}", e),
            Err(e) => return Err(e),
        }
        if !watch {
            return Ok(());
        }
        tokio::time::sleep(METRICS_REFRESH).await;
    }
}
