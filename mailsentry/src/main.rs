// mailsentry/src/main.rs
//
// mailsentry: multi-detector phishing classification
//
// Three operational modes:
//   classify : read JSONL items, print one ensemble verdict (JSON) per line
//   eval     : score every strategy against a labeled CSV corpus
//   health   : probe every configured remote detector's /health
//
// Usage:
//   mailsentry --mode classify --path inbox.jsonl --config engine.json
//   mailsentry --mode eval --path emails.csv --limit 1000 --json
//   mailsentry --mode health --config engine.json

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mailsentry::config::DetectorConfig;
use mailsentry::detectors::RemoteDetector;
use mailsentry::eval::{self, report, Evaluator};
use mailsentry::{Engine, EngineConfig, EnsembleVerdict, Item};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "mailsentry",
    about   = "Multi-detector ensemble phishing classification",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "classify")]
    mode: Mode,

    #[arg(long, help = "Engine config (JSON); built-in rule detectors when omitted")]
    config: Option<PathBuf>,

    #[arg(long, default_value = "-",
          help = "Input: JSONL items (classify) or labeled CSV (eval); '-' = stdin")]
    path: PathBuf,

    #[arg(long, help = "Strategy to classify with (default: config default_strategy)")]
    strategy: Option<String>,

    #[arg(long, help = "Override overall_deadline_ms")]
    deadline_ms: Option<u64>,

    #[arg(long, help = "Emit the eval report as JSON instead of markdown")]
    json: bool,

    #[arg(long, help = "Evaluate only the first N dataset rows")]
    limit: Option<usize>,

    #[arg(long, default_value_t = eval::DEFAULT_CONCURRENCY, help = "Items in flight during eval")]
    concurrency: usize,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Classify, // JSONL in, verdict JSON lines out
    Eval,     // labeled CSV in, ranked strategy report out
    Health,   // readiness of remote detectors
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = cli.deadline_ms {
        cfg.overall_deadline_ms = ms;
    }
    Ok(cfg)
}

// ── Modes ─────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Classified<'a> {
    line: usize,
    digest: String,
    #[serde(flatten)]
    verdict: &'a EnsembleVerdict,
}

async fn classify(cli: &Cli, engine: &Engine) -> Result<()> {
    let strategy = cli.strategy.as_deref().unwrap_or(engine.default_strategy());
    engine.registry().get(strategy)?;

    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = if cli.path.as_os_str() == "-" {
        Box::new(tokio::io::stdin())
    } else {
        Box::new(tokio::fs::File::open(&cli.path).await.with_context(|| format!("opening {}", cli.path.display()))?)
    };
    let mut lines = BufReader::new(reader).lines();

    let (mut n, mut positives) = (0usize, 0usize);
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let item: Item = match serde_json::from_str(line) {
            Ok(item) => item,
            Err(e) => {
                warn!("line {}: not an item: {}", line_no, e);
                continue;
            }
        };
        let verdict = engine.dispatch_with(&item, strategy).await?;
        n += 1;
        positives += verdict.is_positive as usize;
        let out = Classified { line: line_no, digest: item.digest(), verdict: &verdict };
        println!("{}", serde_json::to_string(&out)?);
    }
    info!(items = n, positives, strategy, "classify complete");
    Ok(())
}

async fn evaluate(cli: &Cli, engine: &Engine) -> Result<()> {
    if cli.path.as_os_str() == "-" {
        bail!("eval mode needs --path <dataset.csv>");
    }
    let mut items = eval::dataset::load(&cli.path)?;
    if let Some(limit) = cli.limit {
        items.truncate(limit);
    }
    info!("Evaluating {} items across {} strategies", items.len(), engine.registry().names().len());

    let result = Evaluator::new(engine).with_concurrency(cli.concurrency).evaluate(items).await;
    if cli.json {
        println!("{}", report::to_json(&result)?);
    } else {
        report::print_markdown(&result);
    }
    Ok(())
}

async fn health(cfg: &EngineConfig) -> Result<()> {
    let timeout = cfg.per_call_timeout()?;
    let mut down = 0usize;
    let mut probed = 0usize;
    for d in &cfg.detectors {
        let DetectorConfig::Remote { name, endpoint, timeout_ms } = d else { continue };
        probed += 1;
        let remote = RemoteDetector::new(name.clone(), endpoint.clone(), timeout_ms.map(Duration::from_millis).unwrap_or(timeout))?;
        match remote.health().await {
            Ok(()) => println!("  \x1b[92mUP\x1b[0m    {} ({})", name, remote.endpoint()),
            Err(e) => {
                down += 1;
                println!("  \x1b[91mDOWN\x1b[0m  {} ({}): {}", name, remote.endpoint(), e);
            }
        }
    }
    if probed == 0 {
        println!("  no remote detectors configured");
    }
    if down > 0 {
        bail!("{} of {} remote detectors unhealthy", down, probed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env()
            .add_directive("mailsentry=info".parse()?))
        .with_writer(std::io::stderr)
        .compact().init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;

    if let Mode::Health = cli.mode {
        return health(&cfg).await;
    }

    let engine = match Engine::from_config(&cfg) {
        Ok(e) => e,
        Err(e) => {
            error!("engine configuration rejected: {}", e);
            return Err(e.into());
        }
    };

    match cli.mode {
        Mode::Classify => classify(&cli, &engine).await,
        Mode::Eval => evaluate(&cli, &engine).await,
        Mode::Health => Ok(()),
    }
}
