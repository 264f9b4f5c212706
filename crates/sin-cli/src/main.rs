use anyhow::{bail, Context};
use clap::Parser;
use sin_core::{
    render_sparkline, Config, Dataset, EmbeddingBackend, Metrics, ModelRegistry, TrainingLog,
};
use sin_manifest::{validate_requirements_txt, MarkerEnvironment};
use sin_semantic::{embedder_from_config, Sin};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sin")]
#[command(version, about = "Conversational assistant that learns from your dialogues", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "SIN_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding models, conversations, logs and memory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use the offline hashing embedder instead of a downloaded model
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Validate a requirements.txt-style dependency manifest
    Check {
        /// Manifest file
        file: PathBuf,
        /// Also list the requirements that apply to this Python version
        #[arg(long)]
        python_version: Option<String>,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Talk to Sin (interactive when no message is given)
    Chat {
        /// Single message to answer
        message: Option<String>,
    },
    /// Train on every file in the conversations folder
    Train {
        /// Number of epochs (defaults to the config value)
        #[arg(long)]
        epochs: Option<u32>,
        /// Validation dataset (.json or .txt)
        #[arg(long)]
        validation: Option<PathBuf>,
    },
    /// Score the working model on a dataset
    Evaluate {
        /// Dataset file (.json or .txt)
        file: PathBuf,
        /// Number of pairs to evaluate
        #[arg(long)]
        sample_size: Option<usize>,
    },
    /// List saved model snapshots, newest first
    Models,
    /// Save the working model as a snapshot
    SaveModel {
        /// Snapshot name (timestamped when omitted)
        name: Option<String>,
    },
    /// Compare snapshots on a dataset
    Compare {
        /// Snapshot files or names in the models folder
        #[arg(required = true)]
        snapshots: Vec<PathBuf>,
        /// Dataset file (.json or .txt)
        #[arg(long)]
        dataset: PathBuf,
    },
    /// Show the log of the last training run
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging - helps when things go sideways
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sin=info,sin_core=info,sin_semantic=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("No command specified. Try --help");
            return Ok(());
        }
    };

    match command {
        Commands::Check {
            file,
            python_version,
            json,
        } => check(&file, python_version.as_deref(), json),
        command => {
            let config = load_config(cli.config.as_deref(), cli.data_dir, cli.offline)?;
            let embedder = embedder_from_config(&config.semantic);
            tracing::debug!("Data directory: {}", config.storage.data_dir.display());
            let mut sin = Sin::open(config, embedder).context("Failed to start Sin")?;
            run(&mut sin, command).await
        }
    }
}

async fn run(sin: &mut Sin, command: Commands) -> anyhow::Result<()> {
    match command {
        // Manifest checks run in `main` without starting Sin
        Commands::Check { .. } => unreachable!("check is dispatched before Sin starts"),
        Commands::Chat { message: Some(message) } => {
            println!("{}", sin.chat(&message).await);
        }
        Commands::Chat { message: None } => repl(sin).await?,
        Commands::Train { epochs, validation } => {
            let epochs = epochs.unwrap_or(sin.config().training.epochs);
            let validation = validation
                .map(|path| load_dataset(&path))
                .transpose()?;

            let log = sin.train(epochs, validation.as_ref()).await?;
            print_log(&log);
        }
        Commands::Evaluate { file, sample_size } => {
            let dataset = load_dataset(&file)?;
            let sample_size = sample_size.unwrap_or(sin.config().training.eval_sample_size);
            let metrics = sin.evaluate(&dataset, sample_size).await?;
            print_metrics(&metrics, "");
        }
        Commands::Models => {
            let models = sin.list_models()?;
            if models.is_empty() {
                println!("No saved models");
            }
            for name in models {
                println!("{}", name);
            }
        }
        Commands::SaveModel { name } => {
            let path = sin.save_model(name.as_deref())?;
            println!("Model saved to {}", path.display());
        }
        Commands::Compare { snapshots, dataset } => {
            let dataset = load_dataset(&dataset)?;
            let models_dir = sin.config().storage.models_dir();
            let paths = snapshots
                .iter()
                .map(|s| resolve_snapshot(&models_dir, s))
                .collect::<anyhow::Result<Vec<_>>>()?;

            for result in sin.compare_models(&paths, &dataset).await? {
                println!("{}", result.name);
                print_metrics(&result.metrics, "  ");
                if let Some(improvement) = &result.improvement {
                    println!("  improvement:");
                    print_metrics(improvement, "    ");
                }
            }
        }
        Commands::Report => match sin.training_report()? {
            Some(log) => print_log(&log),
            None => println!("No training report yet"),
        },
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    data_dir: Option<PathBuf>,
    offline: bool,
) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if let Some(data_dir) = data_dir {
        config.storage.data_dir = data_dir;
    }
    if offline {
        config.semantic.backend = EmbeddingBackend::Hashing;
    }
    Ok(config)
}

fn load_dataset(path: &Path) -> anyhow::Result<Dataset> {
    Dataset::load_file(path).with_context(|| format!("Failed to load dataset {}", path.display()))
}

/// A snapshot argument is either an existing path or a name inside the models folder
fn resolve_snapshot(models_dir: &Path, arg: &Path) -> anyhow::Result<PathBuf> {
    if arg.exists() {
        return Ok(arg.to_path_buf());
    }

    let name = arg.to_string_lossy();
    let path = models_dir.join(ModelRegistry::snapshot_name(Some(name.as_ref()))?);
    if !path.exists() {
        bail!("Snapshot not found: {}", arg.display());
    }
    Ok(path)
}

fn check(file: &Path, python_version: Option<&str>, json: bool) -> anyhow::Result<()> {
    tracing::info!("Checking manifest: {}", file.display());
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let report = validate_requirements_txt(&content);

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_json())?);
    } else {
        let summary = report.manifest.summary();
        println!(
            "{}: {} packages ({} pinned, {} ranged, {} unconstrained, {} with markers)",
            file.display(),
            summary.total_count,
            summary.pinned_count,
            summary.ranged_count,
            summary.unconstrained_count,
            summary.marker_count
        );
        for issue in &report.issues {
            println!("  error: {}", issue.error);
        }

        if let Some(version) = python_version {
            let env = MarkerEnvironment::for_python(version);
            println!("Applies to Python {}:", version);
            for requirement in report.manifest.applicable(&env) {
                println!("  {}", requirement);
            }
        }
    }

    if !report.is_valid() {
        bail!("{} problem(s) found in {}", report.issues.len(), file.display());
    }
    Ok(())
}

async fn repl(sin: &mut Sin) -> anyhow::Result<()> {
    println!("Talk to Sin. Type /quit to leave.");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }

        let reply = sin.chat(line).await;
        stdout.write_all(format!("Sin: {}\n", reply).as_bytes()).await?;
    }

    Ok(())
}

fn print_metrics(metrics: &Metrics, indent: &str) {
    if metrics.is_empty() {
        println!("{}(no samples)", indent);
    }
    for (name, value) in metrics {
        println!("{}{:<12} {:+.4}", indent, name, value);
    }
}

fn print_log(log: &TrainingLog) {
    println!("{:>5}  {:>12}  {:>10}", "epoch", "train loss", "val loss");
    for (i, epoch) in log.epochs.iter().enumerate() {
        let val_loss = log
            .val_loss
            .get(i)
            .map(|v| format!("{:.4}", v))
            .unwrap_or_else(|| "-".to_string());
        let train_loss = log.train_loss.get(i).copied().unwrap_or_default();
        println!("{:>5}  {:>12.4}  {:>10}", epoch, train_loss, val_loss);
    }

    println!();
    println!("train loss  {}", render_sparkline(&log.train_loss));
    if let Some(best) = log.best_epoch("accuracy") {
        println!("best epoch  {} (accuracy)", best);
    }
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
    fn test_parse_global_flags() {
        let cli = Cli::parse_from([
            "sin", "--offline", "--data-dir", "/tmp/sin", "train", "--epochs", "2",
        ]);
        assert!(cli.offline);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/sin")));
        assert!(matches!(
            cli.command,
            Some(Commands::Train { epochs: Some(2), validation: None })
        ));
    }

    #[test]
    fn test_load_config_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[training]\nepochs = 9\n").unwrap();

        let config = load_config(Some(&path), Some(dir.path().join("data")), true).unwrap();
        assert_eq!(config.training.epochs, 9);
        assert_eq!(config.storage.data_dir, dir.path().join("data"));
        assert_eq!(config.semantic.backend, EmbeddingBackend::Hashing);
    }

    #[test]
    fn test_check_reports_problems() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.txt");
        std::fs::write(&good, "requests>=2.0\ntomli; python_version < \"3.11\"\n").unwrap();
        assert!(check(&good, Some("3.10"), false).is_ok());

        let bad = dir.path().join("bad.txt");
        std::fs::write(&bad, "requests>=2.0\nrequests==2.1\n").unwrap();
        assert!(check(&bad, None, true).is_err());
    }

    #[test]
    fn test_resolve_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("best.sinmodel"), b"").unwrap();

        let resolved = resolve_snapshot(dir.path(), Path::new("best")).unwrap();
        assert_eq!(resolved, dir.path().join("best.sinmodel"));
        assert!(resolve_snapshot(dir.path(), Path::new("missing")).is_err());
    }
}
