//! Species identification CLI
//!
//! Operator tooling: inspect the artifact store, import trained weights,
//! run offline predictions, build the reference embedding index and query
//! a running server.

#![allow(clippy::print_stdout)]

mod offline;

use std::path::PathBuf;

use ai_vision::DistanceMetric;
use clap::{Parser, Subcommand, ValueEnum};
use infrastructure::ArtifactReport;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_URL: &str = "http://localhost:8000";

/// Species identification CLI
#[derive(Debug, Parser)]
#[command(name = "species-cli")]
#[command(author, version, about = "Species identification service CLI", long_about = None)]
struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (defaults to ./config.toml plus SPECIES_* variables)
    #[arg(short, long, global = true, env = "SPECIES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarise checkpoint, class mapping and embedding index
    Inspect {
        /// Artifact directory (overrides artifacts.model_dir)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Predict the species in an image without a server
    Predict {
        /// Image file
        image: PathBuf,

        /// Artifact directory (overrides artifacts.model_dir)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Number of predictions to return
        #[arg(short = 'k', long, allow_negative_numbers = true)]
        top_k: Option<i64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Embed every image in a directory and write the similarity index
    ///
    /// Image ids are the file stems. Writes embeddings.index and
    /// embedding_mapping.json into the artifact directory.
    BuildIndex {
        /// Directory of reference images
        image_dir: PathBuf,

        /// Artifact directory (overrides artifacts.model_dir)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Distance metric stored in the index
        #[arg(long, value_enum, default_value_t = MetricArg::SquaredL2)]
        metric: MetricArg,
    },

    /// Serve a `.pth` file saved by the PyTorch training script
    ///
    /// Writes species_classifier.json pointing at the weights, with the
    /// class mapping read from the class_mapping.json next to them.
    ImportWeights {
        /// PyTorch checkpoint (`torch.save` with `model_state_dict`)
        weights: PathBuf,

        /// Artifact directory (overrides artifacts.model_dir)
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Write the manifest without loading the weights once
        #[arg(long)]
        no_verify: bool,
    },

    /// Print the serving status of a running server
    Status {
        /// Server URL
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },

    /// Check server readiness (exit code 0 when a model is loaded)
    Health {
        /// Server URL
        #[arg(short, long, default_value = DEFAULT_URL)]
        url: String,
    },
}

/// Index metric as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MetricArg {
    #[value(name = "squared_l2", alias = "squared-l2")]
    SquaredL2,
    #[value(name = "l2")]
    L2,
}

impl From<MetricArg> for DistanceMetric {
    fn from(metric: MetricArg) -> Self {
        match metric {
            MetricArg::SquaredL2 => Self::SquaredL2,
            MetricArg::L2 => Self::L2,
        }
    }
}

/// Determine log filter level from verbosity count
const fn log_filter_from_verbosity(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Format endpoint URL
fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim_end_matches('/'))
}

fn print_report(report: &ArtifactReport) {
    println!("📦 Artifact store: {}", report.model_dir);

    match (&report.checkpoint, &report.checkpoint_error) {
        (Some(ckpt), _) => {
            println!("   🧠 Checkpoint: {}", ckpt.path);
            println!(
                "      {} classes, embedding size {}, input {}px, stages {:?} × {}",
                ckpt.num_classes,
                ckpt.embedding_size,
                ckpt.input_size,
                ckpt.stage_blocks,
                ckpt.base_width
            );
            if ckpt.weights_present {
                println!("      weights ({}): {}", ckpt.weights_format, ckpt.weights);
            } else {
                println!("   ❌ Weights missing: {}", ckpt.weights);
            }
        },
        (None, Some(err)) => println!("   ❌ Checkpoint: {err}"),
        (None, None) => println!("   ⚠️  Checkpoint: not found"),
    }

    match report.class_mapping_consistent {
        Some(true) => println!("   ✅ Side-car class mapping matches the checkpoint"),
        Some(false) => println!("   ⚠️  Side-car class mapping differs, the checkpoint wins"),
        None => println!("   ➖ No side-car class mapping"),
    }

    match (&report.index, &report.index_error) {
        (Some(index), _) => {
            println!("   🔎 Index: {}", index.path);
            println!(
                "      {} vectors, dimension {}, metric {}, {} image ids",
                index.vectors, index.dimension, index.metric, index.image_ids
            );
            if index.vectors != index.image_ids {
                println!("   ⚠️  Vector count and id count differ");
            }
        },
        (None, Some(err)) => println!("   ❌ Index: {err}"),
        (None, None) => println!("   ➖ No embedding index, similarity search disabled"),
    }

    if report.is_servable() {
        println!("✅ Servable");
    } else {
        println!("❌ Not servable");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = log_filter_from_verbosity(cli.verbose);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Inspect { model_dir, json } => {
            let config = offline::load_config(config_path, model_dir);
            let report = offline::inspect(&config);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            if !report.is_servable() {
                std::process::exit(1);
            }
        },

        Commands::Predict {
            image,
            model_dir,
            top_k,
            json,
        } => {
            let config = offline::load_config(config_path, model_dir);
            let result = offline::predict_file(&config, &image, top_k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("🔬 {}", image.display());
                for (rank, prediction) in result.predictions().iter().enumerate() {
                    println!(
                        "   {}. {:<40} {:>6.2}%",
                        rank + 1,
                        prediction.label.display_name(),
                        prediction.probability_percent()
                    );
                }
            }
        },

        Commands::BuildIndex {
            image_dir,
            model_dir,
            metric,
        } => {
            let config = offline::load_config(config_path, model_dir);
            println!("🏗️  Embedding images in {}", image_dir.display());

            let report = offline::build_index(&config, image_dir, metric.into()).await?;

            println!(
                "✅ Indexed {} images (dimension {}, metric {})",
                report.indexed, report.dimension, report.metric
            );
            println!("   📁 Index: {}", report.index_path.display());
            println!("   📁 Mapping: {}", report.mapping_path.display());
            if !report.skipped.is_empty() {
                println!("   ⚠️  Skipped {} file(s):", report.skipped.len());
                for (file, reason) in &report.skipped {
                    println!("      {file}: {reason}");
                }
            }
        },

        Commands::ImportWeights {
            weights,
            model_dir,
            no_verify,
        } => {
            let config = offline::load_config(config_path, model_dir);
            let checkpoint = tokio::task::spawn_blocking(move || {
                offline::import_weights(&config, &weights, !no_verify)
            })
            .await??;
            println!(
                "✅ Imported {} ({} classes)",
                checkpoint.weights_path().display(),
                checkpoint.num_classes
            );
        },

        Commands::Status { url } => {
            let resp = reqwest::Client::new()
                .get(endpoint_url(&url, "/ready"))
                .send()
                .await?
                .json::<serde_json::Value>()
                .await?;

            println!("📊 Serving Status:");
            println!("{}", serde_json::to_string_pretty(&resp)?);
        },

        Commands::Health { url } => {
            match reqwest::Client::new()
                .get(endpoint_url(&url, "/ready"))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    println!("✅ Healthy");
                },
                Ok(resp) => {
                    println!("❌ Unhealthy: HTTP {}", resp.status());
                    std::process::exit(1);
                },
                Err(e) => {
                    println!("❌ Unhealthy: {e}");
                    std::process::exit(1);
                },
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn log_filter_follows_verbosity() {
        assert_eq!(log_filter_from_verbosity(0), "warn");
        assert_eq!(log_filter_from_verbosity(1), "info");
        assert_eq!(log_filter_from_verbosity(2), "debug");
        assert_eq!(log_filter_from_verbosity(10), "trace");
    }

    #[test]
    fn endpoint_url_joins_without_double_slash() {
        assert_eq!(
            endpoint_url("http://localhost:8000", "/ready"),
            "http://localhost:8000/ready"
        );
        assert_eq!(
            endpoint_url("http://example.com/", "/ready"),
            "http://example.com/ready"
        );
    }

    #[test]
    fn parses_predict_with_negative_top_k() {
        let cli = parse(&["species-cli", "predict", "owl.jpg", "--top-k", "-1"]).unwrap();
        let Commands::Predict { image, top_k, .. } = cli.command else {
            unreachable!("expected predict");
        };
        assert_eq!(image, PathBuf::from("owl.jpg"));
        assert_eq!(top_k, Some(-1));
    }

    #[test]
    fn build_index_metric_defaults_to_squared_l2() {
        let cli = parse(&["species-cli", "build-index", "refs/"]).unwrap();
        let Commands::BuildIndex { metric, .. } = cli.command else {
            unreachable!("expected build-index");
        };
        assert_eq!(DistanceMetric::from(metric), DistanceMetric::SquaredL2);
    }

    #[test]
    fn build_index_accepts_l2() {
        let cli = parse(&["species-cli", "build-index", "refs/", "--metric", "l2"]).unwrap();
        let Commands::BuildIndex { metric, .. } = cli.command else {
            unreachable!("expected build-index");
        };
        assert_eq!(DistanceMetric::from(metric), DistanceMetric::L2);
    }

    #[test]
    fn unknown_metric_is_rejected() {
        assert!(parse(&["species-cli", "build-index", "refs/", "--metric", "cosine"]).is_err());
    }

    #[test]
    fn inspect_takes_model_dir_and_global_config() {
        let cli = parse(&[
            "species-cli",
            "inspect",
            "--model-dir",
            "/srv/models",
            "--config",
            "prod.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("prod.toml")));
        let Commands::Inspect { model_dir, json } = cli.command else {
            unreachable!("expected inspect");
        };
        assert_eq!(model_dir, Some(PathBuf::from("/srv/models")));
        assert!(!json);
    }

    #[test]
    fn import_weights_verifies_by_default() {
        let cli = parse(&["species-cli", "import-weights", "model.pth"]).unwrap();
        let Commands::ImportWeights {
            weights, no_verify, ..
        } = cli.command
        else {
            unreachable!("expected import-weights");
        };
        assert_eq!(weights, PathBuf::from("model.pth"));
        assert!(!no_verify);
    }

    #[test]
    fn health_uses_default_url() {
        let cli = parse(&["species-cli", "health"]).unwrap();
        let Commands::Health { url } = cli.command else {
            unreachable!("expected health");
        };
        assert_eq!(url, DEFAULT_URL);
    }
}
