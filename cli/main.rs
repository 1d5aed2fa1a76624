#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Parser, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use std::process;

use virpred::config::PipelineConfig;
use virpred::enrich::genesets::GeneSetSource;
use virpred::pipeline::{self, RunSummary};
use virpred::types::ExpressionFormat;

#[derive(Clone, Copy, ValueEnum)]
enum FormatCli {
    /// Normalized, continuous expression values
    #[value(name = "Normalize")]
    Normalize,
    /// Raw read counts
    #[value(name = "Counts")]
    Counts,
}

impl From<FormatCli> for ExpressionFormat {
    fn from(value: FormatCli) -> Self {
        match value {
            FormatCli::Normalize => ExpressionFormat::Normalize,
            FormatCli::Counts => ExpressionFormat::Counts,
        }
    }
}

#[derive(Parser)]
#[command(
    name = "virpred",
    version,
    about = "Predict influenza virulence from host gene expression",
    long_about = "Scores host expression profiles against reference gene sets and classifies \
                 each sample as Virulent or Avirulent with a kernel classifier trained on a \
                 labelled reference cohort."
)]
struct Cli {
    /// Expression matrix: genes as rows, samples as columns (tab or comma separated)
    #[arg(short, long, value_name = "FILE", required_unless_present = "build_info")]
    input: Option<PathBuf>,

    /// How the expression values were produced [default: Normalize]
    #[arg(short, long, value_enum, ignore_case = true)]
    format: Option<FormatCli>,

    /// Directory for the report; created if missing [default: .]
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Report file name prefix [default: VirPred_results]
    #[arg(short, long)]
    prefix: Option<String>,

    /// Labelled reference training dataset (CSV)
    #[arg(long, value_name = "FILE")]
    reference: Option<PathBuf>,

    /// Local GMT gene-set file; skips the MSigDB download
    #[arg(long, value_name = "FILE")]
    gene_sets: Option<PathBuf>,

    /// Pre-fit classifier used when every reference feature is available
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Save the classifier used for prediction to this TOML file
    #[arg(long, value_name = "FILE")]
    save_model: Option<PathBuf>,

    /// Worker threads for scoring and prediction
    #[arg(long, value_name = "N")]
    threads: Option<usize>,

    /// Samples per prediction task
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// TOML configuration file; command-line flags take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Display version and build information
    #[arg(long)]
    build_info: bool,
}

impl Cli {
    /// Configuration file (or defaults) with command-line overrides applied.
    fn into_config(self) -> Result<PipelineConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(input) = self.input {
            config.input = input;
        }
        if let Some(format) = self.format {
            config.format = format.into();
        }
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if let Some(prefix) = self.prefix {
            config.prefix = prefix;
        }
        if let Some(reference) = self.reference {
            config.reference_dataset = reference;
        }
        if let Some(path) = self.gene_sets {
            config.gene_sets = GeneSetSource::Local { path };
        }
        if let Some(model) = self.model {
            config.pretrained_model = Some(model);
        }
        if let Some(path) = self.save_model {
            config.save_model = Some(path);
        }
        if let Some(threads) = self.threads {
            config.workers.threads = threads;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.workers.chunk_size = chunk_size;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    if cli.build_info {
        print_build_info();
        return;
    }

    match run(cli) {
        Ok(summary) => println!("{summary}"),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<RunSummary, Box<dyn Error>> {
    let config = cli.into_config()?;
    eprintln!(
        "> Predicting virulence for '{}' ({} mode)",
        config.input.display(),
        config.format
    );
    Ok(pipeline::run(&config)?)
}

fn print_build_info() {
    println!("virpred {}", env!("CARGO_PKG_VERSION"));
    let build_timestamp: i64 = env!("VIRPRED_BUILD_TIMESTAMP").parse().unwrap_or(0);
    match chrono::DateTime::from_timestamp(build_timestamp, 0) {
        Some(built) if build_timestamp > 0 => {
            println!("Built: {}", built.format("%Y-%m-%d %H:%M:%S UTC"))
        }
        _ => println!("Built: unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_defaults() {
        let cli = Cli::try_parse_from([
            "virpred", "-i", "expr.tsv", "-f", "counts", "-o", "out", "-p", "cohort",
            "--gene-sets", "sets.gmt", "--threads", "2",
        ])
        .unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.input, PathBuf::from("expr.tsv"));
        assert_eq!(config.format, ExpressionFormat::Counts);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.prefix, "cohort");
        assert_eq!(
            config.gene_sets,
            GeneSetSource::Local {
                path: PathBuf::from("sets.gmt")
            }
        );
        assert_eq!(config.workers.threads, 2);
    }

    #[test]
    fn input_is_required() {
        assert!(Cli::try_parse_from(["virpred", "-f", "Normalize"]).is_err());
        assert!(Cli::try_parse_from(["virpred", "--build-info"]).is_ok());
    }

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::try_parse_from(["virpred", "--input", "expr.tsv"]).unwrap();
        let config = cli.into_config().unwrap();
        assert_eq!(config.format, ExpressionFormat::Normalize);
        assert_eq!(config.output_dir, PathBuf::from("."));
        assert_eq!(config.prefix, "VirPred_results");
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["virpred", "-i", "x", "-f", "TPM"]).is_err());
    }
}
