use std::fs;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use retort::{ReteNetwork, Variant, parse_ontology};

#[derive(Debug, Parser)]
#[command(name = "retort")]
#[command(about = "Incremental OWL RL reasoner with REQL queries")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SyntaxVariant {
    Ascii,
    Dl,
}

impl From<SyntaxVariant> for Variant {
    fn from(value: SyntaxVariant) -> Self {
        match value {
            SyntaxVariant::Ascii => Variant::Ascii,
            SyntaxVariant::Dl => Variant::Dl,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse an ontology file and report diagnostics.
    Check {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "ascii")]
        variant: SyntaxVariant,
    },
    /// Load an ontology and run a REQL query against the closure.
    Query {
        file: PathBuf,
        reql: String,
        #[arg(long, value_enum, default_value = "ascii")]
        variant: SyntaxVariant,
        #[arg(long, default_value_t = 0)]
        timeout_ms: u64,
    },
    /// Load an ontology and print network statistics.
    Stats {
        file: PathBuf,
        #[arg(long, value_enum, default_value = "ascii")]
        variant: SyntaxVariant,
    },
    /// Load an ontology and write a binary snapshot of the network.
    Snapshot {
        file: PathBuf,
        out: PathBuf,
        #[arg(long, value_enum, default_value = "ascii")]
        variant: SyntaxVariant,
    },
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Check { file, variant } => run_check(&file, variant.into()),
        Command::Query {
            file,
            reql,
            variant,
            timeout_ms,
        } => run_query(&file, &reql, variant.into(), timeout_ms),
        Command::Stats { file, variant } => run_stats(&file, variant.into()),
        Command::Snapshot { file, out, variant } => run_snapshot(&file, &out, variant.into()),
    };
    std::process::exit(exit_code);
}

fn read_file(file: &PathBuf) -> Result<String, i32> {
    fs::read_to_string(file).map_err(|err| {
        eprintln!("E-IO: failed to read {}: {}", file.display(), err);
        1
    })
}

fn load_network(file: &PathBuf, variant: Variant) -> Result<ReteNetwork, i32> {
    let src = read_file(file)?;
    let mut net = ReteNetwork::new();
    let source_id = file.display().to_string();
    match net.add_source(&src, &source_id, variant) {
        Ok(_) => Ok(net),
        Err(diags) => {
            for d in diags {
                eprintln!("{d}");
            }
            Err(1)
        }
    }
}

fn run_check(file: &PathBuf, variant: Variant) -> i32 {
    let src = match read_file(file) {
        Ok(src) => src,
        Err(code) => return code,
    };
    match parse_ontology(&src, variant) {
        Ok(doc) => {
            println!("ok: {} facts, {} rules", doc.facts.len(), doc.rules.len());
            0
        }
        Err(diags) => {
            for d in diags {
                eprintln!("{d}");
            }
            1
        }
    }
}

fn run_query(file: &PathBuf, reql: &str, variant: Variant, timeout_ms: u64) -> i32 {
    let net = match load_network(file, variant) {
        Ok(net) => net,
        Err(code) => return code,
    };
    match net.reql(reql, timeout_ms) {
        Ok(table) => {
            match serde_json::to_string_pretty(&table) {
                Ok(json) => println!("{json}"),
                Err(err) => {
                    eprintln!("E-IO: failed to render results: {err}");
                    return 1;
                }
            }
            0
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}

fn run_stats(file: &PathBuf, variant: Variant) -> i32 {
    let net = match load_network(file, variant) {
        Ok(net) => net,
        Err(code) => return code,
    };
    match serde_json::to_string_pretty(&net.stats()) {
        Ok(json) => {
            println!("{json}");
            0
        }
        Err(err) => {
            eprintln!("E-IO: failed to render stats: {err}");
            1
        }
    }
}

fn run_snapshot(file: &PathBuf, out: &PathBuf, variant: Variant) -> i32 {
    let net = match load_network(file, variant) {
        Ok(net) => net,
        Err(code) => return code,
    };
    match net.save(out) {
        Ok(()) => {
            println!("snapshot written to {}", out.display());
            0
        }
        Err(err) => {
            eprintln!("{err}");
            1
        }
    }
}
