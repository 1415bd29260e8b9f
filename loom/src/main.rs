#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, NamedSource};
use tracing_subscriber::EnvFilter;

use loom::{LoomConfig, OutputFormat, WeaveOptions, WeaveReport, load_fixture, weave, weave_all};

#[derive(Parser, Debug)]
#[command(name = "loom", version, about = "Aspect layer ordering and override-chain linking")]
struct Cli {
    /// Config file; defaults to `loom.toml` beside the fixture.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Weave a fixture and print every chain with its resolved links.
    Run {
        fixture: PathBuf,

        /// Skip dead-link and forwarder elimination.
        #[arg(long, default_value_t = false)]
        no_reduce: bool,

        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Print only the layer order of a fixture.
    Order {
        fixture: PathBuf,

        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Weave several fixtures in parallel and summarize each.
    Batch {
        #[arg(required = true)]
        fixtures: Vec<PathBuf>,

        #[arg(long, default_value_t = false)]
        no_reduce: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOOM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

fn weave_options(config: &LoomConfig, no_reduce: bool) -> WeaveOptions {
    if no_reduce {
        WeaveOptions::unreduced()
    } else {
        config.weave_options()
    }
}

fn print(report: &WeaveReport, format: OutputFormat) -> miette::Result<()> {
    match format {
        OutputFormat::Text => print!("{report}"),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report).into_diagnostic()?),
    }
    Ok(())
}

fn main() -> miette::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Run {
            fixture,
            no_reduce,
            format,
        } => {
            let config = LoomConfig::discover(cli.config.as_deref(), &fixture)?;
            let (compilation, text) = load_fixture(&fixture)?;
            let woven = weave(&compilation, &weave_options(&config, no_reduce))
                .map_err(|e| miette::Report::new(e).with_source_code(NamedSource::new(display_path(&fixture), text)))?;
            print(
                &WeaveReport::new(compilation.name, &woven),
                format.unwrap_or(config.output.format),
            )
        }
        Cmd::Order { fixture, format } => {
            let config = LoomConfig::discover(cli.config.as_deref(), &fixture)?;
            let (compilation, _) = load_fixture(&fixture)?;
            let order = loom_order::order_layers(
                &compilation.aspects,
                &compilation.declarations,
                &compilation.constraints,
            )?;
            print(
                &WeaveReport::order_only(compilation.name, &order),
                format.unwrap_or(config.output.format),
            )
        }
        Cmd::Batch { fixtures, no_reduce } => {
            // One option set per batch, discovered from the first fixture.
            let config = LoomConfig::discover(cli.config.as_deref(), &fixtures[0])?;
            let options = weave_options(&config, no_reduce);
            let compilations = fixtures
                .iter()
                .map(|path| load_fixture(path).map(|(c, _)| c))
                .collect::<Result<Vec<_>, _>>()?;

            let mut failed = 0usize;
            for (path, result) in fixtures.iter().zip(weave_all(&compilations, &options)) {
                match result {
                    Ok(woven) => {
                        let removed: usize = woven.chains.values().map(|c| c.removed.len()).sum();
                        println!(
                            "ok    {}: {} layers, {} members, {} links removed",
                            display_path(path),
                            woven.order.len(),
                            woven.chains.len(),
                            removed
                        );
                    }
                    Err(e) => {
                        failed += 1;
                        println!("error {}: {e}", display_path(path));
                    }
                }
            }
            if failed > 0 {
                return Err(miette::miette!("{failed} fixture(s) failed to weave"));
            }
            Ok(())
        }
    }
}
