use std::collections::HashMap;
use std::io::Write;

use anyhow::*;
use clap::{Parser, Subcommand};
use clap_verbosity_flag::Verbosity;
use log::*;
use owo_colors::OwoColorize;

use socpc::pretty::Pretty;
use socpc::structs::params_from_json;
use socpc::utils::{parse_dim, read_source};
use socpc::{Compiler, Settings};

#[derive(Parser)]
#[command(author, version, about)]
#[command(propagate_version = true)]
struct Args {
    #[clap(flatten)]
    verbose: Verbosity,

    #[arg(long, help = "log the intermediate representations", global = true)]
    debug: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct Input {
    #[arg(help = "Either a file or a string containing the problem to compile")]
    source: String,

    #[arg(
        short = 'd',
        long = "dim",
        help = "bind a dimension, e.g. `-d n=3`",
        value_parser = parse_dim
    )]
    dims: Vec<(String, usize)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse the problem and verify that it follows the DCP rules
    Check {
        #[clap(flatten)]
        input: Input,
    },
    /// Print the canonical form of the problem
    Canonicalize {
        #[clap(flatten)]
        input: Input,

        #[arg(short = 'o', long = "out", help = "where to dump the canonical form")]
        outfile: Option<String>,

        #[arg(long, help = "dump as JSON rather than RON")]
        json: bool,
    },
    /// Generate the functions building the solver input
    Codegen {
        #[clap(flatten)]
        input: Input,

        #[arg(short = 't', long = "target", default_value = "python")]
        target: String,

        #[arg(short = 'o', long = "out", help = "where to write the generated code")]
        outfile: Option<String>,

        #[arg(long, help = "prefix for the names of the generated functions")]
        prefix: Option<String>,
    },
    /// Evaluate the solver input for the given parameters values
    Data {
        #[clap(flatten)]
        input: Input,

        #[arg(
            short = 'p',
            long = "params",
            required = true,
            help = "a JSON file mapping parameters to their values"
        )]
        params: String,

        #[arg(short = 'o', long = "out", help = "where to write the SOCP data")]
        outfile: Option<String>,
    },
}
impl Commands {
    fn input(&self) -> &Input {
        match self {
            Commands::Check { input }
            | Commands::Canonicalize { input, .. }
            | Commands::Codegen { input, .. }
            | Commands::Data { input, .. } => input,
        }
    }
}

fn write_out(outfile: Option<&String>, content: &str) -> Result<()> {
    if let Some(filename) = outfile {
        std::fs::File::create(filename)
            .with_context(|| format!("while creating {}", filename.white().bold()))?
            .write_all(content.as_bytes())
            .with_context(|| format!("while writing to {}", filename.white().bold()))
    } else {
        println!("{}", content);
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    buche::new()
        .verbosity(args.verbose.log_level_filter())
        .quiet(args.verbose.is_silent())
        .init()
        .map_err(|e| anyhow!("while initializing the logger: {}", e))?;

    let input = args.command.input();
    let source = read_source(&input.source)?;
    let prefix = match &args.command {
        Commands::Codegen { prefix, .. } => prefix.clone(),
        _ => None,
    };
    let mut compiler = Compiler::new(
        Settings::builder()
            .debug(args.debug)
            .and_prefix(prefix)
            .build(),
    );
    compiler.parse(&source)?;
    let explicit_dims = !input.dims.is_empty();
    if explicit_dims {
        compiler.set_dims(input.dims.iter().cloned().collect::<HashMap<_, _>>())?;
    }

    match args.command {
        Commands::Check { .. } => {
            if let Some(program) = compiler.program() {
                println!("{}", program.pretty());
            }
            info!("{}", "problem is DCP".green());
        }
        Commands::Canonicalize { outfile, json, .. } => {
            compiler.canonicalize()?;
            let form = compiler
                .form()
                .ok_or_else(|| anyhow!("no canonical form"))?;
            if outfile.is_none() && !json {
                println!("{}", form.pretty());
            } else {
                let dump = if json {
                    serde_json::to_string_pretty(form)?
                } else {
                    ron::to_string(form)?
                };
                write_out(outfile.as_ref(), &dump)?;
            }
        }
        Commands::Codegen {
            target, outfile, ..
        } => {
            compiler.canonicalize()?;
            let generated = compiler.codegen(&target)?;
            write_out(outfile.as_ref(), &generated.to_string())?;
        }
        Commands::Data {
            params, outfile, ..
        } => {
            let params = std::fs::read_to_string(&params)
                .with_context(|| anyhow!("while reading `{}`", params.white().bold()))
                .and_then(|s| serde_json::from_str::<serde_json::Value>(&s).map_err(Error::from))
                .and_then(|v| params_from_json(&v))?;
            if !explicit_dims {
                let dims = compiler.infer_dims(&params)?;
                compiler.set_dims(dims)?;
            }
            compiler.canonicalize()?;
            compiler.codegen("native")?;
            let data = compiler
                .generated()
                .and_then(|g| g.native())
                .ok_or_else(|| anyhow!("no native program"))?
                .prob2socp(&params)?;
            write_out(outfile.as_ref(), &serde_json::to_string_pretty(&data)?)?;
        }
    }

    Ok(())
}
