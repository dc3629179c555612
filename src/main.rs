// ABOUTME: hqlc command line driver compiling HQL source files to JavaScript

use clap::Parser;
use hql::{compile, CompileOptions, SourceMapMode};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// HQL to JavaScript compiler
#[derive(Parser, Debug)]
#[command(name = "hqlc")]
#[command(version)]
#[command(about = "Compile HQL source files to JavaScript with source maps")]
struct CliArgs {
    /// HQL source file to compile
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output path (defaults to the input with a .js extension)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Source map handling: inline, external, or none
    #[arg(long = "source-map", value_name = "MODE", default_value = "inline")]
    source_map: String,

    /// JavaScript dialect to target
    #[arg(long, default_value = "es2020")]
    target: String,

    /// Skip the get() runtime helper prefix
    #[arg(long = "no-helper")]
    no_helper: bool,

    /// Log compile phases
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init();

    let mode = match args.source_map.as_str() {
        "inline" => SourceMapMode::Inline,
        "external" => SourceMapMode::External,
        "none" => SourceMapMode::None,
        other => {
            eprintln!("unknown source map mode `{}` (expected inline, external, or none)", other);
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(&args.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("cannot read {}: {}", args.input.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let file = args.input.to_string_lossy().into_owned();
    let options = CompileOptions {
        verbose: args.verbose,
        source_map: mode,
        emit_helper_prefix: !args.no_helper,
        target: args.target.clone(),
        base_dir: args.input.parent().map(|p| p.to_path_buf()),
        current_file: Some(file.clone()),
    };

    let output = match compile(&source, &file, &options) {
        Ok(output) => output,
        Err(err) => {
            eprintln!("{}", err.report());
            return ExitCode::FAILURE;
        }
    };

    let out_path = args
        .output
        .unwrap_or_else(|| args.input.with_extension("js"));

    // The map is written before the code is published, so consumers never
    // observe a dangling sourceMappingURL.
    if let Some(map) = &output.map {
        let map_path = PathBuf::from(format!("{}.map", out_path.display()));
        if let Err(err) = fs::write(&map_path, map) {
            eprintln!("cannot write {}: {}", map_path.display(), err);
            return ExitCode::FAILURE;
        }
    }
    if let Err(err) = fs::write(&out_path, &output.code) {
        eprintln!("cannot write {}: {}", out_path.display(), err);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
