use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser as ArgParser;
use comfy_table::Table;
use log::LevelFilter;

use pandasm::emitter::{AsmEmitter, PandaFileToAsmMaps};
use pandasm::error::{Error, ErrorList};
use pandasm::parser::Parser;

/// Assembler for the textual bytecode format.
#[derive(ArgParser)]
#[command(name = "pandasm", disable_help_flag = false)]
struct Args {
    /// Path to the source assembly code
    input_file: PathBuf,

    /// Path to the generated binary code
    output_file: PathBuf,

    /// Enable verbose output (will be printed to standard output)
    #[arg(long)]
    verbose: bool,

    /// Set log file name
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Enable dump of scopes to file
    #[arg(long, value_name = "FILE")]
    dump_scopes: Option<PathBuf>,

    /// Print binary file size statistic
    #[arg(long)]
    size_stat: bool,

    /// Run the bytecode optimization
    #[arg(long)]
    optimize: bool,
}

fn init_logging(args: &Args) -> anyhow::Result<()> {
    if !args.verbose {
        return Ok(());
    }

    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Debug);

    if let Some(log_file) = &args.log_file {
        let file = fs::File::create(log_file)
            .with_context(|| format!("Unable to open log file {}", log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn print_error(e: &Error, tag: &str) {
    eprintln!("{}", e.caret_report(tag));
}

fn print_warnings(warnings: &ErrorList) {
    for w in warnings {
        print_error(w, "WARNING");
    }
}

fn print_size_stat(stat: &std::collections::BTreeMap<String, usize>) {
    let mut table = Table::new();
    table.set_header(vec!["section", "size"]);

    let mut total = 0usize;
    for (name, size) in stat {
        if name == "instructions_number" || name == "codesize" {
            continue;
        }
        table.add_row(vec![name.clone(), size.to_string()]);
        total += size;
    }
    table.add_row(vec!["total".to_string(), total.to_string()]);

    println!("Binary file size statistic:");
    println!("{table}");
    println!(
        "instructions number: {}",
        stat.get("instructions_number").copied().unwrap_or(0)
    );
    println!("code size: {}", stat.get("codesize").copied().unwrap_or(0));
}

fn run(args: &Args) -> anyhow::Result<bool> {
    let source = fs::read_to_string(&args.input_file)
        .with_context(|| format!("The input file {} does not exist.", args.input_file.display()))?;

    let file_name = args.input_file.display().to_string();
    let (program, warnings) = match Parser::parse_source(&source, &file_name) {
        Ok(res) => res,
        Err(e) => {
            print_error(&e, "ERROR");
            return Ok(false);
        }
    };

    print_warnings(&warnings);

    if let Some(scopes_file) = &args.dump_scopes {
        let dump = program
            .json_dump()
            .map_err(|e| anyhow::anyhow!("Failed to dump scopes: {}", e))?;
        fs::write(scopes_file, dump)
            .with_context(|| "Failed to write scopes into the given file.")?;
    }

    let emit_debug_info = !args.optimize;
    let mut stat = std::collections::BTreeMap::new();
    let mut maps = PandaFileToAsmMaps::default();

    let output = args.output_file.display().to_string();
    let result = AsmEmitter::emit_to_file(
        &output,
        &program,
        args.size_stat.then_some(&mut stat),
        args.optimize.then_some(&mut maps),
        emit_debug_info,
    );

    if let Err(e) = result {
        eprintln!("Failed to emit binary data: {}", e.message);
        return Ok(false);
    }

    if args.size_stat {
        print_size_stat(&stat);
    }

    Ok(true)
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
