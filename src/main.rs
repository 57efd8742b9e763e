//! MSP430 Disassembler CLI
//!
//! Command-line tool for listing and lifting MSP430 code from flat images.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use msp430_lift::{
    disassemble_with_options, lift_listing, DisassemblyOptions, IlFunction, ListingEntry,
};
use std::path::PathBuf;
use std::process::ExitCode;

/// MSP430 linear-sweep disassembler.
///
/// Decodes a flat little-endian image, renders each instruction and
/// optionally prints the lifted IL.
#[derive(Parser, Debug)]
#[command(name = "msp430-dis")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input image (raw bytes)
    #[arg(required_unless_present = "hex", conflicts_with = "hex")]
    file: Option<PathBuf>,

    /// Hex-encoded bytes instead of a file
    #[arg(long)]
    hex: Option<String>,

    /// Load address of the first byte
    #[arg(short, long, default_value = "0", value_parser = parse_address, env = "MSP430_BASE")]
    base: u16,

    /// Stop after this many entries
    #[arg(short = 'n', long)]
    count: Option<usize>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    format: OutputFormat,

    /// Print lifted IL
    #[arg(long)]
    il: bool,

    /// Stop at the first undecodable word
    #[arg(long)]
    stop_on_invalid: bool,

    /// Lift `dint; jmp $` as two instructions instead of `hlt`
    #[arg(long)]
    no_halt_fusion: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (only output essential info)
    #[arg(short, long)]
    quiet: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Address, bytes and text
    Human,
    /// JSON output
    Json,
    /// Text only
    Short,
}

fn parse_address(s: &str) -> Result<u16, String> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(digits) => u16::from_str_radix(digits, 16).map_err(|e| e.to_string()),
        None => s.parse::<u16>().map_err(|e| e.to_string()),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging if verbose
    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("msp430_lift=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !args.quiet {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn options_from(args: &Args) -> DisassemblyOptions {
    let mut options = DisassemblyOptions::new().with_base_address(args.base);
    options.max_instructions = args.count;
    options.stop_on_invalid = args.stop_on_invalid;
    options.fuse_halt_idiom = !args.no_halt_fusion;
    options
}

fn load_input(args: &Args) -> anyhow::Result<Vec<u8>> {
    if let Some(text) = &args.hex {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        return hex::decode(&cleaned).context("invalid --hex input");
    }
    match &args.file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))
        }
        None => bail!("no input given"),
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let data = load_input(args)?;
    let options = options_from(args);
    let entries = disassemble_with_options(&data, &options);

    let il = if args.il {
        Some(lift_listing(&data, &entries, &options).context("lifting listing")?)
    } else {
        None
    };

    match args.format {
        OutputFormat::Human => print_human(&entries, il.as_ref(), args),
        OutputFormat::Json => print_json(&entries, il.as_ref())?,
        OutputFormat::Short => print_short(&entries),
    }

    if let Some(il) = &il {
        if let Err(e) = il.check_implemented() {
            if !args.quiet {
                eprintln!("warning: {}", e);
            }
        }
    }

    Ok(())
}

fn print_human(entries: &[ListingEntry], il: Option<&IlFunction>, args: &Args) {
    for entry in entries {
        if args.quiet {
            println!("{}", entry.text());
            continue;
        }
        println!(
            "{:04x}:  {:<14}{}",
            entry.address(),
            hex::encode(entry.bytes()),
            entry.text()
        );
        if let Some(il) = il {
            for op in il.ops_at(entry.address()) {
                println!("           {}", op);
            }
        }
    }
}

fn print_json(entries: &[ListingEntry], il: Option<&IlFunction>) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct JsonOutput<'a> {
        text: String,
        #[serde(flatten)]
        entry: &'a ListingEntry,
        #[serde(skip_serializing_if = "Option::is_none")]
        il: Option<Vec<String>>,
    }

    for entry in entries {
        let output = JsonOutput {
            text: entry.text(),
            entry,
            il: il.map(|il| il.ops_at(entry.address()).map(ToString::to_string).collect()),
        };
        println!("{}", serde_json::to_string(&output)?);
    }
    Ok(())
}

fn print_short(entries: &[ListingEntry]) {
    for entry in entries {
        println!("{:04x}\t{}", entry.address(), entry.text());
    }
}
