//! Back-end driver.
//!
//! Reads a textual three-address listing, runs the full pipeline and, with
//! `-o`, writes the four output artifacts. Without `-s` the intermediate
//! results of every stage are dumped to stdout.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use acbe::core::CompilationSession;
use acbe::ir::parse_unit;

#[derive(Parser)]
#[command(name = "acbe", about = "AVR back end for a small C compiler")]
struct Args {
    /// Input IR listing.
    input: PathBuf,

    /// Base name; enables writing <name>.ir, <name>_CFG.dot, <name>.asm and <name>.hex.
    #[arg(short = 'o')]
    output: Option<String>,

    /// Suppress stage-by-stage console dumps.
    #[arg(short = 's')]
    silent: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("acbe: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> acbe::BackendResult<()> {
    let text = fs::read_to_string(&args.input)?;
    let mut session = CompilationSession::new();
    let mut unit = parse_unit(&text, &mut session)?;
    let compiled = acbe::compile(&mut unit, &mut session)?;

    if !args.silent {
        println!("=== IR ===");
        print!("{unit}");

        println!("=== CFG ===");
        for block in compiled.cfg.blocks() {
            let succs: Vec<String> = block.succs().map(|s| s.to_string()).collect();
            let preds: Vec<String> = block.preds.iter().map(|p| p.to_string()).collect();
            println!(
                "{} [{}..{}] -> [{}] preds [{}]",
                block.id,
                block.begin,
                block.end,
                succs.join(", "),
                preds.join(", ")
            );
        }

        println!("=== registers ===");
        let mut pairs: Vec<_> = compiled.regs.iter().collect();
        pairs.sort_unstable_by_key(|&(t, _)| t);
        for (t, r) in pairs {
            println!("t{t} -> {r}");
        }

        println!("=== disassembly ===");
        print!("{}", acbe::avr::disassemble(&compiled.words)?);
    }

    if let Some(base) = &args.output {
        acbe::artifacts::write_all(base, &unit, &compiled.cfg, &compiled.words)?;
    }
    Ok(())
}
