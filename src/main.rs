//! RISC1 Emulator - CLI Entry Point
//!
//! Commands:
//! - `risc1-emu run <program>` - Run an ASM source or RE01 image
//! - `risc1-emu asm <source>` - Assemble to an RE01 image
//! - `risc1-emu disasm <image>` - Disassemble an RE01 image

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "risc1-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "An emulator for the RISC1 32-bit word machine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the ASM or RE01 file to execute
        program: PathBuf,
        /// Machine configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Maximum number of cycles to run
        #[arg(short, long)]
        max_cycles: Option<u64>,
        /// Log every executed instruction
        #[arg(short, long)]
        trace: bool,
        /// Print the final state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Assemble source to an RE01 image
    Asm {
        /// Path to the source file
        source: PathBuf,
        /// Output image file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Disassemble an RE01 image to readable text
    Disasm {
        /// Path to the image file
        image: PathBuf,
    },
}

fn init_logging(trace: bool) {
    let default = if trace { "trace" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, config, max_cycles, trace, json }) => {
            init_logging(trace);
            run_program(&program, config.as_deref(), max_cycles, json);
        }
        Some(Commands::Asm { source, output }) => {
            init_logging(false);
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            init_logging(false);
            disassemble_file(&image);
        }
        None => {
            println!("RISC1 Emulator v0.1.0");
            println!("A 32-bit word machine with paged memory and vectored interrupts");
            println!();
            println!("Use --help for available commands");
        }
    }
}

fn run_program(path: &Path, config: Option<&Path>, max_cycles: Option<u64>, json: bool) {
    use risc1::config::MachineConfig;
    use risc1::machine::{load_program, Machine};

    let mut config = match config {
        Some(path) => match MachineConfig::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }
        },
        None => MachineConfig::default(),
    };
    if max_cycles.is_some() {
        config.max_cycles = max_cycles;
    }

    if !json {
        println!("🔧 Running: {}", path.display());
    }

    let image = match load_program(path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load program: {}", e);
            std::process::exit(1);
        }
    };

    if image.code.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    let mut machine = match Machine::new(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("❌ Failed to build machine: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = machine.load_image(&image) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    let result = machine.run();
    let snapshot = machine.snapshot();

    if json {
        match serde_json::to_string_pretty(&snapshot) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("❌ Failed to encode state: {}", e),
        }
    } else {
        println!();
        println!("━━━ Result ━━━");
        println!("Cycles: {}", snapshot.cycles);
        println!("State: {:?}", snapshot.state);
        println!("PC: {:#010x}", snapshot.pc);
        for (index, value) in snapshot.registers.non_zero() {
            println!("r{:<3} = {:#010x} ({})", index, value, value);
        }
    }

    if let Err(e) = result {
        eprintln!("❌ CPU error at PC={:#x}: {}", snapshot.pc, e);
        std::process::exit(1);
    }

    if machine.cpu.is_running() {
        println!();
        println!("⚠️  Reached max cycles limit. Use --max-cycles to increase.");
    }
}

fn assemble_file(source_path: &Path, output: Option<PathBuf>) {
    use risc1::asm::{assemble, save_image, Image};

    let out_path = output.unwrap_or_else(|| source_path.with_extension("bin"));

    println!("📝 Assembling: {} → {}", source_path.display(), out_path.display());

    // Read source
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    // Assemble
    let program = match assemble(&source) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "✓ Assembled {} code bytes, {} data bytes, {} labels",
        program.code.len(),
        program.data.len(),
        program.labels.len()
    );

    let image = Image::from(program);
    if let Err(e) = save_image(&out_path, &image) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path.display());
}

fn disassemble_file(image_path: &Path) {
    use risc1::asm::{disassemble_image, load_image};

    println!("📖 Disassembling: {}", image_path.display());
    println!();

    let image = match load_image(image_path) {
        Ok(i) => i,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble_image(&image));
}
