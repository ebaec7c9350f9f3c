//! `seraphicc` — the Seraphic compiler CLI (§6 "CLI surface").

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;

use seraphicc::config::{parse_target, CompilerConfig, EmitKind, OptimizationLevel, DEFAULT_OUTPUT_PATH};

#[derive(ClapParser)]
#[command(name = "seraphicc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ahead-of-time compiler for the Seraphim language", long_about = None)]
struct Cli {
    /// Seraphim source file to compile
    input: PathBuf,

    /// Output path (default a.out)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Emit textual Celestial IR instead of an executable
    #[arg(long = "emit-ir", conflicts_with_all = ["emit_asm", "emit_c"])]
    emit_ir: bool,

    /// Emit a textual dump of the generated machine code
    #[arg(long = "emit-asm", conflicts_with_all = ["emit_ir", "emit_c"])]
    emit_asm: bool,

    /// Transpile to C instead of native code (not implemented, rejected)
    #[arg(long = "emit-c", conflicts_with_all = ["emit_ir", "emit_asm"])]
    emit_c: bool,

    /// Optimization level 0-3 (values above 3 are clamped)
    #[arg(short = 'O', default_value_t = 0)]
    opt_level: u8,

    /// Include debug information
    #[arg(short = 'g')]
    debug_info: bool,

    /// Print per-stage statistics
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Target architecture: x64/x86_64, arm64/aarch64, riscv64
    #[arg(long = "target", default_value = "x86_64")]
    target: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let emit = if cli.emit_ir {
        EmitKind::Ir
    } else if cli.emit_asm {
        EmitKind::Asm
    } else if cli.emit_c {
        EmitKind::TranspileC
    } else {
        EmitKind::Executable
    };

    let target = match parse_target(&cli.target) {
        Some(t) => t,
        None => {
            eprintln!("seraphicc: unknown target '{}'", cli.target);
            return ExitCode::FAILURE;
        }
    };

    let output_path = cli.output.unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH));

    let config = CompilerConfig {
        input_path: cli.input,
        output_path,
        emit,
        optimization: OptimizationLevel::from_level(cli.opt_level),
        debug_info: cli.debug_info,
        verbose: cli.verbose,
        target,
    };

    match seraphicc::compile_file(&config) {
        Ok(stats) => {
            if config.verbose {
                println!(
                    "seraphicc: {} tokens, {} proof entries ({} failed), {} code bytes -> {}",
                    stats.tokens,
                    stats.proof_entries,
                    stats.proof_failed,
                    stats.code_bytes,
                    config.output_path.display()
                );
            }
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}
