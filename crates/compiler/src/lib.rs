//! Seraphic: ahead-of-time compiler for the Seraphim language.
//!
//! Pipeline order mirrors the dependency chain: lex -> parse -> lower ->
//! verify/optimize -> backend -> proof table -> object write. Every stage
//! but the lexer/parser stops at its first error (§7 "Propagation policy").

pub mod ast;
pub mod backend;
pub mod config;
pub mod image;
pub mod ir;
pub mod lexer;
pub mod merkle;
pub mod parser;
pub mod proof;
pub mod token;

use std::fs;

use config::{CompilerConfig, EmitKind};
use image::format::Architecture;
use image::writer::{build_image, EffectSpec, WriterInput};

pub struct CompileStats {
    pub tokens: usize,
    pub proof_entries: usize,
    pub proof_failed: u32,
    pub code_bytes: usize,
}

/// Runs the full pipeline and writes the selected artefact to
/// `config.output_path`. Returns per-stage counts for `-v`/`--verbose`.
pub fn compile_file(config: &CompilerConfig) -> Result<CompileStats, String> {
    let source = fs::read_to_string(&config.input_path)
        .map_err(|e| format!("failed to read '{}': {e}", config.input_path.display()))?;
    let filename = config.input_path.to_string_lossy().into_owned();

    let (tokens, lex_diags) = lexer::tokenize(&source, &filename);
    if lex_diags.has_errors() {
        return Err(format_diagnostics(&lex_diags));
    }
    let token_count = tokens.len();

    let mut parser = parser::Parser::new(tokens, &filename);
    let mut parse_diags = seraphic_core::Diagnostics::default();
    let ast = parser.parse(&mut parse_diags);
    if parse_diags.has_errors() {
        return Err(format_diagnostics(&parse_diags));
    }

    let (mut ir_module, types) =
        ir::lower_module(&ast).map_err(|e| format!("lowering error: {e}"))?;

    if config.optimization.folds_constants() {
        ir::fold_constants(&mut ir_module);
    }
    if config.optimization.eliminates_dead_code() {
        ir::eliminate_dead_code(&mut ir_module);
    }
    if config.optimization.runs_pattern_optimizer() {
        ir::run_pattern_optimizer(&mut ir_module);
    }

    let mut verify_diags = seraphic_core::Diagnostics::default();
    if !ir::verify_module(&ir_module, &mut verify_diags) {
        return Err(format_diagnostics(&verify_diags));
    }

    match config.emit {
        EmitKind::Ir => {
            fs::write(&config.output_path, ir::dump_module(&ir_module, &types))
                .map_err(|e| format!("failed to write IR output: {e}"))?;
            return Ok(CompileStats {
                tokens: token_count,
                proof_entries: 0,
                proof_failed: 0,
                code_bytes: 0,
            });
        }
        EmitKind::TranspileC => {
            return Err("transpile-to-C output is not implemented (explicit non-goal)".to_string());
        }
        EmitKind::Asm | EmitKind::Executable => {}
    }

    let code_buf = match config.target {
        Architecture::X86_64 => backend::compile_module(&mut backend::x64::X64Backend::new(), &ir_module),
        Architecture::Aarch64 => backend::compile_module(&mut backend::aarch64::Aarch64Backend::new(), &ir_module),
        Architecture::Riscv64 => backend::compile_module(&mut backend::riscv64::Riscv64Backend::new(), &ir_module),
    };

    if config.emit == EmitKind::Asm {
        fs::write(&config.output_path, dump_code_buffer(&code_buf))
            .map_err(|e| format!("failed to write asm output: {e}"))?;
        return Ok(CompileStats {
            tokens: token_count,
            proof_entries: 0,
            proof_failed: 0,
            code_bytes: code_buf.bytes.len(),
        });
    }

    let proof_table = proof::generate_proofs(&ast);

    let effects: Vec<EffectSpec> = ir_module
        .functions
        .iter()
        .filter(|f| !f.is_declaration)
        .map(|f| EffectSpec {
            function_offset: code_buf.function_offsets.get(&f.name).copied().unwrap_or(0) as u32,
            function_size: 0,
            declared_mask: f.effects_declared,
            verified_mask: f.effects_declared,
            required_capability_mask: 0,
            name: &f.name,
        })
        .collect();

    let entry_point_offset = code_buf.function_offsets.get("main").copied().unwrap_or(0) as u64;

    let writer_input = WriterInput {
        architecture: config.target,
        entry_point_offset,
        code: &code_buf.bytes,
        rodata: &[],
        data: &[],
        bss_size: 0,
        proofs: &proof_table,
        effects: &effects,
        stack_size: 1 << 20,
        heap_size: 1 << 20,
        chronon_budget: 1_000_000,
    };

    let image_bytes = build_image(&writer_input);
    fs::write(&config.output_path, &image_bytes)
        .map_err(|e| format!("failed to write executable to '{}': {e}", config.output_path.display()))?;

    Ok(CompileStats {
        tokens: token_count,
        proof_entries: proof_table.entries.len(),
        proof_failed: proof_table.counters.failed,
        code_bytes: code_buf.bytes.len(),
    })
}

/// Per-instruction mnemonic-ish dump for `--emit-asm`; not a real
/// disassembler, just enough to see what the backend produced without
/// opening the bytes in a hex editor.
fn dump_code_buffer(code: &backend::CodeBuffer) -> String {
    let mut out = String::new();
    let mut offsets: Vec<(&String, &usize)> = code.function_offsets.iter().collect();
    offsets.sort_by_key(|(_, offset)| **offset);
    for (name, offset) in &offsets {
        out.push_str(&format!("{name}:\n"));
        let end = offsets
            .iter()
            .map(|(_, o)| **o)
            .find(|o| o > offset)
            .unwrap_or(code.bytes.len());
        for chunk in code.bytes[**offset..end].chunks(8) {
            let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
            out.push_str(&format!("    {}\n", hex.join(" ")));
        }
    }
    out
}

fn format_diagnostics(diags: &seraphic_core::Diagnostics) -> String {
    diags
        .iter_chronological()
        .map(|d| format!("{}:{}:{}: {}", d.file, d.line, d.column, d.message))
        .collect::<Vec<_>>()
        .join("\n")
}
