//! End-to-end pipeline tests: source text in, compiled executable image out.

use std::io::Write;

use seraphicc::config::{CompilerConfig, EmitKind, OptimizationLevel};
use seraphicc::image::format::{Architecture, ImageHeader};
use seraphicc::image::loader::{LoadedImage, LoaderConfig, ValidationError};
use seraphicc::ir;
use seraphicc::parser::parse_source;

fn write_source(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    path
}

fn config(input: std::path::PathBuf, output: std::path::PathBuf) -> CompilerConfig {
    CompilerConfig {
        input_path: input,
        output_path: output,
        emit: EmitKind::Executable,
        optimization: OptimizationLevel::O0,
        debug_info: false,
        verbose: false,
        target: Architecture::X86_64,
    }
}

#[test]
fn hello_world_native_compile_produces_a_valid_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir, "hello.sr", "fn main() -> i32 { return 0; }");
    let output = dir.path().join("a.out");
    let stats = seraphicc::compile_file(&config(input, output.clone())).unwrap();
    assert!(stats.code_bytes > 0);

    let bytes = std::fs::read(&output).unwrap();
    let header = ImageHeader::from_bytes(&bytes).unwrap();
    assert_eq!(header.architecture, Architecture::X86_64);
    // entry_point is a virtual address; translate back to a file offset
    // before checking it lands inside the code section, at main's prologue.
    use seraphicc::image::format::DEFAULT_USER_LOAD_BASE;
    let entry_file_offset = header.entry_point - DEFAULT_USER_LOAD_BASE;
    assert!(entry_file_offset >= header.code.offset);
    assert!(entry_file_offset < header.code.offset + header.code.size);
}

#[test]
fn void_propagation_produces_runtime_and_proven_proof_entries() {
    let src = "fn div(a: i64, b: i64) -> i64 { return a / b; }\n\
               fn main() -> i64 { let x = div(10, 0)??; return x; }";
    let (module, diags) = parse_source(src, "t.sr");
    assert!(!diags.has_errors());
    let table = seraphicc::proof::generate_proofs(&module);

    use seraphicc::proof::{ProofKind, ProofStatus};
    assert!(table
        .entries
        .iter()
        .any(|e| e.kind == ProofKind::Void && e.status == ProofStatus::Runtime));
    assert!(table
        .entries
        .iter()
        .any(|e| e.kind == ProofKind::Void && e.status == ProofStatus::Proven));
}

#[test]
fn pattern_folding_turns_multiply_by_eight_into_a_shift() {
    let (module, diags) = parse_source("fn f(x: i64) -> i64 { return x * 8; }", "t.sr");
    assert!(!diags.has_errors());
    let (mut module, _types) = ir::lower_module(&module).unwrap();
    ir::run_pattern_optimizer(&mut module);

    let f = module.functions.iter().find(|f| f.name == "f").unwrap();
    let opcodes: Vec<_> = f
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter().map(|i| i.opcode))
        .collect();
    assert!(opcodes.contains(&ir::Opcode::Shl));
    assert!(!opcodes.contains(&ir::Opcode::Mul));
}

#[test]
fn struct_field_assignment_lowers_to_gep_store_load_pairs() {
    let src = "struct P { x: i32, y: i32 }\n\
               fn main() -> i32 { let p: P; p.x = 3; p.y = 4; return p.x + p.y; }";
    let (module, diags) = parse_source(src, "t.sr");
    assert!(!diags.has_errors(), "{:?}", diags.iter().collect::<Vec<_>>());
    let (module, _types) = ir::lower_module(&module).unwrap();

    let main_fn = module.functions.iter().find(|f| f.name == "main").unwrap();
    let opcodes: Vec<_> = main_fn
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter().map(|i| i.opcode))
        .collect();
    assert_eq!(opcodes.iter().filter(|o| **o == ir::Opcode::Alloca).count(), 1);
    assert_eq!(opcodes.iter().filter(|o| **o == ir::Opcode::Gep).count(), 4);
    assert_eq!(opcodes.iter().filter(|o| **o == ir::Opcode::Store).count(), 2);
    assert_eq!(opcodes.iter().filter(|o| **o == ir::Opcode::Load).count(), 2);
    assert_eq!(opcodes.iter().filter(|o| **o == ir::Opcode::Add).count(), 1);
}

#[test]
fn match_lowers_to_a_test_arm_default_exit_block_chain() {
    let src = "fn f(n: i64) -> i64 { match n { 1 => 10, 2 => 20, _ => 0 } }";
    let (module, diags) = parse_source(src, "t.sr");
    assert!(!diags.has_errors());
    let (module, _types) = ir::lower_module(&module).unwrap();

    let f = module.functions.iter().find(|f| f.name == "f").unwrap();
    assert!(f.blocks.len() >= 5, "expected at least test/arm/default/exit blocks, got {}", f.blocks.len());
    let has_eq = f
        .blocks
        .iter()
        .flat_map(|b| &b.instructions)
        .any(|i| i.opcode == ir::Opcode::Eq);
    assert!(has_eq);
}

#[test]
fn loader_rejects_an_image_tampered_after_writing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir, "hello.sr", "fn main() -> i32 { return 0; }");
    let output = dir.path().join("a.out");
    seraphicc::compile_file(&config(input, output.clone())).unwrap();

    let mut bytes = std::fs::read(&output).unwrap();
    let header = ImageHeader::from_bytes(&bytes).unwrap();
    let flip_at = header.code.offset as usize;
    bytes[flip_at] ^= 0xFF;

    let mut image = LoadedImage::parse(&bytes).unwrap();
    let loader_config = LoaderConfig {
        min_kernel_version: 1,
        max_kernel_version: 1,
        reject_failed_proofs: false,
        public_key: None,
    };
    let err = image.validate(&loader_config).unwrap_err();
    assert_eq!(err, ValidationError::HashMismatch);
    assert_eq!(image.last_error(), Some(ValidationError::HashMismatch));
}

#[test]
fn empty_source_still_produces_a_loadable_image() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_source(&dir, "empty.sr", "");
    let output = dir.path().join("a.out");
    let stats = seraphicc::compile_file(&config(input, output.clone())).unwrap();
    assert_eq!(stats.proof_entries, 0);
    let bytes = std::fs::read(&output).unwrap();
    let image = LoadedImage::parse(&bytes).unwrap();
    // no functions were lowered, so the only code is the startup stub.
    assert!(!image.code().is_empty());
}

#[test]
fn fold_constants_twice_reaches_a_fixed_point() {
    let (module, diags) = parse_source("fn f() -> i64 { return 2 + 3 * 4; }", "t.sr");
    assert!(!diags.has_errors());
    let (mut module, _types) = ir::lower_module(&module).unwrap();
    ir::fold_constants(&mut module);
    let second_pass_folds = ir::fold_constants(&mut module);
    assert_eq!(second_pass_folds, 0);
}
