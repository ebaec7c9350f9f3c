//! Object writer (C10, §4.7).
//!
//! Lays out the header, manifest, code, read-only data, writable data, bss,
//! proof table, capability table, effect table and string table into one
//! contiguous buffer, then back-fills the header's hash and Merkle root.

use sha2::{Digest, Sha256};

use crate::merkle::merkle_root;
use crate::proof::{ProofStatus, ProofTable};

use super::format::{
    Architecture, CapabilityTemplate, EffectTableEntry, ImageHeader, SectionRef, CODE_ALIGN,
    DEFAULT_USER_LOAD_BASE, EFFECT_TABLE_MAGIC, CAP_TABLE_MAGIC, MANIFEST_MAGIC,
    PROOF_TABLE_MAGIC, SECTION_ALIGN, STRING_TABLE_MAGIC,
};

/// An effect-table row before its name has been interned into the image's
/// string table; the writer does that interning, since it alone decides the
/// final string-table layout.
#[derive(Debug, Clone)]
pub struct EffectSpec<'a> {
    pub function_offset: u32,
    pub function_size: u32,
    pub declared_mask: u32,
    pub verified_mask: u32,
    pub required_capability_mask: u32,
    pub name: &'a str,
}

#[derive(Debug, Clone)]
pub struct WriterInput<'a> {
    pub architecture: Architecture,
    pub entry_point_offset: u64,
    pub code: &'a [u8],
    pub rodata: &'a [u8],
    pub data: &'a [u8],
    pub bss_size: u64,
    pub proofs: &'a ProofTable,
    pub effects: &'a [EffectSpec<'a>],
    pub stack_size: u64,
    pub heap_size: u64,
    pub chronon_budget: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterError {
    BufferTooSmall { needed: usize, available: usize },
}

impl std::fmt::Display for WriterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriterError::BufferTooSmall { needed, available } => {
                write!(f, "buffer holds {available} bytes, image needs {needed}")
            }
        }
    }
}

impl std::error::Error for WriterError {}

fn align_up(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}

/// Assembles the complete image bytes, load base fixed at
/// [`DEFAULT_USER_LOAD_BASE`] per §4.7's "user-mode executables" default.
pub fn build_image(input: &WriterInput) -> Vec<u8> {
    // Well-known capability templates: code (RX), data (RW), stack (RW).
    let mut strings: Vec<u8> = Vec::new();
    let mut intern = |name: &str| -> u32 {
        let offset = strings.len() as u32;
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        offset
    };
    let code_name = intern("code");
    let data_name = intern("data");
    let stack_name = intern("stack");
    let effect_entries: Vec<EffectTableEntry> = input
        .effects
        .iter()
        .map(|spec| EffectTableEntry {
            function_offset: spec.function_offset,
            function_size: spec.function_size,
            declared_mask: spec.declared_mask,
            verified_mask: spec.verified_mask,
            required_capability_mask: spec.required_capability_mask,
            name_offset: intern(spec.name),
        })
        .collect();

    let caps = [
        CapabilityTemplate {
            base: DEFAULT_USER_LOAD_BASE,
            length: input.code.len() as u64 + input.rodata.len() as u64,
            permissions: 0b101, // read + execute
            flags: 0,
            name_offset: code_name,
        },
        CapabilityTemplate {
            base: DEFAULT_USER_LOAD_BASE + input.code.len() as u64 + input.rodata.len() as u64,
            length: input.data.len() as u64 + input.bss_size,
            permissions: 0b011, // read + write
            flags: 0,
            name_offset: data_name,
        },
        CapabilityTemplate {
            base: 0, // fixed up by the loader/kernel at map time
            length: input.stack_size,
            permissions: 0b011,
            flags: 0,
            name_offset: stack_name,
        },
    ];

    let proof_hashes = input.proofs.entry_hashes();
    let proof_root = merkle_root(&proof_hashes);

    // --- layout (§4.7 step 1-4) ---
    let header_len = ImageHeader::ENCODED_LEN as u64;
    let mut cursor = header_len;

    let manifest_bytes = build_manifest(input, &proof_root);
    let manifest = place(&mut cursor, manifest_bytes.len() as u64, SECTION_ALIGN);

    let code = place(&mut cursor, input.code.len() as u64, CODE_ALIGN);
    let rodata = place(&mut cursor, input.rodata.len() as u64, SECTION_ALIGN);
    let data = place(&mut cursor, input.data.len() as u64, SECTION_ALIGN);
    let bss = place(&mut cursor, input.bss_size, SECTION_ALIGN);

    let proof_table_bytes = build_proof_table(input.proofs, &proof_hashes);
    let proof_table = place(&mut cursor, proof_table_bytes.len() as u64, SECTION_ALIGN);

    let cap_table_bytes = build_cap_table(&caps);
    let cap_table = place(&mut cursor, cap_table_bytes.len() as u64, SECTION_ALIGN);

    let effect_table_bytes = build_effect_table(&effect_entries);
    let effect_table = place(&mut cursor, effect_table_bytes.len() as u64, SECTION_ALIGN);

    let string_table_bytes = build_string_table(&strings);
    let string_table = place(&mut cursor, string_table_bytes.len() as u64, SECTION_ALIGN);

    let total_size = cursor;

    let mut header = ImageHeader {
        version_major: 1,
        version_minor: 0,
        architecture: input.architecture,
        flags: 0,
        entry_point: DEFAULT_USER_LOAD_BASE + code.offset + input.entry_point_offset,
        total_size,
        content_hash: [0u8; 32],
        proof_root,
        manifest,
        code,
        rodata,
        data,
        bss,
        proof_table,
        cap_table,
        effect_table,
        string_table,
    };

    let mut out = vec![0u8; total_size as usize];
    write_at(&mut out, 0, &header.to_bytes());
    write_at(&mut out, manifest.offset, &manifest_bytes);
    write_at(&mut out, code.offset, input.code);
    write_at(&mut out, rodata.offset, input.rodata);
    write_at(&mut out, data.offset, input.data);
    write_at(&mut out, proof_table.offset, &proof_table_bytes);
    write_at(&mut out, cap_table.offset, &cap_table_bytes);
    write_at(&mut out, effect_table.offset, &effect_table_bytes);
    write_at(&mut out, string_table.offset, &string_table_bytes);

    // §4.7 step 6: content_hash = digest(bytes[header_size..eof]).
    let mut hasher = Sha256::new();
    hasher.update(&out[header_len as usize..]);
    header.content_hash = hasher.finalize().into();
    write_at(&mut out, 0, &header.to_bytes());

    out
}

/// Writes into a caller-supplied fixed-size buffer instead of allocating
/// (§4.7 "write to buffer"); fails cleanly rather than truncating silently.
pub fn build_image_into(input: &WriterInput, buffer: &mut [u8]) -> Result<usize, WriterError> {
    let image = build_image(input);
    if image.len() > buffer.len() {
        return Err(WriterError::BufferTooSmall {
            needed: image.len(),
            available: buffer.len(),
        });
    }
    buffer[..image.len()].copy_from_slice(&image);
    Ok(image.len())
}

pub fn write_image_to_file(input: &WriterInput, path: &std::path::Path) -> std::io::Result<()> {
    let bytes = build_image(input);
    std::fs::write(path, bytes)
}

fn place(cursor: &mut u64, size: u64, align: u64) -> SectionRef {
    let offset = align_up(*cursor, align);
    *cursor = offset + size;
    SectionRef { offset, size }
}

fn write_at(out: &mut [u8], offset: u64, bytes: &[u8]) {
    let start = offset as usize;
    out[start..start + bytes.len()].copy_from_slice(bytes);
}

fn build_manifest(input: &WriterInput, proof_root: &[u8; 32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MANIFEST_MAGIC);
    out.extend_from_slice(&1u32.to_le_bytes()); // format version
    out.extend_from_slice(&1u32.to_le_bytes()); // kernel_min_version
    out.extend_from_slice(&1u32.to_le_bytes()); // kernel_max_version
    out.extend_from_slice(&0u32.to_le_bytes()); // flags
    out.extend_from_slice(&input.entry_point_offset.to_le_bytes());
    out.extend_from_slice(&input.stack_size.to_le_bytes());
    out.extend_from_slice(&input.heap_size.to_le_bytes());
    out.extend_from_slice(&input.chronon_budget.to_le_bytes());
    out.extend_from_slice(&3u32.to_le_bytes()); // capability template count
    out.extend_from_slice(&(input.effects.len() as u32).to_le_bytes());
    out.extend_from_slice(proof_root);
    out
}

fn build_proof_table(proofs: &ProofTable, hashes: &[crate::merkle::Hash32]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&PROOF_TABLE_MAGIC);
    out.extend_from_slice(&(proofs.entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&proofs.counters.proven.to_le_bytes());
    out.extend_from_slice(&proofs.counters.runtime.to_le_bytes());
    out.extend_from_slice(&proofs.counters.failed.to_le_bytes());
    for hash in hashes {
        out.extend_from_slice(hash);
    }
    out
}

fn build_cap_table(caps: &[CapabilityTemplate; 3]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&CAP_TABLE_MAGIC);
    out.extend_from_slice(&(caps.len() as u32).to_le_bytes());
    for cap in caps {
        out.extend_from_slice(&cap.base.to_le_bytes());
        out.extend_from_slice(&cap.length.to_le_bytes());
        out.extend_from_slice(&cap.permissions.to_le_bytes());
        out.extend_from_slice(&cap.flags.to_le_bytes());
        out.extend_from_slice(&cap.name_offset.to_le_bytes());
    }
    out
}

fn build_effect_table(effects: &[EffectTableEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&EFFECT_TABLE_MAGIC);
    out.extend_from_slice(&(effects.len() as u32).to_le_bytes());
    let pure_count = effects.iter().filter(|e| e.declared_mask == 0).count() as u32;
    out.extend_from_slice(&pure_count.to_le_bytes());
    for effect in effects {
        out.extend_from_slice(&effect.function_offset.to_le_bytes());
        out.extend_from_slice(&effect.function_size.to_le_bytes());
        out.extend_from_slice(&effect.declared_mask.to_le_bytes());
        out.extend_from_slice(&effect.verified_mask.to_le_bytes());
        out.extend_from_slice(&effect.required_capability_mask.to_le_bytes());
        out.extend_from_slice(&effect.name_offset.to_le_bytes());
    }
    out
}

fn build_string_table(strings: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&STRING_TABLE_MAGIC);
    out.extend_from_slice(&(strings.len() as u32).to_le_bytes());
    out.extend_from_slice(strings);
    out
}

/// Policy gate used by the CLI: `failed_count > 0` does not by itself block
/// writing an image (loader-side policy decides at load time, §4.8 step 4),
/// but a writer convenience check is still useful to surface it early.
pub fn has_failed_proofs(proofs: &ProofTable) -> bool {
    proofs.counters.failed > 0 && proofs.entries.iter().any(|e| matches!(e.status, ProofStatus::Failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::format::FormatError;

    fn sample_input(proofs: &ProofTable) -> WriterInput<'_> {
        WriterInput {
            architecture: Architecture::X86_64,
            entry_point_offset: 0,
            code: &[0x90, 0x90, 0xC3],
            rodata: &[],
            data: &[],
            bss_size: 0,
            proofs,
            effects: &[],
            stack_size: 1 << 20,
            heap_size: 1 << 20,
            chronon_budget: 1000,
        }
    }

    #[test]
    fn written_image_round_trips_its_header() {
        let proofs = ProofTable::default();
        let input = sample_input(&proofs);
        let bytes = build_image(&input);
        let header = ImageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.total_size as usize, bytes.len());
        assert_eq!(header.code.size, 3);
    }

    #[test]
    fn content_hash_covers_everything_after_the_header() {
        let proofs = ProofTable::default();
        let input = sample_input(&proofs);
        let bytes = build_image(&input);
        let header = ImageHeader::from_bytes(&bytes).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes[ImageHeader::ENCODED_LEN..]);
        let recomputed: [u8; 32] = hasher.finalize().into();
        assert_eq!(recomputed, header.content_hash);
    }

    #[test]
    fn empty_proof_table_yields_all_zero_proof_root() {
        let proofs = ProofTable::default();
        let input = sample_input(&proofs);
        let bytes = build_image(&input);
        let header = ImageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.proof_root, [0u8; 32]);
    }

    #[test]
    fn undersized_buffer_is_rejected_cleanly() {
        let proofs = ProofTable::default();
        let input = sample_input(&proofs);
        let mut tiny = [0u8; 4];
        let err = build_image_into(&input, &mut tiny).unwrap_err();
        assert!(matches!(err, WriterError::BufferTooSmall { .. }));
    }

    #[test]
    fn bad_magic_in_round_tripped_bytes_is_still_caught() {
        let proofs = ProofTable::default();
        let input = sample_input(&proofs);
        let mut bytes = build_image(&input);
        bytes[0] = 0;
        assert_eq!(ImageHeader::from_bytes(&bytes).unwrap_err(), FormatError::BadMagic);
    }
}
