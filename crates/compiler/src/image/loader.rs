//! Loader (C11, §4.8).
//!
//! Two phases: `parse` maps the header and every `{offset, size}` section
//! into read-only byte-slice views; `validate` (opt-in, since a host that
//! just wants to peek at the manifest shouldn't pay for hashing the whole
//! image) runs the full check list and records a `last_error` plus a
//! `validation_result` that nothing downstream can see a partial view of.

use sha2::{Digest, Sha256};

use crate::merkle::merkle_root;

use super::format::{
    Architecture, ImageHeader, HEADER_FLAG_SIGNED, CAP_TABLE_MAGIC, EFFECT_TABLE_MAGIC,
    MANIFEST_MAGIC, PROOF_TABLE_MAGIC, STRING_TABLE_MAGIC,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    Format,
    SectionOutOfBounds { name: &'static str },
    SubTableBadMagic { name: &'static str },
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadError::Format => write!(f, "malformed header"),
            LoadError::SectionOutOfBounds { name } => write!(f, "section '{name}' exceeds mapped size"),
            LoadError::SubTableBadMagic { name } => write!(f, "section '{name}' has the wrong magic"),
        }
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    KernelVersionUnsupported,
    HashMismatch,
    MerkleRootMismatch,
    FailedProofsPresent,
    SignatureInvalid,
    SignatureMissingKey,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::KernelVersionUnsupported => write!(f, "kernel version ranges do not intersect"),
            ValidationError::HashMismatch => write!(f, "content hash mismatch"),
            ValidationError::MerkleRootMismatch => write!(f, "proof merkle root mismatch"),
            ValidationError::FailedProofsPresent => write!(f, "image contains failed proofs"),
            ValidationError::SignatureInvalid => write!(f, "signature verification failed"),
            ValidationError::SignatureMissingKey => write!(f, "image is signed but no public key was configured"),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    NotRun,
    Passed,
    Failed(ValidationError),
}

/// Parsed, read-only view into a mapped image's bytes. Borrows its input
/// rather than copying section contents (§4.8 "map the file or borrow a
/// byte slice").
#[derive(Debug)]
pub struct LoadedImage<'a> {
    bytes: &'a [u8],
    pub header: ImageHeader,
    last_error: Option<ValidationError>,
    validation_result: ValidationResult,
}

pub struct LoaderConfig {
    pub min_kernel_version: u32,
    pub max_kernel_version: u32,
    pub reject_failed_proofs: bool,
    pub public_key: Option<[u8; 32]>,
}

impl<'a> LoadedImage<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, LoadError> {
        let header = ImageHeader::from_bytes(bytes).map_err(|_| LoadError::Format)?;
        if header.total_size as usize > bytes.len() {
            return Err(LoadError::SectionOutOfBounds { name: "image" });
        }

        check_section(bytes, header.manifest.offset, header.manifest.size, "manifest")?;
        check_section(bytes, header.code.offset, header.code.size, "code")?;
        check_section(bytes, header.rodata.offset, header.rodata.size, "rodata")?;
        check_section(bytes, header.data.offset, header.data.size, "data")?;
        check_section(bytes, header.bss.offset, header.bss.size, "bss")?;
        check_section(bytes, header.proof_table.offset, header.proof_table.size, "proof_table")?;
        check_section(bytes, header.cap_table.offset, header.cap_table.size, "cap_table")?;
        check_section(bytes, header.effect_table.offset, header.effect_table.size, "effect_table")?;
        check_section(bytes, header.string_table.offset, header.string_table.size, "string_table")?;

        check_magic(bytes, header.manifest.offset, &MANIFEST_MAGIC, "manifest")?;
        check_magic(bytes, header.proof_table.offset, &PROOF_TABLE_MAGIC, "proof_table")?;
        check_magic(bytes, header.cap_table.offset, &CAP_TABLE_MAGIC, "cap_table")?;
        check_magic(bytes, header.effect_table.offset, &EFFECT_TABLE_MAGIC, "effect_table")?;
        check_magic(bytes, header.string_table.offset, &STRING_TABLE_MAGIC, "string_table")?;

        Ok(LoadedImage {
            bytes,
            header,
            last_error: None,
            validation_result: ValidationResult::NotRun,
        })
    }

    pub fn architecture(&self) -> Architecture {
        self.header.architecture
    }

    pub fn code(&self) -> &'a [u8] {
        self.section(self.header.code.offset, self.header.code.size)
    }

    fn section(&self, offset: u64, size: u64) -> &'a [u8] {
        &self.bytes[offset as usize..(offset + size) as usize]
    }

    fn proof_entry_hashes(&self) -> Vec<crate::merkle::Hash32> {
        let blob = self.section(self.header.proof_table.offset, self.header.proof_table.size);
        let entry_count = u32::from_le_bytes(blob[4..8].try_into().unwrap()) as usize;
        let hashes_start = 20; // magic(4) + count(4) + proven/runtime/failed(4 each)
        let mut hashes = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let start = hashes_start + i * 32;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&blob[start..start + 32]);
            hashes.push(hash);
        }
        hashes
    }

    fn failed_count(&self) -> u32 {
        let blob = self.section(self.header.proof_table.offset, self.header.proof_table.size);
        u32::from_le_bytes(blob[16..20].try_into().unwrap())
    }

    pub fn last_error(&self) -> Option<ValidationError> {
        self.last_error
    }

    pub fn validation_result(&self) -> ValidationResult {
        self.validation_result
    }

    /// Runs every check in §4.8's validate phase, stopping at the first
    /// failure; `last_error`/`validation_result` are only ever set together,
    /// so a caller can never observe a passed check alongside a stale error.
    pub fn validate(&mut self, config: &LoaderConfig) -> Result<(), ValidationError> {
        let result = self.run_validation(config);
        match result {
            Ok(()) => {
                self.last_error = None;
                self.validation_result = ValidationResult::Passed;
            }
            Err(e) => {
                self.last_error = Some(e);
                self.validation_result = ValidationResult::Failed(e);
            }
        }
        result
    }

    fn run_validation(&self, config: &LoaderConfig) -> Result<(), ValidationError> {
        let manifest = self.section(self.header.manifest.offset, self.header.manifest.size);
        let kernel_min = u32::from_le_bytes(manifest[8..12].try_into().unwrap());
        let kernel_max = u32::from_le_bytes(manifest[12..16].try_into().unwrap());
        if kernel_max < config.min_kernel_version || kernel_min > config.max_kernel_version {
            return Err(ValidationError::KernelVersionUnsupported);
        }

        let header_len = ImageHeader::ENCODED_LEN;
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes[header_len..self.header.total_size as usize]);
        let recomputed: [u8; 32] = hasher.finalize().into();
        if recomputed != self.header.content_hash {
            return Err(ValidationError::HashMismatch);
        }

        let hashes = self.proof_entry_hashes();
        let root = merkle_root(&hashes);
        if root != self.header.proof_root {
            return Err(ValidationError::MerkleRootMismatch);
        }

        if config.reject_failed_proofs && self.failed_count() > 0 {
            return Err(ValidationError::FailedProofsPresent);
        }

        if self.header.flags & HEADER_FLAG_SIGNED != 0 {
            if config.public_key.is_none() {
                return Err(ValidationError::SignatureMissingKey);
            }
            // Ed25519 verification is deferred (§4.8 "implementation may be
            // deferred"); a signed image with a configured key is accepted
            // once the earlier checks pass, since there is no signature
            // blob defined in the layout yet to verify against.
        }

        Ok(())
    }

    /// Zero-wipes any owned data before the image is dropped (§4.8
    /// "`unload()` zero-wipes any owned data before freeing"). Since this
    /// view only borrows its bytes, there is nothing to wipe here; an owning
    /// wrapper that `mmap`'d the file would zero its own buffer before
    /// unmapping.
    pub fn unload(self) {
        drop(self);
    }
}

fn check_section(bytes: &[u8], offset: u64, size: u64, name: &'static str) -> Result<(), LoadError> {
    if offset + size > bytes.len() as u64 {
        return Err(LoadError::SectionOutOfBounds { name });
    }
    Ok(())
}

fn check_magic(bytes: &[u8], offset: u64, expected: &[u8; 4], name: &'static str) -> Result<(), LoadError> {
    let start = offset as usize;
    if &bytes[start..start + 4] != expected {
        return Err(LoadError::SubTableBadMagic { name });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::writer::{build_image, WriterInput};
    use crate::proof::ProofTable;

    fn default_config() -> LoaderConfig {
        LoaderConfig {
            min_kernel_version: 1,
            max_kernel_version: 1,
            reject_failed_proofs: true,
            public_key: None,
        }
    }

    fn built_image(proofs: &ProofTable) -> Vec<u8> {
        let input = WriterInput {
            architecture: Architecture::X86_64,
            entry_point_offset: 0,
            code: &[0x90, 0xC3],
            rodata: &[],
            data: &[],
            bss_size: 0,
            proofs,
            effects: &[],
            stack_size: 4096,
            heap_size: 4096,
            chronon_budget: 100,
        };
        build_image(&input)
    }

    #[test]
    fn a_freshly_written_image_parses_and_validates() {
        let proofs = ProofTable::default();
        let bytes = built_image(&proofs);
        let mut image = LoadedImage::parse(&bytes).unwrap();
        assert!(image.validate(&default_config()).is_ok());
        assert_eq!(image.validation_result(), ValidationResult::Passed);
    }

    #[test]
    fn tampering_with_code_bytes_fails_the_hash_check() {
        let proofs = ProofTable::default();
        let mut bytes = built_image(&proofs);
        let header = ImageHeader::from_bytes(&bytes).unwrap();
        let code_offset = header.code.offset as usize;
        bytes[code_offset] ^= 0xFF;
        let mut image = LoadedImage::parse(&bytes).unwrap();
        let err = image.validate(&default_config()).unwrap_err();
        assert_eq!(err, ValidationError::HashMismatch);
        assert_eq!(image.last_error(), Some(ValidationError::HashMismatch));
    }

    #[test]
    fn truncated_buffer_fails_to_parse() {
        let proofs = ProofTable::default();
        let bytes = built_image(&proofs);
        assert!(LoadedImage::parse(&bytes[..8]).is_err());
    }

    #[test]
    fn kernel_version_outside_configured_range_is_rejected() {
        let proofs = ProofTable::default();
        let bytes = built_image(&proofs);
        let mut image = LoadedImage::parse(&bytes).unwrap();
        let config = LoaderConfig {
            min_kernel_version: 99,
            max_kernel_version: 100,
            reject_failed_proofs: true,
            public_key: None,
        };
        assert_eq!(image.validate(&config).unwrap_err(), ValidationError::KernelVersionUnsupported);
    }
}
