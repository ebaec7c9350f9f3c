//! On-disk image layout (§3 "Executable image", §4.7).
//!
//! Every multi-byte field is little-endian and hand-packed with
//! `to_le_bytes`/`from_le_bytes`, matching the rest of the pipeline's
//! no-serialization-crate policy (C10 has no business depending on serde
//! for a handful of fixed-width structs).

pub const HEADER_MAGIC: [u8; 4] = *b"SRAH";
pub const MANIFEST_MAGIC: [u8; 4] = *b"SRAM";
pub const PROOF_TABLE_MAGIC: [u8; 4] = *b"SRAP";
pub const CAP_TABLE_MAGIC: [u8; 4] = *b"SRAC";
pub const EFFECT_TABLE_MAGIC: [u8; 4] = *b"SRAE";
pub const STRING_TABLE_MAGIC: [u8; 4] = *b"SRAS";

pub const CODE_ALIGN: u64 = 16;
pub const SECTION_ALIGN: u64 = 8;
pub const DEFAULT_USER_LOAD_BASE: u64 = 0x400000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86_64,
    Aarch64,
    Riscv64,
}

impl Architecture {
    pub fn to_id(self) -> u32 {
        match self {
            Architecture::X86_64 => 1,
            Architecture::Aarch64 => 2,
            Architecture::Riscv64 => 3,
        }
    }

    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(Architecture::X86_64),
            2 => Some(Architecture::Aarch64),
            3 => Some(Architecture::Riscv64),
            _ => None,
        }
    }
}

pub const HEADER_FLAG_SIGNED: u32 = 1 << 0;

/// `{offset, size}` into the file, measured from byte 0 (§3 "executable
/// image").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionRef {
    pub offset: u64,
    pub size: u64,
}

impl SectionRef {
    const ENCODED_LEN: usize = 16;

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }

    fn read(bytes: &[u8]) -> Self {
        SectionRef {
            offset: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            size: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        }
    }
}

/// The spec's "fixed 64-byte header" names a content-hash and a proof-root
/// field that are 32 bytes apiece before a single other field is counted;
/// taken literally, no 64-byte header can hold them plus the nine section
/// refs the same paragraph requires. This struct keeps every field the data
/// model names and derives `ENCODED_LEN` from the real layout instead of
/// hardcoding 64 (see DESIGN.md's header-size open question).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub architecture: Architecture,
    pub flags: u32,
    pub entry_point: u64,
    pub total_size: u64,
    pub content_hash: [u8; 32],
    pub proof_root: [u8; 32],
    pub manifest: SectionRef,
    pub code: SectionRef,
    pub rodata: SectionRef,
    pub data: SectionRef,
    pub bss: SectionRef,
    pub proof_table: SectionRef,
    pub cap_table: SectionRef,
    pub effect_table: SectionRef,
    pub string_table: SectionRef,
}

impl ImageHeader {
    pub const ENCODED_LEN: usize = 4 + 2 + 2 + 4 + 4 + 8 + 8 + 32 + 32 + SectionRef::ENCODED_LEN * 9;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::ENCODED_LEN);
        out.extend_from_slice(&HEADER_MAGIC);
        out.extend_from_slice(&self.version_major.to_le_bytes());
        out.extend_from_slice(&self.version_minor.to_le_bytes());
        out.extend_from_slice(&self.architecture.to_id().to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.entry_point.to_le_bytes());
        out.extend_from_slice(&self.total_size.to_le_bytes());
        out.extend_from_slice(&self.content_hash);
        out.extend_from_slice(&self.proof_root);
        for section in [
            &self.manifest,
            &self.code,
            &self.rodata,
            &self.data,
            &self.bss,
            &self.proof_table,
            &self.cap_table,
            &self.effect_table,
            &self.string_table,
        ] {
            section.write(&mut out);
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < Self::ENCODED_LEN {
            return Err(FormatError::Truncated);
        }
        if bytes[0..4] != HEADER_MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version_major = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
        let version_minor = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
        let arch_id = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let architecture = Architecture::from_id(arch_id).ok_or(FormatError::UnknownArchitecture(arch_id))?;
        let flags = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        let entry_point = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
        let total_size = u64::from_le_bytes(bytes[24..32].try_into().unwrap());
        let mut content_hash = [0u8; 32];
        content_hash.copy_from_slice(&bytes[32..64]);
        let mut proof_root = [0u8; 32];
        proof_root.copy_from_slice(&bytes[64..96]);

        let mut cursor = 96;
        let mut next_section = || {
            let section = SectionRef::read(&bytes[cursor..cursor + SectionRef::ENCODED_LEN]);
            cursor += SectionRef::ENCODED_LEN;
            section
        };
        Ok(ImageHeader {
            version_major,
            version_minor,
            architecture,
            flags,
            entry_point,
            total_size,
            content_hash,
            proof_root,
            manifest: next_section(),
            code: next_section(),
            rodata: next_section(),
            data: next_section(),
            bss: next_section(),
            proof_table: next_section(),
            cap_table: next_section(),
            effect_table: next_section(),
            string_table: next_section(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    Truncated,
    BadMagic,
    UnknownArchitecture(u32),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Truncated => write!(f, "buffer too short for a header"),
            FormatError::BadMagic => write!(f, "header magic mismatch"),
            FormatError::UnknownArchitecture(id) => write!(f, "unknown architecture id {id}"),
        }
    }
}

impl std::error::Error for FormatError {}

/// §6 "Capability template": `{base:u64, length:u64, permissions:u32,
/// flags:u32, name_offset:u32→string}`.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityTemplate {
    pub base: u64,
    pub length: u64,
    pub permissions: u32,
    pub flags: u32,
    pub name_offset: u32,
}

/// §6 "Effect entry": `{function_offset:u32, function_size:u32,
/// declared_effects:u32, verified_effects:u32, required_caps:u32,
/// name_offset:u32→string}`. Function offsets fit in 32 bits: the code
/// section itself is bounded by `u32::MAX` the moment a `u32` relocation
/// immediate is the widest call-target encoding any of the three backends
/// can emit.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectTableEntry {
    pub function_offset: u32,
    pub function_size: u32,
    pub declared_mask: u32,
    pub verified_mask: u32,
    pub required_capability_mask: u32,
    pub name_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ImageHeader {
        ImageHeader {
            version_major: 1,
            version_minor: 0,
            architecture: Architecture::X86_64,
            flags: 0,
            entry_point: 0x401000,
            total_size: 4096,
            content_hash: [0xAB; 32],
            proof_root: [0xCD; 32],
            manifest: SectionRef { offset: 96, size: 64 },
            code: SectionRef { offset: 160, size: 128 },
            rodata: SectionRef::default(),
            data: SectionRef::default(),
            bss: SectionRef::default(),
            proof_table: SectionRef::default(),
            cap_table: SectionRef::default(),
            effect_table: SectionRef::default(),
            string_table: SectionRef::default(),
        }
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let header = sample_header();
        let bytes = header.to_bytes();
        let parsed = ImageHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] = b'X';
        assert_eq!(ImageHeader::from_bytes(&bytes), Err(FormatError::BadMagic));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let bytes = sample_header().to_bytes();
        assert_eq!(ImageHeader::from_bytes(&bytes[..10]), Err(FormatError::Truncated));
    }
}
