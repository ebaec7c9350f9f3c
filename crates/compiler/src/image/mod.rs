//! Executable image format, writer, and loader (§3, C10, C11).

pub mod format;
pub mod loader;
pub mod writer;

pub use format::{Architecture, ImageHeader};
pub use loader::{LoadError, LoadedImage, LoaderConfig, ValidationError, ValidationResult};
pub use writer::{build_image, build_image_into, write_image_to_file, EffectSpec, WriterInput};
