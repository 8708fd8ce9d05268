//! Module file resolution
//!
//! Search order: the live search path, front to back. Within one directory a
//! compiled `.wasm` binary is preferred over `.wat` text.

use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};

/// Extensions tried for each directory, in order
pub const MODULE_EXTENSIONS: [&str; 2] = ["wasm", "wat"];

/// WASM binary magic bytes (`\0asm`)
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6D];

/// Check the binary magic header. Full validation happens at compile time.
pub fn is_valid_wasm(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[..4] == WASM_MAGIC
}

/// Relative file stem for a module name.
///
/// Dotted names map to subdirectories: `pkg.mod` -> `pkg/mod`. Names with
/// empty segments or path syntax resolve to nothing.
pub fn module_stem(name: &str) -> Option<PathBuf> {
    let parts: Vec<&str> = name.split('.').collect();
    let valid = parts.iter().all(|part| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    });
    if !valid {
        return None;
    }
    Some(PathBuf::from(parts.join(MAIN_SEPARATOR_STR)))
}

/// Find the first file for `name` along `search_path`
pub fn locate<'a, I>(
    search_path: I,
    name: &str,
) -> Option<PathBuf>
where
    I: IntoIterator<Item = &'a Path>,
{
    let stem = module_stem(name)?;
    for dir in search_path {
        for ext in MODULE_EXTENSIONS {
            let candidate = dir.join(&stem).with_extension(ext);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
