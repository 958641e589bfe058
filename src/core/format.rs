//! Purpose: Centralize store format versioning and page-size policy.
//! Exports: `STORE_FORMAT_VERSION`, `SUPPORTED_STORE_FORMAT_VERSIONS`,
//! `SUPPORTED_PAGE_SIZES`, `version_error`, `page_size_error`.
//! Role: Shared policy for gating on-disk compatibility across open/validation paths.
//! Invariants: Version list is additive; bump only for incompatible on-disk changes.
//! Invariants: Page-size set matches what the builder is willing to produce.

use crate::core::error::{Error, ErrorKind};

pub const STORE_FORMAT_VERSION: u32 = 1;
pub const SUPPORTED_STORE_FORMAT_VERSIONS: &[u32] = &[STORE_FORMAT_VERSION];

pub const SUPPORTED_PAGE_SIZES: &[u32] = &[4096, 8192, 16384, 32768];

pub fn version_error(detected: u32) -> Error {
    let supported = SUPPORTED_STORE_FORMAT_VERSIONS
        .iter()
        .map(|version| version.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::new(ErrorKind::Usage)
        .with_message(format!(
            "unsupported store format version {detected} (supported: {supported})"
        ))
        .with_hint("Upgrade coffer, or re-export the database with a current writer.")
}

pub fn page_size_error(detected: u32) -> Error {
    let supported = SUPPORTED_PAGE_SIZES
        .iter()
        .map(|size| size.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    Error::new(ErrorKind::Usage).with_message(format!(
        "unsupported page size {detected} (supported: {supported})"
    ))
}
