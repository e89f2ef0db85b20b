#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! HTTP fetcher for repository resources
//!
//! Produces files on disk plus per-file sidecar metadata used for
//! cache validation (`If-Modified-Since` / `If-None-Match`) and
//! resumable range requests. One resource has at most one in-flight
//! request; a resume restart counts as the same logical request.

mod fetcher;
mod sidecar;

pub use fetcher::{Credentials, FetchOptions, FetchOutcome, Fetcher, MinTlsVersion, RedirectPolicy};
pub use sidecar::{Sidecar, SIDECAR_XATTR};
