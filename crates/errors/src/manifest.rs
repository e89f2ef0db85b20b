//! Manifest resolution error types

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ManifestError {
    /// The server did not hand us the manifest. Drives primary-manifest
    /// fallback; every other manifest error is fatal to the run.
    #[error("manifest {name} could not be retrieved: {detail}")]
    NotRetrieved { name: String, detail: String },

    #[error("manifest {name} is not valid: {detail}")]
    Invalid { name: String, detail: String },

    #[error("no primary manifest found (tried {tried})")]
    NoPrimaryManifest { tried: String },

    #[error("bad predicate {predicate:?}: {detail}")]
    BadPredicate { predicate: String, detail: String },
}
