//! Run identity derivation.
//!
//! A run is identified two ways: a *stable hash* that is a pure function of
//! (feature name, normalized feature root, target) and therefore identical
//! across processes and machines, and a *full id* unique per invocation,
//! `conv-<UTC timestamp>-<stable hash>`. The stable hash is the join key for
//! the completed-run registry; the full id keys per-run artifacts. Resuming
//! reuses a prior full id verbatim after checking its embedded hash still
//! matches the current parameters.

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::errors::PipelineError;

/// Hex width of the stable hash segment.
const STABLE_HASH_LEN: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIdentity {
    pub stable_hash: String,
    pub full_id: String,
}

impl RunIdentity {
    /// Resolve the identity for one invocation.
    ///
    /// With `explicit_run_id` (the resume path) the id is trusted verbatim,
    /// but its embedded hash segment must match the hash recomputed from the
    /// current parameters; a mismatch means the caller changed feature, root
    /// or target between runs and must not resume into the wrong artifacts.
    pub fn resolve(
        feature_name: &str,
        feature_root: &str,
        target: &str,
        explicit_run_id: Option<&str>,
    ) -> Result<Self, PipelineError> {
        let stable_hash = stable_hash(feature_name, feature_root, target);

        match explicit_run_id {
            Some(run_id) => {
                let embedded = embedded_hash(run_id);
                if embedded != stable_hash {
                    return Err(PipelineError::ResumeMismatch {
                        run_id: run_id.to_string(),
                        embedded: embedded.to_string(),
                        computed: stable_hash,
                    });
                }
                Ok(Self {
                    stable_hash,
                    full_id: run_id.to_string(),
                })
            }
            None => {
                let ts = Utc::now().format("%Y%m%d-%H%M%S");
                let full_id = format!("conv-{ts}-{stable_hash}");
                Ok(Self {
                    stable_hash,
                    full_id,
                })
            }
        }
    }
}

/// Pure stable hash of (feature_name, normalized root, target), truncated.
pub fn stable_hash(feature_name: &str, feature_root: &str, target: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(feature_name.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_root(feature_root).as_bytes());
    hasher.update([0u8]);
    hasher.update(target.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..STABLE_HASH_LEN].to_string()
}

/// Case-fold and separator-normalize a feature root so the same logical path
/// hashes identically regardless of platform spelling.
fn normalize_root(root: &str) -> String {
    let mut s = root.replace('\\', "/").to_lowercase();
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// The hash segment embedded in a full run id (text after the last '-').
fn embedded_hash(run_id: &str) -> &str {
    run_id.rsplit('-').next().unwrap_or(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_deterministic() {
        let a = stable_hash("ActionHistory", "/src/ActionHistory", "snake_case");
        let b = stable_hash("ActionHistory", "/src/ActionHistory", "snake_case");
        assert_eq!(a, b);
        assert_eq!(a.len(), STABLE_HASH_LEN);
    }

    #[test]
    fn test_stable_hash_normalizes_separators_and_case() {
        let unix = stable_hash("ActionHistory", "/src/ActionHistory", "snake_case");
        let win = stable_hash("ActionHistory", "\\src\\actionhistory", "snake_case");
        let trailing = stable_hash("ActionHistory", "/src/ActionHistory/", "snake_case");
        assert_eq!(unix, win);
        assert_eq!(unix, trailing);
    }

    #[test]
    fn test_stable_hash_differs_per_input() {
        let base = stable_hash("ActionHistory", "/src/ActionHistory", "snake_case");
        assert_ne!(
            base,
            stable_hash("OtherFeature", "/src/ActionHistory", "snake_case")
        );
        assert_ne!(
            base,
            stable_hash("ActionHistory", "/src/Other", "snake_case")
        );
        assert_ne!(
            base,
            stable_hash("ActionHistory", "/src/ActionHistory", "hrsa_pprs")
        );
    }

    #[test]
    fn test_resolve_fresh_id_embeds_hash() {
        let id = RunIdentity::resolve("ActionHistory", "/src/ActionHistory", "snake_case", None)
            .unwrap();
        assert!(id.full_id.starts_with("conv-"));
        assert!(id.full_id.ends_with(&id.stable_hash));
    }

    #[test]
    fn test_resolve_resume_reuses_id_verbatim() {
        let first = RunIdentity::resolve("ActionHistory", "/src/ActionHistory", "snake_case", None)
            .unwrap();
        let resumed = RunIdentity::resolve(
            "ActionHistory",
            "/src/ActionHistory",
            "snake_case",
            Some(&first.full_id),
        )
        .unwrap();
        assert_eq!(resumed.full_id, first.full_id);
        assert_eq!(resumed.stable_hash, first.stable_hash);
    }

    #[test]
    fn test_resolve_resume_mismatch_refuses() {
        let first = RunIdentity::resolve("ActionHistory", "/src/ActionHistory", "snake_case", None)
            .unwrap();
        let err = RunIdentity::resolve(
            "ActionHistory",
            "/src/SomewhereElse",
            "snake_case",
            Some(&first.full_id),
        )
        .unwrap_err();
        match err {
            PipelineError::ResumeMismatch {
                run_id,
                embedded,
                computed,
            } => {
                assert_eq!(run_id, first.full_id);
                assert_eq!(embedded, first.stable_hash);
                assert_ne!(embedded, computed);
            }
            other => panic!("expected ResumeMismatch, got {other:?}"),
        }
    }
}
