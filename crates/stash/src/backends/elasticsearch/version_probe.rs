//! 🔢 Version probe — "how old is this cluster, and is that a problem?"
//!
//! We ask `_cat/nodes` for versions, take the first line, and compare it to
//! [`MINIMUM_SUPPORTED_VERSION`] segment by segment, numerically. `8.10.0` beats `8.9.9`,
//! no matter what a string comparison would like you to believe.
//!
//! Pre-release and build suffixes (`-SNAPSHOT`, `+build.7`) are ignored, as are a
//! leading `v` and surrounding whitespace. Missing segments count as zero, so `8` is `8.0.0`.

use std::cmp::Ordering;

use anyhow::{Context, Result};
use tracing::info;

use super::ElasticsearchClient;
use crate::errors::{UnsupportedVersionError, VersionParseError};

/// 🎯 The oldest cluster we index into. 8.x dropped mapping types, and so did we.
pub const MINIMUM_SUPPORTED_VERSION: &str = "8.0.0";

/// 🔢 Parses a dotted version into its numeric segments.
pub fn parse_version(version: &str) -> Result<Vec<u64>, VersionParseError> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    // ✂️ drop pre-release / build metadata, we only order on the numbers
    let core = trimmed.split(['-', '+']).next().unwrap_or_default();
    if core.is_empty() {
        return Err(VersionParseError::Empty);
    }

    core.split('.')
        .map(|segment| {
            segment
                .parse::<u64>()
                .map_err(|_| VersionParseError::InvalidSegment {
                    version: version.to_string(),
                    segment: segment.to_string(),
                })
        })
        .collect()
}

/// ⚖️ Orders two dotted versions numerically, padding the shorter one with zeros.
pub fn compare_versions(left: &str, right: &str) -> Result<Ordering, VersionParseError> {
    let left = parse_version(left)?;
    let right = parse_version(right)?;
    let width = left.len().max(right.len());
    let segment = |v: &[u64], i: usize| v.get(i).copied().unwrap_or(0);

    Ok((0..width)
        .map(|i| segment(left.as_slice(), i).cmp(&segment(right.as_slice(), i)))
        .find(|ordering| ordering.is_ne())
        .unwrap_or(Ordering::Equal))
}

/// ✅ `true` iff `version >= 8.0.0`. Unparseable versions are not supported, full stop.
pub fn is_supported_version(version: &str) -> bool {
    matches!(
        compare_versions(version, MINIMUM_SUPPORTED_VERSION),
        Ok(Ordering::Greater | Ordering::Equal)
    )
}

/// 📋 Extracts the version token from a `_cat/nodes?h=version` listing: first line, trimmed.
pub fn first_version_token(listing: &str) -> Result<String, VersionParseError> {
    let first_line = listing.lines().next().map(str::trim).unwrap_or_default();
    if first_line.is_empty() {
        return Err(VersionParseError::Empty);
    }
    // 🧹 tolerate a listing with extra columns, the version is the first one
    let token = first_line.split_whitespace().next().unwrap_or(first_line);
    Ok(token.to_string())
}

/// 📡 Asks the cluster for its version. Network and decode failures are errors.
pub async fn probe_version(client: &ElasticsearchClient) -> Result<String> {
    let listing = client
        .cat_nodes_versions()
        .await
        .context("💀 Could not ask the cluster for its version. Is it running? Is it reachable? Is it even Elasticsearch?")?;
    let version = first_version_token(&listing)
        .context("💀 The node listing came back, but we could not find a version in it")?;
    // -- validate it parses now, so a garbage token is a decode error and not "unsupported"
    parse_version(&version)
        .with_context(|| format!("💀 '{version}' does not look like a version number"))?;
    info!(%version, "📡 Elasticsearch version detected");
    Ok(version)
}

/// 🚧 The version gate. Below the minimum, you get a typed error the binary can act on.
pub fn ensure_supported(version: &str) -> Result<(), UnsupportedVersionError> {
    if is_supported_version(version) {
        Ok(())
    } else {
        Err(UnsupportedVersionError {
            found: version.to_string(),
            minimum: MINIMUM_SUPPORTED_VERSION.to_string(),
        })
    }
}
