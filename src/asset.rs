//! Mesh and texture references.
//!
//! A reference is either a plain path or `scheme://path` for any scheme token
//! (`package://`, `model://`, `file://`, ...). Remote schemes are kept verbatim,
//! everything else is stripped of its prefix and joined onto the asset root.

use std::path::{Path, PathBuf};

use crate::error::ParseError;

/// Schemes that name something outside the local file system.
const REMOTE_SCHEMES: [&str; 3] = ["http", "https", "omniverse"];

/// Where a reference ends up once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetLocation {
    /// URL handed to the sink untouched.
    Remote(String),
    /// Local file path.
    File(PathBuf),
}

/// A parsed `filename` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRef {
    /// The attribute value as written.
    pub raw: String,
    /// Scheme token without `://`, if any.
    pub scheme: Option<String>,
    /// Path part after the scheme.
    pub path: String,
    /// Resolved location.
    pub location: AssetLocation,
}

impl AssetRef {
    /// Parse `raw` and resolve it against `asset_root`.
    ///
    /// # Errors
    ///
    /// [`ParseError::UnresolvableAssetRef`] when the path part is empty or the scheme
    /// token is empty or not a plain identifier.
    pub fn parse(raw: &str, asset_root: Option<&Path>) -> Result<Self, ParseError> {
        let trimmed = raw.trim();
        let (scheme, path) = match trimmed.find("://") {
            Some(p) => {
                let scheme = &trimmed[..p];
                if !is_scheme_token(scheme) {
                    return Err(ParseError::UnresolvableAssetRef(raw.to_string()));
                }
                (Some(scheme.to_ascii_lowercase()), &trimmed[p + 3..])
            }
            None => (None, trimmed),
        };
        if path.is_empty() {
            return Err(ParseError::UnresolvableAssetRef(raw.to_string()));
        }

        let location = match scheme.as_deref() {
            Some(s) if REMOTE_SCHEMES.contains(&s) => AssetLocation::Remote(trimmed.to_string()),
            _ => {
                let p = Path::new(path);
                if p.is_absolute() {
                    AssetLocation::File(p.to_path_buf())
                } else {
                    match asset_root {
                        Some(root) => AssetLocation::File(root.join(p)),
                        None => AssetLocation::File(p.to_path_buf()),
                    }
                }
            }
        };

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            path: path.to_string(),
            location,
        })
    }

    /// Local path, if the reference is not remote.
    pub fn file(&self) -> Option<&Path> {
        match &self.location {
            AssetLocation::File(p) => Some(p),
            AssetLocation::Remote(_) => None,
        }
    }
}

fn is_scheme_token(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}
