//! The canonical `api_path` type: a `/`-separated absolute path used as the
//! primary key throughout the core. Host-specific paths (Windows
//! backslashes, FUSE paths) are normalized into this type at the adapter
//! boundary (`drive`), never inside the file manager or providers.

use std::fmt;

use crate::error::ApiError;

/// A canonical, absolute, `/`-separated path with no trailing slash and no
/// empty segments. Always starts with `/`. `/` itself is the root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ApiPath(String);

impl ApiPath {
    pub const ROOT: &'static str = "/";

    /// Normalizes an arbitrary string into an [`ApiPath`]: collapses
    /// backslashes to slashes, drops empty segments (including ones
    /// produced by repeated slashes), and strips any trailing slash.
    pub fn normalize(raw: &str) -> Result<Self, ApiError> {
        let unified = raw.replace('\\', "/");
        let segments: Vec<&str> = unified.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Ok(Self(Self::ROOT.to_string()));
        }
        for segment in &segments {
            if *segment == "." || *segment == ".." {
                return Err(ApiError::InvalidArgument);
            }
        }
        Ok(Self(format!("/{}", segments.join("/"))))
    }

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    /// The parent of this path; the root is its own parent.
    pub fn parent(&self) -> ApiPath {
        if self.is_root() {
            return self.clone();
        }
        match self.0.rfind('/') {
            Some(0) => ApiPath::root(),
            Some(idx) => ApiPath(self.0[..idx].to_string()),
            None => ApiPath::root(),
        }
    }

    /// The final path segment (file or directory name).
    pub fn file_name(&self) -> &str {
        if self.is_root() {
            return "";
        }
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// Appends a single name segment, producing a child path.
    pub fn join(&self, name: &str) -> Result<ApiPath, ApiError> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ApiError::InvalidArgument);
        }
        if self.is_root() {
            Self::normalize(&format!("/{name}"))
        } else {
            Self::normalize(&format!("{}/{name}", self.0))
        }
    }

    /// `true` if `self` is `other` or a descendant of `other`.
    pub fn starts_with(&self, other: &ApiPath) -> bool {
        if other.is_root() {
            return true;
        }
        self.0 == other.0 || self.0.starts_with(&format!("{}/", other.0))
    }
}

impl fmt::Display for ApiPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ApiPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
