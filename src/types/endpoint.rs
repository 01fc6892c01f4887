//! Endpoint addressing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The endpoint an attempt is sent to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    Primary { url: String },
    /// `index` is the position in the service's fallback list.
    Fallback { url: String, index: usize },
}

impl Endpoint {
    /// Endpoint address.
    pub fn url(&self) -> &str {
        match self {
            Endpoint::Primary { url } | Endpoint::Fallback { url, .. } => url,
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, Endpoint::Primary { .. })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Primary { url } => write!(f, "primary({url})"),
            Endpoint::Fallback { url, index } => write!(f, "fallback[{index}]({url})"),
        }
    }
}

/// Primary and fallback addresses for one service class.
///
/// `fallbacks[0]` is the designated secondary used after failover; the full
/// list is the pool that routing keys are hashed over.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEndpoints {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl ServiceEndpoints {
    /// Endpoints with no fallbacks.
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: Vec::new(),
        }
    }

    /// Add a fallback address.
    pub fn fallback(mut self, url: impl Into<String>) -> Self {
        self.fallbacks.push(url.into());
        self
    }
}
