use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// An element of the hierarchical metric namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    /// Intermediate path segment with children.
    Branch { path: String },
    /// Terminal path holding series data.
    Leaf { path: String },
}

impl Node {
    pub fn branch(path: impl Into<String>) -> Self {
        Self::Branch { path: path.into() }
    }

    pub fn leaf(path: impl Into<String>) -> Self {
        Self::Leaf { path: path.into() }
    }

    /// Builds the variant from a remote `is_leaf` flag.
    pub fn from_remote(path: impl Into<String>, is_leaf: bool) -> Self {
        if is_leaf {
            Self::leaf(path)
        } else {
            Self::branch(path)
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Branch { path } | Self::Leaf { path } => path,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }
}

/// A find request: a path pattern and an optional time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindQuery {
    pub pattern: String,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl FindQuery {
    pub fn new(pattern: impl Into<String>, start_time: Option<i64>, end_time: Option<i64>) -> Self {
        Self {
            pattern: pattern.into(),
            start_time,
            end_time,
        }
    }

    /// A query without a time window.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::new(pattern, None, None)
    }
}

/// Start, end and step of a fetched series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeInfo {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

/// One time series returned by a cluster server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesResult {
    /// The requested pattern the series matched.
    pub path_expression: String,
    pub name: String,
    pub time_info: TimeInfo,
    pub values: Vec<Option<f64>>,
}

/// Per-request data the query layer hands down to every server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Headers to forward to each cluster server.
    #[serde(default)]
    pub forward_headers: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forward_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.forward_headers.insert(name.into(), value.into());
        self
    }
}
