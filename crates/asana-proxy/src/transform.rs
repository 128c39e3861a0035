//! Response body rewrites for the task endpoints.
//!
//! Two upstream shapes are rewritten, and only for `200 OK` responses:
//!
//! | Path               | Rewrite                                              |
//! |--------------------|------------------------------------------------------|
//! | `.../tasks`        | list reduced to `{id, name, key}` records            |
//! | `.../tasks/<gid>`  | `data.id` set to the task's short number             |
//!
//! Both are fail-open: a body that cannot be decoded or re-encoded is
//! returned exactly as it came from upstream.

use bytes::Bytes;
use http::StatusCode;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::ProxyResult;
use crate::model::{find_short_number, CustomField, Envelope, TaskList, TaskRecord};

/// Which rewrite applies to a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    /// `GET .../tasks`
    TaskList,
    /// `GET .../tasks/<digits>`
    SingleTask,
}

impl Rewrite {
    /// Short name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskList => "task_list",
            Self::SingleTask => "single_task",
        }
    }
}

/// Rewrite failures. All are recovered by returning the original body.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Body is not the expected JSON shape.
    #[error("cannot decode {rewrite}: {source}")]
    Decode {
        /// Rewrite being applied.
        rewrite: &'static str,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Rewritten value could not be serialised.
    #[error("cannot encode {rewrite}: {source}")]
    Encode {
        /// Rewrite being applied.
        rewrite: &'static str,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// Single-task body has no `data` object.
    #[error("task body has no data object")]
    MissingData,
}

/// Result of running a body through the transformer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformOutcome {
    /// No rewrite applies to this path or status.
    Skipped,
    /// The body was rewritten.
    Rewritten(Rewrite),
    /// A rewrite applied but found nothing to change.
    Unmatched(Rewrite),
    /// The rewrite failed and the original body was kept.
    Failed(Rewrite),
}

/// Body to send plus what happened to it.
#[derive(Debug, Clone)]
pub struct Transformed {
    /// Body to send to the caller.
    pub body: Bytes,
    /// What the transformer did.
    pub outcome: TransformOutcome,
}

/// Selects and applies the task rewrites.
#[derive(Debug, Clone)]
pub struct ResponseTransformer {
    single_task: Regex,
}

impl ResponseTransformer {
    /// Create a transformer.
    ///
    /// Fails only if the built-in path pattern does not compile.
    pub fn new() -> ProxyResult<Self> {
        Ok(Self {
            single_task: Regex::new(r"/tasks/[0-9]+$")?,
        })
    }

    /// The rewrite that applies to an upstream path, if any.
    pub fn select(&self, path: &str) -> Option<Rewrite> {
        if path.ends_with("/tasks") {
            Some(Rewrite::TaskList)
        } else if self.single_task.is_match(path) {
            Some(Rewrite::SingleTask)
        } else {
            None
        }
    }

    /// Rewrite an upstream body for the caller.
    pub fn transform(&self, path: &str, status: StatusCode, body: &Bytes) -> Transformed {
        let rewrite = match self.select(path) {
            Some(rewrite) if status == StatusCode::OK => rewrite,
            _ => {
                return Transformed {
                    body: body.clone(),
                    outcome: TransformOutcome::Skipped,
                }
            }
        };

        let result = match rewrite {
            Rewrite::TaskList => rewrite_task_list(body).map(Some),
            Rewrite::SingleTask => rewrite_single_task(body),
        };

        match result {
            Ok(Some(rewritten)) => {
                debug!(rewrite = rewrite.as_str(), bytes = rewritten.len(), "response rewritten");
                Transformed {
                    body: Bytes::from(rewritten),
                    outcome: TransformOutcome::Rewritten(rewrite),
                }
            }
            Ok(None) => Transformed {
                body: body.clone(),
                outcome: TransformOutcome::Unmatched(rewrite),
            },
            Err(e) => {
                error!(
                    error = %e,
                    body = %String::from_utf8_lossy(body),
                    "response rewrite failed, sending upstream body"
                );
                Transformed {
                    body: body.clone(),
                    outcome: TransformOutcome::Failed(rewrite),
                }
            }
        }
    }
}

/// Reduce a task list to the tasks that carry a short number.
///
/// The output always has a `data` array, possibly empty.
pub fn rewrite_task_list(body: &[u8]) -> Result<Vec<u8>, TransformError> {
    let list: TaskList = serde_json::from_slice(body).map_err(|source| TransformError::Decode {
        rewrite: "tasks",
        source,
    })?;

    let records = Envelope {
        data: list
            .data
            .iter()
            .filter_map(|task| task.to_record())
            .collect::<Vec<TaskRecord>>(),
    };

    serde_json::to_vec(&records).map_err(|source| TransformError::Encode {
        rewrite: "tasks",
        source,
    })
}

/// Set `data.id` of a single task to its short number.
///
/// Returns `Ok(None)` when the task has no short number. Every other field
/// is kept in its original position. The body is re-encoded through
/// [`Value`], which normalises whitespace, string escapes and number
/// spellings, so the untouched fields are byte-identical only when the
/// upstream already sent compact JSON.
pub fn rewrite_single_task(body: &[u8]) -> Result<Option<Vec<u8>>, TransformError> {
    let decode = |source| TransformError::Decode {
        rewrite: "task",
        source,
    };

    let mut envelope: Value = serde_json::from_slice(body).map_err(decode)?;
    let task = envelope
        .get_mut("data")
        .and_then(Value::as_object_mut)
        .ok_or(TransformError::MissingData)?;

    let fields = match task.get("custom_fields") {
        Some(value) => Option::<Vec<CustomField>>::deserialize(value)
            .map_err(decode)?
            .unwrap_or_default(),
        None => Vec::new(),
    };

    let Some(key) = find_short_number(&fields) else {
        return Ok(None);
    };
    task.insert("id".to_string(), Value::String(key.to_string()));

    serde_json::to_vec(&envelope)
        .map(Some)
        .map_err(|source| TransformError::Encode {
            rewrite: "task",
            source,
        })
}
