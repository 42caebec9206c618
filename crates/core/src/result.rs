use serde::{Deserialize, Serialize};

/// Classification of one execution attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResultType {
    Succeeded,
    Failed,
    Cancelled,
}

/// Outcome of one execution attempt, handed to the job callback.
///
/// Not persisted as its own entity; the scheduler folds it into the job status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub result_type: JobResultType,
    pub result_data: Option<String>,
    pub failure_message: Option<String>,
}

impl JobResult {
    pub fn succeeded(data: impl Into<String>) -> Self {
        Self {
            result_type: JobResultType::Succeeded,
            result_data: Some(data.into()),
            failure_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            result_type: JobResultType::Failed,
            result_data: None,
            failure_message: Some(message.into()),
        }
    }

    pub fn cancelled(data: impl Into<String>) -> Self {
        Self {
            result_type: JobResultType::Cancelled,
            result_data: Some(data.into()),
            failure_message: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.result_data = Some(data.into());
        self
    }
}
