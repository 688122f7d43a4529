//! Stand-in execution context passed alongside every invocation event.

use serde::{Deserialize, Serialize};

pub const MOCK_FUNCTION_NAME: &str = "role_users_report";
pub const MOCK_MEMORY_LIMIT_MB: u32 = 50;
pub const MOCK_FUNCTION_ARN: &str =
    "arn:aws:lambda:aws-region-1:123456789012:function:role_users_report";

/// Execution metadata for one invocation. Only `aws_request_id` varies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationContext {
    pub function_name: String,
    pub memory_limit_in_mb: u32,
    pub invoked_function_arn: String,
    pub aws_request_id: String,
}

impl InvocationContext {
    /// A fixture context with a freshly generated request id.
    pub fn mock() -> Self {
        Self {
            function_name: MOCK_FUNCTION_NAME.to_string(),
            memory_limit_in_mb: MOCK_MEMORY_LIMIT_MB,
            invoked_function_arn: MOCK_FUNCTION_ARN.to_string(),
            aws_request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
