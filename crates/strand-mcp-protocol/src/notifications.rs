use serde::{Deserialize, Serialize};
use strand_json_rpc::{NotificationMethod, ParamsRequirement, RequestId};

use crate::methods;

/// Params of `notifications/cancelled`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledNotificationParams {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CancelledNotificationParams {
    pub fn new(request_id: RequestId) -> Self {
        Self {
            request_id,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// `notifications/cancelled`: the sender no longer wants a response
pub struct Cancelled;

impl NotificationMethod for Cancelled {
    const NAME: &'static str = methods::NOTIFICATION_CANCELLED;
    const PARAMS: ParamsRequirement = ParamsRequirement::Required;
    type Params = CancelledNotificationParams;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cancelled_wire_shape() {
        let params = CancelledNotificationParams::new(RequestId::Number(5)).with_reason("timeout");
        assert_eq!(
            serde_json::to_value(params).unwrap(),
            json!({"requestId": 5, "reason": "timeout"})
        );
    }
}
