use serde::Serialize;

/// Step actions understood by the `continue` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepAction {
    /// Stop at the next statement, entering calls.
    In,
    /// Run until the current function returns.
    Out,
}

impl StepAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::In => "in",
            Self::Out => "out",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_protocol_names() {
        assert_eq!(serde_json::to_value(StepAction::In).unwrap(), "in");
        assert_eq!(serde_json::to_value(StepAction::Out).unwrap(), "out");
        assert_eq!(StepAction::Out.as_str(), "out");
    }
}
