use thiserror::Error;

/// Errors that abort a single pod's reconciliation.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Current pod state could not be read; the key is retried with backoff.
    #[error("failed to fetch pod {key}: {source}")]
    Fetch {
        key: String,
        #[source]
        source: kube::Error,
    },
}

impl ReconcileError {
    pub fn is_transient(&self) -> bool {
        match self {
            ReconcileError::Fetch { .. } => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    #[test]
    fn error_display_fetch() {
        let err = ReconcileError::Fetch {
            key: "ns/a".to_string(),
            source: kube::Error::Api(ErrorResponse {
                status: "Failure".to_string(),
                message: "etcdserver: request timed out".to_string(),
                reason: "Timeout".to_string(),
                code: 504,
            }),
        };
        assert!(err.to_string().starts_with("failed to fetch pod ns/a"));
        assert!(err.is_transient());
    }
}
