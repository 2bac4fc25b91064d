use miette::Diagnostic;
use thiserror::Error;

/// Runtime error type for cluster interaction and the reconcile loop
#[derive(Error, Debug, Diagnostic)]
pub enum RuntimeError {
    /// The Kubernetes client could not be constructed
    #[error("Failed to initialize Kubernetes client: {message}")]
    #[diagnostic(
        code(speakerfix::runtime::client_init),
        help("Run inside a pod with a service account, or point KUBECONFIG at a valid kubeconfig")
    )]
    ClientInit {
        #[allow(unused)]
        message: String,
    },

    /// A Kubernetes API call failed
    #[error("Kubernetes API call '{operation}' failed: {source}")]
    #[diagnostic(
        code(speakerfix::runtime::kube_error),
        help("Check API server reachability and that the service account may list and delete pods")
    )]
    Kube {
        #[allow(unused)]
        operation: String,
        source: kube::Error,
    },

    /// Speaker pod deletion was rejected
    #[error("Failed to delete speaker pod {speaker}: {message}")]
    #[diagnostic(
        code(speakerfix::runtime::speaker_delete_failed),
        help("The next event for a workload pod on this node retries the repair")
    )]
    SpeakerDeleteFailed {
        #[allow(unused)]
        speaker: String,
        #[allow(unused)]
        message: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    CoreError(#[from] speakerfix_core::CoreError),

    /// Internal error
    #[error("Internal runtime error: {message}")]
    #[diagnostic(
        code(speakerfix::runtime::internal_error),
        help("This is likely a bug in speakerfix-runtime. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

impl RuntimeError {
    pub fn client_init(message: impl Into<String>) -> Self {
        Self::ClientInit {
            message: message.into(),
        }
    }

    pub fn kube(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Kube {
            operation: operation.into(),
            source,
        }
    }

    pub fn speaker_delete_failed(speaker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpeakerDeleteFailed {
            speaker: speaker.into(),
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the error is an API 404 for the targeted object
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Kube {
                source: kube::Error::Api(response),
                ..
            } if response.code == 404
        )
    }
}
