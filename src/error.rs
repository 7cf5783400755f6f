//! Structured error types for the two fallible entry points that hand control back to a caller:
//! parsing and validation. Runtime failures (expression errors, unknown send targets, missing
//! invoke handlers) do not use these types -- they become `error.execution`/`error.communication`
//! events on the internal queue, per the W3C error-event model (see [crate::fsm::Event]).

use thiserror::Error;

/// Failure while turning an XML byte/char stream into a [crate::fsm::Fsm].
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed XML at position {position}: {source}")]
    MalformedXml {
        position: usize,
        #[source]
        source: quick_xml::Error,
    },

    #[error("unexpected element <{tag}> inside <{parent}>")]
    UnexpectedElement { tag: String, parent: String },

    #[error("unexpected end tag </{found}>, expected </{expected}>")]
    UnexpectedEndTag { found: String, expected: String },

    #[error("missing required attribute '{attribute}' on <{tag}>")]
    MissingRequiredAttribute { tag: String, attribute: String },

    #[error("more than one <scxml> root element")]
    DuplicateScxmlRoot,

    #[error("document has no <scxml> root element")]
    MissingScxmlRoot,

    #[error("I/O error reading document: {0}")]
    IoError(String),
}

/// One structural problem found by [crate::validator::validate].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("state id is empty")]
    EmptyStateId,

    #[error("duplicate state id '{0}'")]
    DuplicateStateId(String),

    #[error("transition in state '{source}' targets unknown state '{target}'")]
    UnknownTransitionTarget { source: String, target: String },

    #[error("state '{0}' has both an 'initial' attribute and an <initial> child element")]
    ConflictingInitial(String),

    #[error("'initial' attribute of state '{state}' references '{target}', which is not a direct child")]
    InitialNotDirectChild { state: String, target: String },

    #[error("<initial> element of state '{0}' must contain exactly one transition")]
    InitialMustHaveOneTransition(String),

    #[error("<initial> transition of state '{state}' must target a direct child, not '{target}'")]
    InitialTransitionTargetNotDirectChild { state: String, target: String },

    #[error("history state '{0}' must have exactly one default transition")]
    HistoryRequiresOneDefaultTransition(String),

    #[error("history state '{state}' default transition targets unknown state '{target}'")]
    HistoryDefaultTargetUnknown { state: String, target: String },
}

/// Non-fatal findings the validator still wants surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    UnknownDocumentInitial(String),
    UnreachableState(String),
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnknownDocumentInitial(id) => {
                write!(f, "document-level initial '{id}' does not reference a top-level state")
            }
            Warning::UnreachableState(id) => write!(f, "state '{id}' is not reachable from the initial configuration"),
        }
    }
}

/// Runtime execution failure, mirrors the `error.execution` / `error.communication` /
/// `error.platform` event families from the W3C error model. Used internally by the expression
/// evaluator and executable content runner before being turned into an [crate::fsm::Event].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("the document has not been validated")]
    NotValidated,

    #[error("expression error: {0}")]
    Expression(String),

    #[error("unknown location '{0}'")]
    UnknownLocation(String),

    #[error("send target '{0}' is not known")]
    UnknownSendTarget(String),

    #[error("no invoke handler registered for type '{0}'")]
    NoInvokeHandler(String),

    #[error("communication failure: {0}")]
    Communication(String),

    #[error("platform failure: {0}")]
    Platform(String),
}
