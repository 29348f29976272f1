use crate::model::LinkLabel;
use std::fmt;

/// The narrowest scope an error terminates. Connection errors stop the whole run, session errors
/// stop the links of one session, link errors stop one link task only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorScope {
    Connection,
    Session(usize),
    Link,
}

/// Represents a failed operation of the driver together with the link it belongs to. If `link`
/// is `None` the error happened on the connection or on a session.
#[derive(Clone, Debug)]
pub struct DriverError {
    pub scope: ErrorScope,
    pub operation: String,
    pub link: Option<LinkLabel>,
    pub cause: String,
}

impl DriverError {
    pub fn connection(operation: &str, cause: impl fmt::Display) -> Self {
        DriverError {
            scope: ErrorScope::Connection,
            operation: operation.to_owned(),
            link: None,
            cause: format!("{cause:#}"),
        }
    }

    pub fn session(index: usize, operation: &str, cause: impl fmt::Display) -> Self {
        DriverError {
            scope: ErrorScope::Session(index),
            operation: operation.to_owned(),
            link: None,
            cause: format!("{cause:#}"),
        }
    }

    pub fn link(label: &LinkLabel, operation: &str, cause: impl fmt::Display) -> Self {
        DriverError {
            scope: ErrorScope::Link,
            operation: operation.to_owned(),
            link: Some(label.clone()),
            cause: format!("{cause:#}"),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.scope, &self.link) {
            (_, Some(label)) => write!(f, "{} on {}: {}", self.operation, label, self.cause),
            (ErrorScope::Session(index), None) => {
                write!(f, "{} on session #{}: {}", self.operation, index, self.cause)
            }
            _ => write!(f, "{}: {}", self.operation, self.cause),
        }
    }
}

impl std::error::Error for DriverError {}
