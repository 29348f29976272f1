use std::fmt;

/// Credit used when a receiver is configured with zero credit.
pub const DEFAULT_CREDIT: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Authentication {
    Anonymous,
    Plain { username: String, password: String },
}

/// Where and how to connect. Built once at startup and only read afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionSpec {
    /// Address of the broker like `amqp://localhost:5672`.
    pub container: String,
    pub auth: Authentication,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
    /// Role names we don't drive. Such links are skipped.
    Unsupported(String),
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
            Role::Unsupported(name) => write!(f, "{name:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkSpec {
    pub role: Role,
    /// Address a receiver attaches to.
    pub source: String,
    /// Address a sender attaches to.
    pub target: String,
    /// Number of unsettled messages a receiver lets the peer send.
    pub initial_credit: u32,
}

impl LinkSpec {
    pub fn sender(target: &str) -> Self {
        LinkSpec {
            role: Role::Sender,
            source: String::new(),
            target: target.to_owned(),
            initial_credit: 0,
        }
    }

    pub fn receiver(source: &str, initial_credit: u32) -> Self {
        LinkSpec {
            role: Role::Receiver,
            source: source.to_owned(),
            target: String::new(),
            initial_credit,
        }
    }

    /// The address which matters for the role of the link.
    pub fn address(&self) -> &str {
        match self.role {
            Role::Receiver => &self.source,
            _ => &self.target,
        }
    }

    pub fn effective_credit(&self) -> u32 {
        if self.initial_credit == 0 {
            DEFAULT_CREDIT
        } else {
            self.initial_credit
        }
    }

    pub fn label(&self, session: usize, index: usize) -> LinkLabel {
        LinkLabel {
            session,
            index,
            role: self.role.clone(),
            address: self.address().to_owned(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionSpec {
    pub links: Vec<LinkSpec>,
}

/// Everything the coordinator needs to drive a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverConfig {
    pub connection: ConnectionSpec,
    pub sessions: Vec<SessionSpec>,
}

impl DriverConfig {
    /// Number of links which will get a task, unsupported roles are not counted.
    pub fn runnable_links(&self) -> usize {
        self.sessions
            .iter()
            .flat_map(|s| s.links.iter())
            .filter(|l| matches!(l.role, Role::Sender | Role::Receiver))
            .count()
    }
}

/// Identifies a link in logs and errors: position in the config, role and address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkLabel {
    pub session: usize,
    pub index: usize,
    pub role: Role,
    pub address: String,
}

impl fmt::Display for LinkLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} link #{}.{} ({})", self.role, self.session, self.index, self.address)
    }
}
