use amqp_driver::{Authentication, ConnectionSpec, DriverConfig, LinkSpec, Role, SessionSpec};
use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "amqp-cli", version, about = "Send and receive AMQP 1.0 messages as described in a YAML file")]
pub(crate) struct CliConfig {
    /// Path to the YAML config file
    #[arg(short = 'f', value_name = "FILE")]
    pub(crate) config_file_path: PathBuf,

    /// Stop every link when one of them fails
    #[arg(long)]
    pub(crate) fail_fast: bool,

    /// Milliseconds to wait for links, sessions and the connection to close
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub(crate) close_timeout: u64,
}

impl CliConfig {
    pub(crate) fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout)
    }
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub(crate) struct YamlConfig {
    pub(crate) spec: Spec,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub(crate) struct Spec {
    pub(crate) connection: Connection,
    #[serde(default)]
    pub(crate) sessions: Vec<Session>,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub(crate) struct Connection {
    pub(crate) container: String,
    #[serde(default)]
    pub(crate) authentication: Auth,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct Auth {
    #[serde(rename = "type")]
    pub(crate) kind: String,
    pub(crate) username: String,
    pub(crate) password: String,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
pub(crate) struct Session {
    #[serde(default)]
    pub(crate) links: Vec<Link>,
}

#[derive(Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Link {
    pub(crate) role: String,
    pub(crate) source: String,
    pub(crate) target: String,
    pub(crate) initial_credit: u32,
}

pub(crate) fn parse_config(path: &Path) -> Result<YamlConfig> {
    let cfg = std::fs::read_to_string(path).with_context(|| format!("reading config file {}", path.display()))?;

    parse_config_str(&cfg).with_context(|| format!("parsing config file {}", path.display()))
}

pub(crate) fn parse_config_str(cfg: &str) -> Result<YamlConfig> {
    Ok(serde_yaml::from_str(cfg)?)
}

pub(crate) fn cli() -> CliConfig {
    CliConfig::parse()
}

impl Auth {
    fn to_authentication(&self) -> Result<Authentication> {
        let plain = || Authentication::Plain {
            username: self.username.clone(),
            password: self.password.clone(),
        };

        match self.kind.to_ascii_lowercase().as_str() {
            "plain" => Ok(plain()),
            "none" | "anonymous" => Ok(Authentication::Anonymous),
            "" if !self.username.is_empty() => Ok(plain()),
            "" => Ok(Authentication::Anonymous),
            other => bail!("unknown authentication type {:?}", other),
        }
    }
}

impl Link {
    fn to_link_spec(&self, session: usize, index: usize) -> Result<LinkSpec> {
        let role = match self.role.as_str() {
            "sender" => Role::Sender,
            "receiver" => Role::Receiver,
            other => Role::Unsupported(other.to_owned()),
        };

        match role {
            Role::Sender if self.target.is_empty() => {
                bail!("sender link #{}.{} has no target", session, index)
            }
            Role::Receiver if self.source.is_empty() => {
                bail!("receiver link #{}.{} has no source", session, index)
            }
            _ => (),
        }

        Ok(LinkSpec {
            role,
            source: self.source.clone(),
            target: self.target.clone(),
            initial_credit: self.initial_credit,
        })
    }
}

impl YamlConfig {
    /// Validate the config and convert it to what the driver runs.
    pub(crate) fn to_driver_config(&self) -> Result<DriverConfig> {
        let connection = &self.spec.connection;

        if connection.container.is_empty() {
            bail!("connection container is missing");
        }

        let mut sessions = vec![];

        for (i, session) in self.spec.sessions.iter().enumerate() {
            let links = session
                .links
                .iter()
                .enumerate()
                .map(|(j, link)| link.to_link_spec(i, j))
                .collect::<Result<Vec<_>>>()?;

            sessions.push(SessionSpec { links });
        }

        Ok(DriverConfig {
            connection: ConnectionSpec {
                container: connection.container.clone(),
                auth: connection.authentication.to_authentication()?,
            },
            sessions,
        })
    }
}
