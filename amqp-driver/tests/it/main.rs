mod cancel;
mod failures;
mod fanout;
mod helper;
mod scenario;

use amqp_driver::*;

pub fn config(sessions: Vec<Vec<LinkSpec>>) -> DriverConfig {
    DriverConfig {
        connection: ConnectionSpec {
            container: "memory://integration-test".to_owned(),
            auth: Authentication::Plain {
                username: "guest".to_owned(),
                password: "guest".to_owned(),
            },
        },
        sessions: sessions.into_iter().map(|links| SessionSpec { links }).collect(),
    }
}

pub fn unsupported(address: &str) -> LinkSpec {
    LinkSpec {
        role: Role::Unsupported("browser".to_owned()),
        ..LinkSpec::receiver(address, 1)
    }
}
