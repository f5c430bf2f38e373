use std::io::Write;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Which process is logging
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The process that starts the nodes
    Launcher,
    /// A node, with its id once known
    Node(Option<u32>),
}

impl Role {
    fn tag(self) -> String {
        match self {
            Role::Launcher => "launcher".to_string(),
            Role::Node(Some(id)) => format!("node {id}"),
            Role::Node(None) => "node".to_string(),
        }
    }
}

/// Install the process-wide logger
///
/// Records go to stderr so that report lines on stdout stay clean. Each line
/// carries the role of the process and, for nodes, the node id.
/// Calling this twice is harmless; the first logger stays installed.
pub fn init(role: Role) {
    let tag = role.tag();
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(DEFAULT_FILTER))
        .format(move |buf, record| {
            let style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{style}{}{style:#} node_harness {}] {}",
                record.level(),
                tag,
                record.args()
            )
        })
        .try_init();
}
