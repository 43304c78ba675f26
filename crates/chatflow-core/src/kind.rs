use std::fmt;

/// Type strings accepted for entry nodes. Each one names the channel a
/// conversation arrives through; all of them behave identically at runtime.
pub const ENTRY_TYPES: &[&str] = &[
    "restful",
    "openai",
    "agui",
    "embedded_chat",
    "mobile",
    "web_chat",
    "enterprise_wechat",
    "dingtalk",
    "wechat_official",
    "celery",
    "start",
];

pub const EXIT_TYPES: &[&str] = &["exit", "end"];

pub const BRANCH_TYPES: &[&str] = &["condition", "branch"];

/// Closed set of built-in node kinds plus an open slot for runtime-registered
/// custom types.
///
/// The kind is resolved once when a flow is planned; the scheduler consults
/// it for behaviour that depends on the node family (routers never overwrite
/// the pipeline slot) without comparing type strings on the hot path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Entry,
    Exit,
    Branch,
    IntentClassification,
    Agents,
    Function,
    Http,
    JsonParse,
    JsonStringify,
    Delay,
    Custom(String),
}

impl NodeKind {
    pub fn parse(node_type: &str) -> Self {
        match node_type {
            t if ENTRY_TYPES.contains(&t) => NodeKind::Entry,
            t if EXIT_TYPES.contains(&t) => NodeKind::Exit,
            t if BRANCH_TYPES.contains(&t) => NodeKind::Branch,
            "intent_classification" => NodeKind::IntentClassification,
            "agents" => NodeKind::Agents,
            "function" => NodeKind::Function,
            "http" => NodeKind::Http,
            "json_parse" => NodeKind::JsonParse,
            "json_stringify" => NodeKind::JsonStringify,
            "delay" => NodeKind::Delay,
            other => NodeKind::Custom(other.to_string()),
        }
    }

    /// Routers decide where the flow goes next; their output must not
    /// replace the message travelling down the pipeline.
    pub fn is_router(&self) -> bool {
        matches!(self, NodeKind::Branch | NodeKind::IntentClassification)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Entry => "entry",
            NodeKind::Exit => "exit",
            NodeKind::Branch => "branch",
            NodeKind::IntentClassification => "intent_classification",
            NodeKind::Agents => "agents",
            NodeKind::Function => "function",
            NodeKind::Http => "http",
            NodeKind::JsonParse => "json_parse",
            NodeKind::JsonStringify => "json_stringify",
            NodeKind::Delay => "delay",
            NodeKind::Custom(name) => name,
        };
        f.write_str(name)
    }
}
