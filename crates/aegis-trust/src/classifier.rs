//! Action classifier
//!
//! Pure, stateless mapping from a tool invocation to a `(tier, category)`
//! pair. Deterministic: identical inputs yield identical outputs across
//! processes. The rule order is part of the security contract — the
//! financial hardcap scan runs before any read-only shortcut so that
//! `ls && augur trade --live` cannot be downgraded by its prefix.

use once_cell::sync::Lazy;
use regex::Regex;

use aegis_common::RiskTier;

/// Classifier output: risk tier plus the stable category label inside it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub tier: RiskTier,
    pub category: String,
}

impl Classification {
    fn new(tier: RiskTier, category: &str) -> Self {
        Classification {
            tier,
            category: category.to_string(),
        }
    }
}

/// Category catalogue, fixed at system init. Seeded into `trust_scores`
/// at migration time.
pub fn category_catalogue() -> &'static [(&'static str, RiskTier)] {
    &[
        ("read_file", RiskTier::T1Read),
        ("list_dir", RiskTier::T1Read),
        ("search", RiskTier::T1Read),
        ("exec_status", RiskTier::T1Read),
        ("write_file", RiskTier::T2Write),
        ("edit_file", RiskTier::T2Write),
        ("exec_mutating", RiskTier::T2Write),
        ("config_change", RiskTier::T3Infra),
        ("service_restart", RiskTier::T3Infra),
        ("infra_exec", RiskTier::T3Infra),
        ("financial_augur", RiskTier::T4Financial),
        ("financial_crypto", RiskTier::T4Financial),
        ("financial_stripe", RiskTier::T4Financial),
    ]
}

/// Financial keyword patterns scanned against the full parameter string.
/// Any hit forces T4 regardless of everything else.
static FINANCIAL_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (
            Regex::new(r"(?i)\baugur\s+(trade|buy|sell|order)\b").unwrap(),
            "financial_augur",
        ),
        (
            Regex::new(r"(?i)\bcrypto\s+(transfer|send|withdraw)\b").unwrap(),
            "financial_crypto",
        ),
        (
            Regex::new(r"(?i)\b(transfer|send|withdraw)\s+(btc|eth|sol)\b").unwrap(),
            "financial_crypto",
        ),
        (
            Regex::new(r"(?i)\bstripe\s+(charge|payment|refund|payout)\b").unwrap(),
            "financial_stripe",
        ),
        (
            Regex::new(r"(?i)\bwire\s+transfer\b").unwrap(),
            "financial_crypto",
        ),
    ]
});

/// First tokens allowed under the read-only exec shortcut
const READ_ONLY_VERBS: &[&str] = &[
    "ls", "cat", "head", "tail", "grep", "rg", "find", "ps", "df", "du", "free", "uptime",
    "whoami", "pwd", "wc", "stat", "which", "file", "date", "uname", "echo",
];

/// Read-only git subcommands (the only compound verb allowed)
const READ_ONLY_GIT: &[&str] = &["status", "log", "diff", "show", "branch", "remote"];

/// Shell chaining separators stripped when checking the read-only shape
static CHAIN_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"&&|\|\||[;|\n]").unwrap());

static SERVICE_RESTART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(systemctl|service)\b.*\b(restart|stop|start|reload|enable|disable)\b")
        .unwrap()
});

static INFRA_COMMANDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(docker|kubectl|iptables|shutdown|reboot|mkfs|mount|umount|crontab)\b")
        .unwrap()
});

/// Path extensions that turn a write into an infrastructure config change
static CONFIG_EXTENSIONS: &[&str] = &["json", "toml", "yaml", "yml", "env", "ini", "conf"];

fn is_exec_tool(tool_name: &str) -> bool {
    matches!(
        tool_name.to_ascii_lowercase().as_str(),
        "exec" | "shell" | "bash" | "run_command" | "execute"
    )
}

fn is_write_tool(tool_name: &str) -> bool {
    matches!(
        tool_name.to_ascii_lowercase().as_str(),
        "write" | "write_file" | "create_file"
    )
}

fn is_edit_tool(tool_name: &str) -> bool {
    matches!(
        tool_name.to_ascii_lowercase().as_str(),
        "edit" | "edit_file" | "patch_file" | "multi_edit"
    )
}

fn command_of(params: &serde_json::Value) -> Option<&str> {
    params
        .get("command")
        .and_then(serde_json::Value::as_str)
        .or_else(|| params.as_str())
}

fn path_of(params: &serde_json::Value) -> Option<&str> {
    for key in ["path", "file_path", "filename", "file"] {
        if let Some(p) = params.get(key).and_then(serde_json::Value::as_str) {
            return Some(p);
        }
    }
    None
}

fn extension_of(path: &str) -> Option<String> {
    std::path::Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

/// True when every chained segment of the command starts with an allowed
/// read-only verb
fn is_read_only_command(command: &str) -> bool {
    let mut saw_segment = false;
    for segment in CHAIN_SPLIT.split(command) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        saw_segment = true;
        let mut tokens = segment.split_whitespace();
        let verb = match tokens.next() {
            Some(v) => v,
            None => continue,
        };
        if verb == "git" {
            match tokens.next() {
                Some(sub) if READ_ONLY_GIT.contains(&sub) => continue,
                _ => return false,
            }
        }
        if !READ_ONLY_VERBS.contains(&verb) {
            return false;
        }
    }
    saw_segment
}

fn classify_write(tool_category: &str, params: &serde_json::Value) -> Classification {
    if let Some(path) = path_of(params) {
        if let Some(ext) = extension_of(path) {
            if CONFIG_EXTENSIONS.contains(&ext.as_str()) {
                return Classification::new(RiskTier::T3Infra, "config_change");
            }
        }
    }
    Classification::new(RiskTier::T2Write, tool_category)
}

fn classify_exec(command: &str) -> Classification {
    if is_read_only_command(command) {
        return Classification::new(RiskTier::T1Read, "exec_status");
    }
    if SERVICE_RESTART.is_match(command) {
        return Classification::new(RiskTier::T3Infra, "service_restart");
    }
    if INFRA_COMMANDS.is_match(command) {
        return Classification::new(RiskTier::T3Infra, "infra_exec");
    }
    Classification::new(RiskTier::T2Write, "exec_mutating")
}

/// Classify a tool invocation. Cannot fail; malformed params fall through
/// to the conservative T2 fallback.
pub fn classify(tool_name: &str, params: &serde_json::Value) -> Classification {
    // Financial hardcap scans the whole parameter string first.
    let full = params.to_string();
    for (pattern, category) in FINANCIAL_PATTERNS.iter() {
        if pattern.is_match(&full) || pattern.is_match(tool_name) {
            return Classification::new(RiskTier::T4Financial, category);
        }
    }

    if is_exec_tool(tool_name) {
        if let Some(command) = command_of(params) {
            return classify_exec(command);
        }
        return Classification::new(RiskTier::T2Write, "exec_mutating");
    }

    match tool_name.to_ascii_lowercase().as_str() {
        "read" | "read_file" | "view_file" => Classification::new(RiskTier::T1Read, "read_file"),
        "glob" | "list" | "list_dir" | "ls" => Classification::new(RiskTier::T1Read, "list_dir"),
        "grep" | "search" | "code_search" => Classification::new(RiskTier::T1Read, "search"),
        "systemctl" | "service_control" => {
            Classification::new(RiskTier::T3Infra, "service_restart")
        }
        _ if is_write_tool(tool_name) => classify_write("write_file", params),
        _ if is_edit_tool(tool_name) => classify_write("edit_file", params),
        // Unknown tools are conservative: never below T2, never above T3.
        _ => Classification::new(RiskTier::T2Write, "write_file"),
    }
}
