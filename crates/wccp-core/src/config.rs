//! Configuration for WCCP endpoints.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $WCCP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/wccp/config.toml
//!   3. ~/.config/wccp/config.toml
//!
//! The `[daemon]` table is typed. The service definitions in the same file
//! are read loosely by [`load_services`] so that one bad service does not
//! stop the others from loading; problems are collected as [`Diagnostics`].

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::component::{SecurityKey, SecurityOption};
use crate::element::{AssignmentStyle, PacketStyle, ServiceGroup, ServiceType};
use crate::group::{CacheGroup, Methods, SecurityPolicy};
use crate::wire::{DEFAULT_PORT, KEY_SIZE};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WccpConfig {
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Cache,
    Router,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cache" => Ok(Role::Cache),
            "router" => Ok(Role::Router),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub role: Role,
    /// Local address. Unspecified = probe a route to the first seed router.
    pub address: Ipv4Addr,
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            role: Role::Cache,
            address: Ipv4Addr::UNSPECIFIED,
            port: DEFAULT_PORT,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("wccp")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl WccpConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path()).map(|(config, _)| config)
    }

    /// Load from `path`, returning the typed config and the whole document
    /// for [`load_services`]. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<(Self, toml::Table), ConfigError> {
        let (mut config, table) = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            let config: WccpConfig =
                toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
            let table: toml::Table =
                toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
            (config, table)
        } else {
            (WccpConfig::default(), toml::Table::new())
        };
        config.apply_env_overrides();
        Ok((config, table))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("WCCP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&WccpConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply WCCP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WCCP_DAEMON__ROLE") {
            match v.parse() {
                Ok(role) => self.daemon.role = role,
                Err(e) => tracing::warn!(error = %e, "ignoring WCCP_DAEMON__ROLE"),
            }
        }
        if let Ok(v) = std::env::var("WCCP_DAEMON__ADDRESS") {
            if let Ok(a) = v.parse() {
                self.daemon.address = a;
            }
        }
        if let Ok(v) = std::env::var("WCCP_DAEMON__PORT") {
            if let Ok(p) = v.parse() {
                self.daemon.port = p;
            }
        }
    }
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

/// Severity of a configuration diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Fatal,
}

/// One configuration problem, with the problems that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: Level,
    pub code: u16,
    pub message: String,
    pub children: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn new(level: Level, code: u16, message: impl Into<String>) -> Self {
        Self {
            level,
            code,
            message: message.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(mut self, children: Vec<Diagnostic>) -> Self {
        self.children = children;
        self
    }

    /// Replay through `tracing` at the mapped level.
    fn log(&self, depth: usize) {
        let (code, msg) = (self.code, self.message.as_str());
        match self.level {
            Level::Debug => tracing::debug!(code, depth, "{msg}"),
            Level::Info => tracing::info!(code, depth, "{msg}"),
            Level::Warn => tracing::warn!(code, depth, "{msg}"),
            Level::Fatal => tracing::error!(code, depth, "{msg}"),
        }
        for child in &self.children {
            child.log(depth + 1);
        }
    }
}

/// Diagnostics accumulated by a load. Only top-level entries count toward
/// [`Diagnostics::max_level`]; children explain their parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, d: Diagnostic) {
        self.0.push(d);
    }

    pub fn max_level(&self) -> Option<Level> {
        self.0.iter().map(|d| d.level).max()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if any entry, at any depth, carries `code`.
    pub fn contains_code(&self, code: u16) -> bool {
        fn walk(list: &[Diagnostic], code: u16) -> bool {
            list.iter().any(|d| d.code == code || walk(&d.children, code))
        }
        walk(&self.0, code)
    }

    pub fn log(&self) {
        for d in &self.0 {
            d.log(0);
        }
    }

    fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }
}

// ── Service definitions ───────────────────────────────────────────────────────

/// A validated service group definition, ready to apply to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDef {
    pub svc: ServiceGroup,
    /// Group-local security. `None` uses the endpoint default.
    pub security: Option<SecurityPolicy>,
    /// Group seed routers, tried before the global ones.
    pub routers: Vec<Ipv4Addr>,
    pub proc_name: Option<PathBuf>,
    pub methods: Methods,
}

impl GroupDef {
    pub fn new(svc: ServiceGroup) -> Self {
        Self {
            svc,
            security: None,
            routers: Vec::new(),
            proc_name: None,
            methods: Methods::default(),
        }
    }

    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = Some(security);
        self
    }

    pub fn with_routers(mut self, routers: Vec<Ipv4Addr>) -> Self {
        self.routers = routers;
        self
    }

    pub fn with_proc_name(mut self, path: impl Into<PathBuf>) -> Self {
        self.proc_name = Some(path.into());
        self
    }

    pub fn with_methods(mut self, methods: Methods) -> Self {
        self.methods = methods;
        self
    }

    /// Seed the group's routers, then the global ones, and install the
    /// security override, tracked process and method preferences.
    pub fn apply(&self, group: &mut CacheGroup, global_routers: &[Ipv4Addr]) {
        for &addr in self.routers.iter().chain(global_routers) {
            group.seed_router(addr);
        }
        if let Some(security) = self.security {
            group.data.security = security;
        }
        if let Some(path) = &self.proc_name {
            group.proc_pid_file = Some(path.clone());
        }
        group.packet_forward = self.methods.forward;
        group.packet_return = self.methods.ret;
        group.cache_assign = self.methods.assign;
    }
}

/// Everything [`load_services`] extracted from a document.
#[derive(Debug, Clone, Default)]
pub struct ServiceLoad {
    /// Endpoint default security, if the document sets one.
    pub security: Option<SecurityPolicy>,
    /// Global seed routers.
    pub routers: Vec<Ipv4Addr>,
    pub services: Vec<GroupDef>,
    pub diagnostics: Diagnostics,
}

const HASH_OPTS: [&str; 4] = ["src_ip", "dst_ip", "src_port", "dst_port"];
const PACKET_OPTS: [&str; 2] = ["gre", "l2"];
const ASSIGN_OPTS: [&str; 2] = ["hash", "mask"];

fn type_name(v: &toml::Value) -> &'static str {
    match v {
        toml::Value::String(_) => "string",
        toml::Value::Integer(_) => "integer",
        toml::Value::Float(_) => "float",
        toml::Value::Boolean(_) => "boolean",
        toml::Value::Datetime(_) => "datetime",
        toml::Value::Array(_) => "list",
        toml::Value::Table(_) => "table",
    }
}

fn not_found(prop: &str, ctx: &str) -> Diagnostic {
    Diagnostic::new(
        Level::Warn,
        8,
        format!("required '{prop}' property not found in '{ctx}'"),
    )
}

fn wrong_type(prop: &str, v: &toml::Value, expected: &str) -> Diagnostic {
    Diagnostic::new(
        Level::Warn,
        9,
        format!("'{prop}' is of type '{}' instead of '{expected}'", type_name(v)),
    )
}

fn out_of_range(prop: &str, v: i64, max: i64) -> Diagnostic {
    Diagnostic::new(
        Level::Warn,
        10,
        format!("'{prop}' has value {v} which is not in the range 0..{max}"),
    )
}

fn ignored_in_standard(prop: &str) -> Diagnostic {
    Diagnostic::new(
        Level::Info,
        11,
        format!("'{prop}' ignored because the service is of type STANDARD"),
    )
}

/// Integer property within `0..=max`.
fn load_int(prop: &str, v: &toml::Value, max: i64, diags: &mut Diagnostics) -> Option<i64> {
    match v.as_integer() {
        Some(n) if (0..=max).contains(&n) => Some(n),
        Some(n) => {
            diags.push(out_of_range(prop, n, max));
            None
        }
        None => {
            diags.push(wrong_type(prop, v, "integer"));
            None
        }
    }
}

/// Read a string or list of strings against `opts`. Returns which options
/// were found and the problems with the rest.
fn load_option_set(prop: &str, v: &toml::Value, opts: &[&str]) -> (Vec<bool>, Vec<Diagnostic>) {
    let mut found = vec![false; opts.len()];
    let mut errs = Vec::new();
    let items: Vec<&toml::Value> = match v {
        toml::Value::Array(list) => list.iter().collect(),
        other => vec![other],
    };
    for item in items {
        match item.as_str() {
            Some(text) => match opts.iter().position(|o| o.eq_ignore_ascii_case(text)) {
                Some(i) => found[i] = true,
                None => errs.push(Diagnostic::new(
                    Level::Info,
                    24,
                    format!("value '{text}' ignored because it is not a valid option for '{prop}'"),
                )),
            },
            None => errs.push(wrong_type(prop, item, "string")),
        }
    }
    (found, errs)
}

fn valid_opts(prop: &str, opts: &[&str], children: Vec<Diagnostic>) -> Diagnostic {
    let list = opts
        .iter()
        .map(|o| format!("\"{o}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Diagnostic::new(
        Level::Info,
        29,
        format!("valid values for the '{prop}' property are: {list}"),
    )
    .with_children(children)
}

fn ignored_errors(prop: &str, children: Vec<Diagnostic>) -> Diagnostic {
    Diagnostic::new(Level::Info, 28, format!("errors in '{prop}' were ignored")).with_children(children)
}

/// `{ option = "none" | "md5", key = "..." }`
fn load_security(v: &toml::Value, diags: &mut Diagnostics) -> Option<SecurityPolicy> {
    let Some(table) = v.as_table() else {
        diags.push(wrong_type("security", v, "table"));
        return None;
    };
    let option = match table.get("option") {
        None => {
            diags.push(not_found("option", "security"));
            return None;
        }
        Some(o) => match o.as_str().map(str::to_ascii_lowercase).as_deref() {
            Some("none") => SecurityOption::None,
            Some("md5") => SecurityOption::Md5,
            Some(other) => {
                diags.push(Diagnostic::new(
                    Level::Warn,
                    20,
                    format!("security option '{other}' is invalid, it must be 'none' or 'md5'"),
                ));
                return None;
            }
            None => {
                diags.push(wrong_type("option", o, "string"));
                return None;
            }
        },
    };
    if option == SecurityOption::None {
        return Some(SecurityPolicy::none());
    }
    match table.get("key") {
        None => {
            diags.push(not_found("key", "security"));
            None
        }
        Some(k) => match k.as_str() {
            Some(text) => {
                if text.len() > KEY_SIZE {
                    diags.push(Diagnostic::new(
                        Level::Warn,
                        21,
                        format!("'key' value is longer than {KEY_SIZE} bytes"),
                    ));
                    return None;
                }
                Some(SecurityPolicy::md5(SecurityKey::new(text.as_bytes())))
            }
            None => {
                diags.push(wrong_type("key", k, "string"));
                None
            }
        },
    }
}

/// A list of dotted-quad addresses. Malformed entries are reported and
/// skipped.
fn load_routers(v: &toml::Value, diags: &mut Vec<Diagnostic>) -> Vec<Ipv4Addr> {
    let Some(list) = v.as_array() else {
        diags.push(wrong_type("routers", v, "list"));
        return Vec::new();
    };
    let mut routers = Vec::new();
    for item in list {
        match item.as_str() {
            Some(text) => match text.parse::<Ipv4Addr>() {
                Ok(addr) => routers.push(addr),
                Err(_) => diags.push(Diagnostic::new(
                    Level::Warn,
                    21,
                    format!("'routers' value '{text}' malformed"),
                )),
            },
            None => diags.push(wrong_type("routers", item, "string")),
        }
    }
    routers
}

fn packet_style(gre: bool, l2: bool) -> Option<PacketStyle> {
    match (gre, l2) {
        (true, true) => Some(PacketStyle::GreOrL2),
        (true, false) => Some(PacketStyle::Gre),
        (false, true) => Some(PacketStyle::L2),
        (false, false) => None,
    }
}

fn assignment_style(hash: bool, mask: bool) -> Option<AssignmentStyle> {
    match (hash, mask) {
        (true, true) => Some(AssignmentStyle::HashOrMask),
        (true, false) => Some(AssignmentStyle::HashOnly),
        (false, true) => Some(AssignmentStyle::MaskOnly),
        (false, false) => None,
    }
}

/// Hash flag bits for the options found, starting at `base`.
fn hash_flags(found: &[bool], base: u32) -> u32 {
    found
        .iter()
        .enumerate()
        .filter(|(_, f)| **f)
        .fold(0, |acc, (i, _)| acc | (base << i))
}

/// Read the service definitions out of a parsed config document.
pub fn load_services(doc: &toml::Table) -> ServiceLoad {
    let mut load = ServiceLoad::default();

    let Some(services) = doc.get("services") else {
        load.diagnostics
            .push(Diagnostic::new(Level::Info, 3, "no services found in configuration"));
        return load;
    };
    let Some(services) = services.as_array() else {
        load.diagnostics.push(Diagnostic::new(
            Level::Info,
            4,
            "the 'services' setting is not a list",
        ));
        return load;
    };

    if let Some(v) = doc.get("security") {
        load.security = load_security(v, &mut load.diagnostics);
    }
    if let Some(v) = doc.get("routers") {
        let mut errs = Vec::new();
        load.routers = load_routers(v, &mut errs);
        for e in errs {
            load.diagnostics.push(e);
        }
    }

    for (idx, entry) in services.iter().enumerate() {
        let ctx = format!("services[{idx}]");
        let Some(table) = entry.as_table() else {
            load.diagnostics.push(Diagnostic::new(
                Level::Warn,
                5,
                format!("'{ctx}' must be a table"),
            ));
            continue;
        };
        let mut diags = Diagnostics::default();
        match load_service(table, &ctx, &load.routers, &mut diags) {
            Some(def) => {
                for d in diags.into_vec() {
                    load.diagnostics.push(d);
                }
                load.services.push(def);
            }
            None => load.diagnostics.push(
                Diagnostic::new(
                    Level::Fatal,
                    23,
                    format!("unable to create service group '{ctx}' because of configuration errors"),
                )
                .with_children(diags.into_vec()),
            ),
        }
    }
    load
}

/// One `[[services]]` table. Required properties are checked first; the
/// optional ones after that cannot prevent creation.
fn load_service(
    table: &toml::Table,
    ctx: &str,
    global_routers: &[Ipv4Addr],
    diags: &mut Diagnostics,
) -> Option<GroupDef> {
    let id = match table.get("id") {
        Some(v) => load_int("id", v, 255, diags).map(|n| n as u8),
        None => {
            diags.push(not_found("id", ctx));
            None
        }
    };

    let svc_type = match table.get("type") {
        Some(v) => match v.as_str() {
            Some(t) if t.eq_ignore_ascii_case("STANDARD") => Some(ServiceType::Standard),
            Some(t) if t.eq_ignore_ascii_case("DYNAMIC") => Some(ServiceType::Dynamic),
            Some(t) => {
                diags.push(Diagnostic::new(
                    Level::Warn,
                    7,
                    format!("service type '{t}' invalid, must be \"STANDARD\" or \"DYNAMIC\""),
                ));
                None
            }
            None => {
                diags.push(wrong_type("type", v, "string"));
                None
            }
        },
        None => {
            let t = if id.unwrap_or(0) <= ServiceGroup::RESERVED {
                ServiceType::Standard
            } else {
                ServiceType::Dynamic
            };
            diags.push(Diagnostic::new(
                Level::Info,
                6,
                format!("'type' not found in '{ctx}', defaulting to {t:?}"),
            ));
            Some(t)
        }
    };
    let standard = svc_type == Some(ServiceType::Standard);

    let mut svc = ServiceGroup::standard(id.unwrap_or(0))
        .with_svc_type(svc_type.unwrap_or(ServiceType::Standard));

    match table.get("protocol") {
        Some(_) if standard => diags.push(ignored_in_standard("protocol")),
        Some(v) => {
            if let Some(p) = load_int("protocol", v, 255, diags) {
                svc = svc.with_protocol(p as u8);
            }
        }
        None if !standard => diags.push(not_found("protocol", ctx)),
        None => {}
    }

    match table.get("priority") {
        Some(_) if standard => diags.push(ignored_in_standard("priority")),
        Some(v) => {
            if let Some(p) = load_int("priority", v, 255, diags) {
                svc = svc.with_priority(p as u8);
            }
        }
        None => {}
    }

    let mut flags = 0;
    match table.get("primary-hash") {
        Some(v) => {
            let (found, errs) = load_option_set("primary-hash", v, &HASH_OPTS);
            let f = hash_flags(&found, ServiceGroup::SRC_IP_HASH);
            if f == 0 {
                diags.push(valid_opts("primary-hash", &HASH_OPTS, errs));
                diags.push(Diagnostic::new(Level::Warn, 12, "service flags have no hash set"));
            } else if !errs.is_empty() {
                diags.push(ignored_errors("primary-hash", errs));
            }
            flags |= f;
        }
        None => diags.push(not_found("primary-hash", ctx)),
    }
    if let Some(v) = table.get("alt-hash") {
        let (found, errs) = load_option_set("alt-hash", v, &HASH_OPTS);
        flags |= hash_flags(&found, ServiceGroup::SRC_IP_ALT_HASH);
        if !errs.is_empty() {
            diags.push(ignored_errors("alt-hash", errs));
        }
    }
    if let Some(v) = table.get("port-type") {
        match v.as_str() {
            Some("src") => flags |= ServiceGroup::PORTS_SOURCE,
            Some("dst") => {}
            Some(other) => diags.push(Diagnostic::new(
                Level::Warn,
                30,
                format!("value '{other}' for 'port-type' invalid, must be \"src\" or \"dst\""),
            )),
            None => diags.push(wrong_type("port-type", v, "string")),
        }
    }

    match table.get("ports") {
        Some(_) if standard => diags.push(Diagnostic::new(
            Level::Info,
            19,
            "'ports' ignored because the service is of type STANDARD",
        )),
        Some(toml::Value::Array(list)) => {
            if list.len() > ServiceGroup::N_PORTS {
                diags.push(Diagnostic::new(
                    Level::Info,
                    14,
                    format!(
                        "excess ports ignored, {} specified, only {} supported",
                        list.len(),
                        ServiceGroup::N_PORTS
                    ),
                ));
            }
            let mut slot = 0;
            let mut malformed = false;
            for item in list.iter().take(ServiceGroup::N_PORTS) {
                match item.as_integer() {
                    Some(p) if (0..=65535).contains(&p) => {
                        svc = svc.with_port(slot, p as u16);
                        slot += 1;
                    }
                    Some(p) => diags.push(out_of_range("ports", p, 65535)),
                    None if !malformed => {
                        malformed = true;
                        diags.push(Diagnostic::new(Level::Info, 15, "port value ignored, not a number"));
                    }
                    None => {}
                }
            }
            if slot > 0 {
                flags |= ServiceGroup::PORTS_DEFINED;
            } else {
                diags.push(Diagnostic::new(
                    Level::Warn,
                    17,
                    "a 'ports' property was found but none of the ports were valid",
                ));
            }
        }
        Some(v) => diags.push(wrong_type("ports", v, "list")),
        None if !standard => diags.push(Diagnostic::new(
            Level::Warn,
            18,
            "ports must be defined for a dynamic service",
        )),
        None => {}
    }

    if !standard {
        svc = svc.with_flags(flags);
    }

    let security = table
        .get("security")
        .and_then(|v| load_security(v, diags));

    let mut routers = Vec::new();
    if let Some(v) = table.get("routers") {
        let mut errs = Vec::new();
        routers = load_routers(v, &mut errs);
        if !errs.is_empty() {
            diags.push(
                Diagnostic::new(Level::Info, 23, "router list invalid").with_children(errs),
            );
        }
    }
    if routers.is_empty() && global_routers.is_empty() {
        diags.push(Diagnostic::new(
            Level::Warn,
            22,
            format!("no valid IP address for routers found for '{ctx}'"),
        ));
    }

    if id.is_none() || svc_type.is_none() || diags.max_level() >= Some(Level::Warn) {
        return None;
    }

    let mut def = GroupDef::new(svc).with_routers(routers);
    if let Some(security) = security {
        def = def.with_security(security);
    }

    // Optional from here on.
    if let Some(v) = table.get("proc-name") {
        match v.as_str() {
            Some(path) => def = def.with_proc_name(path),
            None => diags.push(wrong_type("proc-name", v, "string")),
        }
    }

    let mut methods = Methods::default();
    if let Some(v) = table.get("forward") {
        let (found, errs) = load_option_set("forward", v, &PACKET_OPTS);
        match packet_style(found[0], found[1]) {
            Some(style) => methods.forward = style,
            None => diags.push(
                Diagnostic::new(Level::Info, 26, "defaulting to GRE forwarding").with_children(errs),
            ),
        }
    }
    if let Some(v) = table.get("return") {
        let (found, errs) = load_option_set("return", v, &PACKET_OPTS);
        match packet_style(found[0], found[1]) {
            Some(style) => methods.ret = style,
            None => diags.push(
                Diagnostic::new(Level::Info, 26, "defaulting to GRE return").with_children(errs),
            ),
        }
    }
    if let Some(v) = table.get("assignment") {
        let (found, errs) = load_option_set("assignment", v, &ASSIGN_OPTS);
        match assignment_style(found[0], found[1]) {
            Some(style) => methods.assign = style,
            None => diags.push(
                Diagnostic::new(Level::Info, 26, "defaulting to hash assignment only").with_children(errs),
            ),
        }
    }

    Some(def.with_methods(methods))
}
