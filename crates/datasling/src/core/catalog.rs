//! Backend kinds and their capability table.
//!
//! Every supported backend is a row in one flat table: which URL schemes
//! select it, which native dump tool (if any) can export from it, and whether
//! it accepts `COPY ... FROM STDIN`. Connection implementations consult this
//! table, together with the per-connection [`Properties`], to choose between
//! a fast path and the generic fallback.

use std::fmt;
use std::process::{Command, Stdio};

use super::props::{Properties, ALLOW_BULK_EXPORT, ALLOW_BULK_IMPORT, FETCH_SIZE};

/// Default rows per cursor page.
pub const DEFAULT_FETCH_SIZE: usize = 10_000;

/// Supported backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbKind {
    Postgres,
    Redshift,
}

/// Static capabilities of a backend kind.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// URL schemes that select this kind.
    pub schemes: &'static [&'static str],
    /// Native dump tool for bulk export.
    pub dump_tool: Option<&'static str>,
    /// Whether `COPY ... FROM STDIN` is accepted.
    pub copy_in: bool,
    /// Whether backslash is an escape character inside plain string literals.
    pub backslash_literals: bool,
    /// Whether `DECLARE` accepts `NO SCROLL`.
    pub no_scroll_cursor: bool,
}

const POSTGRES: Capabilities = Capabilities {
    schemes: &["postgres", "postgresql"],
    dump_tool: Some("psql"),
    copy_in: true,
    backslash_literals: false,
    no_scroll_cursor: true,
};

const REDSHIFT: Capabilities = Capabilities {
    schemes: &["redshift"],
    dump_tool: None,
    copy_in: false,
    backslash_literals: true,
    no_scroll_cursor: false,
};

impl DbKind {
    /// All known kinds.
    pub const ALL: [DbKind; 2] = [DbKind::Postgres, DbKind::Redshift];

    /// Look up the kind selected by a URL scheme.
    pub fn from_scheme(scheme: &str) -> Option<DbKind> {
        let scheme = scheme.to_ascii_lowercase();
        DbKind::ALL
            .into_iter()
            .find(|k| k.capabilities().schemes.contains(&scheme.as_str()))
    }

    /// Capability table row for this kind.
    pub fn capabilities(self) -> &'static Capabilities {
        match self {
            DbKind::Postgres => &POSTGRES,
            DbKind::Redshift => &REDSHIFT,
        }
    }

    /// Short identifier used in logs and results.
    pub fn name(self) -> &'static str {
        match self {
            DbKind::Postgres => "postgres",
            DbKind::Redshift => "redshift",
        }
    }

    /// Property defaults for a fresh connection of this kind.
    pub fn default_props(self) -> Properties {
        let mut props = Properties::new();
        props.set_prop(ALLOW_BULK_EXPORT, "false");
        props.set_prop(ALLOW_BULK_IMPORT, self.capabilities().copy_in.to_string());
        props.set_prop(FETCH_SIZE, DEFAULT_FETCH_SIZE.to_string());
        props
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Check whether an external tool can be launched from `PATH`.
pub fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}
