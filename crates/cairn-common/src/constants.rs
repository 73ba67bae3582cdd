//! System-wide constants and default paths.

/// Default state file, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".cairn/state.json";

/// Default manifest file looked up by the CLI.
pub const DEFAULT_MANIFEST: &str = "cairn.yml";

/// Default number of lifecycle calls allowed in flight.
///
/// `1` reproduces the sequential reference behavior.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Version written into, and accepted from, state files.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Component type assumed for a manifest root without an explicit `type`.
pub const DECLARATIVE_TYPE: &str = "Declarative";

/// Separator between declaration keys inside an identity.
pub const IDENTITY_SEPARATOR: char = '.';
