//! Bolt protocol version definitions.

use std::fmt;

/// Negotiated Bolt protocol version.
///
/// Versions are ordered by major, then minor, so `BoltVersion::V5_1 > BoltVersion::V4_4`.
/// The pool compares connection versions against an acquisition floor with this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoltVersion {
    major: u8,
    minor: u8,
}

impl BoltVersion {
    /// Bolt 4.0 (multi-database)
    pub const V4_0: BoltVersion = BoltVersion::new(4, 0);
    /// Bolt 4.1
    pub const V4_1: BoltVersion = BoltVersion::new(4, 1);
    /// Bolt 4.2
    pub const V4_2: BoltVersion = BoltVersion::new(4, 2);
    /// Bolt 4.3 - Added ROUTE message
    pub const V4_3: BoltVersion = BoltVersion::new(4, 3);
    /// Bolt 4.4 - Impersonation
    pub const V4_4: BoltVersion = BoltVersion::new(4, 4);
    /// Bolt 5.0 - Element IDs
    pub const V5_0: BoltVersion = BoltVersion::new(5, 0);
    /// Bolt 5.1 - LOGON/LOGOFF (re-authentication)
    pub const V5_1: BoltVersion = BoltVersion::new(5, 1);
    /// Bolt 5.2 - Notification filters
    pub const V5_2: BoltVersion = BoltVersion::new(5, 2);
    /// Bolt 5.3 - Bolt agent
    pub const V5_3: BoltVersion = BoltVersion::new(5, 3);
    /// Bolt 5.4 - TELEMETRY message
    pub const V5_4: BoltVersion = BoltVersion::new(5, 4);

    /// All known versions in order of preference (newest first).
    pub const ALL: [BoltVersion; 10] = [
        BoltVersion::V5_4,
        BoltVersion::V5_3,
        BoltVersion::V5_2,
        BoltVersion::V5_1,
        BoltVersion::V5_0,
        BoltVersion::V4_4,
        BoltVersion::V4_3,
        BoltVersion::V4_2,
        BoltVersion::V4_1,
        BoltVersion::V4_0,
    ];

    /// Create a version from its components.
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Get the major version number.
    pub fn major(self) -> u8 {
        self.major
    }

    /// Get the minor version number.
    pub fn minor(self) -> u8 {
        self.minor
    }

    /// Check if this version supports the ROUTE message.
    pub fn supports_route(self) -> bool {
        self >= BoltVersion::V4_3
    }

    /// Check if this version can address a database other than the default one.
    pub fn supports_multi_db(self) -> bool {
        self >= BoltVersion::V4_0
    }

    /// Check if this version supports LOGON/LOGOFF, i.e. re-authentication
    /// of an open connection.
    pub fn supports_reauth(self) -> bool {
        self >= BoltVersion::V5_1
    }

    /// Check if this version supports the TELEMETRY message.
    pub fn supports_telemetry(self) -> bool {
        self >= BoltVersion::V5_4
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
