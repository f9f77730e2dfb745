//! Bolt request messages.
//!
//! Request messages are sent from the client to the server. The connection
//! layer builds them (RESET for liveness checks, LOGOFF/LOGON for
//! re-authentication, ROUTE for rediscovery) and forwards the rest unchanged.

use std::collections::HashMap;
use std::time::Duration;

use super::value::Value;

/// Access mode for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Read-write access (default)
    #[default]
    Write,
    /// Read-only access
    Read,
}

impl AccessMode {
    /// Parse an access mode. Anything other than `r`/`read` is treated as write.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "r" | "read" => AccessMode::Read,
            _ => AccessMode::Write,
        }
    }

    /// Convert to string for metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

/// Authentication token sent in HELLO/LOGON.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthToken {
    /// Authentication scheme (e.g., "basic", "bearer")
    pub scheme: String,
    /// Principal (username)
    pub principal: Option<String>,
    /// Credentials (password, bearer token)
    pub credentials: Option<String>,
    /// Realm
    pub realm: Option<String>,
    /// Additional parameters
    pub parameters: HashMap<String, Value>,
}

impl AuthToken {
    /// Create a basic auth token.
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self {
            scheme: "basic".to_string(),
            principal: Some(principal.into()),
            credentials: Some(credentials.into()),
            realm: None,
            parameters: HashMap::new(),
        }
    }

    /// Create a bearer auth token.
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            scheme: "bearer".to_string(),
            principal: None,
            credentials: Some(token.into()),
            realm: None,
            parameters: HashMap::new(),
        }
    }

    /// Create an anonymous auth token (no auth).
    pub fn none() -> Self {
        Self {
            scheme: "none".to_string(),
            principal: None,
            credentials: None,
            realm: None,
            parameters: HashMap::new(),
        }
    }

    /// Set the realm.
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Convert to a value map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        let mut map = HashMap::new();
        map.insert("scheme".to_string(), Value::String(self.scheme.clone()));
        if let Some(ref p) = self.principal {
            map.insert("principal".to_string(), Value::String(p.clone()));
        }
        if let Some(ref c) = self.credentials {
            map.insert("credentials".to_string(), Value::String(c.clone()));
        }
        if let Some(ref r) = self.realm {
            map.insert("realm".to_string(), Value::String(r.clone()));
        }
        for (k, v) in &self.parameters {
            map.insert(k.clone(), v.clone());
        }
        map
    }
}

impl Default for AuthToken {
    fn default() -> Self {
        Self::none()
    }
}

/// Transaction-level fields shared by BEGIN and auto-commit RUN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionParams {
    /// Target database (None = server default / home database)
    pub database: Option<String>,
    /// Access mode
    pub access_mode: AccessMode,
    /// Impersonated user
    pub impersonated_user: Option<String>,
    /// Bookmarks to wait for
    pub bookmarks: Vec<String>,
    /// Transaction timeout
    pub tx_timeout: Option<Duration>,
    /// Transaction metadata
    pub tx_metadata: HashMap<String, Value>,
}

impl TransactionParams {
    /// Create empty transaction parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set database.
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = Some(db.into());
        self
    }

    /// Set access mode.
    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Set bookmarks.
    pub fn with_bookmarks(mut self, bookmarks: Vec<String>) -> Self {
        self.bookmarks = bookmarks;
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = Some(timeout);
        self
    }
}

/// All Bolt request messages the connection layer can pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// RESET - return the connection to a clean state
    Reset,
    /// LOGOFF - drop the current authentication (Bolt 5.1+)
    Logoff,
    /// LOGON - authenticate with a token (Bolt 5.1+)
    Logon(AuthToken),
    /// ROUTE - fetch the routing table (Bolt 4.3+)
    Route {
        /// Routing context from the connection URI
        routing_context: HashMap<String, String>,
        /// Target database
        database: Option<String>,
        /// Impersonated user
        impersonated_user: Option<String>,
        /// Bookmarks
        bookmarks: Vec<String>,
    },
    /// BEGIN - open an explicit transaction
    Begin(TransactionParams),
    /// RUN - execute a query
    Run {
        /// Query text
        query: String,
        /// Query parameters
        parameters: HashMap<String, Value>,
        /// Auto-commit transaction fields (None inside an explicit transaction)
        transaction: Option<TransactionParams>,
    },
    /// PULL - fetch records
    Pull {
        /// Query id (-1 = last)
        qid: i64,
        /// Number of records (-1 = all)
        n: i64,
    },
    /// DISCARD - drop records
    Discard {
        /// Query id (-1 = last)
        qid: i64,
        /// Number of records (-1 = all)
        n: i64,
    },
    /// COMMIT
    Commit,
    /// ROLLBACK
    Rollback,
    /// TELEMETRY - report driver API usage (Bolt 5.4+)
    Telemetry(i64),
}

impl Message {
    /// Create a RUN message without transaction fields.
    pub fn run(query: impl Into<String>) -> Self {
        Message::Run {
            query: query.into(),
            parameters: HashMap::new(),
            transaction: None,
        }
    }

    /// Create a PULL message for all remaining records of the last query.
    pub fn pull_all() -> Self {
        Message::Pull { qid: -1, n: -1 }
    }

    /// Create a ROUTE message.
    pub fn route(
        routing_context: HashMap<String, String>,
        database: Option<String>,
        impersonated_user: Option<String>,
        bookmarks: Vec<String>,
    ) -> Self {
        Message::Route {
            routing_context,
            database,
            impersonated_user,
            bookmarks,
        }
    }

    /// Get message name.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Reset => "RESET",
            Message::Logoff => "LOGOFF",
            Message::Logon(_) => "LOGON",
            Message::Route { .. } => "ROUTE",
            Message::Begin(_) => "BEGIN",
            Message::Run { .. } => "RUN",
            Message::Pull { .. } => "PULL",
            Message::Discard { .. } => "DISCARD",
            Message::Commit => "COMMIT",
            Message::Rollback => "ROLLBACK",
            Message::Telemetry(_) => "TELEMETRY",
        }
    }
}
