//! Provider configuration

/// Configuration for the session state provider
///
/// Every field has a hardcoded default; an explicitly set value always
/// overrides it. The connection and namespace fields are resolved once by
/// the backend constructor and reused for the life of the process.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Backing-store endpoint (default: "redis://127.0.0.1:6379/")
    pub connection_url: String,

    /// Logical namespace for session records (default: "SessionState")
    pub database_name: String,

    /// Where session records live inside the namespace (default: "Session")
    pub collection_name: String,

    /// Application discriminator folded into every record key
    /// (default: "AppName")
    pub application_name: String,

    /// Idle timeout applied to new and touched sessions, in minutes
    /// (default: 21)
    pub timeout_minutes: i64,

    /// Emit one object-size audit record per session write (default: false)
    pub log_session_objects: bool,

    /// Emit an audit record per lifecycle event (default: false)
    pub log_events: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            connection_url: "redis://127.0.0.1:6379/".to_string(),
            database_name: "SessionState".to_string(),
            collection_name: "Session".to_string(),
            application_name: "AppName".to_string(),
            timeout_minutes: 21,
            log_session_objects: false,
            log_events: false,
        }
    }
}

impl ProviderConfig {
    /// Create a configuration with all defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the backing-store endpoint
    pub fn with_connection_url<S: Into<String>>(mut self, url: S) -> Self {
        self.connection_url = url.into();
        self
    }

    /// Set the logical namespace for session records
    pub fn with_database_name<S: Into<String>>(mut self, name: S) -> Self {
        self.database_name = name.into();
        self
    }

    /// Set where session records live inside the namespace
    pub fn with_collection_name<S: Into<String>>(mut self, name: S) -> Self {
        self.collection_name = name.into();
        self
    }

    /// Set the application discriminator folded into record keys
    pub fn with_application_name<S: Into<String>>(mut self, name: S) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the idle timeout in minutes
    pub fn with_timeout_minutes(mut self, minutes: i64) -> Self {
        self.timeout_minutes = minutes;
        self
    }

    /// Toggle object-size audit records on session writes
    pub fn with_session_object_logging(mut self, enabled: bool) -> Self {
        self.log_session_objects = enabled;
        self
    }

    /// Toggle per-event audit records
    pub fn with_event_logging(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Key prefix under which session records are stored
    pub fn namespace(&self) -> String {
        format!("{}:{}:", self.database_name, self.collection_name)
    }

    /// Key prefix under which audit records are stored
    pub fn audit_namespace(&self) -> String {
        format!("{}.Log:", self.database_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_values_override_defaults() {
        let config = ProviderConfig::new()
            .with_database_name("Sessions")
            .with_application_name("shop")
            .with_timeout_minutes(20);
        assert_eq!(config.database_name, "Sessions");
        assert_eq!(config.application_name, "shop");
        assert_eq!(config.timeout_minutes, 20);
        // Untouched fields keep their defaults
        assert_eq!(config.collection_name, "Session");
        assert_eq!(config.namespace(), "Sessions:Session:");
        assert_eq!(config.audit_namespace(), "Sessions.Log:");
    }
}
