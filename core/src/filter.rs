use serde::{Deserialize, Serialize};

use crate::{BusError, Result};

/// How strictly inbound envelopes are matched against the local connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Only envelopes carrying exactly the local connection id are accepted.
    Strict,
    /// Every structured envelope is accepted, whatever its connection id.
    ///
    /// This gives up logical isolation between endpoints sharing one
    /// transport; scope restriction on the transport may still apply.
    Open,
}

impl IsolationMode {
    /// Mode implied by the presence of a connection id.
    pub fn implied_by(connection_id: Option<&str>) -> Self {
        match connection_id {
            Some(_) => IsolationMode::Strict,
            None => IsolationMode::Open,
        }
    }
}

impl std::str::FromStr for IsolationMode {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(IsolationMode::Strict),
            "open" => Ok(IsolationMode::Open),
            other => Err(BusError::InvalidConfig(format!(
                "unknown isolation mode '{other}' (expected 'strict' or 'open')"
            ))),
        }
    }
}

/// Decides whether a decoded envelope belongs to this logical connection.
///
/// Raw payloads that failed envelope decoding never pass through here; they
/// carry no connection id and reach the `"message"` channel unfiltered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionFilter {
    connection_id: Option<String>,
    mode: IsolationMode,
}

impl ConnectionFilter {
    /// Builds a filter, rejecting strict mode without an id to compare against.
    pub fn new(connection_id: Option<String>, mode: IsolationMode) -> Result<Self> {
        if mode == IsolationMode::Strict && connection_id.is_none() {
            return Err(BusError::InvalidConfig(
                "strict isolation requires a connection id".into(),
            ));
        }
        Ok(Self {
            connection_id,
            mode,
        })
    }

    /// Filter whose mode follows from whether an id is set.
    pub fn implied(connection_id: Option<String>) -> Self {
        let mode = IsolationMode::implied_by(connection_id.as_deref());
        Self {
            connection_id,
            mode,
        }
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// True when an envelope stamped with `remote` should be dispatched.
    pub fn accepts(&self, remote: Option<&str>) -> bool {
        match self.mode {
            IsolationMode::Open => true,
            IsolationMode::Strict => self.connection_id.as_deref() == remote && remote.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_accepts_only_matching_id() {
        let f = ConnectionFilter::implied(Some("svc1".into()));
        assert_eq!(f.mode(), IsolationMode::Strict);
        assert!(f.accepts(Some("svc1")));
        assert!(!f.accepts(Some("svc2")));
        assert!(!f.accepts(None));
    }

    #[test]
    fn absent_id_is_promiscuous() {
        let f = ConnectionFilter::implied(None);
        assert_eq!(f.mode(), IsolationMode::Open);
        assert!(f.accepts(Some("anything")));
        assert!(f.accepts(None));
    }

    #[test]
    fn open_mode_with_id_accepts_everything() {
        let f = ConnectionFilter::new(Some("svc1".into()), IsolationMode::Open).unwrap();
        assert!(f.accepts(Some("svc2")));
        assert_eq!(f.connection_id(), Some("svc1"));
    }

    #[test]
    fn strict_without_id_is_rejected() {
        let err = ConnectionFilter::new(None, IsolationMode::Strict).unwrap_err();
        assert!(matches!(err, BusError::InvalidConfig(_)));
    }

    #[test]
    fn isolation_mode_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<IsolationMode>().unwrap(), IsolationMode::Strict);
        assert_eq!(" open ".parse::<IsolationMode>().unwrap(), IsolationMode::Open);
        assert!("loose".parse::<IsolationMode>().is_err());
    }
}
