//! # Connection
//!
//! Opening a session, authenticating and checking the bridge version.
//!
//! ## Sequence
//!
//! 1. `open(uri)` on the [`Connector`].
//! 2. Authenticate: signed when the manifest carries a key, named when it
//!    does not, anonymous without a manifest.
//! 3. Build the `session` and `system` bus handles.
//! 4. Query `getVersion` and compare it with the configured minimum.
//!
//! Each step starts only after the previous one fulfilled; the first failure
//! rejects the returned [`Deferred`] and nothing after it runs.

use std::fmt;
use std::rc::Rc;

use deferred::Deferred;
use deferred::Resolution;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bus::Bus;
use crate::bus::BusKind;
use crate::codec;
use crate::config::Config;
use crate::dispatch;
use crate::session;
use crate::session::Connector;
use crate::session::Handshake;
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("cannot connect to {uri}: {source}")]
    Connection { uri: String, source: session::Error },
    #[error("{0}")]
    Authentication(session::Error),
    #[error("version query failed: {0}")]
    VersionQuery(session::Error),
    #[error("server version {remote} unsupported, need version {minimum} or superior")]
    Version { remote: String, minimum: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Who the application is and what it asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Manifest {
    pub name: String,
    /// Shared secret used to sign the authentication challenge.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Manifest {
    pub fn handshake(&self) -> Handshake {
        match &self.key {
            Some(key) => Handshake::signed(&self.name, self.permissions.clone(), key),
            None => Handshake::named(&self.name, self.permissions.clone()),
        }
    }
}

/// An authenticated, version-checked session and its two bus handles.
#[derive(Clone)]
pub struct Connection {
    uri: String,
    session: Rc<dyn Session>,
    session_bus: Bus,
    system_bus: Bus,
    server_version: String,
    capabilities: Vec<String>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("uri", &self.uri)
            .field("server_version", &self.server_version)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn session(&self) -> &Rc<dyn Session> {
        &self.session
    }

    pub fn session_bus(&self) -> &Bus {
        &self.session_bus
    }

    pub fn system_bus(&self) -> &Bus {
        &self.system_bus
    }

    pub fn bus(&self, kind: BusKind) -> &Bus {
        match kind {
            BusKind::Session => &self.session_bus,
            BusKind::System => &self.system_bus,
        }
    }

    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Permissions granted by the handshake.
    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }
}

/// Opens, authenticates and version-checks a connection to `uri`.
pub fn connect(
    connector: &dyn Connector,
    uri: &str,
    manifest: Option<&Manifest>,
    config: &Config,
) -> Deferred<Connection, Error> {
    let handshake = manifest.map(Manifest::handshake).unwrap_or_default();
    let config = config.clone();
    let uri = uri.to_string();
    let failed_uri = uri.clone();

    debug!(%uri, identity = ?handshake.identity, signed = handshake.is_signed(), "connecting");
    connector
        .open(&uri)
        .map_err(move |source| {
            warn!(uri = %failed_uri, %source, "error connecting");
            Error::Connection {
                uri: failed_uri,
                source,
            }
        })
        .and_then(move |session| Ok(Resolution::Deferred(authenticate(session, uri, handshake, config))))
}

fn authenticate(session: Rc<dyn Session>, uri: String, handshake: Handshake, config: Config) -> Deferred<Connection, Error> {
    let reply = session.authenticate(&handshake);
    reply
        .map_err(|error| {
            warn!(%error, "authentication failed");
            Error::Authentication(error)
        })
        .and_then(move |capabilities| Ok(Resolution::Deferred(negotiate(session, uri, capabilities, config))))
}

fn negotiate(session: Rc<dyn Session>, uri: String, capabilities: Vec<String>, config: Config) -> Deferred<Connection, Error> {
    let session_bus = Bus::new(BusKind::Session, Rc::clone(&session)).with_policy(config.property_policy);
    let system_bus = Bus::new(BusKind::System, Rc::clone(&session)).with_policy(config.property_policy);

    let reply = session.call(dispatch::VERSION, &[]);
    reply
        .map_err(|error| {
            warn!(%error, "error querying server version");
            Error::VersionQuery(error)
        })
        .and_then(move |reply| {
            let remote = codec::reply_text(reply);
            if !version_supported(&remote, &config.min_version) {
                let error = Error::Version {
                    remote,
                    minimum: config.min_version,
                };
                warn!(%error, "version check failed");
                return Err(error);
            }
            info!(%uri, server_version = %remote, "connected");
            Ok(Resolution::Value(Connection {
                uri,
                session,
                session_bus,
                system_bus,
                server_version: remote,
                capabilities,
            }))
        })
}

/// Splits `a.b.c` into its numeric segments.
pub(crate) fn parse_version(text: &str) -> Option<Vec<u64>> {
    text.trim().split('.').map(|segment| segment.parse().ok()).collect()
}

/// Whether `remote` is at least `minimum`.
///
/// Segments are compared pairwise over the shorter of the two versions and
/// the first difference decides, so `0.4` satisfies `0.3.2` and `0.3`
/// satisfies `0.3.2` too. A non-numeric segment on either side fails.
pub fn version_supported(remote: &str, minimum: &str) -> bool {
    let (Some(remote), Some(minimum)) = (parse_version(remote), parse_version(minimum)) else {
        return false;
    };
    for (have, need) in remote.iter().zip(&minimum) {
        if have != need {
            return have > need;
        }
    }
    true
}
