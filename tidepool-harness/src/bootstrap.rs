//! Per-thread connection and session setup.

use std::sync::Arc;

use tidepool_core::{BackendDriver, Connection, Database, Session};
use tracing::{debug, instrument};

use crate::args::{ThreadArguments, ThreadScope};
use crate::error::SetupError;

/// The handles a worker owns for the duration of its run.
pub struct BootstrappedSession {
    connection: Option<Arc<dyn Connection>>,
    session: Option<Box<dyn Session>>,
    db: Arc<dyn Database>,
}

impl std::fmt::Debug for BootstrappedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrappedSession")
            .field("connection", &self.connection)
            .field("session", &self.session)
            .field("db", &self.db.name())
            .finish()
    }
}

impl BootstrappedSession {
    /// Database handle the workloads run against.
    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// The session, when one was started.
    pub fn session(&self) -> Option<&dyn Session> {
        self.session.as_deref()
    }

    /// The connection backing the handle.
    pub fn connection(&self) -> Option<&Arc<dyn Connection>> {
        self.connection.as_ref()
    }

    /// Swap the database handle, typically for a decorated one.
    pub fn map_db(mut self, f: impl FnOnce(Arc<dyn Database>) -> Arc<dyn Database>) -> Self {
        self.db = f(self.db);
        self
    }
}

/// Open the connection (and session) a worker runs on.
///
/// A standalone topology reuses the thread's ambient connection. Any other
/// topology drops the ambient connection and connects to `args.host`, starting
/// a session when `args.session_options` is set. Initial cluster and operation
/// times are not passed to the driver; they are applied to the new session
/// through one advance call each.
#[instrument(level = "debug", skip_all, fields(tid = args.tid, host = %args.host))]
pub fn bootstrap(
    driver: &dyn BackendDriver,
    args: &ThreadArguments,
    scope: &mut ThreadScope,
) -> Result<BootstrappedSession, SetupError> {
    if args.topology.is_standalone() {
        let connection = scope
            .ambient
            .clone()
            .ok_or(SetupError::MissingAmbientConnection { tid: args.tid })?;
        let db = connection.database(&args.db_name);
        debug!(db = %args.db_name, "using ambient connection");
        return Ok(BootstrappedSession {
            connection: Some(connection),
            session: None,
            db,
        });
    }

    if let Some(ambient) = scope.ambient.take() {
        debug!(host = ambient.host(), "discarding ambient connection");
        drop(ambient);
    }

    let connection = driver
        .connect(&args.host)
        .map_err(|source| SetupError::Connect {
            host: args.host.clone(),
            source,
        })?;

    let Some(options) = &args.session_options else {
        let db = connection.database(&args.db_name);
        return Ok(BootstrappedSession {
            connection: Some(connection),
            session: None,
            db,
        });
    };

    let mut options = options.clone();
    let initial_cluster_time = options.initial_cluster_time.take();
    let initial_operation_time = options.initial_operation_time.take();

    let mut session = connection
        .start_session(&options)
        .map_err(SetupError::StartSession)?;

    if let Some(cluster_time) = &initial_cluster_time {
        debug!(cluster_time = %cluster_time.cluster_time, "advancing session cluster time");
        session
            .advance_cluster_time(cluster_time)
            .map_err(SetupError::Session)?;
    }
    if let Some(operation_time) = initial_operation_time {
        debug!(%operation_time, "advancing session operation time");
        session
            .advance_operation_time(operation_time)
            .map_err(SetupError::Session)?;
    }

    let db = session.database(&args.db_name);
    Ok(BootstrappedSession {
        connection: Some(connection),
        session: Some(session),
        db,
    })
}
