//! The user-facing entry point: owns the topology engine, a connection pool per server address,
//! and the cluster-time/session bookkeeping shared across every operation issued against a
//! deployment.

pub(crate) mod auth;
pub(crate) mod session;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use bson::Document;

use session::ClusterTimeTracker;

use crate::{
    cmap::{conn::Connection, pool::Pool},
    coll::Collection,
    concern::{ReadConcern, WriteConcern},
    db::Database,
    error::{Error, Result},
    operation::{Operation, Retryability},
    options::{ClientOptions, Namespace, ServerAddress},
    read_preference::SelectionCriteria,
    sdam::{server_selection::OperationIntent, topology_worker::TopologyHandle, TopologyStatus},
};

/// A handle to a MongoDB deployment: the topology engine tracking its members plus one
/// connection pool per member. Cheaply cloned (every field is reference-counted) and safe to
/// share across threads; [`Collection`]/[`Database`] handles borrow it for the lifetime of the
/// calls they make.
pub struct Client {
    options: Arc<ClientOptions>,
    topology: TopologyHandle,
    pools: Mutex<HashMap<ServerAddress, Arc<Pool>>>,
    cluster_time: ClusterTimeTracker,
}

impl Client {
    /// Parses `uri` and establishes a client against it. Topology monitoring starts
    /// immediately, in the background; this call does not itself block waiting for a server to
    /// become available — the first operation issued does that via server selection.
    pub fn with_uri_str(uri: &str) -> Result<Self> {
        let options = ClientOptions::parse(uri, None)?;
        Self::with_options(options)
    }

    /// Builds a client from already-assembled [`ClientOptions`].
    pub fn with_options(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let options = Arc::new(options);
        let topology = TopologyHandle::start((*options).clone());
        Ok(Self {
            options,
            topology,
            pools: Mutex::new(HashMap::new()),
            cluster_time: ClusterTimeTracker::default(),
        })
    }

    /// A snapshot of the topology's current view of the deployment. Pass `refresh = true` to
    /// request an immediate rescan of every known server before the snapshot is taken (the
    /// snapshot still reflects whatever the scan had completed by the time it's read, not a
    /// guaranteed fully up-to-date view).
    pub fn topology_status(&self, refresh: bool) -> TopologyStatus {
        if refresh {
            self.topology.mark_stale();
        }
        self.topology.snapshot().into()
    }

    /// Forces an immediate full topology scan. Monitoring already runs continuously in the
    /// background; this is useful after a configuration change an application knows about out
    /// of band (e.g. a manual failover) to avoid waiting out the next heartbeat interval.
    pub fn connect(&self) {
        self.topology.mark_stale();
    }

    /// Closes every pooled connection to every known server. Pools are recreated lazily on the
    /// next operation that needs one; monitoring is unaffected.
    pub fn disconnect(&self) {
        let mut pools = self.pools.lock().unwrap();
        for (_, pool) in pools.drain() {
            pool.clear();
        }
    }

    /// Equivalent to [`Client::disconnect`] followed by [`Client::connect`].
    pub fn reconnect(&self) {
        self.disconnect();
        self.connect();
    }

    /// Runs the administrative `fsync` command against the `admin` database.
    pub fn fsync(&self, lock: bool) -> Result<Document> {
        self.run_command(
            "admin",
            bson::doc! { "fsync": 1, "lock": lock },
            None,
        )
    }

    /// Runs the administrative `fsyncUnlock` command against the `admin` database.
    pub fn fsync_unlock(&self) -> Result<Document> {
        self.run_command("admin", bson::doc! { "fsyncUnlock": 1 }, None)
    }

    /// Returns a handle to `name`, inheriting this client's default read/write concern and read
    /// preference unless the caller overrides them.
    pub fn database(&self, name: &str) -> Database<'_> {
        Database::new(self, name.to_string())
    }

    /// Returns a handle to `db.coll`.
    pub fn collection(&self, db: &str, coll: &str) -> Collection<'_> {
        self.database(db).collection(coll)
    }

    /// Lists the names (and, unless `name_only` narrows the reply, full metadata) of every
    /// database visible to the authenticated user.
    pub fn list_database_names(&self, filter: Option<Document>) -> Result<Vec<String>> {
        let databases = self.list_databases(filter, true)?;
        Ok(databases
            .into_iter()
            .filter_map(|doc| doc.get_str("name").ok().map(str::to_string))
            .collect())
    }

    /// Runs `listDatabases` against the `admin` database, returning one document per database.
    pub fn list_databases(&self, filter: Option<Document>, name_only: bool) -> Result<Vec<Document>> {
        self.execute_read(&crate::operation::list_databases::ListDatabases { filter, name_only })
    }

    pub(crate) fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub(crate) fn default_read_concern(&self) -> Option<ReadConcern> {
        self.options.read_concern.clone()
    }

    pub(crate) fn default_write_concern(&self) -> Option<WriteConcern> {
        self.options.write_concern.clone()
    }

    pub(crate) fn default_selection_criteria(&self) -> Option<SelectionCriteria> {
        self.options
            .read_preference
            .clone()
            .map(SelectionCriteria::ReadPreference)
    }

    /// The write concern that should apply to writes against `ns`, absent an operation-level
    /// override: currently just the client's default, since this crate does not expose
    /// per-database/per-collection write concern overrides independent of
    /// [`Database`]/[`Collection`] (see [`Collection::with_write_concern`]).
    pub(crate) fn write_concern_for(&self, _ns: &Namespace) -> Option<WriteConcern> {
        self.default_write_concern()
    }

    /// The `maxWriteBatchSize` advertised by a currently-writable server, or the driver's
    /// built-in default if none has been probed yet (e.g. before the first successful
    /// handshake).
    pub(crate) fn max_write_batch_size(&self) -> usize {
        let snapshot = self.topology.snapshot();
        snapshot
            .servers
            .values()
            .find(|s| s.is_available())
            .map(|s| s.max_write_batch_size as usize)
            .unwrap_or(100_000)
    }

    fn pool_for(&self, address: &ServerAddress) -> Arc<Pool> {
        let mut pools = self.pools.lock().unwrap();
        pools
            .entry(address.clone())
            .or_insert_with(|| Arc::new(Pool::new(address.clone(), (*self.options).clone())))
            .clone()
    }

    /// Drops the connection pool for `address` entirely, forcing fresh connections (and a fresh
    /// handshake) on the next operation routed there. Called after a network error, mirroring
    /// the monitor's own reconnect-from-scratch behavior for that address.
    fn clear_pool(&self, address: &ServerAddress) {
        if let Some(pool) = self.pools.lock().unwrap().get(address) {
            pool.clear();
        }
    }

    /// Selects a server satisfying `intent`, checks out a connection to it from that server's
    /// pool, and hands both to `f`. On success the connection is returned to the pool; on a
    /// network error it is discarded (never reused) and the server is marked `Unknown` so the
    /// next selection forces a fresh scan.
    fn with_connection<T>(
        &self,
        intent: OperationIntent<'_>,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<(ServerAddress, Result<T>)> {
        let address = self.topology.select(intent)?;
        let pool = self.pool_for(&address);
        let mut conn = pool.check_out().map_err(|e| {
            // §4.5: an auth failure during connection establishment means every server we
            // thought we knew about might be behind a credential we can no longer trust, not
            // just this one address. Reset the whole topology to Unknown and raise; never retry.
            if e.is_authentication_error() {
                self.topology.mark_all_unknown(e.to_string());
            }
            e
        })?;

        // §4.4 step 7: a connection that's sat idle past socket_check_interval is re-verified
        // with a cheap ping before being handed to the caller; a failed ping means the server is
        // no longer reachable, so the connection is discarded and selection restarts rather than
        // using a link that's likely already dead.
        let socket_check_interval = self
            .options
            .socket_check_interval
            .unwrap_or(crate::options::DEFAULT_SOCKET_CHECK_INTERVAL);
        if conn.last_used().elapsed() >= socket_check_interval {
            if let Err(e) = conn.command("admin", bson::doc! { "ping": 1 }) {
                pool.discard(conn);
                self.topology.mark_unknown(address.clone(), e.to_string());
                return self.with_connection(intent, f);
            }
        }

        let outcome = f(&mut conn);
        match &outcome {
            Ok(_) => pool.check_in(conn),
            Err(e) if e.is_network_error() => {
                pool.discard(conn);
                self.topology.mark_unknown(address.clone(), e.to_string());
            }
            Err(_) => pool.check_in(conn),
        }
        Ok((address, outcome))
    }

    fn run_once<T: Operation>(
        &self,
        op: &T,
        intent: OperationIntent<'_>,
    ) -> Result<(ServerAddress, Result<T::O>)> {
        self.with_connection(intent, |conn| {
            let server_supports_sessions = conn.max_wire_version >= 6;
            let mut command = op.build_command(conn.max_wire_version)?;
            self.cluster_time.append_to(&mut command, server_supports_sessions);
            let db = op.database().unwrap_or("admin");
            let reply = conn.command(db, command)?;
            self.cluster_time.advance(&reply);
            check_command_ok(&reply)?;
            op.handle_response(reply)
        })
    }

    /// Runs `op` against a server matching its read preference (or pinned address), retrying
    /// once against a freshly selected server if the first attempt fails with a network error
    /// and the operation is classified as retryable.
    pub(crate) fn execute_read<T: Operation>(&self, op: &T) -> Result<T::O> {
        self.execute_read_returning_address(op).map(|(_, result)| result)
    }

    /// Like [`Client::execute_read`], but also returns the address of the server that served
    /// the (final, successful) attempt, so a cursor-opening operation can pin subsequent
    /// `getMore`/`killCursors` calls to it.
    pub(crate) fn execute_read_returning_address<T: Operation>(
        &self,
        op: &T,
    ) -> Result<(ServerAddress, T::O)> {
        let criteria = op
            .selection_criteria()
            .cloned()
            .or_else(|| self.default_selection_criteria());
        let criteria = criteria.unwrap_or(SelectionCriteria::ReadPreference(
            crate::read_preference::ReadPreference::Primary,
        ));
        let (address, outcome) = self.run_once(op, OperationIntent::Read(&criteria))?;
        match outcome {
            Ok(result) => Ok((address, result)),
            Err(e) if should_retry(&e, op.retryability(), Retryability::Read) => {
                let (address, result) = self.run_once(op, OperationIntent::Read(&criteria))?;
                Ok((address, result?))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs `op` against a writable server, retrying once against a freshly selected writable
    /// server on a network or not-primary error, iff the operation is classified as retryable.
    pub(crate) fn execute_write<T: Operation>(&self, op: &T) -> Result<T::O> {
        let (address, outcome) = self.run_once(op, OperationIntent::Write)?;
        match outcome {
            Ok(result) => Ok(result),
            Err(e) if is_not_primary(&e) => {
                self.topology.mark_unknown(address, e.to_string());
                if should_retry(&e, op.retryability(), Retryability::Write) {
                    self.run_once(op, OperationIntent::Write)?.1
                } else {
                    Err(e)
                }
            }
            Err(e) if should_retry(&e, op.retryability(), Retryability::Write) => {
                self.run_once(op, OperationIntent::Write)?.1
            }
            Err(e) => Err(e),
        }
    }

    /// Runs an arbitrary command against `db`, selecting a link per `selection_criteria` (or the
    /// client's default read preference, falling back to primary for a database with none set).
    pub(crate) fn run_command(
        &self,
        db: &str,
        command: Document,
        selection_criteria: Option<SelectionCriteria>,
    ) -> Result<Document> {
        self.execute_read(&crate::operation::run_command::RunCommand {
            db: db.to_string(),
            command,
            selection_criteria,
        })
    }

    /// Executes a heterogeneous bulk write against `ns`.
    pub(crate) fn bulk_write(
        &self,
        ns: &Namespace,
        models: &[crate::bulk_write::WriteModel],
        ordered: bool,
    ) -> Result<crate::results::BulkWriteResult> {
        crate::bulk_write::execute(self, ns, models, ordered)
    }

    pub(crate) fn topology_handle(&self) -> &TopologyHandle {
        &self.topology
    }
}

fn check_command_ok(reply: &Document) -> Result<()> {
    let ok = reply
        .get("ok")
        .and_then(|v| v.as_f64().or_else(|| v.as_i32().map(|i| i as f64)))
        .unwrap_or(1.0);
    if ok == 1.0 {
        return Ok(());
    }
    let error: crate::error::CommandError = bson::from_document(reply.clone())
        .map_err(|_| Error::invalid_response("command failed with no parsable error body"))?;
    Err(crate::error::ErrorKind::Command(error).into())
}

fn is_not_primary(e: &Error) -> bool {
    e.is_not_primary()
}

fn should_retry(e: &Error, op_retryability: Retryability, required: Retryability) -> bool {
    if op_retryability != required {
        return false;
    }
    match required {
        Retryability::Read => e.is_read_retryable(),
        Retryability::Write => e.is_write_retryable(),
        Retryability::None => false,
    }
}
