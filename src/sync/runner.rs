//! Keeps a sync search running on one dedicated connection.
//!
//! The runner reads on demand (`auto_read = false`), so the next message is
//! only pulled off the socket once the previous consumer call returned.
//! Consumers must not issue operations on the runner's connection.

use super::SyncReplClient;
use crate::connection::{Connection, ConnectionFactory};
use crate::controls::SyncMode;
use crate::error::{Error, Result};
use crate::protocol::{ResultCode, SearchRequest};
use crate::url::LdapUrl;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub url: LdapUrl,
    pub request: SearchRequest,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl RunnerSettings {
    pub fn new(url: LdapUrl, request: SearchRequest) -> Self {
        Self {
            url,
            request,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30_000),
        }
    }
}

enum Command {
    Restart(oneshot::Sender<Result<()>>),
    Stop,
}

enum RunnerState {
    /// `None` after the driving task died.
    Stopped(Option<SyncReplClient>),
    Started {
        commands: mpsc::Sender<Command>,
        task: JoinHandle<SyncReplClient>,
    },
}

pub struct SyncReplRunner<F: ConnectionFactory> {
    factory: Arc<F>,
    settings: Arc<RunnerSettings>,
    state: Mutex<RunnerState>,
    started: AtomicBool,
}

impl<F: ConnectionFactory + 'static> SyncReplRunner<F> {
    /// `factory` should hand out connections that read on demand.
    pub fn new(factory: Arc<F>, settings: RunnerSettings, sync: SyncReplClient) -> Self {
        Self {
            factory,
            settings: Arc::new(settings),
            state: Mutex::new(RunnerState::Stopped(Some(sync))),
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Connect and send the sync search. A failure here is returned and the
    /// runner stays stopped; later connection losses are retried in the background.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut sync = match *state {
            RunnerState::Started { .. } => return Err(Error::State("sync runner already started".to_string())),
            RunnerState::Stopped(ref mut sync) => sync
                .take()
                .ok_or_else(|| Error::State("sync runner task failed, create a new runner".to_string()))?,
        };
        let conn = match open(self.factory.as_ref(), &self.settings, &mut sync).await {
            Ok(conn) => conn,
            Err(e) => {
                *state = RunnerState::Stopped(Some(sync));
                return Err(e);
            }
        };
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(drive(self.factory.clone(), self.settings.clone(), sync, conn, rx));
        *state = RunnerState::Started { commands: tx, task };
        self.started.store(true, Ordering::SeqCst);
        info!("Sync runner started for {}", self.settings.url.address());
        Ok(())
    }

    /// Cancel the search if it is still running and close the connection.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let (commands, task) = match std::mem::replace(&mut *state, RunnerState::Stopped(None)) {
            RunnerState::Started { commands, task } => (commands, task),
            stopped @ RunnerState::Stopped(_) => {
                *state = stopped;
                return Err(Error::State("sync runner not started".to_string()));
            }
        };
        // a closed channel also stops the task
        let _ = commands.send(Command::Stop).await;
        self.started.store(false, Ordering::SeqCst);
        match task.await {
            Ok(sync) => {
                *state = RunnerState::Stopped(Some(sync));
                info!("Sync runner stopped for {}", self.settings.url.address());
                Ok(())
            }
            Err(e) => {
                error!("Sync runner task failed: {}", e);
                Err(Error::State(format!("sync runner task failed: {}", e)))
            }
        }
    }

    /// Cancel the current search, if incomplete, and send it again on the same connection.
    /// While the runner is reconnecting this waits for the next connection attempt.
    pub async fn restart_search(&self) -> Result<()> {
        let state = self.state.lock().await;
        let commands = match *state {
            RunnerState::Started { ref commands, .. } => commands.clone(),
            RunnerState::Stopped(_) => return Err(Error::State("sync runner not started".to_string())),
        };
        let (tx, rx) = oneshot::channel();
        commands
            .send(Command::Restart(tx))
            .await
            .map_err(|_| Error::State("sync runner task is gone".to_string()))?;
        rx.await
            .map_err(|_| Error::State("sync runner task is gone".to_string()))?
    }
}

/// Connect and send the search; the connection is closed again when the search cannot be sent.
async fn open<F: ConnectionFactory>(
    factory: &F,
    settings: &RunnerSettings,
    sync: &mut SyncReplClient,
) -> Result<F::Connection> {
    let conn = factory.connect(&settings.url).await?;
    if let Err(e) = sync.send(&conn, &settings.request).await {
        warn!("Sync search on {} failed: {}", settings.url.address(), e);
        if let Err(e) = conn.close().await {
            debug!("Close after failed sync search: {}", e);
        }
        return Err(e);
    }
    Ok(conn)
}

/// Cancel an incomplete search and close the connection.
async fn shutdown<C: Connection>(sync: &mut SyncReplClient, conn: &C) {
    if sync.is_active() && !sync.is_complete() {
        match sync.cancel(conn).await {
            Ok(result) => debug!("Sync search cancelled: {}", result.code),
            Err(e) => warn!("Cancel of sync search failed: {}", e),
        }
    }
    if let Err(e) = conn.close().await {
        warn!("Close of sync connection failed: {}", e);
    }
}

/// Cancel the current search if needed and send it again.
async fn restart<C: Connection>(sync: &mut SyncReplClient, conn: &C, request: &SearchRequest) -> Result<()> {
    if sync.is_active() && !sync.is_complete() {
        if let Err(e) = sync.cancel(conn).await {
            warn!("Cancel before restart failed: {}", e);
        }
    }
    sync.send(conn, request).await
}

struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
        }
    }

    fn reset(&mut self) {
        self.current = self.base;
    }

    /// Current delay plus up to 25% jitter, then double for next time.
    fn next_delay(&mut self) -> Duration {
        let millis = self.current.as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=millis / 4);
        let delay = Duration::from_millis(millis + jitter).min(self.max);
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

enum Event {
    Command(Option<Command>),
    Step(Result<()>),
    Resend,
    Closed,
}

async fn drive<F: ConnectionFactory + 'static>(
    factory: Arc<F>,
    settings: Arc<RunnerSettings>,
    mut sync: SyncReplClient,
    conn: F::Connection,
    mut commands: mpsc::Receiver<Command>,
) -> SyncReplClient {
    let mut backoff = Backoff::new(settings.reconnect_delay, settings.max_reconnect_delay);
    // spaces out searches the server keeps answering with e-syncRefreshRequired
    let mut refresh_backoff = Backoff::new(settings.reconnect_delay, settings.max_reconnect_delay);
    let mut resend_at: Option<Instant> = None;
    let mut current = Some(conn);
    loop {
        if current.is_none() {
            resend_at = None;
            match reconnect(factory.as_ref(), &settings, &mut sync, &mut commands, &mut backoff).await {
                Some(conn) => {
                    backoff.reset();
                    current = Some(conn);
                }
                None => return sync,
            }
        }
        let Some(conn) = current.as_ref() else {
            continue;
        };

        let event = tokio::select! {
            command = commands.recv() => Event::Command(command),
            step = sync.step(), if sync.is_active() => Event::Step(step),
            _ = time::sleep_until(resend_at.unwrap_or_else(Instant::now)), if resend_at.is_some() => Event::Resend,
            _ = conn.closed(), if !sync.is_active() => Event::Closed,
        };

        match event {
            Event::Command(None) | Event::Command(Some(Command::Stop)) => {
                shutdown(&mut sync, conn).await;
                return sync;
            }
            Event::Command(Some(Command::Restart(reply))) => {
                resend_at = None;
                let result = restart(&mut sync, conn, &settings.request).await;
                if let Err(ref e) = result {
                    warn!("Restart of sync search failed: {}", e);
                    shutdown(&mut sync, conn).await;
                    current = None;
                }
                let _ = reply.send(result);
            }
            Event::Step(Ok(())) => {
                if !sync.is_complete() {
                    refresh_backoff.reset();
                    continue;
                }
                let code = sync.result().map(|r| r.code);
                if code == Some(ResultCode::E_SYNC_REFRESH_REQUIRED) {
                    match sync.reset_cookie() {
                        Ok(()) => {
                            let delay = refresh_backoff.next_delay();
                            info!("Server requires a full refresh, dropped the sync cookie, searching again in {:?}", delay);
                            resend_at = Some(Instant::now() + delay);
                        }
                        Err(e) => {
                            warn!("Reset of sync cookie failed: {}", e);
                            shutdown(&mut sync, conn).await;
                            current = None;
                        }
                    }
                    continue;
                }
                refresh_backoff.reset();
                if sync.mode() == SyncMode::RefreshAndPersist {
                    info!("Persistent sync search ended ({:?}), reconnecting", code);
                    shutdown(&mut sync, conn).await;
                    current = None;
                }
            }
            Event::Resend => {
                resend_at = None;
                if let Err(e) = sync.send(conn, &settings.request).await {
                    warn!("Refresh of sync search failed: {}", e);
                    shutdown(&mut sync, conn).await;
                    current = None;
                }
            }
            Event::Step(Err(e)) => {
                warn!("Sync search on {} failed: {}", settings.url.address(), e);
                shutdown(&mut sync, conn).await;
                current = None;
            }
            Event::Closed => {
                info!("Sync connection to {} closed", settings.url.address());
                current = None;
            }
        }
    }
}

/// Reconnect with backoff. `None` when a stop was requested meanwhile.
///
/// Restart requests that arrive while waiting are answered by the next attempt.
async fn reconnect<F: ConnectionFactory>(
    factory: &F,
    settings: &RunnerSettings,
    sync: &mut SyncReplClient,
    commands: &mut mpsc::Receiver<Command>,
    backoff: &mut Backoff,
) -> Option<F::Connection> {
    let mut waiting = Vec::new();
    loop {
        let delay = backoff.next_delay();
        info!("Reconnecting to {} in {:?}", settings.url.address(), delay);
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = commands.recv() => match command {
                    None | Some(Command::Stop) => return None,
                    Some(Command::Restart(reply)) => waiting.push(reply),
                },
            }
        }
        match open(factory, settings, sync).await {
            Ok(conn) => {
                for reply in waiting.drain(..) {
                    let _ = reply.send(Ok(()));
                }
                return Some(conn);
            }
            Err(e) => {
                warn!("Reconnect to {} failed: {}", settings.url.address(), e);
                for reply in waiting.drain(..) {
                    let _ = reply.send(Err(Error::State(format!(
                        "reconnect to {} failed: {}",
                        settings.url.address(),
                        e
                    ))));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockConnection, MockFactory, Reply};
    use crate::controls::{RequestControl, SyncRequestControl, SyncState};
    use crate::cookie::{CookieManager, InMemoryCookieManager};
    use crate::extop::CANCEL_OID;
    use crate::protocol::{LdapResult, Request, Response, SearchScope};
    use crate::sync::testing::{sync_done, sync_entry};
    use std::sync::Mutex as StdMutex;

    const ADDRESS: &str = "ldap.example:389";

    fn settings() -> RunnerSettings {
        let mut settings = RunnerSettings::new(
            format!("ldap://{}", ADDRESS).parse().unwrap(),
            SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(objectClass=*)"),
        );
        settings.reconnect_delay = Duration::from_millis(5);
        settings.max_reconnect_delay = Duration::from_millis(20);
        settings
    }

    fn runner(factory: &MockFactory, mode: SyncMode, seen: Arc<StdMutex<Vec<String>>>) -> SyncReplRunner<MockFactory> {
        let sync = SyncReplClient::new(mode, Arc::new(InMemoryCookieManager::new())).on_entry(move |e| {
            seen.lock().unwrap().push(e.entry.dn);
            Ok(())
        });
        SyncReplRunner::new(Arc::new(factory.clone()), settings(), sync)
    }

    fn searches(conn: &MockConnection) -> usize {
        conn.submitted()
            .iter()
            .filter(|(_, request, _)| matches!(request, Request::Search(_)))
            .count()
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_twice_and_stop_before_start() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![Reply::Messages(Vec::new())]);
        factory.add(ADDRESS, conn.clone());
        let runner = runner(&factory, SyncMode::RefreshAndPersist, Arc::default());

        assert!(matches!(runner.stop().await, Err(Error::State(_))));
        assert!(matches!(runner.restart_search().await, Err(Error::State(_))));
        assert!(!runner.is_started());

        runner.start().await.unwrap();
        assert!(runner.is_started());
        assert!(matches!(runner.start().await, Err(Error::State(_))));
        assert!(runner.is_started());

        runner.stop().await.unwrap();
        assert!(!runner.is_started());
        assert!(matches!(runner.stop().await, Err(Error::State(_))));
        assert_eq!(conn.close_count(), 1);
        assert_eq!(factory.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_start_fails_when_search_cannot_be_sent() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![Reply::Fail(|| Error::ConnectionClosed)]);
        factory.add(ADDRESS, conn.clone());
        let runner = runner(&factory, SyncMode::RefreshOnly, Arc::default());
        assert!(matches!(runner.start().await, Err(Error::ConnectionClosed)));
        assert!(!runner.is_started());
        assert_eq!(conn.close_count(), 1);
        // unreachable server
        assert!(matches!(runner.start().await, Err(Error::Io(_))));
        assert!(!runner.is_started());
    }

    #[tokio::test]
    async fn test_stop_cancels_incomplete_search() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![
            Reply::Messages(vec![sync_entry("cn=a,dc=example", SyncState::Add, None)]),
            Reply::Messages(vec![Response::Done(LdapResult::new(ResultCode::SUCCESS))]),
        ]);
        factory.add(ADDRESS, conn.clone());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let runner = runner(&factory, SyncMode::RefreshAndPersist, seen.clone());
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;
        runner.stop().await.unwrap();

        let submitted = conn.submitted();
        assert_eq!(submitted.len(), 2);
        match &submitted[1].1 {
            Request::Extended(ext) => assert_eq!(ext.request_name, CANCEL_OID),
            other => panic!("expected cancel, got {:?}", other),
        }
        assert_eq!(conn.close_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_only_idles_until_restart() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![
            Reply::Messages(vec![
                sync_entry("cn=a,dc=example", SyncState::Add, None),
                sync_done(ResultCode::SUCCESS, Some("c1")),
            ]),
            Reply::Messages(vec![
                sync_entry("cn=b,dc=example", SyncState::Add, None),
                sync_done(ResultCode::SUCCESS, Some("c2")),
            ]),
        ]);
        factory.add(ADDRESS, conn.clone());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let runner = runner(&factory, SyncMode::RefreshOnly, seen.clone());
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(searches(&conn), 1);

        runner.restart_search().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(searches(&conn), 2);
        assert_eq!(conn.close_count(), 0);

        runner.stop().await.unwrap();
        // both searches were complete, so nothing to cancel
        assert_eq!(conn.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_reconnects_after_connection_loss() {
        let factory = MockFactory::default();
        let first = MockConnection::new(vec![Reply::Messages(vec![sync_entry(
            "cn=a,dc=example",
            SyncState::Add,
            Some("c1"),
        )])]);
        let second = MockConnection::new(vec![Reply::Messages(vec![sync_entry(
            "cn=b,dc=example",
            SyncState::Add,
            None,
        )])]);
        factory.add(ADDRESS, first.clone());
        factory.add(ADDRESS, second.clone());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let cookies = Arc::new(InMemoryCookieManager::new());
        let sink = seen.clone();
        let sync = SyncReplClient::new(SyncMode::RefreshAndPersist, cookies.clone()).on_entry(move |e| {
            sink.lock().unwrap().push(e.entry.dn);
            Ok(())
        });
        let runner = SyncReplRunner::new(Arc::new(factory.clone()), settings(), sync);
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;

        first.drop_connection();
        wait_for(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(factory.attempts().len(), 2);
        assert_eq!(cookies.read().unwrap(), Some(b"c1".to_vec()));
        // the second search resumes from the stored cookie
        let submitted = second.submitted();
        let expected = SyncRequestControl::new(SyncMode::RefreshAndPersist, Some(b"c1".to_vec()));
        assert_eq!(submitted[0].2[0].value, expected.encode_value());

        runner.stop().await.unwrap();
        assert!(!runner.is_started());
    }

    #[tokio::test]
    async fn test_refresh_required_drops_cookie_and_searches_again() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![
            Reply::Messages(vec![sync_done(ResultCode::E_SYNC_REFRESH_REQUIRED, None)]),
            Reply::Messages(vec![sync_done(ResultCode::E_SYNC_REFRESH_REQUIRED, None)]),
            Reply::Messages(vec![sync_entry("cn=a,dc=example", SyncState::Add, None)]),
        ]);
        factory.add(ADDRESS, conn.clone());
        let cookies = Arc::new(InMemoryCookieManager::new());
        cookies.write(b"c1").unwrap();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let sync = SyncReplClient::new(SyncMode::RefreshAndPersist, cookies.clone()).on_entry(move |e| {
            sink.lock().unwrap().push(e.entry.dn);
            Ok(())
        });
        let runner = SyncReplRunner::new(Arc::new(factory.clone()), settings(), sync);
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;

        assert_eq!(searches(&conn), 3);
        assert_eq!(conn.close_count(), 0);
        assert_eq!(factory.attempts().len(), 1);
        assert!(cookies.read().unwrap().unwrap_or_default().is_empty());
        let submitted = conn.submitted();
        let resumed = SyncRequestControl::new(SyncMode::RefreshAndPersist, Some(b"c1".to_vec()));
        let fresh = SyncRequestControl::new(SyncMode::RefreshAndPersist, None);
        assert_eq!(submitted[0].2[0].value, resumed.encode_value());
        assert_eq!(submitted[1].2[0].value, fresh.encode_value());
        assert_eq!(submitted[2].2[0].value, fresh.encode_value());

        runner.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_consumer_keeps_runner_alive() {
        let factory = MockFactory::default();
        let conn = MockConnection::new(vec![Reply::Messages(vec![
            sync_entry("cn=a,dc=example", SyncState::Add, None),
            sync_entry("cn=b,dc=example", SyncState::Add, None),
        ])]);
        factory.add(ADDRESS, conn.clone());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let errors = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let error_sink = errors.clone();
        let sync = SyncReplClient::new(SyncMode::RefreshAndPersist, Arc::new(InMemoryCookieManager::new()))
            .on_entry(move |e| {
                sink.lock().unwrap().push(e.entry.dn.clone());
                if e.entry.dn == "cn=a,dc=example" {
                    panic!("cannot handle {}", e.entry.dn);
                }
                Ok(())
            })
            .on_error(move |e| {
                error_sink.lock().unwrap().push(format!("{:#}", e));
                Ok(())
            });
        let runner = SyncReplRunner::new(Arc::new(factory.clone()), settings(), sync);
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert!(errors.lock().unwrap()[0].contains("panicked: cannot handle cn=a,dc=example"));

        runner.stop().await.unwrap();
        assert!(!runner.is_started());
        assert_eq!(conn.close_count(), 1);
    }

    #[tokio::test]
    async fn test_restart_while_reconnecting_waits_for_connection() {
        let factory = MockFactory::default();
        let first = MockConnection::new(vec![Reply::Messages(vec![sync_entry(
            "cn=a,dc=example",
            SyncState::Add,
            None,
        )])]);
        factory.add(ADDRESS, first.clone());
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let runner = runner(&factory, SyncMode::RefreshAndPersist, seen.clone());
        runner.start().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 1).await;

        first.drop_connection();
        wait_for(|| first.close_count() == 1).await;
        // nothing to connect to yet
        assert!(matches!(runner.restart_search().await, Err(Error::State(_))));

        let second = MockConnection::new(vec![Reply::Messages(vec![sync_entry(
            "cn=b,dc=example",
            SyncState::Add,
            None,
        )])]);
        factory.add(ADDRESS, second.clone());
        runner.restart_search().await.unwrap();
        wait_for(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(searches(&second), 1);

        runner.stop().await.unwrap();
    }

    #[test]
    fn test_backoff_grows_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(300));
        let first = backoff.next_delay();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let second = backoff.next_delay();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        backoff.reset();
        assert!(backoff.next_delay() <= Duration::from_millis(125));
    }
}
