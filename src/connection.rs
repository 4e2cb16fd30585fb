//! Connections, operation handles and the tokio transport.
//!
//! A [`Connection`] submits requests and hands back an [`OperationHandle`]
//! that yields the server's messages for that operation in arrival order.
//! [`LdapConnection`] is the socket implementation: one reader task frames
//! BER messages and routes them by message id to per-operation channels.

use crate::error::{Error, Result};
use crate::protocol::{
    encode_ldap_message, parse_ldap_message, BindRequest, Control, LdapMessage, LdapResult, Request, Response,
    SearchResponse,
};
use crate::tls;
use crate::url::LdapUrl;
use bytes::BytesMut;
use rustls::client::ClientConfig;
use rustls_pki_types::ServerName;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

/// Unsolicited notification sent with message id 0 before the server drops the connection.
pub const NOTICE_OF_DISCONNECTION_OID: &str = "1.3.6.1.4.1.1466.20036";

const OPERATION_QUEUE: usize = 64;

/// An open LDAP session that can run operations.
pub trait Connection: Send + Sync {
    /// Send `request` with `controls` and return a handle for its responses.
    fn submit(&self, request: Request, controls: Vec<Control>) -> impl Future<Output = Result<OperationHandle>> + Send;

    /// Fire-and-forget abandon of an outstanding operation.
    fn abandon(&self, message_id: i32) -> impl Future<Output = Result<()>> + Send;

    fn close(&self) -> impl Future<Output = Result<()>> + Send;

    fn is_closed(&self) -> bool;

    /// Resolves once the connection has been closed by either side.
    fn closed(&self) -> impl Future<Output = ()> + Send;
}

/// Opens connections to LDAP URLs. Used for referral targets and by the sync runner.
pub trait ConnectionFactory: Send + Sync {
    type Connection: Connection + 'static;

    fn connect(&self, url: &LdapUrl) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// Receiving side of one in-flight operation.
pub struct OperationHandle {
    message_id: i32,
    rx: mpsc::Receiver<Result<Response>>,
    read_gate: Option<Arc<Semaphore>>,
    done: bool,
}

impl OperationHandle {
    pub fn new(message_id: i32, rx: mpsc::Receiver<Result<Response>>) -> Self {
        Self {
            message_id,
            rx,
            read_gate: None,
            done: false,
        }
    }

    fn with_read_gate(mut self, gate: Option<Arc<Semaphore>>) -> Self {
        self.read_gate = gate;
        self
    }

    pub fn message_id(&self) -> i32 {
        self.message_id
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next message for this operation. `Response::Done` is always the last one.
    pub async fn next(&mut self) -> Result<Response> {
        if self.done {
            return Err(Error::State(format!("operation {} already completed", self.message_id)));
        }
        // a message read with an earlier grant is taken without a new one
        let item = match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Disconnected) => None,
            Err(TryRecvError::Empty) => {
                let grant = ReadGrant::new(self.read_gate.as_deref());
                let item = self.rx.recv().await;
                grant.used();
                item
            }
        };
        match item {
            Some(Ok(response)) => {
                if matches!(response, Response::Done(_)) {
                    self.done = true;
                }
                Ok(response)
            }
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Err(Error::ConnectionClosed)
            }
        }
    }

    /// Skip to the terminal result.
    pub async fn result(mut self) -> Result<LdapResult> {
        loop {
            if let Response::Done(result) = self.next().await? {
                return Ok(result);
            }
        }
    }

    /// Collect entries and references until the terminal result.
    pub async fn search_response(mut self) -> Result<SearchResponse> {
        let mut entries = Vec::new();
        let mut references = Vec::new();
        loop {
            match self.next().await? {
                Response::Entry(entry) => entries.push(entry),
                Response::Reference(reference) => references.push(reference),
                Response::Intermediate(_) => {}
                Response::Done(result) => {
                    return Ok(SearchResponse {
                        entries,
                        references,
                        result,
                    })
                }
            }
        }
    }
}

/// One read permit handed to the reader for a pending `next()`.
///
/// Taken back when the `next()` future is dropped before the reader used it.
struct ReadGrant<'a> {
    gate: Option<&'a Semaphore>,
}

impl<'a> ReadGrant<'a> {
    fn new(gate: Option<&'a Semaphore>) -> Self {
        if let Some(gate) = gate {
            gate.add_permits(1);
        }
        Self { gate }
    }

    fn used(mut self) {
        self.gate = None;
    }
}

impl Drop for ReadGrant<'_> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate {
            if let Ok(permit) = gate.try_acquire() {
                permit.forget();
            }
        }
    }
}

/// Settings for [`LdapConnection`].
#[derive(Clone)]
pub struct ConnectionOptions {
    pub connect_timeout: Duration,
    pub max_message_size: usize,
    /// When false the reader only reads the next message once a handle asks for it.
    pub auto_read: bool,
    /// TLS settings for `ldaps://`; system roots when unset.
    pub tls: Option<Arc<ClientConfig>>,
    /// Simple bind performed right after connecting.
    pub bind: Option<(String, String)>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_message_size: 16 * 1024 * 1024,
            auto_read: true,
            tls: None,
            bind: None,
        }
    }
}

impl std::fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("max_message_size", &self.max_message_size)
            .field("auto_read", &self.auto_read)
            .field("tls", &self.tls.is_some())
            .field("bind_dn", &self.bind.as_ref().map(|(dn, _)| dn))
            .finish()
    }
}

/// Stream to the server: plain TCP (ldap://) or TLS (ldaps://).
pub enum LdapStream {
    Tcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for LdapStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for LdapStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            LdapStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            LdapStream::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

type Pending = HashMap<i32, mpsc::Sender<Result<Response>>>;

/// State shared between the connection and its reader task.
struct Shared {
    /// `None` once the connection is closed.
    pending: Mutex<Option<Pending>>,
    gate: Option<Arc<Semaphore>>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn release_read(&self) {
        if let Some(ref gate) = self.gate {
            gate.add_permits(1);
        }
    }

    async fn route(&self, message: LdapMessage) {
        let id = message.message_id;
        let done = matches!(message.response, Response::Done(_));
        let sender = {
            let mut guard = self.pending.lock().await;
            match guard.as_mut() {
                Some(pending) if done => pending.remove(&id),
                Some(pending) => pending.get(&id).cloned(),
                None => None,
            }
        };
        match sender {
            Some(tx) => {
                if tx.send(Ok(message.response)).await.is_err() {
                    debug!("Operation {} is no longer awaited", id);
                    if let Some(pending) = self.pending.lock().await.as_mut() {
                        pending.remove(&id);
                    }
                    self.release_read();
                }
            }
            None => {
                debug!("Dropping message for unknown operation {}", id);
                self.release_read();
            }
        }
    }

    /// Mark closed; dropping the senders ends every pending handle with `ConnectionClosed`.
    async fn shut(&self) {
        let pending = self.pending.lock().await.take();
        if let Some(pending) = pending {
            if !pending.is_empty() {
                debug!("Closing {} pending operations", pending.len());
            }
        }
        self.closed.send_replace(true);
    }
}

/// Total length of the BER element at the head of `buf`, once its header is complete.
fn frame_length(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < 2 {
        return Ok(None);
    }
    if buf[0] != 0x30 {
        return Err(Error::decode(format!("expected LDAPMessage SEQUENCE, got tag 0x{:02X}", buf[0])));
    }
    let first = buf[1];
    if first < 0x80 {
        return Ok(Some(2 + first as usize));
    }
    let n = (first & 0x7F) as usize;
    if n == 0 {
        return Err(Error::decode("indefinite length is not supported"));
    }
    if n > 4 {
        return Err(Error::decode(format!("length of {} bytes is too large", n)));
    }
    if buf.len() < 2 + n {
        return Ok(None);
    }
    let len = buf[2..2 + n].iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    Ok(Some(2 + n + len))
}

/// Read one complete LDAPMessage. `None` on a clean EOF between messages.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut BytesMut,
    max_message_size: usize,
) -> Result<Option<BytesMut>> {
    loop {
        if let Some(total) = frame_length(buf)? {
            if total > max_message_size {
                return Err(Error::decode(format!(
                    "message of {} bytes exceeds limit of {}",
                    total, max_message_size
                )));
            }
            if buf.len() >= total {
                return Ok(Some(buf.split_to(total)));
            }
            buf.reserve(total - buf.len());
        }
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::ConnectionClosed);
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(mut reader: R, shared: Arc<Shared>, max_message_size: usize, peer: String) {
    let mut buf = BytesMut::with_capacity(8 * 1024);
    loop {
        if let Some(ref gate) = shared.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
        }
        let frame = match read_frame(&mut reader, &mut buf, max_message_size).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!("Server {} closed the connection", peer);
                break;
            }
            Err(e) => {
                warn!("Read from {} failed: {}", peer, e);
                break;
            }
        };
        let message = match parse_ldap_message(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("Undecodable message from {}: {}", peer, e);
                break;
            }
        };
        if message.message_id == 0 {
            if let Response::Done(ref result) = message.response {
                if result.extended_name.as_deref() == Some(NOTICE_OF_DISCONNECTION_OID) {
                    warn!("Notice of disconnection from {}: {} {}", peer, result.code, result.message);
                    break;
                }
            }
            debug!("Ignoring unsolicited message from {}", peer);
            shared.release_read();
            continue;
        }
        shared.route(message).await;
    }
    shared.shut().await;
}

/// A connection over TCP or TLS.
pub struct LdapConnection {
    url: LdapUrl,
    writer: Mutex<WriteHalf<LdapStream>>,
    shared: Arc<Shared>,
    next_id: AtomicI32,
    reader: JoinHandle<()>,
}

impl LdapConnection {
    pub async fn connect(url: &LdapUrl, options: &ConnectionOptions) -> Result<Self> {
        let addr = url.address();
        let tcp = tokio::time::timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                ))
            })??;
        tcp.set_nodelay(true)?;
        let stream = if url.secure {
            let config = match options.tls {
                Some(ref config) => config.clone(),
                None => tls::client_config(None)?,
            };
            let server_name = ServerName::try_from(url.host.clone())
                .map_err(|_| Error::Tls(format!("invalid hostname for TLS SNI: {}", url.host)))?;
            let tls_stream = TlsConnector::from(config)
                .connect(server_name, tcp)
                .await
                .map_err(|e| Error::Tls(format!("TLS handshake with {} failed: {}", addr, e)))?;
            LdapStream::Tls(Box::new(tls_stream))
        } else {
            LdapStream::Tcp(tcp)
        };
        let conn = Self::from_stream(url.clone(), stream, options);
        info!("Connected to {}", url);

        if let Some((ref dn, ref password)) = options.bind {
            let bound = async {
                conn.submit(Request::Bind(BindRequest::simple(dn.as_str(), password.as_str())), Vec::new())
                    .await?
                    .result()
                    .await?
                    .success()
            }
            .await;
            if let Err(e) = bound {
                let _ = conn.close().await;
                return Err(e);
            }
            debug!("Bound to {} as {}", url, dn);
        }
        Ok(conn)
    }

    /// Wrap an established stream and start its reader task.
    pub fn from_stream(url: LdapUrl, stream: LdapStream, options: &ConnectionOptions) -> Self {
        let (read_half, write_half): (ReadHalf<LdapStream>, WriteHalf<LdapStream>) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            pending: Mutex::new(Some(HashMap::new())),
            gate: (!options.auto_read).then(|| Arc::new(Semaphore::new(0))),
            closed,
        });
        let reader = tokio::spawn(read_loop(
            read_half,
            shared.clone(),
            options.max_message_size,
            url.to_string(),
        ));
        Self {
            url,
            writer: Mutex::new(write_half),
            shared,
            next_id: AtomicI32::new(0),
            reader,
        }
    }

    pub fn url(&self) -> &LdapUrl {
        &self.url
    }

    /// Message ids run 1..=i32::MAX and wrap around.
    fn allocate_id(&self) -> i32 {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) as u32;
        (n % i32::MAX as u32) as i32 + 1
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl Connection for LdapConnection {
    async fn submit(&self, request: Request, controls: Vec<Control>) -> Result<OperationHandle> {
        if !request.expects_response() {
            return Err(Error::InvalidArgument(format!(
                "{} has no response; use abandon or close",
                request.name()
            )));
        }
        let id = self.allocate_id();
        let bytes = encode_ldap_message(id, &request, &controls)?;
        let (tx, rx) = mpsc::channel(OPERATION_QUEUE);
        {
            let mut guard = self.shared.pending.lock().await;
            let pending = guard.as_mut().ok_or(Error::ConnectionClosed)?;
            pending.insert(id, tx);
        }
        debug!("Sending {} request {} to {}", request.name(), id, self.url);
        if let Err(e) = self.write(&bytes).await {
            if let Some(pending) = self.shared.pending.lock().await.as_mut() {
                pending.remove(&id);
            }
            return Err(e);
        }
        Ok(OperationHandle::new(id, rx).with_read_gate(self.shared.gate.clone()))
    }

    async fn abandon(&self, message_id: i32) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let bytes = encode_ldap_message(self.allocate_id(), &Request::Abandon(message_id), &[])?;
        self.write(&bytes).await?;
        if let Some(pending) = self.shared.pending.lock().await.as_mut() {
            pending.remove(&message_id);
        }
        debug!("Abandoned operation {} on {}", message_id, self.url);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if let Ok(bytes) = encode_ldap_message(self.allocate_id(), &Request::Unbind, &[]) {
            let _ = self.write(&bytes).await;
        }
        let _ = self.writer.lock().await.shutdown().await;
        self.reader.abort();
        self.shared.shut().await;
        info!("Closed connection to {}", self.url);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        // errors only when the sender is gone, which means closed as well
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Drop for LdapConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Opens [`LdapConnection`]s with fixed options. Stateless, so one factory can serve several runners.
#[derive(Debug, Clone, Default)]
pub struct LdapConnectionFactory {
    options: ConnectionOptions,
}

impl LdapConnectionFactory {
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Same options with `auto_read` replaced.
    pub fn with_auto_read(&self, auto_read: bool) -> Self {
        let mut options = self.options.clone();
        options.auto_read = auto_read;
        Self { options }
    }
}

impl ConnectionFactory for LdapConnectionFactory {
    type Connection = LdapConnection;

    async fn connect(&self, url: &LdapUrl) -> Result<LdapConnection> {
        LdapConnection::connect(url, &self.options).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::testing::{encode_response, entry, parse_request_header};
    use crate::protocol::{ResultCode, SearchRequest, SearchScope, LDAP_OP_SEARCH_REQUEST, LDAP_OP_UNBIND_REQUEST};
    use crate::der::tag::Tag;
    use tokio::net::TcpListener;

    #[test]
    fn test_frame_length() {
        assert_eq!(frame_length(&[0x30]).unwrap(), None);
        assert_eq!(frame_length(&[0x30, 0x05]).unwrap(), Some(7));
        assert_eq!(frame_length(&[0x30, 0x82, 0x01]).unwrap(), None);
        assert_eq!(frame_length(&[0x30, 0x82, 0x01, 0x00]).unwrap(), Some(260));
        assert!(frame_length(&[0x04, 0x00]).is_err());
        assert!(frame_length(&[0x30, 0x80]).is_err());
    }

    #[tokio::test]
    async fn test_dropped_next_returns_read_permit() {
        let gate = Arc::new(Semaphore::new(0));
        let (tx, rx) = mpsc::channel(4);
        let mut handle = OperationHandle::new(7, rx).with_read_gate(Some(gate.clone()));
        for _ in 0..3 {
            let pending = tokio::time::timeout(Duration::from_millis(5), handle.next()).await;
            assert!(pending.is_err());
        }
        assert_eq!(gate.available_permits(), 0);

        // already read off the socket: no new permit for it
        tx.send(Ok(Response::Entry(entry("cn=1")))).await.unwrap();
        assert!(matches!(handle.next().await.unwrap(), Response::Entry(_)));
        assert_eq!(gate.available_permits(), 0);

        tx.send(Ok(Response::Done(LdapResult::new(ResultCode::SUCCESS)))).await.unwrap();
        assert!(matches!(handle.next().await.unwrap(), Response::Done(_)));
        assert!(handle.is_done());
        assert_eq!(gate.available_permits(), 0);
    }

    #[tokio::test]
    async fn test_read_frame_split_and_limit() {
        let mut data = encode_response(1, &Response::Done(LdapResult::new(ResultCode::SUCCESS)));
        data.extend(encode_response(2, &Response::Done(LdapResult::new(ResultCode::BUSY))));
        let mut reader = &data[..];
        let mut buf = BytesMut::new();
        let first = read_frame(&mut reader, &mut buf, 1024).await.unwrap().unwrap();
        assert_eq!(parse_ldap_message(&first).unwrap().message_id, 1);
        let second = read_frame(&mut reader, &mut buf, 1024).await.unwrap().unwrap();
        assert_eq!(parse_ldap_message(&second).unwrap().message_id, 2);
        assert!(read_frame(&mut reader, &mut buf, 1024).await.unwrap().is_none());

        let mut reader = &data[..];
        let mut buf = BytesMut::new();
        assert!(matches!(read_frame(&mut reader, &mut buf, 4).await, Err(Error::Decode(_))));

        let truncated = &data[..5];
        let mut reader = truncated;
        let mut buf = BytesMut::new();
        assert!(matches!(read_frame(&mut reader, &mut buf, 1024).await, Err(Error::ConnectionClosed)));
    }

    async fn read_request(stream: &mut TcpStream) -> (i32, Tag) {
        let mut buf = BytesMut::new();
        let frame = read_frame(stream, &mut buf, 1 << 20).await.unwrap().unwrap();
        parse_request_header(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_loopback_search_and_notice() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (id, tag) = read_request(&mut stream).await;
            assert_eq!(tag, Tag::application(LDAP_OP_SEARCH_REQUEST, true));
            // an unknown id is dropped, then the real answer in two writes
            stream
                .write_all(&encode_response(99, &Response::Entry(entry("cn=stray"))))
                .await
                .unwrap();
            let first = encode_response(id, &Response::Entry(entry("cn=a,dc=example")));
            let (head, tail) = first.split_at(3);
            stream.write_all(head).await.unwrap();
            stream.flush().await.unwrap();
            stream.write_all(tail).await.unwrap();
            stream
                .write_all(&encode_response(id, &Response::Done(LdapResult::new(ResultCode::SUCCESS))))
                .await
                .unwrap();

            // second operation is cut off by a notice of disconnection
            let (_, _) = read_request(&mut stream).await;
            let mut notice = LdapResult::new(ResultCode::UNAVAILABLE);
            notice.extended_name = Some(NOTICE_OF_DISCONNECTION_OID.to_string());
            stream.write_all(&encode_response(0, &Response::Done(notice))).await.unwrap();
            stream
        });

        let url: LdapUrl = format!("ldap://127.0.0.1:{}", port).parse().unwrap();
        let conn = LdapConnection::connect(&url, &ConnectionOptions::default()).await.unwrap();
        let search = Request::Search(SearchRequest::new("dc=example", SearchScope::WholeSubtree, "(objectClass=*)"));
        let response = conn
            .submit(search.clone(), Vec::new())
            .await
            .unwrap()
            .search_response()
            .await
            .unwrap();
        assert_eq!(response.entries.len(), 1);
        assert_eq!(response.entries[0].dn, "cn=a,dc=example");
        assert_eq!(response.result.code, ResultCode::SUCCESS);

        let handle = conn.submit(search.clone(), Vec::new()).await.unwrap();
        assert!(matches!(handle.result().await, Err(Error::ConnectionClosed)));
        conn.closed().await;
        assert!(conn.is_closed());
        assert!(matches!(conn.submit(search, Vec::new()).await, Err(Error::ConnectionClosed)));
        let _ = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_gated_reads_and_unbind_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let (id, _) = read_request(&mut stream).await;
            for dn in ["cn=1", "cn=2", "cn=3"] {
                stream.write_all(&encode_response(id, &Response::Entry(entry(dn)))).await.unwrap();
            }
            stream
                .write_all(&encode_response(id, &Response::Done(LdapResult::new(ResultCode::SUCCESS))))
                .await
                .unwrap();
            let (_, tag) = read_request(&mut stream).await;
            tag
        });

        let url: LdapUrl = format!("ldap://127.0.0.1:{}", port).parse().unwrap();
        let options = ConnectionOptions {
            auto_read: false,
            ..Default::default()
        };
        let conn = LdapConnection::connect(&url, &options).await.unwrap();
        let mut handle = conn
            .submit(
                Request::Search(SearchRequest::new("dc=example", SearchScope::SingleLevel, "(cn=*)")),
                Vec::new(),
            )
            .await
            .unwrap();
        let mut dns = Vec::new();
        loop {
            match handle.next().await.unwrap() {
                Response::Entry(e) => dns.push(e.dn),
                Response::Done(result) => {
                    assert!(result.code.is_success());
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(dns, vec!["cn=1", "cn=2", "cn=3"]);
        assert!(handle.next().await.is_err());

        conn.close().await.unwrap();
        assert!(conn.is_closed());
        assert_eq!(server.await.unwrap(), Tag::application(LDAP_OP_UNBIND_REQUEST, false));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let url: LdapUrl = format!("ldap://127.0.0.1:{}", port).parse().unwrap();
        assert!(matches!(
            LdapConnection::connect(&url, &ConnectionOptions::default()).await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_open_operation_ends_on_drop() {
        let conn = mock::MockConnection::new(vec![mock::Reply::Messages(vec![Response::Entry(entry("cn=x"))])]);
        let mut handle = conn
            .submit(Request::Search(SearchRequest::new("", SearchScope::BaseObject, "(objectClass=*)")), Vec::new())
            .await
            .unwrap();
        assert!(matches!(handle.next().await.unwrap(), Response::Entry(_)));
        conn.drop_connection();
        assert!(matches!(handle.next().await, Err(Error::ConnectionClosed)));
        assert!(conn.is_closed());
    }
}
