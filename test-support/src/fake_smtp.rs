use log::debug;
use mailin_embedded::{Handler, Server, SslConfig};
use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};
use tokio::{
    sync::watch::{self, error::RecvError, Receiver, Sender},
    time::timeout,
};

pub const SMTP_PORT: u16 = 4567;
pub const POISONED_SMTP_PORT: u16 = 4568;

const SERVER_NAME: &str = "portfolio.test";

#[derive(Clone)]
struct SmtpHandler {
    buffer: Vec<u8>,
    sender: Arc<Sender<String>>,
    received: Arc<AtomicUsize>,
}

impl Handler for SmtpHandler {
    fn data(&mut self, buf: &[u8]) -> std::io::Result<()> {
        debug!("Got data:\n{}", String::from_utf8_lossy(buf));
        self.buffer.extend(buf);
        Ok(())
    }

    fn data_end(&mut self) -> mailin_embedded::Response {
        let content = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.received.fetch_add(1, Ordering::SeqCst);
        // Nobody may be listening yet; the value is still kept for the next receiver.
        let _ = self.sender.send(content);
        mailin_embedded::response::OK
    }

    fn auth_plain(
        &mut self,
        authorization_id: &str,
        authentication_id: &str,
        password: &str,
    ) -> mailin_embedded::Response {
        debug!("Got authentication data {authorization_id}, {authentication_id}, {password}");
        mailin_embedded::response::AUTH_OK
    }
}

/// An SMTP server on [`SMTP_PORT`] which accepts every message and remembers the last one.
pub struct FakeSmtpServer {
    server: std::sync::Mutex<Option<Server<SmtpHandler>>>,
    receiver: tokio::sync::Mutex<Receiver<String>>,
    received: Arc<AtomicUsize>,
}

impl FakeSmtpServer {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel("".into());
        let received = Arc::new(AtomicUsize::new(0));
        let handler = SmtpHandler {
            buffer: Vec::new(),
            sender: Arc::new(sender),
            received: received.clone(),
        };
        let mut server = Server::new(handler);
        server
            .with_name(SERVER_NAME)
            .with_ssl(SslConfig::None)
            .unwrap()
            .with_addr(format!("0.0.0.0:{SMTP_PORT}"))
            .unwrap();
        Self {
            server: std::sync::Mutex::new(Some(server)),
            receiver: tokio::sync::Mutex::new(receiver),
            received,
        }
    }

    /// The process-wide instance. The port can only be bound once per process, so every test
    /// in a binary must share it.
    pub fn shared() -> &'static FakeSmtpServer {
        static FAKE_SMTP: OnceLock<FakeSmtpServer> = OnceLock::new();
        FAKE_SMTP.get_or_init(FakeSmtpServer::new)
    }

    pub fn start(&self) {
        let mut guard = self.server.lock().unwrap();
        if let Some(server) = guard.take() {
            std::thread::spawn(move || {
                let _ = server.serve();
            });
        }
    }

    pub fn url() -> String {
        format!("smtp://localhost:{SMTP_PORT}")
    }

    /// Waits for the next message to arrive and returns its raw content.
    pub async fn last_mail_content(&self) -> Result<String, RecvError> {
        let mut receiver = self.receiver.lock().await;
        receiver.changed().await?;
        let content = receiver.borrow_and_update().clone();
        drop(receiver);
        Ok(content)
    }

    /// Number of messages received since the server was created.
    pub fn received_count(&self) -> usize {
        self.received.load(Ordering::SeqCst)
    }

    /// Discards a message left over from a previous test.
    pub async fn flush(&self) {
        let mut receiver = self.receiver.lock().await;
        let _ = timeout(Duration::from_millis(100), receiver.changed()).await;
    }
}

impl Default for FakeSmtpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
struct PoisonedSmtpHandler;

impl Handler for PoisonedSmtpHandler {
    fn helo(&mut self, _ip: IpAddr, _domain: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }

    fn mail(&mut self, _ip: IpAddr, _domain: &str, _from: &str) -> mailin_embedded::Response {
        mailin_embedded::response::INTERNAL_ERROR
    }
}

/// Starts an SMTP server on [`POISONED_SMTP_PORT`] which rejects every transaction.
///
/// Repeated calls are harmless: later servers fail to bind and exit quietly.
pub fn start_poisoned_smtp_server() {
    let handler = PoisonedSmtpHandler;
    let mut server = Server::new(handler);
    server
        .with_name(SERVER_NAME)
        .with_ssl(SslConfig::None)
        .unwrap()
        .with_addr(format!("0.0.0.0:{POISONED_SMTP_PORT}"))
        .unwrap();
    std::thread::spawn(move || {
        let _ = server.serve();
    });
}

pub fn poisoned_url() -> String {
    format!("smtp://localhost:{POISONED_SMTP_PORT}")
}
