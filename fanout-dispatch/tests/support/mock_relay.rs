//! A scriptable SMTP relay on a loopback port
//!
//! Speaks just enough SMTP for lettre's client: greeting, EHLO/HELO, MAIL,
//! RCPT, DATA, NOOP, RSET and QUIT. The RCPT reply can be overridden to
//! inject rejections, and every accepted message body is kept for
//! inspection.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::timeout,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    fn line(&self) -> String {
        format!("{} {}\r\n", self.code, self.text)
    }
}

#[derive(Debug, Default)]
struct Recorded {
    recipients: Vec<String>,
    messages: Vec<String>,
}

struct Shared {
    rcpt_reply: Reply,
    recorded: Mutex<Recorded>,
    connections: AtomicUsize,
    closed: AtomicUsize,
    shutdown: AtomicBool,
}

pub struct MockRelay {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl MockRelay {
    /// A relay that accepts everything
    pub async fn start() -> std::io::Result<Self> {
        Self::with_rcpt_reply(Reply::new(250, "OK")).await
    }

    /// A relay that answers every RCPT with `reply`
    pub async fn with_rcpt_reply(reply: Reply) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            rcpt_reply: reply,
            recorded: Mutex::default(),
            connections: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
        });

        let accept = Arc::clone(&shared);
        tokio::spawn(async move {
            while !accept.shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                accept.connections.fetch_add(1, Ordering::Relaxed);
                let session = Arc::clone(&accept);
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, &session).await {
                        tracing::debug!("Mock relay session ended: {e}");
                    }
                    session.closed.fetch_add(1, Ordering::Relaxed);
                });
            }
        });

        Ok(Self { addr, shared })
    }

    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// RCPT arguments received, accepted or not
    pub fn recipients(&self) -> Vec<String> {
        self.shared.recorded.lock().recipients.clone()
    }

    /// Raw message bodies accepted after DATA
    pub fn messages(&self) -> Vec<String> {
        self.shared.recorded.lock().messages.clone()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::Relaxed)
    }

    /// Sessions that have ended, by QUIT or by the client hanging up
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::Relaxed)
    }

    /// Wait up to `limit` for `count` sessions to have ended
    pub async fn wait_for_closed(&self, count: usize, limit: Duration) -> bool {
        timeout(limit, async {
            while self.closed() < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(mut stream: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let (reader, mut writer) = stream.split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    writer.write_all(b"220 mock relay ready\r\n").await?;

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }

        let command = line.trim_end();
        let (verb, argument) = command.split_once(' ').unwrap_or((command, ""));

        let reply = match verb.to_ascii_uppercase().as_str() {
            "EHLO" => "250-mock.relay\r\n250-SIZE 10000000\r\n250 8BITMIME\r\n".to_string(),
            "HELO" | "MAIL" | "NOOP" | "RSET" => Reply::new(250, "OK").line(),
            "RCPT" => {
                shared.recorded.lock().recipients.push(argument.to_string());
                shared.rcpt_reply.line()
            }
            "DATA" => {
                writer
                    .write_all(Reply::new(354, "End data with <CR><LF>.<CR><LF>").line().as_bytes())
                    .await?;
                let body = read_data(&mut reader).await?;
                shared.recorded.lock().messages.push(body);
                Reply::new(250, "OK: queued").line()
            }
            "QUIT" => {
                writer.write_all(Reply::new(221, "Bye").line().as_bytes()).await?;
                return Ok(());
            }
            _ => Reply::new(500, "Unknown command").line(),
        };

        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
}

async fn read_data<R>(reader: &mut R) -> std::io::Result<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut body = String::new();
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 || line.trim_end() == "." {
            return Ok(body);
        }
        body.push_str(&line);
    }
}
