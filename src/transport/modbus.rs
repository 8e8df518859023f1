use crate::prelude::*;
use crate::error::Result;
use crate::transport::frame::{Frame, MbapCodec, Request, Response};

use {
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    net2::TcpStreamExt,
    std::sync::atomic::{AtomicBool, AtomicU16, Ordering},
    std::time::Duration,
    tokio::net::TcpStream,
    tokio::sync::Mutex,
    tokio_util::{codec::Framed, sync::CancellationToken},
};

const TCP_KEEPALIVE_SECS: u64 = 60;

type Link = Framed<TcpStream, MbapCodec>;

/// Modbus TCP client for one unit behind one socket.
pub struct ModbusTcp {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
    link: Mutex<Option<Link>>,
    transaction_id: AtomicU16,
    healthy: AtomicBool,
    closed: AtomicBool,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl ModbusTcp {
    pub fn new(host: &str, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            unit_id,
            timeout,
            link: Mutex::new(None),
            transaction_id: AtomicU16::new(0),
            healthy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(inverter: &config::Inverter) -> Self {
        Self::new(
            inverter.host(),
            inverter.port(),
            inverter.device_id(),
            inverter.timeout(),
        )
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn next_transaction_id(&self) -> u16 {
        self.transaction_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn cancel_token(&self) -> CancellationToken {
        match self.cancel.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn replace_cancel_token(&self) -> CancellationToken {
        let mut token = match self.cancel.lock() {
            Ok(token) => token,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *token, CancellationToken::new())
    }

    async fn open(&self) -> Result<Link> {
        info!("modbus {}: connecting (unit {})", self.address(), self.unit_id);

        let stream = match tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.healthy.store(false, Ordering::Relaxed);
                return Err(Error::transport(format!("connect to {}: {}", self.address(), e)));
            }
            Err(_) => {
                self.healthy.store(false, Ordering::Relaxed);
                return Err(Error::transport(format!(
                    "connect to {} timed out after {:?}",
                    self.address(),
                    self.timeout
                )));
            }
        };

        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::from_secs(TCP_KEEPALIVE_SECS))) {
            warn!("modbus {}: failed to set TCP keepalive: {}", self.address(), e);
        }
        let stream = TcpStream::from_std(std_stream)?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!("modbus {}: failed to set TCP_NODELAY: {}", self.address(), e);
        }

        info!("modbus {}: connected", self.address());
        self.healthy.store(true, Ordering::Relaxed);

        Ok(Framed::new(stream, MbapCodec))
    }

    /// One request/reply on an open link.
    async fn exchange(&self, link: &mut Link, request: &Request) -> Result<Response> {
        let transaction_id = self.next_transaction_id();
        let frame = Frame::new(transaction_id, self.unit_id, request.to_pdu());

        let reply = async {
            debug!("modbus {}: TX #{} {:?}", self.address(), transaction_id, request);
            if let Err(e) = link.send(frame).await {
                return Err(e);
            }

            loop {
                match link.next().await {
                    None => return Err(Error::transport("connection closed by peer")),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(reply)) if reply.transaction_id() != transaction_id => {
                        debug!(
                            "modbus {}: discarding stale reply #{} while waiting for #{}",
                            self.address(),
                            reply.transaction_id(),
                            transaction_id
                        );
                    }
                    Some(Ok(reply)) => return Ok(reply),
                }
            }
        };

        let reply = match tokio::time::timeout(self.timeout, reply).await {
            Ok(reply) => reply?,
            Err(_) => {
                return Err(Error::transport(format!(
                    "no reply within {:?}",
                    self.timeout
                )))
            }
        };

        if reply.header.unit_id != self.unit_id {
            warn!(
                "modbus {}: reply #{} from unit {} (expected {})",
                self.address(),
                transaction_id,
                reply.header.unit_id,
                self.unit_id
            );
            return Err(Error::protocol(format!(
                "reply from unit {}, expected unit {}",
                reply.header.unit_id, self.unit_id
            )));
        }

        Response::parse(request, &reply.pdu)
    }

    async fn request_locked(&self, request: &Request) -> Result<Response> {
        let mut guard = self.link.lock().await;

        // close() may have run while this request waited for the link
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let reused = guard.is_some();
        if !reused {
            *guard = Some(self.open().await?);
        }
        let Some(link) = guard.as_mut() else {
            return Err(Error::Closed);
        };

        let err = match self.exchange(link, request).await {
            Ok(response) => {
                self.healthy.store(true, Ordering::Relaxed);
                return Ok(response);
            }
            Err(e) if !e.is_connection() => return Err(e),
            Err(e) => e,
        };

        *guard = None;
        self.healthy.store(false, Ordering::Relaxed);

        // a fresh connection that fails straight away is not worth a second try
        if !reused {
            return Err(err);
        }
        warn!("modbus {}: {}, reconnecting", self.address(), err);

        let link = guard.insert(self.open().await?);
        match self.exchange(link, request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_connection() {
                    *guard = None;
                    self.healthy.store(false, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    async fn request(&self, request: Request) -> Result<Response> {
        request.validate()?;

        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let token = self.cancel_token();
        tokio::select! {
            _ = token.cancelled() => Err(Error::Closed),
            result = self.request_locked(&request) => result,
        }
    }
}

#[async_trait]
impl Transport for ModbusTcp {
    async fn connect(&self) -> Result<()> {
        self.closed.store(false, Ordering::Release);

        let mut guard = self.link.lock().await;
        if guard.is_none() {
            *guard = Some(self.open().await?);
        }
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.replace_cancel_token().cancel();

        if self.link.lock().await.take().is_some() {
            info!("modbus {}: connection closed", self.address());
        }
        self.healthy.store(false, Ordering::Relaxed);
    }

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        match self.request(Request::ReadHolding { address, count }).await? {
            Response::ReadHolding(words) => Ok(words),
            other => Err(Error::protocol(format!("unexpected reply {:?}", other))),
        }
    }

    async fn write_single(&self, address: u16, value: u16) -> Result<()> {
        self.request(Request::WriteSingle { address, value }).await?;
        Ok(())
    }

    async fn write_multiple(&self, address: u16, values: &[u16]) -> Result<()> {
        self.request(Request::WriteMultiple {
            address,
            values: values.to_vec(),
        })
        .await?;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }
}
