#![allow(dead_code)]

use solakon_bridge::prelude::*;
use solakon_bridge::error::Result;
use solakon_bridge::transport::frame::{Frame, MbapCodec, Request, Response};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;
impl Factory {
    pub fn inverter(host: &str, port: u16) -> config::Inverter {
        serde_yaml::from_str(&format!("host: {}\nport: {}\ntimeout: 1\n", host, port)).unwrap()
    }

    pub fn config(yaml: &str) -> ConfigWrapper {
        ConfigWrapper::from_config(Config::from_yaml(yaml).unwrap())
    }

    pub fn snapshot(values: &[(&str, Value)]) -> Snapshot {
        Snapshot::new(
            values
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            BTreeSet::new(),
        )
    }

    /// Leaks a catalog so it can back a `BulkReader`.
    pub fn catalog(registers: Vec<RegisterDescriptor>) -> &'static Catalog {
        Box::leak(Box::new(Catalog::new(registers).unwrap()))
    }

    pub fn limits(max_gap: u16) -> ReadLimits {
        ReadLimits {
            max_gap,
            ..ReadLimits::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Read(u16, u16),
    WriteSingle(u16, u16),
    WriteMultiple(u16, Vec<u16>),
}

/// In-memory register transport recording every call.
#[derive(Default)]
pub struct MockTransport {
    pub registers: Mutex<HashMap<u16, u16>>,
    pub calls: Mutex<Vec<Call>>,
    /// Reads starting at these addresses fail with an exception.
    pub failing_reads: Mutex<BTreeSet<u16>>,
    /// Writes to these addresses fail with an exception.
    pub failing_writes: Mutex<BTreeSet<u16>>,
    /// Every operation fails as if the link dropped.
    pub broken: AtomicBool,
    pub connected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_registers(registers: &[(u16, u16)]) -> Arc<Self> {
        let transport = Self::default();
        transport.registers.lock().unwrap().extend(registers.iter().copied());
        Arc::new(transport)
    }

    pub fn set(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    pub fn get(&self, address: u16) -> u16 {
        self.registers.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    pub fn fail_read_at(&self, address: u16) {
        self.failing_reads.lock().unwrap().insert(address);
    }

    pub fn fail_write_at(&self, address: u16) {
        self.failing_writes.lock().unwrap().insert(address);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Read(..)))
            .collect()
    }

    fn check_link(&self) -> Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            Err(Error::transport("connection reset by peer"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.check_link()?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.calls.lock().unwrap().push(Call::Read(address, count));
        self.check_link()?;
        if self.failing_reads.lock().unwrap().contains(&address) {
            return Err(Error::Exception {
                function: 0x03,
                code: 0x02,
            });
        }
        Ok((0..count).map(|i| self.get(address + i)).collect())
    }

    async fn write_single(&self, address: u16, value: u16) -> Result<()> {
        self.calls.lock().unwrap().push(Call::WriteSingle(address, value));
        self.check_link()?;
        if self.failing_writes.lock().unwrap().contains(&address) {
            return Err(Error::Exception {
                function: 0x06,
                code: 0x04,
            });
        }
        self.set(address, value);
        Ok(())
    }

    async fn write_multiple(&self, address: u16, values: &[u16]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::WriteMultiple(address, values.to_vec()));
        self.check_link()?;
        if self.failing_writes.lock().unwrap().contains(&address) {
            return Err(Error::Exception {
                function: 0x10,
                code: 0x04,
            });
        }
        for (i, value) in values.iter().enumerate() {
            self.set(address + i as u16, *value);
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        !self.broken.load(Ordering::SeqCst)
    }
}

/// How the mock Modbus server misbehaves.
#[derive(Clone, Debug, Default)]
pub struct Behaviour {
    /// Answer every request with this exception code.
    pub exception: Option<u8>,
    /// Never answer.
    pub silent: bool,
    /// Drop the connection on the next request without answering.
    pub hang_up_once: bool,
    /// Send a reply with an old transaction id before the real one.
    pub stale_first: bool,
    /// Answer reads with one word too few.
    pub short_reads: bool,
    /// Answer from a different unit id than the one addressed.
    pub wrong_unit: bool,
}

/// Modbus TCP server on a random local port backed by a register map.
pub struct MockServer {
    pub addr: SocketAddr,
    pub registers: Arc<Mutex<HashMap<u16, u16>>>,
    pub behaviour: Arc<Mutex<Behaviour>>,
    pub requests: Arc<Mutex<Vec<Request>>>,
    pub connections: Arc<AtomicUsize>,
}

impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = Self {
            addr: listener.local_addr().unwrap(),
            registers: Arc::new(Mutex::new(HashMap::new())),
            behaviour: Arc::new(Mutex::new(Behaviour::default())),
            requests: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        };

        let registers = server.registers.clone();
        let behaviour = server.behaviour.clone();
        let requests = server.requests.clone();
        let connections = server.connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(Self::serve(
                    Framed::new(stream, MbapCodec),
                    registers.clone(),
                    behaviour.clone(),
                    requests.clone(),
                ));
            }
        });

        server
    }

    pub fn set(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    pub fn set_words(&self, address: u16, words: &[u16]) {
        let mut registers = self.registers.lock().unwrap();
        for (i, word) in words.iter().enumerate() {
            registers.insert(address + i as u16, *word);
        }
    }

    pub fn get(&self, address: u16) -> u16 {
        self.registers.lock().unwrap().get(&address).copied().unwrap_or(0)
    }

    pub fn behave(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap());
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn client(&self, timeout: Duration) -> ModbusTcp {
        ModbusTcp::new("127.0.0.1", self.addr.port(), 1, timeout)
    }

    async fn serve(
        mut framed: Framed<tokio::net::TcpStream, MbapCodec>,
        registers: Arc<Mutex<HashMap<u16, u16>>>,
        behaviour: Arc<Mutex<Behaviour>>,
        requests: Arc<Mutex<Vec<Request>>>,
    ) {
        while let Some(Ok(frame)) = framed.next().await {
            let request = Request::parse(&frame.pdu).unwrap();
            requests.lock().unwrap().push(request.clone());

            let b = {
                let mut current = behaviour.lock().unwrap();
                let b = current.clone();
                current.hang_up_once = false;
                b
            };

            if b.hang_up_once {
                return;
            }
            if b.silent {
                continue;
            }

            let tid = frame.transaction_id();
            let unit = if b.wrong_unit {
                frame.header.unit_id.wrapping_add(1)
            } else {
                frame.header.unit_id
            };

            if b.stale_first {
                let stale = Response::ReadHolding(vec![0xdead]).to_pdu();
                framed
                    .send(Frame::new(tid.wrapping_sub(1), unit, stale))
                    .await
                    .unwrap();
            }

            let pdu = match b.exception {
                Some(code) => Response::exception_pdu(request.function(), code),
                None => Self::respond(&request, &registers, b.short_reads),
            };

            if framed.send(Frame::new(tid, unit, pdu)).await.is_err() {
                return;
            }
        }
    }

    fn respond(
        request: &Request,
        registers: &Mutex<HashMap<u16, u16>>,
        short_reads: bool,
    ) -> bytes::Bytes {
        let mut registers = registers.lock().unwrap();
        match request {
            Request::ReadHolding { address, count } => {
                let count = if short_reads { count - 1 } else { *count };
                let words = (0..count)
                    .map(|i| registers.get(&(address + i)).copied().unwrap_or(0))
                    .collect();
                Response::ReadHolding(words).to_pdu()
            }
            Request::WriteSingle { address, value } => {
                registers.insert(*address, *value);
                Response::WriteSingle {
                    address: *address,
                    value: *value,
                }
                .to_pdu()
            }
            Request::WriteMultiple { address, values } => {
                for (i, value) in values.iter().enumerate() {
                    registers.insert(address + i as u16, *value);
                }
                Response::WriteMultiple {
                    address: *address,
                    count: values.len() as u16,
                }
                .to_pdu()
            }
        }
    }
}

pub const METER_STATUS: &str = r#"{
  "device": {
    "hw": "v2",
    "hw_rev": "B",
    "hw_sn": "IRM-0042",
    "fw_ver": "1.4.2",
    "uptime": 86400
  },
  "wifi": {
    "rssi": -61,
    "ssid": "garage",
    "channel": 6,
    "ip": "192.168.1.50"
  },
  "extracted": {
    "instantaneous_power_w": -512.5,
    "energy_summation_kwh": 10234.7
  },
  "meter": {
    "serial_protocol": "SML",
    "manufacturer_code": "EMH",
    "device_identification": "1EMH0012345678",
    "obis_values": [
      { "obis_code": "1-0:1.8.0", "value": "10234.7", "unit": "kWh" },
      { "obis_code": "1-0:16.7.0", "value": "-512", "unit": "W" },
      { "obis_code": "1-0:0.0.0", "value": "1EMH0012345678", "unit": "" },
      { "obis_code": "1-0:32.7.0", "value": "", "unit": "V" }
    ]
  }
}"#;
