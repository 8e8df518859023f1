use crate::prelude::*;
use crate::error::Result;

use std::time::Duration;

/// Largest block one Modbus read-holding request may carry.
pub const HARD_BLOCK_LIMIT: u16 = 125;

/// How registers may be grouped into read requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLimits {
    /// Unread words tolerated between two registers of one span.
    pub max_gap: u16,
    /// Most words one span may cover, gaps included. Capped at
    /// [`HARD_BLOCK_LIMIT`].
    pub max_block_size: u16,
    /// Pause between consecutive span reads.
    pub delay: Duration,
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self {
            max_gap: 4,
            max_block_size: 100,
            delay: Duration::ZERO,
        }
    }
}

impl ReadLimits {
    pub fn from_config(inverter: &config::Inverter) -> Self {
        Self {
            max_gap: inverter.merge_gap(),
            max_block_size: inverter.max_block_size(),
            delay: inverter.delay(),
        }
        .normalised()
    }

    fn normalised(mut self) -> Self {
        self.max_block_size = self.max_block_size.clamp(1, HARD_BLOCK_LIMIT);
        self
    }
}

/// One contiguous read-holding request and the registers decoded from it.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadSpan {
    /// First address read.
    pub start: u16,
    /// Words read, including any gaps between registers.
    pub count: u16,
    /// Sorted by address; aliases of one address follow each other.
    pub registers: Vec<RegisterDescriptor>,
}

impl ReadSpan {
    fn new(register: &RegisterDescriptor) -> Self {
        Self {
            start: register.address,
            count: register.word_count(),
            registers: vec![register.clone()],
        }
    }

    /// First address past the span.
    fn end(&self) -> u32 {
        u32::from(self.start) + u32::from(self.count)
    }

    fn try_absorb(&mut self, register: &RegisterDescriptor, limits: &ReadLimits) -> bool {
        let address = u32::from(register.address);
        let register_end = address + u32::from(register.word_count());

        // overlapping registers always share the span
        if address > self.end() && address - self.end() > u32::from(limits.max_gap) {
            return false;
        }

        let new_end = register_end.max(self.end());
        if new_end - u32::from(self.start) > u32::from(limits.max_block_size) {
            return false;
        }

        self.count = (new_end - u32::from(self.start)) as u16;
        self.registers.push(register.clone());
        true
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.registers.iter().map(|r| r.name)
    }
}

/// Groups registers into as few read requests as the limits allow.
pub fn plan_spans(registers: &[RegisterDescriptor], limits: &ReadLimits) -> Vec<ReadSpan> {
    let limits = limits.normalised();

    let mut sorted: Vec<&RegisterDescriptor> = registers.iter().collect();
    sorted.sort_by_key(|r| (r.address, r.word_count()));

    let mut spans: Vec<ReadSpan> = Vec::new();
    for register in sorted {
        let absorbed = match spans.last_mut() {
            Some(span) => span.try_absorb(register, &limits),
            None => false,
        };
        if !absorbed {
            spans.push(ReadSpan::new(register));
        }
    }

    spans
}

/// Reads a whole catalog through a [`Transport`] using spans planned once
/// up front.
pub struct BulkReader {
    /// Looked up by `read_names`.
    catalog: &'static Catalog,
    limits: ReadLimits,
    spans: Vec<ReadSpan>,
}

impl BulkReader {
    pub fn new(catalog: &'static Catalog, limits: ReadLimits) -> Self {
        let spans = plan_spans(catalog.all_registers(), &limits);
        debug!(
            "planned {} read spans for {} registers",
            spans.len(),
            catalog.len()
        );

        Self {
            catalog,
            limits,
            spans,
        }
    }

    pub fn spans(&self) -> &[ReadSpan] {
        &self.spans
    }

    /// Reads every catalog register.
    ///
    /// A span that fails marks its registers unavailable and the read goes
    /// on. A failure of the connection itself aborts the whole read.
    pub async fn read(&self, transport: &dyn Transport) -> Result<Snapshot> {
        self.read_spans(transport, &self.spans).await
    }

    /// Reads only the named registers.
    pub async fn read_names(&self, transport: &dyn Transport, names: &[&str]) -> Result<Snapshot> {
        let registers = names
            .iter()
            .map(|name| self.catalog.lookup(name).cloned())
            .collect::<Result<Vec<_>>>()?;

        let spans = plan_spans(&registers, &self.limits);
        self.read_spans(transport, &spans).await
    }

    async fn read_spans(&self, transport: &dyn Transport, spans: &[ReadSpan]) -> Result<Snapshot> {
        let mut values = BTreeMap::new();
        let mut unavailable = BTreeSet::new();

        for (index, span) in spans.iter().enumerate() {
            if index > 0 && !self.limits.delay.is_zero() {
                tokio::time::sleep(self.limits.delay).await;
            }

            debug!("reading {} words at {}", span.count, span.start);
            match transport.read_holding(span.start, span.count).await {
                Ok(words) => decode_span(span, &words, &mut values, &mut unavailable),
                Err(e) if e.is_connection() => {
                    error!("read of {} words at {} failed: {}", span.count, span.start, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        "read of {} words at {} failed, skipping {} registers: {}",
                        span.count,
                        span.start,
                        span.registers.len(),
                        e
                    );
                    unavailable.extend(span.names().map(String::from));
                }
            }
        }

        Ok(Snapshot::new(values, unavailable))
    }
}

fn decode_span(
    span: &ReadSpan,
    words: &[u16],
    values: &mut BTreeMap<String, Value>,
    unavailable: &mut BTreeSet<String>,
) {
    for register in &span.registers {
        let offset = usize::from(register.address - span.start);
        let slice = words.get(offset..offset + usize::from(register.word_count()));

        let decoded = match slice {
            Some(slice) => codec::decode(register, slice),
            None => Err(Error::Decode {
                register: register.name.to_string(),
                reason: format!("span at {} returned only {} words", span.start, words.len()),
            }),
        };

        match decoded {
            Ok(value) => {
                values.insert(register.name.to_string(), value);
            }
            Err(e) => {
                warn!("{}", e);
                unavailable.insert(register.name.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_gap: u16, max_block_size: u16) -> ReadLimits {
        ReadLimits {
            max_gap,
            max_block_size,
            delay: Duration::ZERO,
        }
    }

    #[test]
    fn block_size_splits_spans() {
        let registers = vec![
            RegisterDescriptor::u16("a", 10),
            RegisterDescriptor::u32("b", 11),
            RegisterDescriptor::u16("c", 13),
        ];

        let spans = plan_spans(&registers, &limits(10, 3));
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].start, spans[0].count), (10, 3));
        assert_eq!((spans[1].start, spans[1].count), (13, 1));
    }

    #[test]
    fn aliases_share_their_span() {
        let registers = vec![
            RegisterDescriptor::new("status", 39065, WireType::Bitfield32),
            RegisterDescriptor::flag("flag", 39065, WireType::Bitfield32, 0),
        ];

        let spans = plan_spans(&registers, &limits(0, 100));
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].count, 2);
        assert_eq!(spans[0].registers.len(), 2);
    }

    #[test]
    fn block_size_is_capped() {
        assert_eq!(limits(4, 500).normalised().max_block_size, HARD_BLOCK_LIMIT);
        assert_eq!(limits(4, 0).normalised().max_block_size, 1);
    }

    #[test]
    fn solakon_map_fits_the_wire_limit() {
        let spans = plan_spans(Catalog::solakon().all_registers(), &ReadLimits::default());
        assert!(spans.iter().all(|s| s.count <= HARD_BLOCK_LIMIT));
        let planned: usize = spans.iter().map(|s| s.registers.len()).sum();
        assert_eq!(planned, Catalog::solakon().len());
    }
}
