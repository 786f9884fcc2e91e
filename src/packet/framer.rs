use crate::buffer::GrowableByteBuffer;
use crate::packet::{parse_line, Packet};

/// Receives each packet as soon as its line is complete.
pub type PacketCallback = Box<dyn FnMut(Packet) + Send>;

/// Splits a pty byte stream into packets.
///
/// Bytes are mirrored into a [`GrowableByteBuffer`] and scanned for newlines
/// from the last parsed position, so a packet split across several `feed`
/// calls is decoded once its terminating newline arrives.
pub struct PacketFramer {
    buffer: GrowableByteBuffer,
    last_parsed: usize,
    on_packet: PacketCallback,
}

impl PacketFramer {
    pub fn new(initial_capacity: usize, on_packet: PacketCallback) -> Self {
        Self {
            buffer: GrowableByteBuffer::new(initial_capacity),
            last_parsed: 0,
            on_packet,
        }
    }

    /// Append a chunk that starts at `offset` and emit every completed packet.
    pub fn feed(&mut self, offset: u64, data: &[u8]) {
        if let Err(e) = self.buffer.append(offset, data) {
            log::warn!("packet stream dropped {} bytes: {}", data.len(), e);
            return;
        }
        self.scan();
    }

    fn scan(&mut self) {
        let bytes = self.buffer.snapshot();
        while let Some(rel) = bytes[self.last_parsed..].iter().position(|&b| b == b'\n') {
            let start = self.last_parsed;
            let newline = start + rel;
            self.last_parsed = newline + 1;

            let line = &bytes[start..newline];
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok(packet) => (self.on_packet)(packet),
                Err(e) => log::warn!(
                    "dropping packet line at offset {} ({} bytes): {}",
                    start,
                    line.len(),
                    e
                ),
            }
        }
    }

    /// Forget everything; required before reusing the framer for another stream.
    pub fn reset(&mut self) {
        self.buffer.reset();
        self.last_parsed = 0;
    }

    /// Offset the next `feed` must start at.
    pub fn end_offset(&self) -> u64 {
        self.buffer.len() as u64
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn unparsed(&self) -> &[u8] {
        &self.buffer.snapshot()[self.last_parsed..]
    }

    pub fn is_broken(&self) -> bool {
        self.buffer.is_broken()
    }

    pub fn version(&self) -> u64 {
        self.buffer.version()
    }
}

impl std::fmt::Debug for PacketFramer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketFramer")
            .field("buffer", &self.buffer)
            .field("last_parsed", &self.last_parsed)
            .finish_non_exhaustive()
    }
}
