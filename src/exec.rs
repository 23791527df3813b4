//! Remote execution
//!
//! The firmware polls a trigger word (`exexec_func`). Writing a function's
//! word address there makes it call that function with up to four word
//! arguments taken from `exexec_buf`, leave its return words in the same
//! buffer and clear the trigger. Clearing the trigger is echoed to the host
//! as a write notification.
//!
//! There is one slot per device, so calls are serialized per connection.

use std::thread;
use std::time::Duration;

use gum_core::{codec, Notification, Transport};

use crate::connection::Gum;
use crate::error::{Error, Result};

/// Number of argument words the execution slot carries
pub const MAX_ARGS: usize = 4;

/// Argument to a remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    /// Numeric argument, truncated to 16 bits on the wire
    Word(u32),
    /// Textual argument, parsed as a number (`0x`/`0o`/`0b` prefixes allowed)
    ///
    /// Anything that does not parse is sent as 0.
    Text(String),
}

impl Arg {
    /// Value sent on the wire
    pub fn word(&self) -> u16 {
        match self {
            Self::Word(w) => *w as u16,
            Self::Text(s) => codec::parse_number(s).unwrap_or(0) as u16,
        }
    }
}

impl From<u8> for Arg {
    fn from(v: u8) -> Self {
        Self::Word(v.into())
    }
}

impl From<u16> for Arg {
    fn from(v: u16) -> Self {
        Self::Word(v.into())
    }
}

impl From<u32> for Arg {
    fn from(v: u32) -> Self {
        Self::Word(v)
    }
}

impl From<usize> for Arg {
    fn from(v: usize) -> Self {
        Self::Word(v as u32)
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Function to call, by symbol name or byte address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function<'a> {
    Named(&'a str),
    Address(u32),
}

impl<'a> From<&'a str> for Function<'a> {
    fn from(name: &'a str) -> Self {
        Self::Named(name)
    }
}

impl From<u32> for Function<'_> {
    fn from(address: u32) -> Self {
        Self::Address(address)
    }
}

/// Encode arguments as consecutive little-endian words, missing ones zero
pub fn encode_args(args: &[Arg]) -> Result<[u8; 2 * MAX_ARGS]> {
    if args.len() > MAX_ARGS {
        return Err(Error::TooManyArguments(args.len()));
    }
    let mut buf = [0u8; 2 * MAX_ARGS];
    for (slot, arg) in buf.chunks_exact_mut(2).zip(args) {
        slot.copy_from_slice(&arg.word().to_le_bytes());
    }
    Ok(buf)
}

/// Decode the return buffer
///
/// Words come back last-first: the final pair in the buffer is the first
/// word of the result. A trailing odd byte is ignored.
pub fn decode_return(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .rev()
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

impl Gum {
    /// Call a firmware function and wait for its return words
    pub fn call<'a>(&self, function: impl Into<Function<'a>>, args: &[Arg]) -> Result<Vec<u16>> {
        self.execute(function.into(), args, true)
            .map(Option::unwrap_or_default)
    }

    /// Trigger a firmware function without waiting for it to finish
    pub fn call_nonblocking<'a>(&self, function: impl Into<Function<'a>>, args: &[Arg]) -> Result<()> {
        self.execute(function.into(), args, false).map(|_| ())
    }

    fn execute(&self, function: Function<'_>, args: &[Arg], blocking: bool) -> Result<Option<Vec<u16>>> {
        let encoded = encode_args(args)?;

        let meta = self.link.metadata()?;
        let settings = &self.link.settings;
        let trigger = *meta.symbol(&settings.symbols.exec_trigger)?;
        let buffer = *meta.symbol(&settings.symbols.exec_buffer)?;
        if encoded.len() > buffer.size {
            return Err(Error::SymbolWriteOverflow {
                name: settings.symbols.exec_buffer.clone(),
                size: buffer.size,
                len: encoded.len(),
            });
        }

        let address = match function {
            Function::Named(name) => meta.symbol(name)?.address,
            Function::Address(address) => address,
        };
        let word = address >> 1;

        let _slot = self.link.serialize_calls();

        loop {
            let status = self.read_ram(trigger.address, trigger.size)?;
            if status.iter().all(|&b| b == 0) {
                break;
            }
            log::warn!("Device busy (0x{:04X} pending), waiting", codec::to_int(&status).unwrap_or(0));
            thread::sleep(settings.busy_backoff());
        }

        {
            let mut transport = self.link.transport();
            if self.link.take_unawaited() {
                // completion notice of the previous non-blocking call
                if let Ok(stale) = transport.receive(Duration::ZERO) {
                    log::debug!("Discarded stale notification {:?}", stale);
                }
            }
            transport.write(buffer.address, &encoded)?;
            transport.write(trigger.address, &codec::to_bytes(u64::from(word), trigger.size))?;
            log::debug!("Called 0x{:04X} with {:02X?}", word, encoded);

            if !blocking {
                self.link.set_unawaited();
                return Ok(None);
            }

            let expected = Notification::new(1, trigger.address, vec![0u8; 2]);
            match transport.receive(settings.completion_timeout()) {
                Ok(n) if n == expected => {}
                other => {
                    log::warn!(
                        "No completion notice for 0x{:04X} ({:?}), polling status",
                        word,
                        other
                    );
                    let done = transport
                        .read(trigger.address, trigger.size)
                        .map(|status| status.iter().all(|&b| b == 0))
                        .unwrap_or(false);
                    if !done {
                        return Err(Error::RemoteCallFailed { function: word });
                    }
                }
            }
        }

        let ret = self.read_ram(buffer.address, buffer.size)?;
        Ok(Some(decode_return(&ret)))
    }
}
