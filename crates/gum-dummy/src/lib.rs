//! gum-dummy - In-memory control-unit emulator for testing
//!
//! This crate provides a [`Transport`] that emulates the control unit in
//! memory: RAM and flash arrays, the remote-execution slot, the firmware
//! helpers the driver relies on (`flash_read`, `flash_write`,
//! `flash_write_block`) and the bootloader's page protocol. It's useful for
//! testing and development without real hardware.
//!
//! The device is cheaply cloneable; all clones share the same state, so a
//! test can hand one clone to the driver and keep another for inspection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gum_core::transport::Result;
use gum_core::{Direction, Metadata, Notification, Transport, TransportError};

/// Byte the bootloader uses for handshake, page trailer and confirmation
pub const BOOTLOADER_ACK: u8 = 0xA5;

/// Configuration for the dummy device
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Port the device is attached to
    pub port: String,
    /// Baud rate the firmware runs at
    pub baud: u32,
    /// Baud rates the emulated line supports
    pub baud_rates: Vec<u32>,
    /// Data memory size in bytes
    pub ram_size: usize,
    /// Program memory size in bytes
    pub flash_size: usize,
    /// Bootloader page size
    pub page_size: usize,
    /// Address of the build descriptor
    pub probe_address: u32,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud: 230_400,
            baud_rates: vec![
                1200, 2400, 4800, 9600, 19_200, 38_400, 57_600, 115_200, 230_400, 460_800,
            ],
            ram_size: 0x0860,
            flash_size: 32 * 1024,
            page_size: 128,
            probe_address: 0x60,
        }
    }
}

/// Device memory as seen by function handlers
#[derive(Debug, Clone)]
pub struct Memory {
    /// Data memory
    pub ram: Vec<u8>,
    /// Program memory
    pub flash: Vec<u8>,
}

impl Memory {
    fn copy_flash_to_ram(&mut self, ram: usize, flash: usize, len: usize) {
        let src = self.flash[flash..flash + len].to_vec();
        self.ram[ram..ram + len].copy_from_slice(&src);
    }

    fn copy_ram_to_flash(&mut self, ram: usize, flash: usize, len: usize) {
        let src = self.ram[ram..ram + len].to_vec();
        self.flash[flash..flash + len].copy_from_slice(&src);
    }
}

/// Firmware function emulation
///
/// Receives the four argument words and returns the bytes to place in the
/// argument/return buffer, if any.
pub type Handler = Box<dyn FnMut(&mut Memory, [u16; 4]) -> Option<Vec<u8>> + Send>;

/// One transport operation, as recorded by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Line opened
    Open {
        /// Port
        port: String,
        /// Baud rate
        baud: u32,
    },
    /// Line closed
    Close,
    /// Memory read
    Read {
        /// Address
        address: u32,
        /// Length
        len: usize,
    },
    /// Memory write
    Write {
        /// Address
        address: u32,
        /// Payload
        data: Vec<u8>,
    },
    /// Notification wait
    Receive,
    /// Raw byte wait
    Get,
    /// Device reset
    Reset,
    /// Raw bootloader bytes
    FlashPage(Vec<u8>),
}

/// What the bootloader received during the last flashing session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootloaderReport {
    /// Size announced in the header
    pub size: usize,
    /// Length of every page, in arrival order
    pub pages: Vec<usize>,
    /// Number of trailer bytes seen
    pub trailers: usize,
    /// Whether the transfer completed and was confirmed
    pub confirmed: bool,
}

#[derive(Debug)]
enum BootStage {
    Header(Vec<u8>),
    Page { expect: usize, got: Vec<u8> },
    Trailer,
    Failed,
}

#[derive(Debug)]
struct BootloaderRx {
    stage: BootStage,
    data: Vec<u8>,
    report: BootloaderReport,
}

impl BootloaderRx {
    fn new() -> Self {
        Self {
            stage: BootStage::Header(Vec::with_capacity(2)),
            data: Vec::new(),
            report: BootloaderReport::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ExecSlot {
    trigger: u32,
    buffer: u32,
    buffer_len: usize,
}

struct DummyState {
    config: DummyConfig,
    memory: Memory,
    line: Option<(String, u32)>,
    max_write_len: usize,
    exec: Option<ExecSlot>,
    functions: HashMap<u32, Handler>,
    bootloader_entry: Option<u32>,
    bootloader: Option<BootloaderRx>,
    last_report: Option<BootloaderReport>,
    notifications: VecDeque<Notification>,
    bytes: VecDeque<u8>,
    busy_polls: usize,
    stall: bool,
    suppress_notifications: bool,
    handshake_byte: u8,
    confirm_byte: u8,
    ops: Vec<Op>,
}

/// Dummy control unit
///
/// Emulates the firmware's memory-access protocol in memory for testing
/// purposes.
#[derive(Clone)]
pub struct DummyDevice {
    state: Arc<Mutex<DummyState>>,
}

impl DummyDevice {
    /// Create a device with blank memory and no firmware functions
    pub fn new(config: DummyConfig) -> Self {
        let memory = Memory {
            ram: vec![0; config.ram_size],
            flash: vec![0xFF; config.flash_size],
        };
        Self {
            state: Arc::new(Mutex::new(DummyState {
                config,
                memory,
                line: None,
                max_write_len: usize::MAX,
                exec: None,
                functions: HashMap::new(),
                bootloader_entry: None,
                bootloader: None,
                last_report: None,
                notifications: VecDeque::new(),
                bytes: VecDeque::new(),
                busy_polls: 0,
                stall: false,
                suppress_notifications: false,
                handshake_byte: BOOTLOADER_ACK,
                confirm_byte: BOOTLOADER_ACK,
                ops: Vec::new(),
            })),
        }
    }

    /// Create a device running the firmware described by `meta`
    ///
    /// Wires up the remote-execution slot (`exexec_func`/`exexec_buf`), the
    /// flash helpers, the bootloader entry (`__bootloader_adr`) and the build
    /// descriptor at the probe address, for whichever of those the metadata
    /// defines.
    pub fn from_metadata(config: DummyConfig, meta: &Metadata) -> Self {
        let device = Self::new(config);
        {
            let mut st = device.lock();

            if let (Some(trigger), Some(buffer)) =
                (meta.symbols.get("exexec_func"), meta.symbols.get("exexec_buf"))
            {
                st.exec = Some(ExecSlot {
                    trigger: trigger.address,
                    buffer: buffer.address,
                    buffer_len: buffer.size,
                });
            }

            if let Some(entry) = meta.symbols.get("__bootloader_adr") {
                st.bootloader_entry = Some(entry.address >> 1);
            }

            if let Ok(build) = meta.build() {
                let at = st.config.probe_address as usize;
                st.memory.ram[at..at + 8].copy_from_slice(build.as_bytes());
            }
        }

        for (name, copy) in [
            ("flash_read", false),
            ("flash_write", true),
            ("flash_write_block", true),
        ] {
            if let Some(sym) = meta.symbols.get(name) {
                device.register(
                    sym.address,
                    Box::new(move |mem, args| {
                        let (ram, flash, len) = (args[0] as usize, args[1] as usize, args[2] as usize);
                        if copy {
                            mem.copy_ram_to_flash(ram, flash, len);
                        } else {
                            mem.copy_flash_to_ram(ram, flash, len);
                        }
                        None
                    }),
                );
            }
        }

        device
    }

    fn lock(&self) -> MutexGuard<'_, DummyState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a firmware function at byte address `address`
    pub fn register(&self, address: u32, handler: Handler) {
        self.lock().functions.insert(address >> 1, handler);
    }

    /// Snapshot of data memory
    pub fn ram(&self) -> Vec<u8> {
        self.lock().memory.ram.clone()
    }

    /// Snapshot of program memory
    pub fn flash(&self) -> Vec<u8> {
        self.lock().memory.flash.clone()
    }

    /// Overwrite data memory at `address`
    pub fn poke_ram(&self, address: u32, data: &[u8]) {
        let at = address as usize;
        self.lock().memory.ram[at..at + data.len()].copy_from_slice(data);
    }

    /// Overwrite program memory at `address`
    pub fn poke_flash(&self, address: u32, data: &[u8]) {
        let at = address as usize;
        self.lock().memory.flash[at..at + data.len()].copy_from_slice(data);
    }

    /// Change the port/baud pair the device answers on
    pub fn set_line(&self, port: &str, baud: u32) {
        let mut st = self.lock();
        st.config.port = port.to_string();
        st.config.baud = baud;
    }

    /// Keep the execution slot busy for the next `polls` reads of the trigger
    pub fn set_busy(&self, polls: usize) {
        let mut st = self.lock();
        st.busy_polls = polls;
        if let Some(slot) = st.exec {
            let at = slot.trigger as usize;
            st.memory.ram[at] = if polls > 0 { 0xFF } else { 0 };
        }
    }

    /// Never complete triggered functions
    pub fn set_stall(&self, stall: bool) {
        self.lock().stall = stall;
    }

    /// Complete functions without sending the completion notification
    pub fn set_suppress_notifications(&self, suppress: bool) {
        self.lock().suppress_notifications = suppress;
    }

    /// Byte the bootloader sends when it starts
    pub fn set_handshake_byte(&self, byte: u8) {
        self.lock().handshake_byte = byte;
    }

    /// Byte the bootloader sends after the last page
    pub fn set_confirm_byte(&self, byte: u8) {
        self.lock().confirm_byte = byte;
    }

    /// Drop into the bootloader as if the firmware had jumped there
    pub fn enter_bootloader(&self) {
        self.lock().enter_bootloader();
    }

    /// Whether the bootloader is currently running
    pub fn in_bootloader(&self) -> bool {
        self.lock().bootloader.is_some()
    }

    /// Report from the last bootloader session
    pub fn bootloader_report(&self) -> Option<BootloaderReport> {
        let st = self.lock();
        st.bootloader
            .as_ref()
            .map(|rx| rx.report.clone())
            .or_else(|| st.last_report.clone())
    }

    /// Line currently open, if any
    pub fn line(&self) -> Option<(String, u32)> {
        self.lock().line.clone()
    }

    /// Maximum write length configured by the host
    pub fn max_write_len(&self) -> usize {
        self.lock().max_write_len
    }

    /// All recorded operations
    pub fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    /// Forget recorded operations
    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }
}

impl DummyState {
    fn enter_bootloader(&mut self) {
        log::debug!("dummy: entering bootloader");
        self.bootloader = Some(BootloaderRx::new());
        // a restarted bootloader has nothing left to say but its greeting
        self.bytes.clear();
        self.bytes.push_back(self.handshake_byte);
    }

    fn check_line(&self) -> Result<()> {
        match &self.line {
            None => Err(TransportError::NotOpen),
            Some(_) if self.bootloader.is_some() => Err(TransportError::Timeout),
            Some((port, baud)) if *port == self.config.port && *baud == self.config.baud => Ok(()),
            Some(_) => Err(TransportError::Timeout),
        }
    }

    fn check_range(&self, address: u32, len: usize) -> Result<usize> {
        let at = address as usize;
        if at + len > self.memory.ram.len() {
            return Err(TransportError::Protocol(format!(
                "access 0x{:04X}+{} outside data memory",
                address, len
            )));
        }
        Ok(at)
    }

    fn read(&mut self, address: u32, len: usize) -> Result<Vec<u8>> {
        let at = self.check_range(address, len)?;
        let data = self.memory.ram[at..at + len].to_vec();

        if let Some(slot) = self.exec {
            if self.busy_polls > 0 && slot.trigger >= address && slot.trigger < address + len as u32 {
                self.busy_polls -= 1;
                if self.busy_polls == 0 {
                    self.memory.ram[slot.trigger as usize] = 0;
                }
            }
        }

        Ok(data)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        let at = self.check_range(address, data.len())?;
        self.memory.ram[at..at + data.len()].copy_from_slice(data);

        if let Some(slot) = self.exec {
            if slot.trigger == address && data.iter().any(|&b| b != 0) {
                let mut word = [0u8; 2];
                let n = data.len().min(2);
                word[..n].copy_from_slice(&data[..n]);
                self.execute(slot, u16::from_le_bytes(word) as u32);
            }
        }
        Ok(())
    }

    fn execute(&mut self, slot: ExecSlot, function: u32) {
        if self.stall {
            log::debug!("dummy: stalling call to 0x{:04X}", function);
            return;
        }

        let buf = slot.buffer as usize;
        let mut args = [0u16; 4];
        for (i, arg) in args.iter_mut().enumerate() {
            if 2 * i + 1 < slot.buffer_len {
                let lo = buf + 2 * i;
                *arg = u16::from_le_bytes([self.memory.ram[lo], self.memory.ram[lo + 1]]);
            }
        }

        if Some(function) == self.bootloader_entry {
            self.enter_bootloader();
        } else if let Some(handler) = self.functions.get_mut(&function) {
            log::debug!("dummy: calling 0x{:04X} with {:?}", function, args);
            if let Some(ret) = handler(&mut self.memory, args) {
                let n = ret.len().min(slot.buffer_len);
                self.memory.ram[buf..buf + n].copy_from_slice(&ret[..n]);
            }
        } else {
            log::debug!("dummy: no function at 0x{:04X}", function);
        }

        let trigger = slot.trigger as usize;
        self.memory.ram[trigger] = 0;
        self.memory.ram[trigger + 1] = 0;

        if !self.suppress_notifications && self.bootloader.is_none() {
            self.notifications
                .push_back(Notification::new(1, slot.trigger, vec![0, 0]));
        }
    }

    fn bootloader_feed(&mut self, bytes: &[u8]) -> Result<()> {
        let page_size = self.config.page_size;
        let Some(rx) = self.bootloader.as_mut() else {
            return Err(TransportError::Protocol("bootloader not running".into()));
        };

        for &byte in bytes {
            match &mut rx.stage {
                BootStage::Header(header) => {
                    header.push(byte);
                    if header.len() == 2 {
                        let size = u16::from_be_bytes([header[0], header[1]]) as usize;
                        rx.report.size = size;
                        let first = match size % page_size {
                            0 => page_size,
                            rem => rem,
                        };
                        rx.stage = BootStage::Page {
                            expect: first.min(size),
                            got: Vec::new(),
                        };
                    }
                }
                BootStage::Page { expect, got } => {
                    got.push(byte);
                    if got.len() == *expect {
                        rx.report.pages.push(got.len());
                        rx.data.extend_from_slice(got);
                        rx.stage = BootStage::Trailer;
                    }
                }
                BootStage::Trailer => {
                    if byte != BOOTLOADER_ACK {
                        log::debug!("dummy: bad page trailer 0x{:02X}", byte);
                        rx.stage = BootStage::Failed;
                        continue;
                    }
                    rx.report.trailers += 1;
                    let remaining = rx.report.size - rx.data.len();
                    rx.stage = BootStage::Page {
                        expect: page_size.min(remaining),
                        got: Vec::new(),
                    };
                    if remaining == 0 {
                        break;
                    }
                }
                BootStage::Failed => {}
            }
        }

        if rx.report.size > 0 && rx.data.len() == rx.report.size && rx.report.trailers == rx.report.pages.len() {
            let mut image = std::mem::take(&mut rx.data);
            image.reverse();
            rx.report.confirmed = self.confirm_byte == BOOTLOADER_ACK;
            let report = rx.report.clone();

            self.memory.flash[..image.len()].copy_from_slice(&image);
            self.bytes.push_back(self.confirm_byte);
            self.last_report = Some(report);
            self.bootloader = None;
            log::debug!("dummy: bootloader wrote {} bytes", image.len());
        }
        Ok(())
    }
}

impl Transport for DummyDevice {
    fn open(&mut self, port: &str, baud: u32) -> Result<()> {
        let mut st = self.lock();
        st.ops.push(Op::Open {
            port: port.to_string(),
            baud,
        });
        st.line = Some((port.to_string(), baud));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut st = self.lock();
        st.ops.push(Op::Close);
        st.line = None;
        Ok(())
    }

    fn access(&mut self, direction: Direction, address: u32, buffer: &[u8]) -> Result<Vec<u8>> {
        let mut st = self.lock();
        match direction {
            Direction::Read => {
                st.ops.push(Op::Read {
                    address,
                    len: buffer.len(),
                });
                st.check_line()?;
                st.read(address, buffer.len())
            }
            Direction::Write => {
                st.ops.push(Op::Write {
                    address,
                    data: buffer.to_vec(),
                });
                st.check_line()?;
                st.write(address, buffer)?;
                Ok(Vec::new())
            }
        }
    }

    fn receive(&mut self, _timeout: Duration) -> Result<Notification> {
        let mut st = self.lock();
        st.ops.push(Op::Receive);
        st.notifications.pop_front().ok_or(TransportError::Timeout)
    }

    fn get(&mut self, _timeout: Duration) -> Result<u8> {
        let mut st = self.lock();
        st.ops.push(Op::Get);
        st.bytes.pop_front().ok_or(TransportError::Timeout)
    }

    fn reset(&mut self) -> Result<()> {
        let mut st = self.lock();
        st.ops.push(Op::Reset);
        if st.bootloader_entry.is_some() {
            st.enter_bootloader();
        }
        Ok(())
    }

    fn send_flash_page(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.lock();
        st.ops.push(Op::FlashPage(data.to_vec()));
        st.bootloader_feed(data)
    }

    fn set_max_write_len(&mut self, len: usize) {
        self.lock().max_write_len = len;
    }

    fn supported_baud_rates(&self) -> Vec<u32> {
        self.lock().config.baud_rates.clone()
    }
}
