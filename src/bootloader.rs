//! Firmware and bootloader flashing
//!
//! [`Gum::flash_firmware`] replaces the application through the resident
//! bootloader. The bootloader speaks a raw byte protocol:
//!
//! ```text
//! host                          device
//!  |   jump to bootloader  ---->  |
//!  |  <----  0xA5 handshake       |
//!  |   size (big endian)   ---->  |
//!  |   page, 0xA5          ---->  |   (repeated)
//!  |  <----  0xA5 confirmation    |
//! ```
//!
//! The image goes out back to front: the bytes are reversed before paging,
//! and the first page carries the remainder so every later page is full.
//!
//! [`Gum::write_bootloader`] goes the other way and replaces the bootloader
//! from the running application.

use std::iter;
use std::thread;

use gum_core::Transport;

use crate::connection::{ConnectRequest, Gum};
use crate::error::{Error, Result};

/// Byte used for handshake, page trailer and confirmation
pub const BOOTLOADER_ACK: u8 = 0xA5;

/// Progress callback for flashing
pub trait FlashProgress {
    /// Called once the bootloader has answered
    fn handshake(&mut self);

    /// Called before the first page with the image size
    fn transmitting(&mut self, total_bytes: usize);

    /// Called after each page with the running byte count
    fn page_sent(&mut self, bytes_sent: usize);

    /// Called when the device confirmed the image
    fn complete(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl FlashProgress for NoProgress {
    fn handshake(&mut self) {}
    fn transmitting(&mut self, _total_bytes: usize) {}
    fn page_sent(&mut self, _bytes_sent: usize) {}
    fn complete(&mut self) {}
}

/// Stages of a firmware update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlasherState {
    Idle,
    EnteringBootloader,
    AwaitingHandshake,
    Transmitting,
    AwaitingConfirmation,
    Reconnecting,
    Done,
}

/// Page lengths for an image of `size` bytes
///
/// The first page holds `size % page_size` bytes (a full page if that is
/// zero); all others are full.
pub fn page_lengths(size: usize, page_size: usize) -> Vec<usize> {
    let page_size = page_size.max(1);
    if size == 0 {
        return Vec::new();
    }
    let first = match size % page_size {
        0 => page_size,
        rem => rem,
    };
    iter::once(first)
        .chain(iter::repeat(page_size).take((size - first) / page_size))
        .collect()
}

/// Size header and paged body sent to the bootloader
///
/// The header is the image size, big endian. Each page of the reversed
/// image is followed by its trailer byte.
pub fn bootloader_frames(image: &[u8], page_size: usize) -> Result<([u8; 2], Vec<Vec<u8>>)> {
    let size = u16::try_from(image.len()).map_err(|_| Error::ImageSizeError {
        size: image.len(),
        max: u16::MAX as usize,
    })?;

    let mut reversed = image.to_vec();
    reversed.reverse();

    let mut pages = Vec::new();
    let mut offset = 0;
    for len in page_lengths(image.len(), page_size) {
        let mut page = Vec::with_capacity(len + 1);
        page.extend_from_slice(&reversed[offset..offset + len]);
        page.push(BOOTLOADER_ACK);
        pages.push(page);
        offset += len;
    }
    Ok((size.to_be_bytes(), pages))
}

struct Flasher {
    state: FlasherState,
}

impl Flasher {
    fn enter(&mut self, next: FlasherState) {
        log::debug!("Flasher: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn expect_ack(transport: &mut dyn Transport, timeout: std::time::Duration) -> core::result::Result<(), Option<u8>> {
    match transport.get(timeout) {
        Ok(BOOTLOADER_ACK) => Ok(()),
        Ok(byte) => Err(Some(byte)),
        Err(e) => {
            log::debug!("No byte from bootloader: {}", e);
            Err(None)
        }
    }
}

impl Gum {
    fn page_size(&self) -> Result<usize> {
        let name = &self.link.settings.symbols.page_size_macro;
        let value = self.link.metadata()?.macro_int(name)?;
        usize::try_from(value)
            .ok()
            .filter(|&p| p > 0)
            .ok_or_else(|| Error::UnknownMacro(name.clone()))
    }

    /// Replace the running firmware with `image` through the bootloader
    ///
    /// Reconnects and re-initializes the debug interface afterwards.
    pub fn flash_firmware(&self, image: &[u8], progress: &mut dyn FlashProgress) -> Result<()> {
        let mut flasher = Flasher {
            state: FlasherState::Idle,
        };
        let result = self.run_flasher(&mut flasher, image, progress);
        if let Err(e) = &result {
            log::warn!("Flashing failed while {:?}: {}", flasher.state, e);
        }
        result
    }

    fn run_flasher(&self, flasher: &mut Flasher, image: &[u8], progress: &mut dyn FlashProgress) -> Result<()> {
        let settings = &self.link.settings;
        let names = &settings.symbols;

        let max = settings.max_image_size;
        if image.is_empty() || image.len() > max {
            return Err(Error::ImageSizeError {
                size: image.len(),
                max,
            });
        }

        let meta = self.link.metadata()?;
        let info = self.link.info()?;
        let entry = meta.symbol(&names.bootloader_entry)?.address;
        let (header, pages) = bootloader_frames(image, self.page_size()?)?;

        flasher.enter(FlasherState::EnteringBootloader);
        log::info!("Entering bootloader");
        if let Err(e) = self.call_nonblocking(entry, &[]) {
            log::warn!("Cannot jump to bootloader ({}), resetting device", e);
            self.link.transport().reset()?;
        }

        {
            let mut transport = self.link.transport();

            flasher.enter(FlasherState::AwaitingHandshake);
            expect_ack(&mut **transport, settings.handshake_timeout())
                .map_err(Error::BootloaderHandshakeFailure)?;
            progress.handshake();

            flasher.enter(FlasherState::Transmitting);
            log::info!("Writing {} bytes", image.len());
            progress.transmitting(image.len());
            transport.send_flash_page(&header)?;
            let mut sent = 0;
            for page in &pages {
                transport.send_flash_page(page)?;
                sent += page.len() - 1;
                progress.page_sent(sent);
            }

            flasher.enter(FlasherState::AwaitingConfirmation);
            expect_ack(&mut **transport, settings.byte_timeout())
                .map_err(Error::FlashConfirmationFailure)?;
            progress.complete();
        }

        flasher.enter(FlasherState::Reconnecting);
        thread::sleep(settings.settle());
        self.link.connect(ConnectRequest {
            port: Some(info.port),
            baud: Some(info.baud),
            metadata: Some((*meta).clone()),
            firmware: None,
        })?;
        self.call(names.debug_init.as_str(), &[])?;

        flasher.enter(FlasherState::Done);
        log::info!("Firmware updated");
        Ok(())
    }

    /// Replace the bootloader from the running firmware
    ///
    /// Each page is staged in the flash buffer and committed with a
    /// `flash_write_block` call at the bootloader base plus the page offset.
    pub fn write_bootloader(&self, image: &[u8], progress: &mut dyn FlashProgress) -> Result<()> {
        let names = &self.link.settings.symbols;
        let page_size = self.page_size()?;
        let staging = self.symbol(&names.flash_buffer)?.address;
        let base = self.symbol(&names.bootloader_entry)?.address;

        let _staging = self.link.lock_staging();
        progress.transmitting(image.len());
        for (i, block) in image.chunks(page_size).enumerate() {
            let offset = i * page_size;
            self.write_symbol(&names.flash_buffer, block)?;
            self.call(
                names.flash_write_block.as_str(),
                &[staging.into(), (base + offset as u32).into(), block.len().into()],
            )?;
            progress.page_sent(offset + block.len());
        }
        progress.complete();

        log::info!("Bootloader written ({} bytes at 0x{:04X})", image.len(), base);
        Ok(())
    }
}
