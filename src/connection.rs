//! Connection management
//!
//! A [`ConnectionManager`] owns the single logical connection to the control
//! unit. Handles ([`Gum`]) are handed out by [`ConnectionManager::acquire`]
//! and returned with [`ConnectionManager::release`]; the first acquire
//! autodetects the line and resolves metadata, the last release persists the
//! connection cache and closes the transport.
//!
//! Two locks guard the shared link:
//!
//! - the transport lock, held for a single exchange (or a short sequence
//!   that must not be interleaved, such as trigger + completion wait)
//! - the call lock, held for a whole remote call, outside the transport lock
//!
//! Flash bridge operations additionally hold the staging lock for their
//! full duration, since the RAM staging buffer is shared.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use gum_core::archive::{ArchiveReader, TarBz2Reader};
use gum_core::{BuildDescriptor, Metadata, Transport};

use crate::cache::CachedConnection;
use crate::device::SensorCatalog;
use crate::error::{Error, Result};
use crate::resolver::MetadataResolver;
use crate::settings::Settings;

/// Parameters for establishing a connection
///
/// Anything left unset comes from the connection cache, then from
/// [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct ConnectRequest {
    /// Port to try first
    pub port: Option<String>,
    /// Baud rate to try first
    pub baud: Option<u32>,
    /// Metadata to try before any update package
    pub metadata: Option<Metadata>,
    /// Update package to try before the others in the working directory
    pub firmware: Option<PathBuf>,
}

impl ConnectRequest {
    /// Empty request: everything from the cache or settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the port to try first
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Set the baud rate to try first
    pub fn baud(mut self, baud: u32) -> Self {
        self.baud = Some(baud);
        self
    }

    /// Supply metadata directly
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Try this update package before the others
    pub fn firmware(mut self, path: impl Into<PathBuf>) -> Self {
        self.firmware = Some(path.into());
        self
    }
}

/// State of the active connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Port in use
    pub port: String,
    /// Baud rate in use
    pub baud: u32,
    /// Autodetection found no responding line and fell back to the first candidates
    pub degraded: bool,
    /// Build of the active metadata
    pub build: BuildDescriptor,
    /// Whether the metadata matched the device's build exactly
    pub exact: bool,
}

struct Active {
    info: ConnectionInfo,
    metadata: Arc<Metadata>,
}

/// Ports to try, the requested one first
pub fn candidate_ports(known: &[String], requested: Option<&str>) -> Vec<String> {
    requested
        .map(str::to_string)
        .into_iter()
        .chain(known.iter().filter(|p| Some(p.as_str()) != requested).cloned())
        .collect()
}

/// Baud rates to try
///
/// The preferred rates come first, then everything else the transport
/// supports from fastest to slowest. A requested rate is moved to the front.
pub fn candidate_bauds(preferred: &[u32], supported: &[u32], requested: Option<u32>) -> Vec<u32> {
    let mut rest: Vec<u32> = supported
        .iter()
        .copied()
        .filter(|b| !preferred.contains(b))
        .collect();
    rest.sort_unstable_by(|a, b| b.cmp(a));
    rest.dedup();

    let ordered = preferred.iter().copied().chain(rest);
    requested
        .into_iter()
        .chain(ordered.filter(|b| Some(*b) != requested))
        .collect()
}

/// Open each (port, baud) pair in turn until the probe read answers
fn autodetect(
    transport: &mut dyn Transport,
    ports: &[String],
    bauds: &[u32],
    address: u32,
    len: usize,
) -> Option<(String, u32, Vec<u8>)> {
    for port in ports {
        for &baud in bauds {
            log::debug!("Trying {} at {} baud", port, baud);
            let probe = transport
                .open(port, baud)
                .and_then(|()| transport.read(address, len));
            match probe {
                Ok(bytes) => return Some((port.clone(), baud, bytes)),
                Err(e) => log::debug!("No answer on {} at {}: {}", port, baud, e),
            }
        }
    }
    None
}

/// The shared connection behind every handle
pub(crate) struct Link {
    transport: Mutex<Box<dyn Transport>>,
    calls: Mutex<()>,
    staging: Mutex<()>,
    /// A call was triggered without waiting for its completion notice
    unawaited: AtomicBool,
    active: RwLock<Option<Active>>,
    pub(crate) settings: Settings,
    archives: Box<dyn ArchiveReader>,
    pub(crate) catalog: Box<dyn SensorCatalog>,
}

impl Link {
    /// Lock the transport for one exchange
    pub(crate) fn transport(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the remote-execution slot
    pub(crate) fn serialize_calls(&self) -> MutexGuard<'_, ()> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the RAM flash staging buffer
    pub(crate) fn lock_staging(&self) -> MutexGuard<'_, ()> {
        self.staging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_unawaited(&self) {
        self.unawaited.store(true, Ordering::Relaxed);
    }

    pub(crate) fn take_unawaited(&self) -> bool {
        self.unawaited.swap(false, Ordering::Relaxed)
    }

    pub(crate) fn metadata(&self) -> Result<Arc<Metadata>> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        active
            .as_ref()
            .map(|a| Arc::clone(&a.metadata))
            .ok_or(Error::NotConnected)
    }

    pub(crate) fn info(&self) -> Result<ConnectionInfo> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        active.as_ref().map(|a| a.info.clone()).ok_or(Error::NotConnected)
    }

    /// Establish the line and resolve metadata
    pub(crate) fn connect(&self, request: ConnectRequest) -> Result<()> {
        let mut transport = self.transport();
        let result = self.establish(&mut **transport, request);
        match result {
            Ok(active) => {
                let mut slot = self.active.write().unwrap_or_else(PoisonError::into_inner);
                *slot = Some(active);
                Ok(())
            }
            Err(e) => {
                if let Err(close) = transport.close() {
                    log::debug!("Closing after failed connect: {}", close);
                }
                Err(e)
            }
        }
    }

    fn establish(&self, transport: &mut dyn Transport, request: ConnectRequest) -> Result<Active> {
        let settings = &self.settings;

        let (cached_port, cached_baud, cached_meta) = match CachedConnection::load(&settings.cache_path) {
            Some(c) => (Some(c.port), Some(c.baud), Some(c.metadata)),
            None => (None, None, None),
        };
        let port = request.port.or(cached_port);
        let baud = request.baud.or(cached_baud);
        let supplied = request.metadata.or(cached_meta);

        let ports = candidate_ports(&settings.ports, port.as_deref());
        let bauds = candidate_bauds(&settings.preferred_bauds, &transport.supported_baud_rates(), baud);
        let (Some(first_port), Some(&first_baud)) = (ports.first(), bauds.first()) else {
            return Err(Error::Settings("no candidate ports or baud rates".into()));
        };

        let (line_port, line_baud, probe, degraded) = match autodetect(
            transport,
            &ports,
            &bauds,
            settings.probe_address,
            settings.probe_len,
        ) {
            Some((p, b, bytes)) => (p, b, Some(bytes), false),
            None => {
                log::warn!(
                    "Failed to autoconnect, defaulting to {} at {} baud",
                    first_port,
                    first_baud
                );
                if let Err(e) = transport.open(first_port, first_baud) {
                    log::warn!("Cannot open {}: {}", first_port, e);
                }
                (first_port.clone(), first_baud, None, true)
            }
        };

        log::info!("Device: {} - rate: {}", line_port, line_baud);
        if let Some(port) = port.as_deref().filter(|p| *p != line_port) {
            log::warn!("Port changed ({} -> {})", port, line_port);
        }
        if let Some(baud) = baud.filter(|b| *b != line_baud) {
            log::warn!("Rate changed ({} -> {})", baud, line_baud);
        }

        let target = probe.as_deref().and_then(BuildDescriptor::from_slice);
        let resolver = MetadataResolver::new(
            self.archives.as_ref(),
            &settings.workdir,
            &settings.archive_prefix,
            &settings.archive_suffix,
        );
        let candidates = resolver.candidates(supplied, request.firmware.as_deref());
        let resolved = resolver.resolve(candidates, target)?;

        let rx = resolved.metadata.symbol(&settings.symbols.rx_buffer)?;
        transport.set_max_write_len(rx.size);
        log::debug!("Max write length {} bytes", rx.size);
        log::info!("Firmware build {}", resolved.build);

        Ok(Active {
            info: ConnectionInfo {
                port: line_port,
                baud: line_baud,
                degraded,
                build: resolved.build,
                exact: resolved.exact,
            },
            metadata: Arc::new(resolved.metadata),
        })
    }

    /// Persist the connection cache and close the transport
    pub(crate) fn teardown(&self) -> Result<()> {
        let active = self
            .active
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let stored = match active {
            Some(active) => CachedConnection {
                port: active.info.port,
                baud: active.info.baud,
                metadata: Arc::unwrap_or_clone(active.metadata),
            }
            .store(&self.settings.cache_path),
            None => Ok(()),
        };

        self.transport().close()?;
        log::debug!("Connection closed");
        stored
    }
}

/// Handle to a connected control unit
///
/// Obtained from [`ConnectionManager::acquire`]. All handles of one manager
/// share the same line and metadata, and may be used from several threads.
pub struct Gum {
    pub(crate) link: Arc<Link>,
}

impl fmt::Debug for Gum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gum")
            .field("connection", &self.link.info().ok())
            .finish_non_exhaustive()
    }
}

impl Gum {
    /// Active port, baud, build and whether autodetection degraded
    pub fn connection_info(&self) -> Result<ConnectionInfo> {
        self.link.info()
    }

    /// Metadata of the running firmware
    pub fn metadata(&self) -> Result<Arc<Metadata>> {
        self.link.metadata()
    }

    /// Settings the manager was created with
    pub fn settings(&self) -> &Settings {
        &self.link.settings
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    transport: Box<dyn Transport>,
    settings: Settings,
    archives: Option<Box<dyn ArchiveReader>>,
    catalog: Option<Box<dyn SensorCatalog>>,
}

impl ConnectionManagerBuilder {
    /// Use a different reader for update packages
    pub fn archive_reader(mut self, reader: Box<dyn ArchiveReader>) -> Self {
        self.archives = Some(reader);
        self
    }

    /// Use a different source for the default sensor list
    pub fn sensor_catalog(mut self, catalog: Box<dyn SensorCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Create the manager; nothing is opened until the first acquire
    pub fn build(self) -> ConnectionManager {
        let catalog = self
            .catalog
            .unwrap_or_else(|| Box::new(self.settings.clone()));
        ConnectionManager {
            link: Arc::new(Link {
                transport: Mutex::new(self.transport),
                calls: Mutex::new(()),
                staging: Mutex::new(()),
                unawaited: AtomicBool::new(false),
                active: RwLock::new(None),
                settings: self.settings,
                archives: self.archives.unwrap_or_else(|| Box::new(TarBz2Reader)),
                catalog,
            }),
            handles: Mutex::new(0),
        }
    }
}

/// Owner of the connection and its handle count
pub struct ConnectionManager {
    link: Arc<Link>,
    handles: Mutex<usize>,
}

impl ConnectionManager {
    /// Create a manager with the default archive reader and sensor catalog
    pub fn new(transport: Box<dyn Transport>, settings: Settings) -> Self {
        Self::builder(transport, settings).build()
    }

    /// Start building a manager with custom collaborators
    pub fn builder(transport: Box<dyn Transport>, settings: Settings) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            transport,
            settings,
            archives: None,
            catalog: None,
        }
    }

    /// Get a handle, connecting if this is the first one
    ///
    /// The request only matters for the first handle; later acquires share
    /// the existing connection.
    pub fn acquire(&self, request: ConnectRequest) -> Result<Gum> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        if *handles == 0 {
            self.link.connect(request)?;
        } else {
            log::debug!("Reusing connection ({} handles)", *handles);
        }
        *handles += 1;
        Ok(Gum {
            link: Arc::clone(&self.link),
        })
    }

    /// Return a handle, tearing the connection down with the last one
    ///
    /// A handle from another manager is returned inside
    /// [`Error::ForeignHandle`] and counts stay unchanged.
    pub fn release(&self, gum: Gum) -> Result<()> {
        if !Arc::ptr_eq(&gum.link, &self.link) {
            return Err(Error::ForeignHandle(gum));
        }
        drop(gum);

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        *handles = handles.checked_sub(1).ok_or(Error::NotConnected)?;
        if *handles == 0 {
            self.link.teardown()?;
        }
        Ok(())
    }

    /// Number of outstanding handles
    pub fn handle_count(&self) -> usize {
        *self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{firmware, fixture, settings_in};
    use gum_dummy::{DummyConfig, DummyDevice, Op};

    #[test]
    fn test_candidate_ports() {
        let known: Vec<String> = (0..4).map(|i| format!("/dev/ttyUSB{}", i)).collect();
        assert_eq!(candidate_ports(&known, None), known);

        let ports = candidate_ports(&known, Some("/dev/ttyUSB2"));
        assert_eq!(
            ports,
            vec!["/dev/ttyUSB2", "/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB3"]
        );

        let ports = candidate_ports(&known, Some("/dev/ttyACM0"));
        assert_eq!(ports.len(), 5);
        assert_eq!(ports[0], "/dev/ttyACM0");
    }

    #[test]
    fn test_candidate_bauds() {
        let preferred = [230_400, 115_200, 9600];
        let supported = [9600, 19_200, 57_600, 115_200, 230_400, 4800];
        assert_eq!(
            candidate_bauds(&preferred, &supported, None),
            vec![230_400, 115_200, 9600, 57_600, 19_200, 4800]
        );
        assert_eq!(
            candidate_bauds(&preferred, &supported, Some(57_600)),
            vec![57_600, 230_400, 115_200, 9600, 19_200, 4800]
        );
    }

    #[test]
    fn test_connect_first_pair() {
        let fx = fixture();
        let gum = fx
            .manager
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();

        let info = gum.connection_info().unwrap();
        assert_eq!(info.port, "/dev/ttyUSB0");
        assert_eq!(info.baud, 230_400);
        assert!(!info.degraded);
        assert!(info.exact);
        assert_eq!(fx.device.max_write_len(), 16);
        assert_eq!(
            fx.device.ops()[0],
            Op::Open {
                port: "/dev/ttyUSB0".into(),
                baud: 230_400
            }
        );
        fx.manager.release(gum).unwrap();
    }

    #[test]
    fn test_autodetect_order() {
        let fx = fixture();
        fx.device.set_line("/dev/ttyUSB1", 115_200);
        let gum = fx
            .manager
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();

        let opens: Vec<(String, u32)> = fx
            .device
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Open { port, baud } => Some((port, baud)),
                _ => None,
            })
            .collect();

        // every rate on ttyUSB0 first, then ttyUSB1 until the device answers
        let per_port = candidate_bauds(
            &[230_400, 115_200, 9600],
            &DummyConfig::default().baud_rates,
            None,
        )
        .len();
        assert_eq!(opens.len(), per_port + 2);
        assert!(opens[..per_port].iter().all(|(p, _)| p == "/dev/ttyUSB0"));
        assert_eq!(opens[per_port], ("/dev/ttyUSB1".to_string(), 230_400));
        assert_eq!(opens[per_port + 1], ("/dev/ttyUSB1".to_string(), 115_200));

        let info = gum.connection_info().unwrap();
        assert_eq!((info.port.as_str(), info.baud), ("/dev/ttyUSB1", 115_200));
        fx.manager.release(gum).unwrap();
    }

    #[test]
    fn test_requested_line_tried_first() {
        let fx = fixture();
        fx.device.set_line("/dev/ttyUSB3", 9600);
        let gum = fx
            .manager
            .acquire(
                ConnectRequest::new()
                    .port("/dev/ttyUSB3")
                    .baud(9600)
                    .metadata(firmware()),
            )
            .unwrap();
        assert_eq!(
            fx.device.ops()[0],
            Op::Open {
                port: "/dev/ttyUSB3".into(),
                baud: 9600
            }
        );
        assert_eq!(gum.connection_info().unwrap().baud, 9600);
        fx.manager.release(gum).unwrap();
    }

    #[test]
    fn test_degraded_connection() {
        let fx = fixture();
        fx.device.set_line("/dev/ttyS9", 300);
        let gum = fx
            .manager
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();

        let info = gum.connection_info().unwrap();
        assert!(info.degraded);
        assert!(!info.exact);
        assert_eq!(info.port, "/dev/ttyUSB0");
        assert_eq!(info.baud, 230_400);
        assert_eq!(info.build, firmware().build().unwrap());
        fx.manager.release(gum).unwrap();
    }

    #[test]
    fn test_no_metadata_fails_and_closes() {
        let fx = fixture();
        let err = fx.manager.acquire(ConnectRequest::new()).unwrap_err();
        assert!(matches!(err, Error::MetadataNotFound));
        assert_eq!(fx.manager.handle_count(), 0);
        assert_eq!(fx.device.line(), None);
    }

    #[test]
    fn test_refcount_and_cache() {
        let fx = fixture();
        let a = fx
            .manager
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();
        let b = fx.manager.acquire(ConnectRequest::new()).unwrap();
        assert_eq!(fx.manager.handle_count(), 2);

        // only the first acquire probes
        let opens = fx
            .device
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::Open { .. }))
            .count();
        assert_eq!(opens, 1);

        fx.manager.release(a).unwrap();
        assert!(fx.device.line().is_some());
        assert!(!fx.settings.cache_path.exists());

        fx.manager.release(b).unwrap();
        assert_eq!(fx.manager.handle_count(), 0);
        assert_eq!(fx.device.line(), None);

        let cached = CachedConnection::load(&fx.settings.cache_path).unwrap();
        assert_eq!(cached.port, "/dev/ttyUSB0");
        assert_eq!(cached.baud, 230_400);
        assert_eq!(cached.metadata, firmware());
    }

    #[test]
    fn test_cache_reused_on_next_connect() {
        let fx = fixture();
        fx.device.set_line("/dev/ttyUSB2", 9600);
        let gum = fx
            .manager
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();
        fx.manager.release(gum).unwrap();
        fx.device.clear_ops();

        // no explicit metadata this time: it comes from the cache
        let gum = fx.manager.acquire(ConnectRequest::new()).unwrap();
        assert_eq!(
            fx.device.ops()[0],
            Op::Open {
                port: "/dev/ttyUSB2".into(),
                baud: 9600
            }
        );
        assert!(gum.connection_info().unwrap().exact);
        fx.manager.release(gum).unwrap();
    }

    #[test]
    fn test_foreign_handle_returned() {
        let fx = fixture();
        let dir = tempfile::tempdir().unwrap();
        let device = DummyDevice::from_metadata(DummyConfig::default(), &firmware());
        let settings = settings_in(dir.path());
        let other = ConnectionManager::new(Box::new(device.clone()), settings.clone());
        let gum = other
            .acquire(ConnectRequest::new().metadata(firmware()))
            .unwrap();

        let gum = match fx.manager.release(gum) {
            Err(Error::ForeignHandle(gum)) => gum,
            result => panic!("unexpected: {:?}", result),
        };
        assert_eq!(other.handle_count(), 1);
        assert_eq!(fx.manager.handle_count(), 0);

        // the owner can still tear down
        other.release(gum).unwrap();
        assert_eq!(other.handle_count(), 0);
        assert_eq!(device.line(), None);
        assert!(CachedConnection::load(&settings.cache_path).is_some());
    }
}
