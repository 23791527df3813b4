//! Shared fixtures for the driver tests

use std::path::Path;

use gum_core::{Metadata, Symbol};
use gum_dummy::{DummyConfig, DummyDevice};
use tempfile::TempDir;

use crate::connection::{ConnectRequest, ConnectionManager, Gum};
use crate::settings::Settings;

/// Symbol table of the emulated firmware
pub(crate) fn firmware() -> Metadata {
    let mut meta = Metadata::new();
    meta.insert_macro("BUILD_SEC", 30)
        .insert_macro("BUILD_MIN", 15)
        .insert_macro("BUILD_HOUR", 9)
        .insert_macro("BUILD_WEEKDAY", 3)
        .insert_macro("BUILD_DAY", 5)
        .insert_macro("BUILD_MONTH", 6)
        .insert_macro("BUILD_YEAR", 2014)
        .insert_macro("SPM_PAGESIZE", 128)
        .insert_symbol("rx_buf", Symbol::ram(0x0100, 16))
        .insert_symbol("exexec_func", Symbol::ram(0x0110, 2))
        .insert_symbol("exexec_buf", Symbol::ram(0x0112, 8))
        .insert_symbol("flash_buf", Symbol::ram(0x0200, 128))
        .insert_symbol("print_buf", Symbol::ram(0x0300, 16))
        .insert_symbol("print_buf_wp", Symbol::ram(0x0310, 1))
        .insert_symbol("print_buf_rp", Symbol::ram(0x0311, 1))
        .insert_symbol("print_buf_ovf", Symbol::ram(0x0312, 1))
        .insert_symbol("date", Symbol::ram(0x0320, 8))
        .insert_symbol("counter", Symbol::ram(0x0330, 4))
        .insert_symbol("label", Symbol::ram(0x0340, 12))
        .insert_symbol("__dbg2cp_start", Symbol::ram(0x0400, 0))
        .insert_symbol("dbg_var", Symbol::ram(0x0404, 2))
        .insert_symbol("__dbg2cp_end", Symbol::ram(0x0420, 0))
        .insert_symbol("__dbgcp_start", Symbol::ram(0x0500, 0))
        .insert_symbol("_end", Symbol::ram(0x0600, 0))
        .insert_symbol("config", Symbol::flash(0x6000, 300))
        .insert_symbol("serial", Symbol::flash(0x6200, 2))
        .insert_symbol("flash_read", Symbol::flash(0x1000, 64))
        .insert_symbol("flash_write", Symbol::flash(0x1040, 64))
        .insert_symbol("flash_write_block", Symbol::flash(0x1080, 64))
        .insert_symbol("debug_init", Symbol::flash(0x10C0, 64))
        .insert_symbol("ds18b20_get_temp_tab", Symbol::flash(0x1100, 64))
        .insert_symbol("valve_opened", Symbol::flash(0x1140, 64))
        .insert_symbol("valve_closed", Symbol::flash(0x1180, 64))
        .insert_symbol("valve_get", Symbol::flash(0x11C0, 64))
        .insert_symbol("relay_get", Symbol::flash(0x1200, 64))
        .insert_symbol("echo", Symbol::flash(0x1240, 64))
        .insert_symbol("__bootloader_adr", Symbol::flash(0x7000, 0));
    meta
}

/// Settings with fast timeouts and all files under `dir`
pub(crate) fn settings_in(dir: &Path) -> Settings {
    Settings {
        cache_path: dir.join("gum.cache"),
        workdir: dir.to_path_buf(),
        completion_timeout_ms: 10,
        handshake_timeout_ms: 10,
        byte_timeout_ms: 10,
        busy_backoff_ms: 1,
        settle_ms: 0,
        sensors: vec!["28-a".into(), "28-b".into(), "28-c".into()],
        ..Settings::default()
    }
}

pub(crate) struct Fixture {
    pub device: DummyDevice,
    pub settings: Settings,
    pub manager: ConnectionManager,
    // keeps the cache directory alive
    _dir: TempDir,
}

/// Emulated device on the default line, not yet connected
pub(crate) fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path());
    let device = DummyDevice::from_metadata(DummyConfig::default(), &firmware());
    let manager = ConnectionManager::new(Box::new(device.clone()), settings.clone());
    Fixture {
        device,
        settings,
        manager,
        _dir: dir,
    }
}

/// Connected handle plus its fixture, with the connect traffic cleared
pub(crate) fn connected() -> (Fixture, Gum) {
    let fx = fixture();
    let gum = fx
        .manager
        .acquire(ConnectRequest::new().metadata(firmware()))
        .unwrap();
    fx.device.clear_ops();
    (fx, gum)
}
