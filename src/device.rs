//! Device-level operations
//!
//! Thin wrappers over remote calls and symbol access for the plant
//! peripherals: DS18B20 temperature sensors, valves, relays and the clock.

use chrono::{DateTime, Local, TimeZone};
use gum_core::codec::{self, TimeFormat};

use crate::connection::Gum;
use crate::error::Result;
use crate::exec::Arg;
use crate::settings::Settings;

/// Source of the default temperature sensor list
pub trait SensorCatalog: Send + Sync {
    /// Sensor identifiers in table order
    fn sensors(&self) -> Vec<String>;
}

impl SensorCatalog for Settings {
    fn sensors(&self) -> Vec<String> {
        self.sensors.clone()
    }
}

/// Parameters for a batch temperature read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureQuery {
    /// Resolution selector passed to the firmware (0 keeps the sensor default)
    pub resolution: u8,
    /// Conversion attempts per sensor
    pub retries: u8,
}

impl Default for TemperatureQuery {
    fn default() -> Self {
        Self {
            resolution: 0,
            retries: 1,
        }
    }
}

/// One sensor's reading
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Sensor identifier from the catalog or the caller's list
    pub sensor: String,
    /// Temperature in degrees Celsius
    pub celsius: f64,
}

/// Valve position as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    Opened,
    Closed,
    /// Neither end stop reached; raw position counter
    Position(u32),
}

fn first_word(ret: &[u16]) -> u16 {
    ret.first().copied().unwrap_or(0)
}

impl Gum {
    /// Read all sensors in one remote call
    ///
    /// With `sensors` unset the list comes from the configured
    /// [`SensorCatalog`].
    pub fn batch_temperature_read(
        &self,
        sensors: Option<&[String]>,
        query: TemperatureQuery,
    ) -> Result<Vec<SensorReading>> {
        let sensors = match sensors {
            Some(s) => s.to_vec(),
            None => self.link.catalog.sensors(),
        };
        if sensors.is_empty() {
            return Ok(Vec::new());
        }

        let names = &self.link.settings.symbols;
        let scratch = self.symbol(&names.scratch)?.address;

        let mut table = vec![0u8; 2 * sensors.len()];
        for (i, slot) in table.chunks_exact_mut(2).enumerate() {
            slot[0] = i as u8;
        }
        self.write_ram(scratch, &table)?;

        self.call(
            names.temperature_table.as_str(),
            &[
                sensors.len().into(),
                query.resolution.into(),
                query.retries.into(),
                scratch.into(),
            ],
        )?;

        let raw = self.read_ram(scratch, 2 * sensors.len())?;
        let readings = sensors
            .into_iter()
            .zip(raw.chunks_exact(2))
            .map(|(sensor, pair)| SensorReading {
                sensor,
                celsius: codec::fixed_8_8([pair[0], pair[1]]),
            })
            .collect();
        Ok(readings)
    }

    /// Position of valve `index`
    ///
    /// The end-stop checks take precedence over the raw position.
    pub fn valve_state(&self, index: u16) -> Result<ValveState> {
        let names = &self.link.settings.symbols;
        let arg = [Arg::from(index)];

        if first_word(&self.call(names.valve_opened.as_str(), &arg)?) & 0xFF != 0 {
            return Ok(ValveState::Opened);
        }
        if first_word(&self.call(names.valve_closed.as_str(), &arg)?) & 0xFF != 0 {
            return Ok(ValveState::Closed);
        }

        let ret = self.call(names.valve_get.as_str(), &arg)?;
        let hi = u32::from(first_word(&ret));
        let lo = u32::from(ret.get(1).copied().unwrap_or(0));
        Ok(ValveState::Position((hi << 16) + lo))
    }

    /// State of relay `index`
    pub fn relay_state(&self, index: u16) -> Result<u16> {
        let ret = self.call(
            self.link.settings.symbols.relay_get.as_str(),
            &[Arg::from(index)],
        )?;
        Ok(first_word(&ret))
    }

    /// Set the device clock to `t`
    pub fn set_time<Tz: TimeZone>(&self, t: &DateTime<Tz>, format: TimeFormat) -> Result<()> {
        let bytes = codec::encode_time(t, format);
        self.write_symbol(&self.link.settings.symbols.date, &bytes)?;
        log::debug!("Clock set ({:?})", format);
        Ok(())
    }

    /// Set the device clock to the host's local time
    pub fn set_time_now(&self, format: TimeFormat) -> Result<()> {
        self.set_time(&Local::now(), format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::connected;
    use chrono::Utc;
    use gum_dummy::Op;

    #[test]
    fn test_temperature_batch() {
        let (fx, gum) = connected();
        fx.device.register(
            0x1100,
            Box::new(|mem, args| {
                let (count, scratch) = (args[0] as usize, args[3] as usize);
                assert_eq!((args[1], args[2]), (0, 1));
                // index table in, fixed-point readings out
                let temps: [i16; 3] = [0x1580, -0x0140, 0x0010];
                for i in 0..count {
                    let index = mem.ram[scratch + 2 * i] as usize;
                    let t = temps[index].to_le_bytes();
                    mem.ram[scratch + 2 * i] = t[0];
                    mem.ram[scratch + 2 * i + 1] = t[1];
                }
                None
            }),
        );

        let readings = gum
            .batch_temperature_read(None, TemperatureQuery::default())
            .unwrap();
        assert_eq!(
            readings,
            vec![
                SensorReading {
                    sensor: "28-a".into(),
                    celsius: 21.5
                },
                SensorReading {
                    sensor: "28-b".into(),
                    celsius: -1.25
                },
                SensorReading {
                    sensor: "28-c".into(),
                    celsius: 0.0625
                },
            ]
        );
    }

    #[test]
    fn test_explicit_sensor_list() {
        let (fx, gum) = connected();
        fx.device.register(
            0x1100,
            Box::new(|mem, args| {
                assert_eq!(args[0], 1);
                let at = args[3] as usize;
                mem.ram[at..at + 2].copy_from_slice(&0x0200i16.to_le_bytes());
                None
            }),
        );

        let sensors = vec!["28-x".to_string()];
        let readings = gum
            .batch_temperature_read(Some(sensors.as_slice()), TemperatureQuery::default())
            .unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].celsius, 2.0);
    }

    /// Handler answering `value` as the first return word
    fn flag(value: u16) -> gum_dummy::Handler {
        Box::new(move |_, _| {
            let mut ret = vec![0u8; 6];
            ret.extend_from_slice(&value.to_le_bytes());
            Some(ret)
        })
    }

    #[test]
    fn test_valve_opened_wins() {
        let (fx, gum) = connected();
        fx.device.register(0x1140, flag(1));
        fx.device.register(0x1180, flag(1));
        assert_eq!(gum.valve_state(0).unwrap(), ValveState::Opened);

        let calls = fx
            .device
            .ops()
            .iter()
            .filter(|op| matches!(op, Op::Write { address: 0x0110, .. }))
            .count();
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_valve_closed() {
        let (fx, gum) = connected();
        fx.device.register(0x1140, flag(0));
        fx.device.register(0x1180, flag(1));
        assert_eq!(gum.valve_state(2).unwrap(), ValveState::Closed);
    }

    #[test]
    fn test_valve_position() {
        let (fx, gum) = connected();
        fx.device.register(0x1140, flag(0));
        fx.device.register(0x1180, flag(0x0100));
        // buffer words [0, 0, 0x5678, 0x0001] come back as [1, 0x5678, 0, 0]
        fx.device.register(
            0x11C0,
            Box::new(|_, _| Some(vec![0, 0, 0, 0, 0x78, 0x56, 0x01, 0x00])),
        );
        assert_eq!(gum.valve_state(1).unwrap(), ValveState::Position(0x0001_5678));
    }

    #[test]
    fn test_relay_state() {
        let (fx, gum) = connected();
        fx.device.register(
            0x1200,
            Box::new(|_, args| {
                let mut ret = vec![0u8; 6];
                ret.extend_from_slice(&(args[0] + 10).to_le_bytes());
                Some(ret)
            }),
        );
        assert_eq!(gum.relay_state(3).unwrap(), 13);
    }

    #[test]
    fn test_set_time() {
        let (fx, gum) = connected();
        let t = Utc.with_ymd_and_hms(2014, 6, 5, 9, 15, 30).unwrap();

        gum.set_time(&t, TimeFormat::Calendar).unwrap();
        assert_eq!(
            &fx.device.ram()[0x320..0x328],
            &[30, 15, 9, 3, 5, 6, 0xDE, 0x07]
        );

        gum.set_time(&t, TimeFormat::Epoch).unwrap();
        assert_eq!(
            &fx.device.ram()[0x320..0x324],
            &(t.timestamp() as u32).to_le_bytes()
        );
    }
}
