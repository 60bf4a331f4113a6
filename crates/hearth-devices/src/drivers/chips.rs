//! Register-level drivers for the supported I2C chips.
//!
//! Written against `embedded-hal` 1.0 so any bus implementation can be
//! plugged in. All reads are one-shot: trigger a measurement, wait the
//! datasheet conversion time, fetch and convert.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use crate::model::{capabilities, ChipKind};

use super::SensorChip;

fn bus_error<E: embedded_hal::i2c::Error>(e: E) -> String {
    format!("i2c: {:?}", e.kind())
}

fn unsupported(kind: ChipKind, capability: &str) -> String {
    format!("{} cannot measure '{}'", kind, capability)
}

/// CRC-8, polynomial 0x31, as used by Sensirion and TE humidity sensors.
pub fn crc8(data: &[u8], init: u8) -> u8 {
    let mut crc = init;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

// ============================================================================
// BME280
// ============================================================================

const BME280_CHIP_ID: u8 = 0x60;
const BME280_REG_ID: u8 = 0xD0;
const BME280_REG_CALIB_00: u8 = 0x88;
const BME280_REG_CALIB_26: u8 = 0xE1;
const BME280_REG_CTRL_HUM: u8 = 0xF2;
const BME280_REG_CTRL_MEAS: u8 = 0xF4;
const BME280_REG_DATA: u8 = 0xF7;
/// x1 oversampling on every channel.
const BME280_OSRS_X1: u8 = 0b001;
const BME280_MODE_FORCED: u8 = 0b01;
/// Worst-case forced conversion with x1 oversampling.
const BME280_CONVERSION_MS: u32 = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Bme280Calibration {
    t1: u16,
    t2: i16,
    t3: i16,
    p1: u16,
    p2: i16,
    p3: i16,
    p4: i16,
    p5: i16,
    p6: i16,
    p7: i16,
    p8: i16,
    p9: i16,
    h1: u8,
    h2: i16,
    h3: u8,
    h4: i16,
    h5: i16,
    h6: i8,
}

impl Bme280Calibration {
    fn parse(tp: &[u8; 26], hum: &[u8; 7]) -> Self {
        let u16le = |i: usize| u16::from_le_bytes([tp[i], tp[i + 1]]);
        let i16le = |i: usize| i16::from_le_bytes([tp[i], tp[i + 1]]);
        Self {
            t1: u16le(0),
            t2: i16le(2),
            t3: i16le(4),
            p1: u16le(6),
            p2: i16le(8),
            p3: i16le(10),
            p4: i16le(12),
            p5: i16le(14),
            p6: i16le(16),
            p7: i16le(18),
            p8: i16le(20),
            p9: i16le(22),
            h1: tp[25],
            h2: i16::from_le_bytes([hum[0], hum[1]]),
            h3: hum[2],
            h4: ((hum[3] as i8 as i16) << 4) | (hum[4] & 0x0F) as i16,
            h5: ((hum[5] as i8 as i16) << 4) | (hum[4] >> 4) as i16,
            h6: hum[6] as i8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bme280Sample {
    temperature: f64,
    pressure_hpa: f64,
    humidity: f64,
}

/// Float compensation from the BME280 datasheet, section 8.1.
fn bme280_compensate(cal: &Bme280Calibration, adc_t: i32, adc_p: i32, adc_h: i32) -> Bme280Sample {
    let var1 = (adc_t as f64 / 16384.0 - cal.t1 as f64 / 1024.0) * cal.t2 as f64;
    let var2 = (adc_t as f64 / 131072.0 - cal.t1 as f64 / 8192.0).powi(2) * cal.t3 as f64;
    let t_fine = var1 + var2;
    let temperature = t_fine / 5120.0;

    let mut var1 = t_fine / 2.0 - 64000.0;
    let mut var2 = var1 * var1 * cal.p6 as f64 / 32768.0;
    var2 += var1 * cal.p5 as f64 * 2.0;
    var2 = var2 / 4.0 + cal.p4 as f64 * 65536.0;
    var1 = (cal.p3 as f64 * var1 * var1 / 524288.0 + cal.p2 as f64 * var1) / 524288.0;
    var1 = (1.0 + var1 / 32768.0) * cal.p1 as f64;
    let pressure = if var1 == 0.0 {
        0.0
    } else {
        let mut p = 1048576.0 - adc_p as f64;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = cal.p9 as f64 * p * p / 2147483648.0;
        let var2 = p * cal.p8 as f64 / 32768.0;
        p + (var1 + var2 + cal.p7 as f64) / 16.0
    };

    let mut h = t_fine - 76800.0;
    h = (adc_h as f64 - (cal.h4 as f64 * 64.0 + cal.h5 as f64 / 16384.0 * h))
        * (cal.h2 as f64 / 65536.0
            * (1.0
                + cal.h6 as f64 / 67108864.0 * h * (1.0 + cal.h3 as f64 / 67108864.0 * h)));
    h *= 1.0 - cal.h1 as f64 * h / 524288.0;

    Bme280Sample {
        temperature,
        pressure_hpa: pressure / 100.0,
        humidity: h.clamp(0.0, 100.0),
    }
}

/// Bosch BME280 temperature, humidity and pressure sensor.
pub struct Bme280<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    calibration: Option<Bme280Calibration>,
}

impl<I: I2c, D: DelayNs> Bme280<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
            calibration: None,
        }
    }

    fn init(&mut self) -> Result<Bme280Calibration, String> {
        if let Some(cal) = self.calibration {
            return Ok(cal);
        }

        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[BME280_REG_ID], &mut id)
            .map_err(bus_error)?;
        if id[0] != BME280_CHIP_ID {
            return Err(format!("unexpected chip id 0x{:02X}", id[0]));
        }

        let mut tp = [0u8; 26];
        self.i2c
            .write_read(self.address, &[BME280_REG_CALIB_00], &mut tp)
            .map_err(bus_error)?;
        let mut hum = [0u8; 7];
        self.i2c
            .write_read(self.address, &[BME280_REG_CALIB_26], &mut hum)
            .map_err(bus_error)?;

        let cal = Bme280Calibration::parse(&tp, &hum);
        self.calibration = Some(cal);
        Ok(cal)
    }

    fn measure(&mut self) -> Result<Bme280Sample, String> {
        let cal = self.init()?;

        self.i2c
            .write(self.address, &[BME280_REG_CTRL_HUM, BME280_OSRS_X1])
            .map_err(bus_error)?;
        let ctrl_meas = (BME280_OSRS_X1 << 5) | (BME280_OSRS_X1 << 2) | BME280_MODE_FORCED;
        self.i2c
            .write(self.address, &[BME280_REG_CTRL_MEAS, ctrl_meas])
            .map_err(bus_error)?;
        self.delay.delay_ms(BME280_CONVERSION_MS);

        let mut data = [0u8; 8];
        self.i2c
            .write_read(self.address, &[BME280_REG_DATA], &mut data)
            .map_err(bus_error)?;

        let adc_p = ((data[0] as i32) << 12) | ((data[1] as i32) << 4) | ((data[2] as i32) >> 4);
        let adc_t = ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);
        let adc_h = ((data[6] as i32) << 8) | data[7] as i32;

        Ok(bme280_compensate(&cal, adc_t, adc_p, adc_h))
    }
}

impl<I, D> SensorChip for Bme280<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn kind(&self) -> ChipKind {
        ChipKind::Bme280
    }

    fn read(&mut self, capability: &str) -> Result<f64, String> {
        if !ChipKind::Bme280.supports(capability) {
            return Err(unsupported(ChipKind::Bme280, capability));
        }
        let sample = self.measure()?;
        match capability {
            capabilities::TEMPERATURE => Ok(sample.temperature),
            capabilities::RELATIVE_HUMIDITY | capabilities::HUMIDITY => Ok(sample.humidity),
            capabilities::PRESSURE => Ok(sample.pressure_hpa),
            other => Err(unsupported(ChipKind::Bme280, other)),
        }
    }
}

// ============================================================================
// SHT31
// ============================================================================

/// Single shot, high repeatability, no clock stretching.
const SHT31_MEASURE: [u8; 2] = [0x24, 0x00];
const SHT31_CONVERSION_MS: u32 = 16;

fn sht31_convert(raw_t: u16, raw_h: u16) -> (f64, f64) {
    let temperature = -45.0 + 175.0 * raw_t as f64 / 65535.0;
    let humidity = 100.0 * raw_h as f64 / 65535.0;
    (temperature, humidity.clamp(0.0, 100.0))
}

/// Sensirion SHT31 temperature and humidity sensor.
pub struct Sht31<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Sht31<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    fn measure(&mut self) -> Result<(f64, f64), String> {
        self.i2c
            .write(self.address, &SHT31_MEASURE)
            .map_err(bus_error)?;
        self.delay.delay_ms(SHT31_CONVERSION_MS);

        let mut buf = [0u8; 6];
        self.i2c.read(self.address, &mut buf).map_err(bus_error)?;

        if crc8(&buf[0..2], 0xFF) != buf[2] || crc8(&buf[3..5], 0xFF) != buf[5] {
            return Err("SHT31 checksum mismatch".to_string());
        }

        let raw_t = u16::from_be_bytes([buf[0], buf[1]]);
        let raw_h = u16::from_be_bytes([buf[3], buf[4]]);
        Ok(sht31_convert(raw_t, raw_h))
    }
}

impl<I, D> SensorChip for Sht31<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn kind(&self) -> ChipKind {
        ChipKind::Sht31
    }

    fn read(&mut self, capability: &str) -> Result<f64, String> {
        if !ChipKind::Sht31.supports(capability) {
            return Err(unsupported(ChipKind::Sht31, capability));
        }
        let (temperature, humidity) = self.measure()?;
        if capability == capabilities::TEMPERATURE {
            Ok(temperature)
        } else {
            Ok(humidity)
        }
    }
}

// ============================================================================
// HTU21D
// ============================================================================

/// Trigger temperature measurement, no hold master.
const HTU21D_MEASURE_TEMP: u8 = 0xF3;
/// Trigger humidity measurement, no hold master.
const HTU21D_MEASURE_HUM: u8 = 0xF5;
const HTU21D_TEMP_MS: u32 = 50;
const HTU21D_HUM_MS: u32 = 16;

fn htu21d_temperature(raw: u16) -> f64 {
    -46.85 + 175.72 * (raw & 0xFFFC) as f64 / 65536.0
}

fn htu21d_humidity(raw: u16) -> f64 {
    (-6.0 + 125.0 * (raw & 0xFFFC) as f64 / 65536.0).clamp(0.0, 100.0)
}

/// TE Connectivity HTU21D temperature and humidity sensor.
pub struct Htu21d<I, D> {
    i2c: I,
    delay: D,
    address: u8,
}

impl<I: I2c, D: DelayNs> Htu21d<I, D> {
    pub fn new(i2c: I, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    fn sample(&mut self, command: u8, wait_ms: u32) -> Result<u16, String> {
        self.i2c
            .write(self.address, &[command])
            .map_err(bus_error)?;
        self.delay.delay_ms(wait_ms);

        let mut buf = [0u8; 3];
        self.i2c.read(self.address, &mut buf).map_err(bus_error)?;
        if crc8(&buf[0..2], 0x00) != buf[2] {
            return Err("HTU21D checksum mismatch".to_string());
        }
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }
}

impl<I, D> SensorChip for Htu21d<I, D>
where
    I: I2c + Send,
    D: DelayNs + Send,
{
    fn kind(&self) -> ChipKind {
        ChipKind::Htu21d
    }

    fn read(&mut self, capability: &str) -> Result<f64, String> {
        match capability {
            capabilities::TEMPERATURE => self
                .sample(HTU21D_MEASURE_TEMP, HTU21D_TEMP_MS)
                .map(htu21d_temperature),
            capabilities::RELATIVE_HUMIDITY | capabilities::HUMIDITY => self
                .sample(HTU21D_MEASURE_HUM, HTU21D_HUM_MS)
                .map(htu21d_humidity),
            other => Err(unsupported(ChipKind::Htu21d, other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::i2c::{ErrorKind, ErrorType, NoAcknowledgeSource, Operation};
    use std::collections::VecDeque;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    #[derive(Debug)]
    struct Nack;

    impl embedded_hal::i2c::Error for Nack {
        fn kind(&self) -> ErrorKind {
            ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
        }
    }

    /// Replays queued read payloads and records writes.
    #[derive(Default)]
    struct ScriptedBus {
        reads: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
        nack: bool,
    }

    impl ErrorType for ScriptedBus {
        type Error = Nack;
    }

    impl I2c for ScriptedBus {
        fn transaction(
            &mut self,
            _address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if self.nack {
                return Err(Nack);
            }
            for op in operations {
                match op {
                    Operation::Write(bytes) => self.writes.push(bytes.to_vec()),
                    Operation::Read(buf) => {
                        let data = self.reads.pop_front().unwrap_or_default();
                        buf.copy_from_slice(&data[..buf.len()]);
                    }
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_crc8_reference_vector() {
        // Sensirion datasheet example.
        assert_eq!(crc8(&[0xBE, 0xEF], 0xFF), 0x92);
    }

    #[test]
    fn test_sht31_read() {
        let raw_t: u16 = 0x6666;
        let raw_h: u16 = 0x8000;
        let t = raw_t.to_be_bytes();
        let h = raw_h.to_be_bytes();
        let payload = vec![t[0], t[1], crc8(&t, 0xFF), h[0], h[1], crc8(&h, 0xFF)];

        let bus = ScriptedBus {
            reads: VecDeque::from(vec![payload]),
            ..Default::default()
        };
        let mut chip = Sht31::new(bus, NoDelay, 0x44);
        let temperature = chip.read("temperature").unwrap();
        assert!((temperature - 25.0).abs() < 0.01);
        assert_eq!(chip.i2c.writes[0], SHT31_MEASURE.to_vec());
    }

    #[test]
    fn test_sht31_checksum_mismatch() {
        let bus = ScriptedBus {
            reads: VecDeque::from(vec![vec![0x66, 0x66, 0x00, 0x80, 0x00, 0x00]]),
            ..Default::default()
        };
        let mut chip = Sht31::new(bus, NoDelay, 0x44);
        assert!(chip.read("humidity").unwrap_err().contains("checksum"));
    }

    #[test]
    fn test_sht31_rejects_pressure() {
        let mut chip = Sht31::new(ScriptedBus::default(), NoDelay, 0x44);
        assert!(chip.read("pressure").is_err());
        assert!(chip.i2c.writes.is_empty());
    }

    #[test]
    fn test_htu21d_humidity() {
        let raw: u16 = 0x7C80;
        let bytes = raw.to_be_bytes();
        let bus = ScriptedBus {
            reads: VecDeque::from(vec![vec![bytes[0], bytes[1], crc8(&bytes, 0x00)]]),
            ..Default::default()
        };
        let mut chip = Htu21d::new(bus, NoDelay, 0x40);
        let humidity = chip.read("relative_humidity").unwrap();
        assert!((humidity - 54.79).abs() < 0.01);
        assert_eq!(chip.i2c.writes[0], vec![HTU21D_MEASURE_HUM]);
    }

    #[test]
    fn test_htu21d_temperature_conversion() {
        assert!((htu21d_temperature(0x683A) - 24.69).abs() < 0.01);
    }

    #[test]
    fn test_bus_error_propagates() {
        let bus = ScriptedBus {
            nack: true,
            ..Default::default()
        };
        let mut chip = Htu21d::new(bus, NoDelay, 0x40);
        assert!(chip.read("temperature").unwrap_err().starts_with("i2c:"));
    }

    #[test]
    fn test_bme280_wrong_chip_id() {
        let bus = ScriptedBus {
            reads: VecDeque::from(vec![vec![0x58]]),
            ..Default::default()
        };
        let mut chip = Bme280::new(bus, NoDelay, 0x76);
        assert!(chip.read("temperature").unwrap_err().contains("chip id"));
    }

    #[test]
    fn test_bme280_compensation_datasheet_values() {
        // Trimming values and ADC readings from the Bosch reference driver
        // test data.
        let cal = Bme280Calibration {
            t1: 27504,
            t2: 26435,
            t3: -1000,
            p1: 36477,
            p2: -10685,
            p3: 3024,
            p4: 2855,
            p5: 140,
            p6: -7,
            p7: 15500,
            p8: -14600,
            p9: 6000,
            ..Default::default()
        };
        let sample = bme280_compensate(&cal, 519888, 415148, 0);
        assert!((sample.temperature - 25.08).abs() < 0.01);
        assert!((sample.pressure_hpa - 1006.53).abs() < 0.05);
    }
}
