//! `serialport`-backed implementation of [`SerialLink`] and port enumeration.

use std::io::{self, Read, Write};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tracing::debug;

use super::{ConnectionError, LinkOpener, LinkSettings, SerialLink};

/// Opens real serial devices at 8N1 without flow control.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialportOpener;

impl LinkOpener for SerialportOpener {
    fn open(
        &self,
        device: &str,
        settings: &LinkSettings,
    ) -> Result<Box<dyn SerialLink>, serialport::Error> {
        let port = serialport::new(device, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()?;
        debug!("opened {device} at {} baud", settings.baud_rate);
        Ok(Box::new(SerialportLink { port }))
    }
}

/// A link over an open `serialport` handle.
struct SerialportLink {
    port: Box<dyn SerialPort>,
}

impl SerialLink for SerialportLink {
    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.port.read(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(line)
    }

    fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

/// A serial port present on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Name to pass to `connect`, e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Human-readable description of the adapter.
    pub description: String,
}

/// Lists the serial ports currently present.
///
/// # Errors
///
/// Returns [`ConnectionError::Enumerate`] if the OS query fails.
pub fn available_ports() -> Result<Vec<PortInfo>, ConnectionError> {
    let ports = serialport::available_ports().map_err(ConnectionError::Enumerate)?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb
                .product
                .as_deref()
                .or(usb.manufacturer.as_deref())
                .unwrap_or("USB serial adapter");
            format!("{product} [{:04x}:{:04x}]", usb.vid, usb.pid)
        }
        SerialPortType::PciPort => "PCI serial port".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial port".to_string(),
        SerialPortType::Unknown => "serial port".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port_prefers_product_name() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: None,
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R USB UART".to_string()),
        });
        assert_eq!(describe(&usb), "FT232R USB UART [0403:6001]");
    }

    #[test]
    fn test_describe_usb_port_falls_back_to_manufacturer() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x067b,
            pid: 0x2303,
            serial_number: None,
            manufacturer: Some("Prolific".to_string()),
            product: None,
        });
        assert_eq!(describe(&usb), "Prolific [067b:2303]");
    }

    #[test]
    fn test_describe_non_usb_ports() {
        assert_eq!(describe(&SerialPortType::PciPort), "PCI serial port");
        assert_eq!(describe(&SerialPortType::Unknown), "serial port");
    }
}
