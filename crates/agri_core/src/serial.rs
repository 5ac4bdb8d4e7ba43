//! Transporte real via crate `serialport`.

use crate::board::PortInfo;
use crate::link::{ConnectOptions, LinkError, PortProvider, SerialDevice};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Prazo total de uma escrita; a porta usa o timeout curto da leitura.
const WRITE_DEADLINE: Duration = Duration::from_secs(2);

/// Enumera portas do sistema e entrega handles [`SerialPortDevice`].
pub struct SerialPortProvider {
    read_poll: Duration,
}

impl SerialPortProvider {
    /// `read_poll` é o timeout de cada leitura bloqueante; serve apenas para
    /// a thread de leitura checar o cancelamento.
    pub fn new(read_poll: Duration) -> Self {
        Self { read_poll }
    }
}

fn port_info(port: SerialPortInfo) -> PortInfo {
    match port.port_type {
        SerialPortType::UsbPort(usb) => PortInfo {
            name: port.port_name,
            vendor_id: Some(usb.vid),
            product_id: Some(usb.pid),
            manufacturer: usb.manufacturer,
            product: usb.product,
            serial_number: usb.serial_number,
        },
        _ => PortInfo {
            name: port.port_name,
            ..Default::default()
        },
    }
}

impl PortProvider for SerialPortProvider {
    fn request(&mut self, options: &ConnectOptions) -> Result<Box<dyn SerialDevice>, LinkError> {
        let ports = serialport::available_ports();

        let info = match &options.port_name {
            Some(name) => {
                // Porta explícita: metadados USB são só um bônus
                let found = ports
                    .ok()
                    .and_then(|ports| ports.into_iter().find(|p| &p.port_name == name));
                found.map(port_info).unwrap_or_else(|| PortInfo {
                    name: name.clone(),
                    ..Default::default()
                })
            }
            None => {
                let ports = ports.map_err(|e| LinkError::Unsupported(e.to_string()))?;
                debug!("{} portas serial encontradas", ports.len());
                ports
                    .into_iter()
                    .map(port_info)
                    .find(|p| match p.vendor_id {
                        Some(vid) => options.vendor_ids.is_empty() || options.vendor_ids.contains(&vid),
                        None => false,
                    })
                    .ok_or(LinkError::NoDevice)?
            }
        };

        info!(
            "Porta concedida: {} (VID {:?} PID {:?} {:?})",
            info.name, info.vendor_id, info.product_id, info.product
        );
        Ok(Box::new(SerialPortDevice {
            info,
            read_poll: self.read_poll,
            port: None,
        }))
    }
}

/// Handle de uma porta serial; reabrível com outro baud rate.
pub struct SerialPortDevice {
    info: PortInfo,
    read_poll: Duration,
    port: Option<Box<dyn SerialPort>>,
}

/// Lado de leitura (clone do handle) entregue à thread de leitura.
struct PortReader(Box<dyn SerialPort>);

impl Read for PortReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

/// `write_all` que tolera `TimedOut` parciais até `deadline`.
fn write_with_deadline<W: Write + ?Sized>(port: &mut W, mut data: &[u8], deadline: Duration) -> io::Result<()> {
    let started = Instant::now();
    while !data.is_empty() {
        match port.write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut && started.elapsed() < deadline => {
                debug!("Escrita serial lenta, tentando de novo ({} bytes pendentes)", data.len());
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn not_open() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "porta serial não está aberta")
}

impl SerialDevice for SerialPortDevice {
    fn info(&self) -> &PortInfo {
        &self.info
    }

    fn open(&mut self, baud_rate: u32) -> io::Result<()> {
        self.port = None;
        let port = serialport::new(&self.info.name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(self.read_poll)
            .open()?;
        self.port = Some(port);
        Ok(())
    }

    fn reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        let port = self.port.as_ref().ok_or_else(not_open)?;
        Ok(Box::new(PortReader(port.try_clone()?)))
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(not_open)?;
        write_with_deadline(&mut **port, data, WRITE_DEADLINE)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.port.as_mut() {
            Some(port) => port.flush(),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        // Drop fecha o descritor
        self.port = None;
        Ok(())
    }
}
