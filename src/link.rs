//! Actuator link transports.
//!
//! The notifier only needs `std::io::Write`. This module opens the concrete
//! transport named by the link target string:
//!
//! - `-` or `stdout`: standard output (dry runs)
//! - `tcp://host:port`: raw TCP socket
//! - `mqtt://host[:port]/topic`: each flushed line is published to `topic`
//! - anything else: a serial device path (`/dev/ttyUSB0`, `COM5`)
//!
//! Links are opened once at startup and released when dropped.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{Client, Connection, Event, MqttOptions};
use url::Url;

use crate::config::LinkSettings;

const TCP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_TOPIC: &str = "vision-relay/label";
const MQTT_CLIENT_PREFIX: &str = "vision-relay";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkTarget {
    Stdout,
    Tcp(String),
    Mqtt { host: String, port: u16, topic: String },
    Serial(PathBuf),
}

impl LinkTarget {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(anyhow!("link target must not be empty"));
        }
        if raw == "-" || raw.eq_ignore_ascii_case("stdout") {
            return Ok(LinkTarget::Stdout);
        }
        if let Some(addr) = raw.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(anyhow!("tcp link target missing host:port"));
            }
            return Ok(LinkTarget::Tcp(addr.trim_end_matches('/').to_string()));
        }
        if raw.starts_with("mqtt://") {
            let url = Url::parse(raw).context("parse mqtt link url")?;
            let host = url
                .host_str()
                .ok_or_else(|| anyhow!("mqtt link url missing host"))?
                .to_string();
            let topic = url.path().trim_start_matches('/');
            let topic = if topic.is_empty() {
                DEFAULT_MQTT_TOPIC.to_string()
            } else {
                topic.to_string()
            };
            return Ok(LinkTarget::Mqtt {
                host,
                port: url.port().unwrap_or(DEFAULT_MQTT_PORT),
                topic,
            });
        }
        Ok(LinkTarget::Serial(PathBuf::from(raw)))
    }
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Stdout => write!(f, "stdout"),
            LinkTarget::Tcp(addr) => write!(f, "tcp://{}", addr),
            LinkTarget::Mqtt { host, port, topic } => {
                write!(f, "mqtt://{}:{}/{}", host, port, topic)
            }
            LinkTarget::Serial(path) => write!(f, "serial:{}", path.display()),
        }
    }
}

/// Open the link described by `settings`. Failure here is fatal.
pub fn open_link(settings: &LinkSettings) -> Result<Box<dyn Write + Send>> {
    let target = LinkTarget::parse(&settings.target)?;
    let link: Box<dyn Write + Send> = match &target {
        LinkTarget::Stdout => Box::new(io::stdout()),
        LinkTarget::Tcp(addr) => Box::new(open_tcp(addr)?),
        LinkTarget::Mqtt { host, port, topic } => Box::new(MqttLink::connect(host, *port, topic)?),
        LinkTarget::Serial(path) => {
            let file = open_serial(path, settings.baud)?;
            if !settings.settle.is_zero() {
                // Opening the port resets ESP32 boards; give them time to boot.
                log::info!(
                    "waiting {}ms for device on {} to settle",
                    settings.settle.as_millis(),
                    path.display()
                );
                std::thread::sleep(settings.settle);
            }
            Box::new(file)
        }
    };
    log::info!("actuator link open: {}", target);
    Ok(link)
}

fn open_tcp(addr: &str) -> Result<TcpStream> {
    let socket_addr = addr
        .to_socket_addrs()
        .with_context(|| format!("resolve tcp link {}", addr))?
        .next()
        .ok_or_else(|| anyhow!("tcp link {} resolved to no address", addr))?;
    let stream = TcpStream::connect_timeout(&socket_addr, TCP_TIMEOUT)
        .with_context(|| format!("connect tcp link {}", addr))?;
    stream
        .set_write_timeout(Some(TCP_TIMEOUT))
        .context("set tcp write timeout")?;
    stream.set_nodelay(true).context("set tcp nodelay")?;
    Ok(stream)
}

fn open_serial(path: &std::path::Path, baud: u32) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("failed to open serial device {}", path.display()))?;
    configure_serial(&file, baud)
        .with_context(|| format!("failed to configure serial device {}", path.display()))?;
    Ok(file)
}

/// Put a tty into raw mode at `baud`. Non-tty files (plain files, FIFOs) are
/// left as they are.
#[cfg(target_os = "linux")]
fn configure_serial(file: &File, baud: u32) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let speed = match baud {
        9_600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        230_400 => libc::B230400,
        460_800 => libc::B460800,
        921_600 => libc::B921600,
        other => return Err(anyhow!("unsupported baud rate {}", other)),
    };
    let fd = file.as_raw_fd();
    // SAFETY: `fd` stays open for the duration of this call (borrowed from
    // `file`), and `termios` is a plain C struct initialised by tcgetattr.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOTTY) {
                log::debug!("link is not a tty; skipping line configuration");
                return Ok(());
            }
            return Err(err).context("tcgetattr");
        }
        libc::cfmakeraw(&mut tio);
        if libc::cfsetspeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error()).context("cfsetspeed");
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error()).context("tcsetattr");
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn configure_serial(_file: &File, baud: u32) -> Result<()> {
    log::warn!(
        "serial line settings are not applied on this platform; configure {} baud externally",
        baud
    );
    Ok(())
}

// ----------------------------------------------------------------------------
// MQTT link
// ----------------------------------------------------------------------------

/// Line-oriented MQTT publisher. Bytes accumulate until `flush`, which
/// publishes every complete line as one message (newline stripped).
///
/// `flush` fails while the broker connection is down, so the notifier keeps
/// the label pending and retries on the next confident frame.
pub struct MqttLink {
    client: Option<Client>,
    topic: String,
    pending: Vec<u8>,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    connection_handle: Option<std::thread::JoinHandle<()>>,
}

impl MqttLink {
    pub fn connect(host: &str, port: u16, topic: &str) -> Result<Self> {
        if topic.is_empty() {
            return Err(anyhow!("mqtt topic must not be empty"));
        }
        let client_id = format!("{}-{:04x}", MQTT_CLIENT_PREFIX, rand::random::<u16>());
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        let connected = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));
        let handle = spawn_connection(connection, connected.clone(), stopping.clone());

        Ok(Self {
            client: Some(client),
            topic: topic.to_string(),
            pending: Vec::new(),
            connected,
            stopping,
            connection_handle: Some(handle),
        })
    }

    fn publish_line(&self, line: &[u8]) -> io::Result<()> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "mqtt link closed"))?;
        if !self.connected.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "mqtt broker not connected",
            ));
        }
        client
            .try_publish(self.topic.clone(), QoS::AtLeastOnce, false, line.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))
    }
}

impl Write for MqttLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line = self.pending[..pos].to_vec();
            if let Err(err) = self.publish_line(&line) {
                // Drop the unsent line; the notifier resends it whole.
                self.pending.clear();
                return Err(err);
            }
            self.pending.drain(..=pos);
        }
        Ok(())
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            if let Err(e) = client.disconnect() {
                log::debug!("mqtt disconnect failed: {}", e);
            }
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
        log::info!("mqtt link to topic {} closed", self.topic);
    }
}

fn spawn_connection(
    mut connection: Connection,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected.store(true, Ordering::SeqCst);
                    log::info!("mqtt broker connected");
                }
                Ok(_) => {}
                Err(e) => {
                    connected.store(false, Ordering::SeqCst);
                    if stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    log::warn!("mqtt connection error: {}", e);
                    std::thread::sleep(Duration::from_secs(1));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn parses_link_targets() {
        assert_eq!(LinkTarget::parse("-").unwrap(), LinkTarget::Stdout);
        assert_eq!(
            LinkTarget::parse("tcp://127.0.0.1:7000").unwrap(),
            LinkTarget::Tcp("127.0.0.1:7000".to_string())
        );
        assert_eq!(
            LinkTarget::parse("mqtt://broker.local/senai/iot/formas").unwrap(),
            LinkTarget::Mqtt {
                host: "broker.local".to_string(),
                port: 1883,
                topic: "senai/iot/formas".to_string(),
            }
        );
        assert_eq!(
            LinkTarget::parse("/dev/ttyUSB0").unwrap(),
            LinkTarget::Serial(PathBuf::from("/dev/ttyUSB0"))
        );
        assert!(LinkTarget::parse("  ").is_err());
        assert!(LinkTarget::parse("tcp://").is_err());
    }

    #[test]
    fn serial_path_accepts_plain_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let settings = LinkSettings {
            target: file.path().display().to_string(),
            baud: 115_200,
            settle: Duration::ZERO,
        };
        let mut link = open_link(&settings).unwrap();
        link.write_all(b"Circulo\n").unwrap();
        link.flush().unwrap();
        drop(link);
        assert_eq!(std::fs::read_to_string(file.path()).unwrap(), "Circulo\n");
    }

    #[test]
    fn tcp_link_delivers_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let reader = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(stream).read_line(&mut line).unwrap();
            line
        });

        let settings = LinkSettings {
            target: format!("tcp://{}", addr),
            baud: 115_200,
            settle: Duration::ZERO,
        };
        let mut link = open_link(&settings).unwrap();
        link.write_all(b"Quadrado\n").unwrap();
        link.flush().unwrap();
        assert_eq!(reader.join().unwrap(), "Quadrado\n");
    }

    #[test]
    fn missing_serial_device_is_fatal() {
        let settings = LinkSettings {
            target: "/nonexistent/ttyVR0".to_string(),
            baud: 115_200,
            settle: Duration::ZERO,
        };
        assert!(open_link(&settings).is_err());
    }
}
