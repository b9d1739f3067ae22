use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::SerialPort;

/// A byte stream to the vehicle. One handle is written by the control side,
/// a cloned handle is read by the receive loop.
pub trait LinkPort: Read + Write + Send {
    //bytes waiting in the input buffer
    fn bytes_to_read(&self) -> io::Result<u32>;

    fn try_clone_port(&self) -> io::Result<Box<dyn LinkPort>>;
}

/// Enumerates and opens ports.
pub trait PortOpener: Send + Sync {
    fn list_ports(&self) -> Vec<String>;

    fn open(&self, port: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn LinkPort>>;
}

impl LinkPort for Box<dyn SerialPort> {
    fn bytes_to_read(&self) -> io::Result<u32> {
        SerialPort::bytes_to_read(&**self).map_err(io::Error::from)
    }

    fn try_clone_port(&self) -> io::Result<Box<dyn LinkPort>> {
        let clone = SerialPort::try_clone(&**self).map_err(io::Error::from)?;
        Ok(Box::new(clone))
    }
}

/// Real serial ports through the `serialport` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialOpener;

impl PortOpener for SerialOpener {
    fn list_ports(&self) -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }

    fn open(&self, port: &str, baud: u32, timeout: Duration) -> io::Result<Box<dyn LinkPort>> {
        let port = serialport::new(port, baud)
            .timeout(timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(port))
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Both ends of an in-memory serial line.
    #[derive(Clone, Default)]
    pub struct MockWire {
        pub rx: Arc<Mutex<VecDeque<u8>>>, //vehicle -> station
        pub tx: Arc<Mutex<Vec<u8>>>,      //station -> vehicle
        pub fail_read: Arc<AtomicBool>,
        pub fail_write: Arc<AtomicBool>,
        pub open_handles: Arc<AtomicUsize>,
    }

    impl MockWire {
        pub fn feed(&self, data: &[u8]) {
            self.rx.lock().unwrap().extend(data.iter().copied());
        }

        pub fn written(&self) -> String {
            String::from_utf8_lossy(&self.tx.lock().unwrap()).into_owned()
        }

        pub fn open_handles(&self) -> usize {
            self.open_handles.load(Ordering::SeqCst)
        }
    }

    pub struct MockPort {
        wire: MockWire,
    }

    impl MockPort {
        fn new(wire: MockWire) -> Self {
            wire.open_handles.fetch_add(1, Ordering::SeqCst);
            MockPort { wire }
        }
    }

    impl Drop for MockPort {
        fn drop(&mut self) {
            self.wire.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.wire.fail_read.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            let mut rx = self.wire.rx.lock().unwrap();
            if rx.is_empty() {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(rx.len());
            for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.wire.fail_write.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            self.wire.tx.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LinkPort for MockPort {
        fn bytes_to_read(&self) -> io::Result<u32> {
            if self.wire.fail_read.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
            Ok(self.wire.rx.lock().unwrap().len() as u32)
        }

        fn try_clone_port(&self) -> io::Result<Box<dyn LinkPort>> {
            Ok(Box::new(MockPort::new(self.wire.clone())))
        }
    }

    #[derive(Clone, Default)]
    pub struct MockOpener {
        pub wire: MockWire,
        pub ports: Vec<String>,
        pub refuse: Arc<AtomicBool>,
    }

    impl MockOpener {
        pub fn new() -> Self {
            MockOpener {
                ports: vec!["/dev/ttyUSB0".to_string()],
                ..Default::default()
            }
        }
    }

    impl PortOpener for MockOpener {
        fn list_ports(&self) -> Vec<String> {
            self.ports.clone()
        }

        fn open(&self, port: &str, _baud: u32, _timeout: Duration) -> io::Result<Box<dyn LinkPort>> {
            if self.refuse.load(Ordering::SeqCst) || !self.ports.iter().any(|p| p == port) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            Ok(Box::new(MockPort::new(self.wire.clone())))
        }
    }
}
