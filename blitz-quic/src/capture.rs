//! Optional per-connection diagnostic capture (spec §4.8/5): packet log,
//! key log, and a text summary written to `captures/<dcid-hex>/` when
//! enabled via `--capture`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub struct Capture {
    dir: PathBuf,
    packets: File,
    keys: File,
}

impl Capture {
    pub fn open(captures_root: &Path, dcid: &[u8]) -> io::Result<Self> {
        let hex: String = dcid.iter().map(|b| format!("{b:02x}")).collect();
        let dir = captures_root.join(hex);
        fs::create_dir_all(&dir)?;
        let packets = File::create(dir.join("packets.log"))?;
        let keys = File::create(dir.join("keys.log"))?;
        Ok(Self { dir, packets, keys })
    }

    pub fn log_packet(&mut self, direction: &str, packet_number: u64, len: usize) -> io::Result<()> {
        writeln!(self.packets, "{direction} pn={packet_number} len={len}")
    }

    pub fn log_key(&mut self, label: &str, epoch: &str) -> io::Result<()> {
        writeln!(self.keys, "{label} epoch={epoch}")
    }

    pub fn write_summary(&self, text: &str) -> io::Result<()> {
        fs::write(self.dir.join("summary.txt"), text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_per_connection_files() {
        let tmp = std::env::temp_dir().join(format!("blitz-quic-capture-test-{:p}", &0));
        let mut cap = Capture::open(&tmp, b"\x01\x02\x03").unwrap();
        cap.log_packet("rx", 0, 1200).unwrap();
        cap.log_key("client_initial", "initial").unwrap();
        cap.write_summary("handshake complete").unwrap();
        assert!(cap.dir.join("packets.log").exists());
        assert!(cap.dir.join("keys.log").exists());
        assert!(cap.dir.join("summary.txt").exists());
        let _ = fs::remove_dir_all(&tmp);
    }
}
