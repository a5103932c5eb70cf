//! rtptools `rtpdump` file writer
//!
//! ```text
//! #!rtpplay1.0 <address>/<port>\n
//! start.sec u32 | start.usec u32 | source u32 | port u16 | pad u16
//! { length u16 | plen u16 | offset_ms u32 | packet bytes } *
//! ```
//!
//! All integers are big-endian. `length` counts the 8-byte per-packet
//! header plus the packet; `plen` is the RTP packet length.

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddrV4;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::{Error, Result};

const PACKET_HEADER_LEN: usize = 8;

/// Largest RTP packet that fits a record
pub const MAX_PACKET_LEN: usize = u16::MAX as usize - PACKET_HEADER_LEN;

/// Encode the text line and binary file header
pub fn encode_file_header(start: SystemTime, source: SocketAddrV4) -> Bytes {
    let since_epoch = start.duration_since(UNIX_EPOCH).unwrap_or_default();
    let line = format!("#!rtpplay1.0 {}/{}\n", source.ip(), source.port());

    let mut buf = BytesMut::with_capacity(line.len() + 16);
    buf.put_slice(line.as_bytes());
    buf.put_u32(since_epoch.as_secs() as u32);
    buf.put_u32(since_epoch.subsec_micros());
    buf.put_u32(u32::from(*source.ip()));
    buf.put_u16(source.port());
    buf.put_u16(0);
    buf.freeze()
}

/// Encode one packet record
pub fn encode_packet(offset: Duration, packet: &[u8]) -> Result<Bytes> {
    if packet.len() > MAX_PACKET_LEN {
        return Err(Error::ResourceError(format!(
            "RTP packet of {} bytes exceeds rtpdump record limit",
            packet.len()
        )));
    }

    let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + packet.len());
    buf.put_u16((PACKET_HEADER_LEN + packet.len()) as u16);
    buf.put_u16(packet.len() as u16);
    buf.put_u32(offset.as_millis() as u32);
    buf.put_slice(packet);
    Ok(buf.freeze())
}

/// Streaming writer for a single rtpdump file
pub struct RtpDumpWriter {
    out: BufWriter<File>,
    started: tokio::time::Instant,
    packets: u64,
}

impl RtpDumpWriter {
    /// Create `path` (and missing parent directories) and write the header
    pub async fn create(path: &Path, source: SocketAddrV4) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = File::create(path).await?;
        let mut out = BufWriter::new(file);
        out.write_all(&encode_file_header(SystemTime::now(), source))
            .await?;
        Ok(Self {
            out,
            started: tokio::time::Instant::now(),
            packets: 0,
        })
    }

    /// Append one RTP packet, timestamped relative to file creation
    pub async fn write_packet(&mut self, packet: &[u8]) -> Result<()> {
        let record = encode_packet(self.started.elapsed(), packet)?;
        self.out.write_all(&record).await?;
        self.packets += 1;
        Ok(())
    }

    pub fn packets_written(&self) -> u64 {
        self.packets
    }

    /// Flush buffered records and sync the file to disk
    pub async fn finish(mut self) -> Result<u64> {
        self.out.flush().await?;
        self.out.get_mut().sync_all().await?;
        Ok(self.packets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_file_header_layout() {
        let start = UNIX_EPOCH + Duration::new(1_700_000_000, 250_000_000);
        let source = SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, 1), 9002);
        let header = encode_file_header(start, source);

        let line = b"#!rtpplay1.0 127.0.0.1/9002\n";
        assert_eq!(&header[..line.len()], line);
        let bin = &header[line.len()..];
        assert_eq!(bin.len(), 16);
        assert_eq!(u32::from_be_bytes(bin[0..4].try_into().unwrap()), 1_700_000_000);
        assert_eq!(u32::from_be_bytes(bin[4..8].try_into().unwrap()), 250_000);
        assert_eq!(&bin[8..12], &[127, 0, 0, 1]);
        assert_eq!(u16::from_be_bytes(bin[12..14].try_into().unwrap()), 9002);
        assert_eq!(&bin[14..16], &[0, 0]);
    }

    #[test]
    fn test_packet_record_layout() {
        let record = encode_packet(Duration::from_millis(1500), &[0x80, 0x60, 0x00, 0x01]).unwrap();
        assert_eq!(record.len(), 12);
        assert_eq!(u16::from_be_bytes([record[0], record[1]]), 12);
        assert_eq!(u16::from_be_bytes([record[2], record[3]]), 4);
        assert_eq!(
            u32::from_be_bytes([record[4], record[5], record[6], record[7]]),
            1500
        );
        assert_eq!(&record[8..], &[0x80, 0x60, 0x00, 0x01]);
    }

    #[test]
    fn test_oversized_packet_rejected() {
        let packet = vec![0u8; MAX_PACKET_LEN + 1];
        assert!(encode_packet(Duration::ZERO, &packet).is_err());
        let packet = vec![0u8; MAX_PACKET_LEN];
        assert!(encode_packet(Duration::ZERO, &packet).is_ok());
    }

    #[tokio::test]
    async fn test_writer_creates_parent_and_counts_packets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("camera.rtpdump");
        let source = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);

        let mut writer = RtpDumpWriter::create(&path, source).await.unwrap();
        writer.write_packet(&[1, 2, 3]).await.unwrap();
        writer.write_packet(&[4, 5]).await.unwrap();
        assert_eq!(writer.finish().await.unwrap(), 2);

        let bytes = std::fs::read(&path).unwrap();
        let header_len = "#!rtpplay1.0 127.0.0.1/0\n".len() + 16;
        assert_eq!(bytes.len(), header_len + (8 + 3) + (8 + 2));
    }
}
