//! Persistence of permanent bans.
//!
//! The file is a gzip stream of raw 4-byte records, one per permanently
//! banned address, octets in address order. Counters and temporary bans
//! are never persisted: they are cheap to rebuild and short-lived.
//!
//! Writes go to a temp file that is renamed over the target, so a crash
//! mid-save leaves the previous list intact.

use crate::error::BanListError;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{debug, info};

const RECORD_LEN: usize = 4;

/// Write `addrs` to `path`, replacing any existing list.
///
/// The parent directory is created if missing. On failure the temp file is
/// removed and any previous list is left untouched.
pub fn save(path: &Path, addrs: &[Ipv4Addr]) -> Result<(), BanListError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    let temp_path = Path::new(&temp);

    let written = write_records(temp_path, addrs).and_then(|()| {
        // Atomic rename
        fs::rename(temp_path, path).map_err(BanListError::from)
    });
    if let Err(e) = written {
        let _ = fs::remove_file(temp_path);
        return Err(e);
    }

    info!(path = %path.display(), count = addrs.len(), "permanent ban list saved");
    Ok(())
}

fn write_records(temp_path: &Path, addrs: &[Ipv4Addr]) -> Result<(), BanListError> {
    let file = File::create(temp_path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    for addr in addrs {
        encoder.write_all(&addr.octets())?;
    }
    let mut writer = encoder.finish()?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Read a ban list. A missing file is an empty list (first run).
///
/// A stream that fails to decompress, or whose length is not a multiple of
/// four bytes, is an error; whether startup continues without it is the
/// caller's decision.
pub fn load(path: &Path) -> Result<Vec<Ipv4Addr>, BanListError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "ban list file not found, starting empty");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut raw = Vec::new();
    GzDecoder::new(BufReader::new(file)).read_to_end(&mut raw)?;
    let addrs = decode_records(&raw)?;

    debug!(path = %path.display(), count = addrs.len(), "permanent ban list read");
    Ok(addrs)
}

fn decode_records(raw: &[u8]) -> Result<Vec<Ipv4Addr>, BanListError> {
    if raw.len() % RECORD_LEN != 0 {
        return Err(BanListError::Truncated { len: raw.len() });
    }
    Ok(raw
        .chunks_exact(RECORD_LEN)
        .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
        .collect())
}
