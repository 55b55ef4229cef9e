//! Binary event file format.
//!
//! Layout (all numbers little-endian):
//! ```text
//! file    := MAGIC(4) VERSION(u32) event*
//! event   := EVENT number(u64) record* EVENT_END
//! record  := CALO_HIT hit | TRACK track | TRACK_RELATION relation
//! ```
//! Every record starts with a one-byte tag followed by fixed-width fields.

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::source::EventSource;
use crate::types::{CaloHitRecord, EventRecord, HitKind, TrackRecord, TrackRelation};
use crate::EnvError;

/// Leading integrity tag of every event file.
pub const FILE_MAGIC: [u8; 4] = *b"CFEV";

/// Current layout version.
pub const FORMAT_VERSION: u32 = 1;

const TAG_EVENT: u8 = 0x01;
const TAG_EVENT_END: u8 = 0x02;
const TAG_CALO_HIT: u8 = 0x10;
const TAG_TRACK: u8 = 0x11;
const TAG_TRACK_RELATION: u8 = 0x12;

const RELATION_PARENT_DAUGHTER: u8 = 0;
const RELATION_SIBLINGS: u8 = 1;

// ============================================================================
// WRITER
// ============================================================================

/// Writes events in the binary layout described above.
pub struct EventFileWriter<W: Write> {
    inner: W,
    events_written: u64,
}

impl EventFileWriter<BufWriter<File>> {
    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> EventFileWriter<W> {
    /// Wraps a writer and emits the integrity tag.
    pub fn new(mut inner: W) -> Result<Self, EnvError> {
        inner.write_all(&FILE_MAGIC)?;
        inner.write_all(&FORMAT_VERSION.to_le_bytes())?;
        Ok(Self {
            inner,
            events_written: 0,
        })
    }

    pub fn write_event(&mut self, event: &EventRecord) -> Result<(), EnvError> {
        let w = &mut self.inner;
        w.write_all(&[TAG_EVENT])?;
        w.write_all(&event.number.to_le_bytes())?;

        for hit in &event.calo_hits {
            w.write_all(&[TAG_CALO_HIT])?;
            write_vec3(w, &hit.position)?;
            write_vec3(w, &hit.expected_direction)?;
            for value in [
                hit.cell_size,
                hit.input_energy,
                hit.em_energy,
                hit.hadronic_energy,
                hit.mip_equivalent_energy,
            ] {
                w.write_all(&value.to_le_bytes())?;
            }
            w.write_all(&hit.layer.to_le_bytes())?;
            w.write_all(&[hit.kind.code()])?;
            w.write_all(&hit.time.to_le_bytes())?;
        }

        for track in &event.tracks {
            w.write_all(&[TAG_TRACK])?;
            w.write_all(&track.id.to_le_bytes())?;
            w.write_all(&track.d0.to_le_bytes())?;
            w.write_all(&track.z0.to_le_bytes())?;
            w.write_all(&track.charge.to_le_bytes())?;
            w.write_all(&track.mass.to_le_bytes())?;
            write_vec3(w, &track.momentum_at_dca)?;
            write_vec3(w, &track.calorimeter_position)?;
            write_vec3(w, &track.calorimeter_momentum)?;
            w.write_all(&[track.reaches_calorimeter as u8, track.can_form_pfo as u8])?;
        }

        for relation in &event.relations {
            let (kind, a, b) = match *relation {
                TrackRelation::ParentDaughter(a, b) => (RELATION_PARENT_DAUGHTER, a, b),
                TrackRelation::Siblings(a, b) => (RELATION_SIBLINGS, a, b),
            };
            w.write_all(&[TAG_TRACK_RELATION, kind])?;
            w.write_all(&a.to_le_bytes())?;
            w.write_all(&b.to_le_bytes())?;
        }

        w.write_all(&[TAG_EVENT_END])?;
        self.events_written += 1;
        Ok(())
    }

    pub fn events_written(&self) -> u64 {
        self.events_written
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> Result<W, EnvError> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

fn write_vec3<W: Write>(w: &mut W, v: &[f64; 3]) -> Result<(), EnvError> {
    for c in v {
        w.write_all(&c.to_le_bytes())?;
    }
    Ok(())
}

// ============================================================================
// READER
// ============================================================================

/// Reads events written by `EventFileWriter`.
pub struct EventFileReader<R: Read> {
    inner: R,
    events_read: u64,
}

impl EventFileReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EnvError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> EventFileReader<R> {
    /// Wraps a reader and checks the integrity tag.
    pub fn new(mut inner: R) -> Result<Self, EnvError> {
        let mut magic = [0u8; 4];
        inner.read_exact(&mut magic)?;
        if magic != FILE_MAGIC {
            return Err(EnvError::format(format!("bad magic {:02x?}", magic)));
        }
        let version = read_u32(&mut inner)?;
        if version != FORMAT_VERSION {
            return Err(EnvError::format(format!(
                "unsupported version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }
        Ok(Self {
            inner,
            events_read: 0,
        })
    }

    pub fn events_read(&self) -> u64 {
        self.events_read
    }

    /// Reads the next event; `Ok(None)` at a clean end of file.
    pub fn read_event(&mut self) -> Result<Option<EventRecord>, EnvError> {
        let tag = match read_tag(&mut self.inner)? {
            Some(tag) => tag,
            None => return Ok(None),
        };
        if tag != TAG_EVENT {
            return Err(EnvError::format(format!("expected EVENT, found tag {:#04x}", tag)));
        }

        let mut event = EventRecord::new(read_u64(&mut self.inner)?);
        loop {
            let tag = read_tag(&mut self.inner)?
                .ok_or_else(|| EnvError::format("truncated event: missing EVENT_END"))?;
            match tag {
                TAG_EVENT_END => break,
                TAG_CALO_HIT => event.calo_hits.push(self.read_calo_hit()?),
                TAG_TRACK => event.tracks.push(self.read_track()?),
                TAG_TRACK_RELATION => event.relations.push(self.read_relation()?),
                other => {
                    return Err(EnvError::format(format!("unknown record tag {:#04x}", other)))
                }
            }
        }

        self.events_read += 1;
        Ok(Some(event))
    }

    fn read_calo_hit(&mut self) -> Result<CaloHitRecord, EnvError> {
        let r = &mut self.inner;
        let position = read_vec3(r)?;
        let expected_direction = read_vec3(r)?;
        let cell_size = read_f64(r)?;
        let input_energy = read_f64(r)?;
        let em_energy = read_f64(r)?;
        let hadronic_energy = read_f64(r)?;
        let mip_equivalent_energy = read_f64(r)?;
        let layer = read_u32(r)?;
        let code = read_u8(r)?;
        let kind = HitKind::from_code(code)
            .ok_or_else(|| EnvError::format(format!("unknown hit kind {}", code)))?;
        let time = read_f64(r)?;
        Ok(CaloHitRecord {
            position,
            expected_direction,
            cell_size,
            input_energy,
            em_energy,
            hadronic_energy,
            mip_equivalent_energy,
            layer,
            kind,
            time,
        })
    }

    fn read_track(&mut self) -> Result<TrackRecord, EnvError> {
        let r = &mut self.inner;
        let id = read_u64(r)?;
        let d0 = read_f64(r)?;
        let z0 = read_f64(r)?;
        let mut charge = [0u8; 4];
        r.read_exact(&mut charge)?;
        let mass = read_f64(r)?;
        let momentum_at_dca = read_vec3(r)?;
        let calorimeter_position = read_vec3(r)?;
        let calorimeter_momentum = read_vec3(r)?;
        let reaches_calorimeter = read_u8(r)? != 0;
        let can_form_pfo = read_u8(r)? != 0;
        Ok(TrackRecord {
            id,
            d0,
            z0,
            charge: i32::from_le_bytes(charge),
            mass,
            momentum_at_dca,
            calorimeter_position,
            calorimeter_momentum,
            reaches_calorimeter,
            can_form_pfo,
        })
    }

    fn read_relation(&mut self) -> Result<TrackRelation, EnvError> {
        let kind = read_u8(&mut self.inner)?;
        let a = read_u64(&mut self.inner)?;
        let b = read_u64(&mut self.inner)?;
        match kind {
            RELATION_PARENT_DAUGHTER => Ok(TrackRelation::ParentDaughter(a, b)),
            RELATION_SIBLINGS => Ok(TrackRelation::Siblings(a, b)),
            other => Err(EnvError::format(format!("unknown relation kind {}", other))),
        }
    }
}

impl<R: Read> EventSource for EventFileReader<R> {
    fn next_event(&mut self) -> Result<Option<EventRecord>, EnvError> {
        self.read_event()
    }
}

/// Reads one tag byte, distinguishing a clean end of stream.
fn read_tag<R: Read>(r: &mut R) -> Result<Option<u8>, EnvError> {
    let mut byte = [0u8; 1];
    loop {
        match r.read(&mut byte) {
            Ok(0) => return Ok(None),
            Ok(_) => return Ok(Some(byte[0])),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, EnvError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32<R: Read>(r: &mut R) -> Result<u32, EnvError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(r: &mut R) -> Result<u64, EnvError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, EnvError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn read_vec3<R: Read>(r: &mut R) -> Result<[f64; 3], EnvError> {
    Ok([read_f64(r)?, read_f64(r)?, read_f64(r)?])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_event() -> EventRecord {
        let mut event = EventRecord::new(42);
        event.calo_hits.push(CaloHitRecord {
            position: [1.0, -2.0, 1850.5],
            expected_direction: [0.0, 0.0, 1.0],
            cell_size: 5.0,
            input_energy: 0.12,
            em_energy: 0.11,
            hadronic_energy: 0.14,
            mip_equivalent_energy: 3.0,
            layer: 7,
            kind: HitKind::Hcal,
            time: 1.5,
        });
        event.tracks.push(TrackRecord {
            id: 9,
            d0: 0.01,
            z0: -0.2,
            charge: -1,
            mass: 0.13957,
            momentum_at_dca: [1.0, 2.0, 3.0],
            calorimeter_position: [100.0, 200.0, 1800.0],
            calorimeter_momentum: [0.9, 2.1, 3.0],
            reaches_calorimeter: true,
            can_form_pfo: false,
        });
        event.relations.push(TrackRelation::Siblings(9, 10));
        event
    }

    #[test]
    fn test_write_then_read_two_events() {
        let mut writer = EventFileWriter::new(Vec::new()).unwrap();
        writer.write_event(&sample_event()).unwrap();
        writer.write_event(&EventRecord::new(43)).unwrap();
        assert_eq!(writer.events_written(), 2);
        let bytes = writer.finish().unwrap();

        let mut reader = EventFileReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.read_event().unwrap(), Some(sample_event()));
        assert_eq!(reader.read_event().unwrap(), Some(EventRecord::new(43)));
        assert_eq!(reader.read_event().unwrap(), None);
        assert_eq!(reader.events_read(), 2);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let bytes = b"NOPE\x01\x00\x00\x00".to_vec();
        assert!(matches!(
            EventFileReader::new(Cursor::new(bytes)),
            Err(EnvError::FormatError(_))
        ));
    }

    #[test]
    fn test_truncated_event_rejected() {
        let mut writer = EventFileWriter::new(Vec::new()).unwrap();
        writer.write_event(&sample_event()).unwrap();
        let mut bytes = writer.finish().unwrap();
        bytes.pop(); // drop EVENT_END

        let mut reader = EventFileReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(reader.read_event(), Err(EnvError::FormatError(_))));
    }
}
