//! Amplitude-summing audio mixer.
//!
//! Output is fixed-format: 16-bit signed little-endian PCM, mono,
//! 44100 Hz, emitted as 20 ms buffers on the mixer's own clock. The
//! clock starts at zero at every seek, so buffer timestamps are already
//! composite time; constituents are aligned into it sample by sample,
//! with gaps padded as silence and pre-window samples dropped.

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};

use crate::codec::{AudioDecoder, CodecRegistry};
use crate::error::Result;
use crate::metadata::Track;

use super::{Constituent, MediaStream, StreamPacket};

pub const SAMPLE_RATE: u32 = 44100;
pub const SAMPLES_PER_BUFFER: usize = 882;
/// 882 samples at 44100 Hz is exactly 20 ms.
pub const BUFFER_DURATION_NS: i64 = 20_000_000;

const NANOS_PER_SEC: i64 = 1_000_000_000;

struct AudioConstituent {
    inner: Constituent,
    decoder: Box<dyn AudioDecoder>,
    /// Decoded samples not yet mixed, in the output sample clock.
    queue: VecDeque<i16>,
    /// Output-clock index of the first queued sample.
    front: i64,
    /// Decoded packet starting beyond the current fill window. Holding
    /// it back keeps a long silent gap implicit instead of queued as
    /// zeros.
    held: Option<(i64, Vec<i16>)>,
    drained: bool,
}

impl AudioConstituent {
    /// Output-clock sample index of a composite timestamp.
    fn sample_of(ts_ns: i64) -> i64 {
        (ts_ns as i128 * SAMPLE_RATE as i128 / NANOS_PER_SEC as i128) as i64
    }

    /// Pulls and decodes packets until the queue reaches `end` samples
    /// of the output clock, or the track runs out.
    fn fill_to(&mut self, end: i64) -> Result<()> {
        loop {
            if self.front + (self.queue.len() as i64) >= end {
                return Ok(());
            }
            if let Some((at, samples)) = self.held.take() {
                if at >= end {
                    if self.queue.is_empty() {
                        self.front = self.front.max(at);
                    }
                    self.held = Some((at, samples));
                    return Ok(());
                }
                self.append(at, &samples);
                continue;
            }
            if self.drained {
                return Ok(());
            }
            let Some(ts) = self.inner.peek_ts()? else {
                self.drained = true;
                return Ok(());
            };
            let Some(packet) = self.inner.take() else {
                self.drained = true;
                return Ok(());
            };
            let decoded = self.decoder.decode(&packet.payload)?;
            let samples = resample(&decoded, self.decoder.sample_rate());
            self.held = Some((Self::sample_of(ts), samples));
        }
    }

    /// Splices `samples` starting at output-clock index `at`: silence
    /// pads a gap, overlapping or pre-window samples are dropped.
    fn append(&mut self, at: i64, samples: &[i16]) {
        let mut write = self.front + self.queue.len() as i64;
        if self.queue.is_empty() {
            self.front = write.max(at).max(self.front);
            write = self.front;
        }
        let samples = if at < write {
            let skip = (write - at) as usize;
            if skip >= samples.len() {
                return;
            }
            &samples[skip..]
        } else {
            for _ in 0..(at - write) {
                self.queue.push_back(0);
            }
            samples
        };
        self.queue.extend(samples.iter().copied());
    }

    fn discard_until(&mut self, end: i64) {
        while self.front < end && !self.queue.is_empty() {
            self.queue.pop_front();
            self.front += 1;
        }
        if self.queue.is_empty() {
            self.front = self.front.max(end);
        }
    }

    fn finished(&self) -> bool {
        self.drained && self.held.is_none() && self.queue.is_empty()
    }
}

/// Nearest-neighbor rate conversion to the output rate.
fn resample(samples: &[i16], from: u32) -> Vec<i16> {
    if from == SAMPLE_RATE || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * SAMPLE_RATE as u64 / from as u64) as usize;
    (0..out_len)
        .map(|j| samples[(j as u64 * from as u64 / SAMPLE_RATE as u64) as usize])
        .collect()
}

pub struct AudioMixer {
    constituents: Vec<AudioConstituent>,
    /// Index of the next buffer to emit; the buffer covers samples
    /// `[n*882, (n+1)*882)` of the output clock.
    next_buffer: i64,
}

impl AudioMixer {
    /// `tracks` pairs each track with its timeline offset (shift
    /// included) and its index within the request's selection. With no
    /// tracks at all the mixer produces unbounded silence; the caller's
    /// window terminates it.
    pub fn open(
        tracks: &[(&Track, i64, usize)],
        registry: &CodecRegistry,
    ) -> Result<AudioMixer> {
        let mut constituents = Vec::with_capacity(tracks.len());
        for &(track, offset_ms, index) in tracks {
            let payload_type = track.payload_type.unwrap_or(0);
            constituents.push(AudioConstituent {
                inner: Constituent::open(track, offset_ms, index)?,
                decoder: registry.audio_decoder(payload_type)?,
                queue: VecDeque::new(),
                front: 0,
                held: None,
                drained: false,
            });
        }
        Ok(AudioMixer {
            constituents,
            next_buffer: 0,
        })
    }
}

impl MediaStream for AudioMixer {
    fn seek(&mut self, window_start_ms: i64) -> Result<()> {
        for c in &mut self.constituents {
            c.inner.seek(window_start_ms)?;
            c.queue.clear();
            c.front = 0;
            c.held = None;
            c.drained = false;
        }
        self.next_buffer = 0;
        Ok(())
    }

    fn offset_ms(&self) -> i64 {
        self.constituents
            .iter()
            .filter(|c| !c.inner.exhausted)
            .map(|c| c.inner.actual_ms)
            .max()
            .unwrap_or(0)
    }

    fn read_next(&mut self) -> Result<Option<StreamPacket>> {
        let start = self.next_buffer * SAMPLES_PER_BUFFER as i64;
        let end = start + SAMPLES_PER_BUFFER as i64;

        if !self.constituents.is_empty() {
            for c in &mut self.constituents {
                c.fill_to(end)?;
            }
            if self.constituents.iter().all(|c| c.finished()) {
                return Ok(None);
            }
        }

        let mut acc = [0i32; SAMPLES_PER_BUFFER];
        for c in &mut self.constituents {
            for (i, slot) in acc.iter_mut().enumerate() {
                let global = start + i as i64;
                if global >= c.front && global < c.front + c.queue.len() as i64 {
                    *slot += c.queue[(global - c.front) as usize] as i32;
                }
            }
            c.discard_until(end);
        }

        let mut payload = BytesMut::with_capacity(SAMPLES_PER_BUFFER * 2);
        for sample in acc {
            payload.put_i16_le(sample.clamp(i16::MIN as i32, i16::MAX as i32) as i16);
        }

        let timestamp_ns = self.next_buffer * BUFFER_DURATION_NS;
        self.next_buffer += 1;
        Ok(Some(StreamPacket {
            timestamp_ns,
            payload: payload.freeze(),
            marker: true,
            track: 0,
        }))
    }
}
