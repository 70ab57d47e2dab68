//! The extraction engine: request model, paced interleaving and the
//! pipeline that ties recovery, mixing and the container together.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::codec::CodecRegistry;
use crate::constants::NANOS_PER_MS;
use crate::error::{ExtractError, Result};
use crate::metadata::{MetadataStore, Track};
use crate::mixer::{
    frame_from_rgb, AudioMixer, MediaStream, PassthroughGroup, StreamPacket, VideoLayout,
    VideoMixer,
};
use crate::sink::{self, SinkHints, SinkStatus, CONTENT_TYPE_FLV};
use crate::source::PacketSource;
use crate::timeline::Timeline;

/// When pacing, emission is allowed to run this far ahead of the wall
/// clock so the consumer always has a little buffered media.
pub const PACING_LEAD_NS: i64 = 10 * NANOS_PER_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Audio,
    Video,
}

/// One interleaved output packet in composite time.
#[derive(Debug, Clone)]
pub struct CompositePacket {
    pub kind: PacketKind,
    /// Index into the request's selection (video first, then audio).
    pub track: usize,
    pub payload: Bytes,
    /// Nanoseconds from the window start; nondecreasing across packets.
    pub timestamp_ns: i64,
    pub marker: bool,
}

#[derive(Debug, Clone)]
pub struct VideoSelection {
    pub ssrc: String,
    pub layout: VideoLayout,
}

/// One export: which tracks, where they go on the canvas, the time
/// window, pacing and the output container.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub video: Vec<VideoSelection>,
    pub audio: Vec<String>,
    /// Tracks that only move the timeline zero; their data is not
    /// emitted.
    pub sync: Vec<String>,
    pub background: (u8, u8, u8),
    /// Window start in ms from the timeline zero.
    pub start_ms: i64,
    pub duration_ms: i64,
    /// Content shift applied to every selected track, ms.
    pub shift_ms: i64,
    /// Playback rate against the wall clock; zero or negative means
    /// unthrottled.
    pub speed: f64,
    pub content_type: String,
    pub canvas_size: Option<(u32, u32)>,
    /// Optional still image painted onto the canvas before the first
    /// decoded frame arrives.
    pub first_frame: Option<PathBuf>,
}

impl Default for ExtractionRequest {
    fn default() -> ExtractionRequest {
        ExtractionRequest {
            video: Vec::new(),
            audio: Vec::new(),
            sync: Vec::new(),
            background: (0, 0, 0),
            start_ms: 0,
            duration_ms: 0,
            shift_ms: 0,
            speed: -1.0,
            content_type: CONTENT_TYPE_FLV.to_owned(),
            canvas_size: None,
            first_frame: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Streaming,
    Draining,
    Closed,
}

/// Pulls from one audio-kind and one video-kind source, merges by
/// composite timestamp with video winning ties, enforces the window and
/// optionally throttles emission to the wall clock.
pub struct PacedInterleaver {
    audio: Option<PacketSource>,
    video: Option<PacketSource>,
    pending_audio: Option<StreamPacket>,
    pending_video: Option<StreamPacket>,
    duration_ns: i64,
    speed: f64,
    base: Option<(i64, Instant)>,
    phase: Phase,
}

impl PacedInterleaver {
    pub fn new(
        audio: Option<PacketSource>,
        video: Option<PacketSource>,
        duration_ms: i64,
        speed: f64,
    ) -> PacedInterleaver {
        PacedInterleaver {
            audio,
            video,
            pending_audio: None,
            pending_video: None,
            duration_ns: duration_ms * NANOS_PER_MS,
            speed,
            base: None,
            phase: Phase::Idle,
        }
    }

    /// Refills one lookahead slot, dropping pre-window packets and
    /// retiring the source at the first packet past the window end.
    async fn fill(
        source: &mut Option<PacketSource>,
        slot: &mut Option<StreamPacket>,
        duration_ns: i64,
    ) -> Result<()> {
        while slot.is_none() {
            let Some(src) = source.as_mut() else {
                return Ok(());
            };
            match src.recv().await? {
                Some(packet) if packet.timestamp_ns < 0 => continue,
                Some(packet) if packet.timestamp_ns > duration_ns => {
                    *source = None;
                }
                Some(packet) => *slot = Some(packet),
                None => *source = None,
            }
        }
        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<CompositePacket>> {
        Self::fill(&mut self.audio, &mut self.pending_audio, self.duration_ns).await?;
        Self::fill(&mut self.video, &mut self.pending_video, self.duration_ns).await?;

        let kind = match (&self.pending_audio, &self.pending_video) {
            (None, None) => {
                if self.phase != Phase::Closed {
                    debug!("[extract] both sources exhausted");
                    self.phase = Phase::Closed;
                }
                return Ok(None);
            }
            (Some(a), Some(v)) => {
                self.phase = Phase::Streaming;
                // Equal timestamps emit video first.
                if a.timestamp_ns < v.timestamp_ns {
                    PacketKind::Audio
                } else {
                    PacketKind::Video
                }
            }
            (Some(_), None) => {
                self.phase = Phase::Draining;
                PacketKind::Audio
            }
            (None, Some(_)) => {
                self.phase = Phase::Draining;
                PacketKind::Video
            }
        };

        let packet = match kind {
            PacketKind::Audio => self.pending_audio.take(),
            PacketKind::Video => self.pending_video.take(),
        };
        let Some(packet) = packet else {
            return Ok(None);
        };
        self.pace(packet.timestamp_ns).await;
        Ok(Some(CompositePacket {
            kind,
            track: packet.track,
            payload: packet.payload,
            timestamp_ns: packet.timestamp_ns,
            marker: packet.marker,
        }))
    }

    /// Sleeps until the wall clock catches up with this timestamp at
    /// the requested rate, minus the lead allowance.
    async fn pace(&mut self, timestamp_ns: i64) {
        if self.speed <= 0.0 {
            return;
        }
        let (first_ns, started) = *self
            .base
            .get_or_insert_with(|| (timestamp_ns, Instant::now()));
        let media_ns = (timestamp_ns - first_ns - PACING_LEAD_NS).max(0);
        let target = Duration::from_nanos((media_ns as f64 / self.speed) as u64);
        let elapsed = started.elapsed();
        if target > elapsed {
            tokio::time::sleep(target - elapsed).await;
        }
    }
}

/// Drives one extraction request end to end.
pub struct Extractor<'a> {
    dir: PathBuf,
    store: &'a MetadataStore,
    registry: &'a CodecRegistry,
}

impl<'a> Extractor<'a> {
    pub fn new(
        dir: impl Into<PathBuf>,
        store: &'a MetadataStore,
        registry: &'a CodecRegistry,
    ) -> Extractor<'a> {
        Extractor {
            dir: dir.into(),
            store,
            registry,
        }
    }

    pub async fn extract(
        &self,
        request: &ExtractionRequest,
        out: Box<dyn Write + Send>,
    ) -> Result<()> {
        if request.duration_ms <= 0 {
            return Err(ExtractError::InvalidRequest(format!(
                "bad window duration {}ms",
                request.duration_ms
            )));
        }
        if request.video.is_empty() && request.audio.is_empty() {
            return Err(ExtractError::InvalidRequest("empty selection".to_owned()));
        }
        let mut sink = sink::create(&request.content_type, out)?;
        let raw = sink::is_raw(&request.content_type);

        // Selection order: video tracks first, then audio.
        let mut tracks = Vec::new();
        for selection in &request.video {
            tracks.push(self.store.recover(&self.dir, &selection.ssrc)?);
        }
        for ssrc in &request.audio {
            tracks.push(self.store.recover(&self.dir, ssrc)?);
        }
        let mut sync_tracks = Vec::new();
        for ssrc in &request.sync {
            sync_tracks.push(self.store.recover(&self.dir, ssrc)?);
        }
        let timeline = Timeline::compute(tracks.iter().chain(sync_tracks.iter()))?;
        let offset_of = |track: &Track| timeline.offset_ms(track) - request.shift_ms;

        let n_video = request.video.len();
        let mut canvas = None;
        let video_source = if n_video == 0 {
            None
        } else if raw {
            let group: Vec<(&Track, i64, usize)> = tracks[..n_video]
                .iter()
                .enumerate()
                .map(|(i, t)| (t, offset_of(t), i))
                .collect();
            let mut stream = PassthroughGroup::open(&group)?;
            stream.seek(request.start_ms)?;
            Some(PacketSource::spawn(Box::new(stream)))
        } else {
            let group: Vec<(&Track, i64, usize, VideoLayout)> = tracks[..n_video]
                .iter()
                .enumerate()
                .map(|(i, t)| (t, offset_of(t), i, request.video[i].layout))
                .collect();
            let mut mixer = VideoMixer::open(
                &group,
                self.registry,
                request.canvas_size,
                request.background,
            )?;
            canvas = Some(mixer.canvas_size());
            mixer.seek(request.start_ms)?;
            if let Some(path) = &request.first_frame {
                mixer.fill_frame(&load_still(path)?);
            }
            Some(PacketSource::spawn(Box::new(mixer)))
        };

        let audio_source = if raw {
            if request.audio.is_empty() {
                None
            } else {
                let group: Vec<(&Track, i64, usize)> = tracks[n_video..]
                    .iter()
                    .enumerate()
                    .map(|(i, t)| (t, offset_of(t), n_video + i))
                    .collect();
                let mut stream = PassthroughGroup::open(&group)?;
                stream.seek(request.start_ms)?;
                Some(PacketSource::spawn(Box::new(stream)))
            }
        } else {
            // Mixed containers always carry an audio lane; with nothing
            // selected the mixer plays silence for the whole window.
            let group: Vec<(&Track, i64, usize)> = tracks[n_video..]
                .iter()
                .enumerate()
                .map(|(i, t)| (t, offset_of(t), n_video + i))
                .collect();
            let mut mixer = AudioMixer::open(&group, self.registry)?;
            mixer.seek(request.start_ms)?;
            Some(PacketSource::spawn(Box::new(mixer)))
        };

        let hints = SinkHints {
            duration_ms: request.duration_ms,
            start_ms: timeline.earliest_start_ms() + request.start_ms,
            offset_ms: request.start_ms,
            width: canvas.map(|(w, _)| w),
            height: canvas.map(|(_, h)| h),
            has_audio: audio_source.is_some(),
            has_video: video_source.is_some(),
            tracks,
            video_tracks: n_video,
        };
        sink.start(&hints)?;

        info!(
            "[extract] streaming {} window {}ms+{}ms speed {}",
            request.content_type, request.start_ms, request.duration_ms, request.speed
        );
        let mut interleaver =
            PacedInterleaver::new(audio_source, video_source, request.duration_ms, request.speed);
        let mut emitted = 0u64;
        while let Some(packet) = interleaver.next().await? {
            emitted += 1;
            match sink.write(&packet)? {
                SinkStatus::Continue => {}
                SinkStatus::Done => {
                    // Downstream is gone; stop cleanly at a boundary.
                    info!("[extract] sink closed after {emitted} packets");
                    break;
                }
            }
        }
        sink.finish()?;
        debug!("[extract] finished, {emitted} packets");
        Ok(())
    }
}

fn load_still(path: &Path) -> Result<crate::codec::VideoFrame> {
    let img = image::open(path).map_err(|e| {
        ExtractError::InvalidRequest(format!("unreadable first frame {}: {e}", path.display()))
    })?;
    let rgb = img.to_rgb8();
    Ok(frame_from_rgb(rgb.width(), rgb.height(), rgb.as_raw()))
}
